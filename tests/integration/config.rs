// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resamplers configured from argument files.

use std::io::Write;

use indoc::indoc;
use tempfile::Builder;

use hyperdrive_gridder::{ConfigError, PartitionScheme, ResamplerArgs};

use super::*;

#[test]
fn test_resampler_from_arg_file() {
    init_logging();
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(
        indoc! {r#"
            num-threads = 2
            partition = "legacy"
            tile-size = 8
            log-timings = true
        "#}
        .as_bytes(),
    )
    .unwrap();
    file.flush().unwrap();

    // Command-line arguments win over the file.
    let cli_args = ResamplerArgs {
        num_threads: Some(3),
        ..Default::default()
    };
    let config = cli_args
        .merge(ResamplerArgs::from_file(file.path()).unwrap())
        .parse()
        .unwrap();
    assert_eq!(config.num_threads, Some(3));
    assert_eq!(config.tile_size, Some(8));

    let mut resampler = Resampler::<f64>::with_config(&config);
    assert_eq!(resampler.num_threads(), 3);
    assert_eq!(resampler.partition_scheme(), PartitionScheme::Legacy);

    resampler.set_params([1.0, 1.0, 0.0], [16.0, 16.0, 0.0]);
    resampler.set_maps(vec![Some(0)], vec![Some(0)]);
    resampler.set_cf_maps(diagonal_mueller_map(1), diagonal_mueller_map(1));
    resampler.set_conv_func(Arc::new(gaussian_table()));
    let batch = point_source_batch(40, 0.02, 0.0);
    let stats = resampler.data_to_grid(SHAPE, &batch, false).unwrap();
    assert!(stats.num_resampled > 0);
    assert!(resampler.timings().num_rounds > 0);
}

#[test]
fn test_unusable_arg_file() {
    let file = Builder::new().suffix(".txt").tempfile().unwrap();
    let result = ResamplerArgs::from_file(file.path());
    assert!(matches!(
        result,
        Err(ConfigError::UnrecognisedExtension { .. })
    ));
}
