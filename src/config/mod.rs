// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resampler configuration.
//!
//! Arguments may come from several places (e.g. a driver's command line and
//! an argument file). They are collected into [`ResamplerArgs`], merged, and
//! then parsed into a [`ResamplerConfig`] which is what a
//! [`Resampler`](crate::Resampler) is made from.

mod error;

pub use error::ConfigError;

use std::{fs::File, io::Read, path::Path, str::FromStr};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::vis::PartitionScheme;

#[derive(Debug, Display, EnumIter, EnumString)]
pub(crate) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

/// Unparsed resampler arguments. Anything not specified gets a default when
/// parsed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResamplerArgs {
    /// The number of gridding threads. If not specified, the
    /// `HYPERDRIVE_GRIDDER_NUM_THREADS` environment variable is used, and if
    /// that isn't set, the number of available CPUs.
    pub num_threads: Option<usize>,

    /// How visibility rows are divided between gridding threads; "balanced"
    /// or "legacy". Default: balanced
    pub partition: Option<PartitionScheme>,

    /// If specified, gridding is blocked into square tiles of this many
    /// pixels a side.
    pub tile_size: Option<usize>,

    /// Log the resampler's timings when it is cleaned up.
    #[serde(default)]
    pub log_timings: bool,
}

impl ResamplerArgs {
    /// Read arguments from a toml or json file. The type of file is determined
    /// by its extension.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<ResamplerArgs, ConfigError> {
        let file = file.as_ref();
        debug!("Attempting to parse argument file {}", file.display());

        let arg_file_type = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        let mut contents = String::new();
        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                File::open(file)?.read_to_string(&mut contents)?;
                toml::from_str(&contents).map_err(|err| ConfigError::Toml {
                    file: file.to_path_buf(),
                    err,
                })
            }

            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                File::open(file)?.read_to_string(&mut contents)?;
                serde_json::from_str(&contents).map_err(|err| ConfigError::Json {
                    file: file.to_path_buf(),
                    err,
                })
            }

            None => Err(ConfigError::UnrecognisedExtension {
                file: file.to_path_buf(),
                valid: ArgFileTypes::iter().join(", "),
            }),
        }
    }

    /// Merge two sets of arguments, preferring `self` where both are given.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub fn merge(self, other: ResamplerArgs) -> ResamplerArgs {
        ResamplerArgs {
            num_threads: self.num_threads.or(other.num_threads),
            partition: self.partition.or(other.partition),
            tile_size: self.tile_size.or(other.tile_size),
            log_timings: self.log_timings || other.log_timings,
        }
    }

    pub fn parse(self) -> Result<ResamplerConfig, ConfigError> {
        debug!("{:#?}", self);

        let ResamplerArgs {
            num_threads,
            partition,
            tile_size,
            log_timings,
        } = self;

        if num_threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if tile_size == Some(0) {
            return Err(ConfigError::ZeroTileSize);
        }

        Ok(ResamplerConfig {
            num_threads,
            partition: partition.unwrap_or_default(),
            tile_size,
            log_timings,
        })
    }
}

/// Validated resampler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResamplerConfig {
    /// `None` means use the environment or the number of CPUs.
    pub num_threads: Option<usize>,
    pub partition: PartitionScheme,
    pub tile_size: Option<usize>,
    pub log_timings: bool,
}
