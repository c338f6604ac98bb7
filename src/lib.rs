// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Multi-threaded convolutional gridding and degridding of radio-interferometric
visibilities.

Calibrated visibilities are resampled onto (and predicted from) a regular
Fourier-plane grid with oversampled convolution functions, using a pool of
gridding threads that each accumulate into their own private grid.
 */

pub mod cf;
pub mod config;
pub mod constants;
pub mod grid;
pub mod resampler;
pub mod vis;

// Re-exports.
pub use cf::{
    diagonal_mueller_map, CfError, CfKey, ConvFunc, ConvFuncTable, ConvFuncTableBuilder,
    MuellerTerm,
};
pub use config::{ConfigError, ResamplerArgs, ResamplerConfig};
pub use grid::{
    add_sumwt, normalise_grid, sumwt_zeros, Grid, GridError, GridFloat, GridShape, Precision,
};
pub use resampler::{ResampleStats, Resampler, ResamplerError, ResamplerTimings};
pub use vis::{PartitionScheme, VisBatch, VisError};

// External re-exports.
pub use marlu::{c32, UVW};
