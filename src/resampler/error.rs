// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with resampling visibilities.

use thiserror::Error;

use crate::{cf::CfError, grid::GridError, vis::VisError};

#[derive(Error, Debug)]
pub enum ResamplerError {
    #[error("The {map} map has {expected} channels, but the visibilities have {got}")]
    ChannelCountMismatch {
        map: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("The {map} map has {expected} correlations, but the visibilities have {got}")]
    CorrelationCountMismatch {
        map: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Correlation {corr} has a Mueller term using correlation {term_corr}, but there are only {num_corrs} correlations")]
    BadMuellerTerm {
        corr: usize,
        term_corr: usize,
        num_corrs: usize,
    },

    #[error("No frequency map was set for spectral window {spw} (conjugate frequencies: {conjugate})")]
    MissingFreqMap { spw: usize, conjugate: bool },

    #[error("No convolution functions have been set")]
    NoConvFunc,

    #[error("The degridded-visibility array has shape {got:?}, but {expected:?} was expected")]
    OutputShapeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("The resampler has no gridding threads; call set_num_threads first")]
    NoWorkers,

    #[error("Gridding thread {thread} panicked")]
    WorkerPanicked { thread: usize },

    #[error("Gridding thread {thread} stopped responding")]
    WorkerDisconnected { thread: usize },

    #[error("Every gridding thread has exited")]
    PoolExited,

    #[error("The buffers of gridding thread {thread} were poisoned by an earlier panic")]
    PoisonedBuffers { thread: usize },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Cf(#[from] CfError),

    #[error(transparent)]
    Vis(#[from] VisError),
}
