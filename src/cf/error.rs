// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with convolution functions.

use thiserror::Error;

use super::CfKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CfError {
    #[error("A convolution function's oversampling factor must be at least 1")]
    ZeroSampling,

    #[error("A convolution function has no taps")]
    EmptyKernel,

    #[error("A convolution function of shape {shape:?} is too small for a support of {support} pixels oversampled {sampling} times; at least {needed} taps are needed either side of the origin")]
    KernelTooSmall {
        shape: (usize, usize),
        support: usize,
        sampling: usize,
        needed: usize,
    },

    #[error("A convolution function was supplied twice for {0}")]
    DuplicateKernel(CfKey),

    #[error("The convolution-function table has no kernels")]
    EmptyTable,

    #[error("There is no convolution function for {0}")]
    MissingKernel(CfKey),
}
