// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with grids and sums of weights.

use thiserror::Error;

use super::GridShape;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GridError {
    #[error("Grid shapes don't match; expected {expected}, got {got}")]
    ShapeMismatch { expected: GridShape, got: GridShape },

    #[error("Sum-of-weights shapes don't match; expected {expected:?} (pols, chans), got {got:?}")]
    SumOfWeightsShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("The sum of weights for polarisation {pol} and channel {chan} is zero; cannot normalise this plane")]
    ZeroSumOfWeights { pol: usize, chan: usize },
}
