// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with visibility batches.

use std::ops::Range;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisError {
    #[error("The visibility {array} array has shape {got:?}, but {expected:?} was expected")]
    ShapeMismatch {
        array: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("The active channel range {range:?} doesn't fit in the {num_chans} channels of the batch")]
    BadActiveChannels {
        range: Range<usize>,
        num_chans: usize,
    },

    #[error("Cannot partition visibility rows into 0 parts")]
    ZeroParts,
}
