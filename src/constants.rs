// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. Geometry should be done in double
precision before converting to a lower precision, if it is ever required.
 */

pub use marlu::constants::VEL_C;
pub use std::f64::consts::TAU;

/// If this environment variable is set to a positive integer, it is used as
/// the number of gridding threads when no thread count was given.
pub const NUM_THREADS_ENV_VAR: &str = "HYPERDRIVE_GRIDDER_NUM_THREADS";

/// The prefix of the names given to gridding worker threads. The thread index
/// is appended.
pub(crate) const WORKER_THREAD_NAME_PREFIX: &str = "gridder";
