// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::time::Duration;

use log::info;

/// Where the coordinator's time went. Everything is summed over all rounds
/// since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResamplerTimings {
    /// Splitting batches into shards.
    pub scatter: Duration,
    /// Handing shards to the gridding threads.
    pub dispatch: Duration,
    /// Waiting for the gridding threads to finish.
    pub wait: Duration,
    /// Summing the private grids.
    pub gather: Duration,
    /// Time spent by the caller between resampling calls.
    pub outside: Duration,
    pub num_rounds: usize,
}

impl ResamplerTimings {
    pub fn total(&self) -> Duration {
        self.scatter + self.dispatch + self.wait + self.gather
    }

    pub fn log(&self) {
        info!("Resampler timings over {} rounds:", self.num_rounds);
        info!("  scatter:  {:.3?}", self.scatter);
        info!("  dispatch: {:.3?}", self.dispatch);
        info!("  wait:     {:.3?}", self.wait);
        info!("  gather:   {:.3?}", self.gather);
        info!("  outside:  {:.3?}", self.outside);
    }
}
