// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-threaded convolutional gridding and degridding.
//!
//! A [`Resampler`] owns a fixed pool of gridding threads. Each call splits a
//! [`VisBatch`] into one row-contiguous shard per thread, hands every thread
//! the same kind of work, and blocks until all of them are done. Gridded
//! visibilities stay in per-thread private grids until [`Resampler::gather_grids`]
//! sums them into a caller-owned grid; nothing is locked in the hot loop.

mod error;
mod footprint;
mod kernel;
mod state;
mod timings;
mod worker;

pub use error::ResamplerError;
pub use kernel::ResampleStats;
pub use timings::ResamplerTimings;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use log::{debug, trace, warn};
use marlu::c32;
use ndarray::prelude::*;

use kernel::VisResamplerKernel;
use state::{FreqMaps, SharedState};
use worker::{
    worker_loop, OutRows, SharedBuffers, Work, WorkerMessage, WorkerOutput, WorkerReport,
};

use crate::{
    cf::{ConvFuncTable, MuellerTerm},
    config::ResamplerConfig,
    constants::{NUM_THREADS_ENV_VAR, WORKER_THREAD_NAME_PREFIX},
    grid::{add_sumwt, Grid, GridError, GridFloat, GridShape},
    vis::{PartitionScheme, VisBatch, VisShard},
};

struct WorkerHandle<F: GridFloat> {
    tx: Sender<WorkerMessage<F>>,
    handle: Option<JoinHandle<()>>,
    buffers: SharedBuffers<F>,
}

/// The gridding coordinator. Grids and sums of weights accumulate in the
/// precision `F`.
pub struct Resampler<F: GridFloat> {
    workers: Vec<WorkerHandle<F>>,
    rx_report: Receiver<WorkerReport>,
    /// Set when a thread fails so that the others can abandon their shards.
    abort: Arc<AtomicCell<bool>>,
    state: Arc<SharedState>,
    /// Every thread gets a clone of this.
    prototype: VisResamplerKernel,
    partition: PartitionScheme,
    /// The shape of the private grids, if anything has been gridded since
    /// they were last reset.
    grid_shape: Option<GridShape>,
    timings: ResamplerTimings,
    last_call_end: Option<Instant>,
    in_flight: bool,
    log_timings_on_cleanup: bool,
}

static_assertions::assert_impl_all!(Resampler<f32>: Send);
static_assertions::assert_impl_all!(Resampler<f64>: Send);

impl<F: GridFloat> Resampler<F> {
    /// Start a resampler. If `num_threads` is `None`, the
    /// `HYPERDRIVE_GRIDDER_NUM_THREADS` environment variable is used, and if
    /// that isn't set, the number of available CPUs. At least one thread is
    /// always started.
    pub fn new(num_threads: Option<usize>) -> Resampler<F> {
        let (_, rx_report) = unbounded();
        let mut resampler = Resampler {
            workers: vec![],
            rx_report,
            abort: Arc::new(AtomicCell::new(false)),
            state: Arc::new(SharedState::default()),
            prototype: VisResamplerKernel::new(),
            partition: PartitionScheme::default(),
            grid_shape: None,
            timings: ResamplerTimings::default(),
            last_call_end: None,
            in_flight: false,
            log_timings_on_cleanup: false,
        };
        let num_threads = num_threads.unwrap_or_else(default_num_threads).max(1);
        resampler.spawn_workers(num_threads);
        resampler
    }

    pub fn with_config(config: &ResamplerConfig) -> Resampler<F> {
        let mut resampler = Resampler::new(config.num_threads);
        resampler.partition = config.partition;
        resampler.log_timings_on_cleanup = config.log_timings;
        if config.tile_size.is_some() {
            resampler.set_tile_size(config.tile_size);
        }
        resampler
    }

    fn spawn_workers(&mut self, num_threads: usize) {
        debug_assert!(self.workers.is_empty());
        debug!(
            "Starting {num_threads} gridding threads ({} precision)",
            F::PRECISION
        );
        let (tx_report, rx_report) = unbounded();
        self.rx_report = rx_report;
        self.abort.store(false);

        self.workers = (0..num_threads)
            .map(|thread| {
                let (tx, rx) = unbounded();
                let buffers: SharedBuffers<F> = Arc::new(Mutex::new(None));
                let handle = {
                    let tx_report = tx_report.clone();
                    let kernel = self.prototype.clone();
                    let buffers = Arc::clone(&buffers);
                    let abort = Arc::clone(&self.abort);
                    thread::Builder::new()
                        .name(format!("{WORKER_THREAD_NAME_PREFIX}-{thread}"))
                        .spawn(move || worker_loop(thread, rx, tx_report, kernel, buffers, abort))
                        .expect("OS can create threads")
                };
                WorkerHandle {
                    tx,
                    handle: Some(handle),
                    buffers,
                }
            })
            .collect();
    }

    /// The number of gridding threads. This is 0 only after
    /// [`Resampler::cleanup`].
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Change the number of gridding threads. Any private grids are
    /// discarded; gather them first. 0 is equivalent to
    /// [`Resampler::cleanup`]. If any thread has died, the pool is restarted
    /// even if the number of threads doesn't change.
    pub fn set_num_threads(&mut self, num_threads: usize) {
        debug_assert!(!self.in_flight);
        let all_alive = self.workers.iter().all(|w| {
            w.handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
        });
        if num_threads == self.workers.len() && all_alive {
            return;
        }
        self.stop_workers();
        self.grid_shape = None;
        if num_threads > 0 {
            self.spawn_workers(num_threads);
        }
    }

    /// Set how `(u, v, w)` \[wavelengths\] become grid positions:
    /// `x = scale[0] * u + offset[0]`, `y = scale[1] * v + offset[1]`, and the
    /// w-plane index is `round(sqrt(|scale[2] * w|) + offset[2])`.
    pub fn set_params(&mut self, uvw_scale: [f64; 3], offset: [f64; 3]) {
        debug_assert!(!self.in_flight);
        let state = Arc::make_mut(&mut self.state);
        state.uvw_scale = uvw_scale;
        state.offset = offset;
        debug!("Resampler uvw scale {uvw_scale:?}, offset {offset:?}");
    }

    /// Set the visibility-channel to grid-channel map and the
    /// visibility-correlation to grid-polarisation map. `None` entries are
    /// dropped.
    pub fn set_maps(&mut self, chan_map: Vec<Option<usize>>, pol_map: Vec<Option<usize>>) {
        debug_assert!(!self.in_flight);
        let state = Arc::make_mut(&mut self.state);
        debug!(
            "Resampler maps: {} channels, {} correlations",
            chan_map.len(),
            pol_map.len()
        );
        state.chan_map = chan_map;
        state.pol_map = pol_map;
    }

    /// Set the Mueller terms used for each visibility correlation, for normal
    /// and conjugate-frequency batches.
    pub fn set_cf_maps(
        &mut self,
        cf_map: Vec<Vec<MuellerTerm>>,
        conj_cf_map: Vec<Vec<MuellerTerm>>,
    ) {
        debug_assert!(!self.in_flight);
        let state = Arc::make_mut(&mut self.state);
        state.cf_map = cf_map;
        state.conj_cf_map = conj_cf_map;
    }

    pub fn set_conv_func(&mut self, conv_func: Arc<ConvFuncTable>) {
        debug_assert!(!self.in_flight);
        debug!(
            "Resampler convolution functions: {} freqs, {} w-planes, max support {}",
            conv_func.num_freqs(),
            conv_func.num_w_planes(),
            conv_func.max_support()
        );
        Arc::make_mut(&mut self.state).conv_func = Some(conv_func);
    }

    /// Set the maps from (spectral window, visibility channel) to CF frequency
    /// index. Without these, every channel uses the first CF frequency.
    pub fn set_freq_maps(
        &mut self,
        freq_map: HashMap<usize, Vec<usize>>,
        conj_freq_map: HashMap<usize, Vec<usize>>,
    ) {
        debug_assert!(!self.in_flight);
        Arc::make_mut(&mut self.state).freq_maps = Some(FreqMaps {
            map: freq_map,
            conj_map: conj_freq_map,
        });
    }

    /// Block gridding into square tiles of this many pixels a side. This
    /// doesn't change any results.
    pub fn set_tile_size(&mut self, tile_size: Option<usize>) {
        debug_assert!(!self.in_flight);
        Arc::make_mut(&mut self.state).tile_size = tile_size;
    }

    pub fn set_partition_scheme(&mut self, partition: PartitionScheme) {
        debug_assert!(!self.in_flight);
        self.partition = partition;
    }

    pub fn partition_scheme(&self) -> PartitionScheme {
        self.partition
    }

    /// The shape of the private grids, if anything has been gridded since
    /// they were last reset.
    pub fn grid_shape(&self) -> Option<GridShape> {
        self.grid_shape
    }

    /// Grid a batch of visibilities into the private grids. Results stay there
    /// until [`Resampler::gather_grids`]. If `do_psf` is true, the imaging
    /// weights are gridded instead of the visibilities.
    pub fn data_to_grid(
        &mut self,
        shape: GridShape,
        batch: &VisBatch,
        do_psf: bool,
    ) -> Result<ResampleStats, ResamplerError> {
        self.state.validate(batch)?;
        if let Some(current) = self.grid_shape {
            if current != shape {
                return Err(GridError::ShapeMismatch {
                    expected: current,
                    got: shape,
                }
                .into());
            }
        }
        let works = self.scatter(batch, |shard| Work::Grid {
            shard,
            shape,
            do_psf,
        })?;
        self.grid_shape = Some(shape);
        let stats = self
            .run_round(works)?
            .into_iter()
            .fold(ResampleStats::default(), |mut acc, output| {
                if let WorkerOutput::Gridded(stats) = output {
                    acc += stats;
                }
                acc
            });
        warn_on_misses(&stats);
        Ok(stats)
    }

    /// Predict visibilities from a grid, overwriting `out` (which is shaped
    /// like the batch's visibilities). Flagged visibilities are set to zero.
    pub fn grid_to_data(
        &mut self,
        batch: &VisBatch,
        grid: &Arc<Grid<F>>,
        out: ArrayViewMut3<c32>,
    ) -> Result<ResampleStats, ResamplerError> {
        self.degrid(batch, grid, out, false)
    }

    /// Write `observed - predicted` into `out` (which is shaped like the
    /// batch's visibilities). Flagged visibilities are set to zero.
    pub fn compute_residuals(
        &mut self,
        batch: &VisBatch,
        grid: &Arc<Grid<F>>,
        out: ArrayViewMut3<c32>,
    ) -> Result<ResampleStats, ResamplerError> {
        self.degrid(batch, grid, out, true)
    }

    fn degrid(
        &mut self,
        batch: &VisBatch,
        grid: &Arc<Grid<F>>,
        mut out: ArrayViewMut3<c32>,
        residual: bool,
    ) -> Result<ResampleStats, ResamplerError> {
        self.state.validate(batch)?;
        if out.dim() != batch.vis_dim() {
            return Err(ResamplerError::OutputShapeMismatch {
                expected: batch.vis_dim(),
                got: out.dim(),
            });
        }

        let works = self.scatter(batch, |shard| {
            let grid = Arc::clone(grid);
            // Safety: shards are disjoint, and `run_round` doesn't return
            // until every thread that was sent work has reported.
            let out = unsafe { OutRows::new(out.slice_mut(s![shard.rows.clone(), .., ..])) };
            if residual {
                Work::Residual { shard, grid, out }
            } else {
                Work::Degrid { shard, grid, out }
            }
        })?;
        let stats = self
            .run_round(works)?
            .into_iter()
            .fold(ResampleStats::default(), |mut acc, output| {
                if let WorkerOutput::Degridded(stats) = output {
                    acc += stats;
                }
                acc
            });
        warn_on_misses(&stats);
        Ok(stats)
    }

    /// Split a batch into one shard per thread and wrap each in work.
    fn scatter<W>(
        &mut self,
        batch: &VisBatch,
        mut make_work: W,
    ) -> Result<Vec<Work<F>>, ResamplerError>
    where
        W: FnMut(VisShard) -> Work<F>,
    {
        let start = Instant::now();
        if let Some(end) = self.last_call_end {
            self.timings.outside += start.duration_since(end);
        }
        if self.workers.is_empty() {
            return Err(ResamplerError::NoWorkers);
        }
        let works = batch
            .shards(self.partition, self.workers.len())?
            .into_iter()
            .map(|shard| {
                if shard.is_empty() {
                    Work::None
                } else {
                    make_work(shard)
                }
            })
            .collect();
        self.timings.scatter += start.elapsed();
        Ok(works)
    }

    /// Hand every thread its work and wait for all of them to finish.
    fn run_round(&mut self, works: Vec<Work<F>>) -> Result<Vec<WorkerOutput>, ResamplerError> {
        debug_assert!(!self.in_flight);
        debug_assert_eq!(works.len(), self.workers.len());
        self.in_flight = true;

        let start = Instant::now();
        let mut first_error = None;
        let mut num_sent = 0;
        for (thread, (worker, work)) in self.workers.iter().zip(works).enumerate() {
            let message = WorkerMessage::Round {
                state: Arc::clone(&self.state),
                work,
            };
            match worker.tx.send(message) {
                Ok(()) => num_sent += 1,
                // The thread has gone, probably because it panicked earlier.
                Err(_) => {
                    first_error.get_or_insert(ResamplerError::WorkerDisconnected { thread });
                }
            }
        }
        let dispatched = Instant::now();
        self.timings.dispatch += dispatched - start;

        let mut outputs = Vec::with_capacity(num_sent);
        for _ in 0..num_sent {
            match self.rx_report.recv() {
                Ok(WorkerReport {
                    thread,
                    result,
                    elapsed,
                }) => {
                    trace!("Gridding thread {thread} reported after {elapsed:?}");
                    match result {
                        Ok(output) => outputs.push(output),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(_) => {
                    first_error.get_or_insert(ResamplerError::PoolExited);
                    break;
                }
            }
        }
        let end = Instant::now();
        self.timings.wait += end - dispatched;
        self.timings.num_rounds += 1;
        self.last_call_end = Some(end);

        self.abort.store(false);
        self.in_flight = false;
        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    /// Add the private grids and sums of weights into `out_grid` and
    /// `out_sumwt`. The outputs are accumulated into, not overwritten, so
    /// gathering twice without zeroing them counts everything twice. The
    /// private grids are left as they are; see [`Resampler::reset_grids`].
    pub fn gather_grids(
        &mut self,
        out_grid: &mut Grid<F>,
        mut out_sumwt: ArrayViewMut2<F>,
    ) -> Result<(), ResamplerError> {
        debug_assert!(!self.in_flight);
        let start = Instant::now();
        let shape = out_grid.shape();
        if let Some(current) = self.grid_shape {
            if current != shape {
                return Err(GridError::ShapeMismatch {
                    expected: current,
                    got: shape,
                }
                .into());
            }
        }
        if out_sumwt.dim() != shape.sumwt_dim() {
            return Err(GridError::SumOfWeightsShapeMismatch {
                expected: shape.sumwt_dim(),
                got: out_sumwt.dim(),
            }
            .into());
        }

        for (thread, worker) in self.workers.iter().enumerate() {
            let buffers = worker
                .buffers
                .lock()
                .map_err(|_| ResamplerError::PoisonedBuffers { thread })?;
            if let Some(buffers) = buffers.as_ref() {
                out_grid.add_assign(&buffers.grid)?;
                add_sumwt(out_sumwt.view_mut(), buffers.sumwt.view())?;
            }
        }
        self.timings.gather += start.elapsed();
        Ok(())
    }

    /// Discard the private grids, e.g. at the start of a major cycle. The next
    /// [`Resampler::data_to_grid`] may use a different grid shape.
    pub fn reset_grids(&mut self) -> Result<(), ResamplerError> {
        debug_assert!(!self.in_flight);
        for (thread, worker) in self.workers.iter().enumerate() {
            *worker
                .buffers
                .lock()
                .map_err(|_| ResamplerError::PoisonedBuffers { thread })? = None;
        }
        self.grid_shape = None;
        Ok(())
    }

    pub fn timings(&self) -> &ResamplerTimings {
        &self.timings
    }

    pub fn reset_timings(&mut self) {
        self.timings = ResamplerTimings::default();
        self.last_call_end = None;
    }

    pub fn log_timings(&self) {
        self.timings.log();
    }

    /// Stop and join all gridding threads and drop their buffers. The
    /// resampler can only be used again after [`Resampler::set_num_threads`].
    pub fn cleanup(&mut self) {
        debug_assert!(!self.in_flight);
        if self.workers.is_empty() {
            return;
        }
        self.stop_workers();
        self.grid_shape = None;
        if self.log_timings_on_cleanup {
            self.log_timings();
        }
    }

    fn stop_workers(&mut self) {
        debug!("Stopping {} gridding threads", self.workers.len());
        for worker in &self.workers {
            // A thread that has already gone has nothing to stop.
            let _ = worker.tx.send(WorkerMessage::Exit);
        }
        for (thread, mut worker) in self.workers.drain(..).enumerate() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("Gridding thread {thread} had panicked");
                }
            }
        }
    }
}

impl<F: GridFloat> Drop for Resampler<F> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn warn_on_misses(stats: &ResampleStats) {
    if stats.num_beyond_w_planes > 0 {
        warn!(
            "{} visibilities were dropped because their w-planes are beyond the convolution functions",
            stats.num_beyond_w_planes
        );
    }
}

/// The number of gridding threads to use when none is specified.
fn default_num_threads() -> usize {
    let num_cpus = || {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    };
    match std::env::var(NUM_THREADS_ENV_VAR) {
        Ok(s) => match s.trim().parse::<usize>() {
            Ok(n) => n.max(1),
            Err(_) => {
                warn!("Couldn't parse {NUM_THREADS_ENV_VAR}='{s}' as a number of threads; using the number of CPUs");
                num_cpus()
            }
        },
        Err(_) => num_cpus(),
    }
}
