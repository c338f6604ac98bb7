// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! What the gridding threads are sent, what they send back, and their loop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use log::trace;
use marlu::c32;
use ndarray::{prelude::*, RawArrayViewMut};
use scopeguard::defer_on_unwind;
use strum_macros::Display;

use super::{kernel::ResampleStats, state::SharedState, ResamplerError, VisResamplerKernel};
use crate::{
    grid::{sumwt_zeros, Grid, GridError, GridFloat, GridShape},
    vis::VisShard,
};

/// The kind of work done in a round. Every thread does the same kind.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkKind {
    #[strum(serialize = "grid")]
    Grid,

    #[strum(serialize = "degrid")]
    Degrid,

    #[strum(serialize = "residual")]
    Residual,

    #[strum(serialize = "none")]
    None,
}

/// One thread's part of a round.
pub(crate) enum Work<F: GridFloat> {
    Grid {
        shard: VisShard,
        shape: GridShape,
        do_psf: bool,
    },

    Degrid {
        shard: VisShard,
        grid: Arc<Grid<F>>,
        out: OutRows,
    },

    Residual {
        shard: VisShard,
        grid: Arc<Grid<F>>,
        out: OutRows,
    },

    None,
}

impl<F: GridFloat> Work<F> {
    pub(crate) fn kind(&self) -> WorkKind {
        match self {
            Work::Grid { .. } => WorkKind::Grid,
            Work::Degrid { .. } => WorkKind::Degrid,
            Work::Residual { .. } => WorkKind::Residual,
            Work::None => WorkKind::None,
        }
    }
}

pub(crate) enum WorkerMessage<F: GridFloat> {
    Round {
        state: Arc<SharedState>,
        work: Work<F>,
    },

    Exit,
}

pub(crate) enum WorkerOutput {
    Gridded(ResampleStats),

    Degridded(ResampleStats),

    Idle,
}

/// One thread's rows of the caller's degridding output, written in place.
pub(crate) struct OutRows(RawArrayViewMut<c32, Ix3>);

// The coordinator hands each thread disjoint rows, and doesn't return from a
// round until every thread that was sent rows has reported back.
unsafe impl Send for OutRows {}

impl OutRows {
    /// # Safety
    ///
    /// `rows` must stay borrowed until the thread given this has reported, and
    /// no other [`OutRows`] may overlap it.
    pub(crate) unsafe fn new(mut rows: ArrayViewMut3<c32>) -> OutRows {
        OutRows(rows.raw_view_mut())
    }

    fn into_view_mut<'a>(self) -> ArrayViewMut3<'a, c32> {
        // Safety: see `OutRows::new`.
        unsafe { self.0.deref_into_view_mut() }
    }
}

/// Sent by a thread once it has finished a round (or panicked during one).
pub(crate) struct WorkerReport {
    pub(crate) thread: usize,
    pub(crate) result: Result<WorkerOutput, ResamplerError>,
    pub(crate) elapsed: Duration,
}

/// A thread's private accumulators. These are only allocated once the thread
/// grids something.
#[derive(Debug)]
pub(crate) struct PrivateBuffers<F: GridFloat> {
    pub(crate) grid: Grid<F>,
    pub(crate) sumwt: Array2<F>,
}

impl<F: GridFloat> PrivateBuffers<F> {
    fn zeros(shape: GridShape) -> PrivateBuffers<F> {
        PrivateBuffers {
            grid: Grid::zeros(shape),
            sumwt: sumwt_zeros(shape),
        }
    }
}

pub(crate) type SharedBuffers<F> = Arc<Mutex<Option<PrivateBuffers<F>>>>;

/// The body of a gridding thread. Rounds are run until an exit message
/// arrives or the coordinator goes away.
pub(crate) fn worker_loop<F: GridFloat>(
    thread: usize,
    rx: Receiver<WorkerMessage<F>>,
    tx: Sender<WorkerReport>,
    mut kernel: VisResamplerKernel,
    buffers: SharedBuffers<F>,
    abort: Arc<AtomicCell<bool>>,
) {
    for message in rx.iter() {
        let (state, work) = match message {
            WorkerMessage::Round { state, work } => (state, work),
            WorkerMessage::Exit => break,
        };
        let kind = work.kind();
        let start = Instant::now();

        let result = {
            // If a panic happens, stop the other threads and make sure the
            // coordinator isn't left waiting.
            defer_on_unwind! {
                abort.store(true);
                let _ = tx.send(WorkerReport {
                    thread,
                    result: Err(ResamplerError::WorkerPanicked { thread }),
                    elapsed: start.elapsed(),
                });
            }
            do_work(thread, &mut kernel, &state, work, &buffers, &abort)
        };
        if result.is_err() {
            abort.store(true);
        }
        // Release our hold on the state before the coordinator can change it.
        drop(state);

        let elapsed = start.elapsed();
        trace!("Gridding thread {thread} finished '{kind}' work in {elapsed:?}");
        let report = WorkerReport {
            thread,
            result,
            elapsed,
        };
        if tx.send(report).is_err() {
            break;
        }
    }
    trace!("Gridding thread {thread} exiting");
}

fn do_work<F: GridFloat>(
    thread: usize,
    kernel: &mut VisResamplerKernel,
    state: &SharedState,
    work: Work<F>,
    buffers: &Mutex<Option<PrivateBuffers<F>>>,
    abort: &AtomicCell<bool>,
) -> Result<WorkerOutput, ResamplerError> {
    match work {
        Work::None => Ok(WorkerOutput::Idle),

        Work::Grid {
            shard,
            shape,
            do_psf,
        } => {
            if shard.is_empty() {
                return Ok(WorkerOutput::Gridded(ResampleStats::default()));
            }
            let mut buffers = buffers
                .lock()
                .map_err(|_| ResamplerError::PoisonedBuffers { thread })?;
            let buffers = buffers.get_or_insert_with(|| PrivateBuffers::zeros(shape));
            if buffers.grid.shape() != shape {
                return Err(GridError::ShapeMismatch {
                    expected: buffers.grid.shape(),
                    got: shape,
                }
                .into());
            }
            let stats = kernel.grid_shard(
                state,
                &shard,
                do_psf,
                &mut buffers.grid,
                &mut buffers.sumwt,
                abort,
            )?;
            Ok(WorkerOutput::Gridded(stats))
        }

        Work::Degrid { shard, grid, out } => {
            let stats =
                kernel.degrid_shard(state, &shard, &grid, out.into_view_mut(), false, abort)?;
            Ok(WorkerOutput::Degridded(stats))
        }

        Work::Residual { shard, grid, out } => {
            let stats =
                kernel.degrid_shard(state, &shard, &grid, out.into_view_mut(), true, abort)?;
            Ok(WorkerOutput::Degridded(stats))
        }
    }
}
