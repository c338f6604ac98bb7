// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolution functions (CFs) and the table that holds them.
//!
//! The construction of the CFs themselves (W-term and A-term synthesis) is
//! done elsewhere; this module only stores the oversampled kernels and hands
//! them out to the gridding threads. A [`ConvFuncTable`] can only be made by
//! freezing a [`ConvFuncTableBuilder`], and it has no interior mutability, so
//! once it is shared (usually via an [`Arc`](std::sync::Arc)) every thread can
//! read it without locking.

mod error;
mod phase_grad;

pub use error::CfError;
pub(crate) use phase_grad::PhaseGradCache;

use std::fmt::Display;

use log::debug;
use marlu::c32;
use ndarray::{prelude::*, ShapeBuilder};

/// Where a kernel lives in a [`ConvFuncTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfKey {
    /// The index into the CF frequencies (not a visibility channel index; see
    /// the resampler's frequency maps).
    pub freq: usize,
    /// The w-plane index.
    pub w: usize,
    /// The Mueller-matrix row.
    pub mueller_row: usize,
}

impl CfKey {
    pub fn new(freq: usize, w: usize, mueller_row: usize) -> CfKey {
        CfKey {
            freq,
            w,
            mueller_row,
        }
    }
}

impl Display for CfKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "freq index {}, w-plane {}, Mueller row {}",
            self.freq, self.w, self.mueller_row
        )
    }
}

/// One term of a (possibly full) Mueller matrix: the visibility correlation
/// `corr` is multiplied by the kernel of Mueller row `mueller_row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MuellerTerm {
    pub mueller_row: usize,
    pub corr: usize,
}

impl MuellerTerm {
    pub fn new(mueller_row: usize, corr: usize) -> MuellerTerm {
        MuellerTerm { mueller_row, corr }
    }
}

/// Get Mueller maps where each correlation only uses its own kernel row, i.e.
/// there is no leakage between correlations.
pub fn diagonal_mueller_map(num_corrs: usize) -> Vec<Vec<MuellerTerm>> {
    (0..num_corrs)
        .map(|corr| vec![MuellerTerm::new(corr, corr)])
        .collect()
}

/// An oversampled, 2-D convolution kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvFunc {
    /// Indexed `[x, y]`, column major.
    taps: Array2<c32>,
    /// The number of taps per output-grid pixel.
    sampling: usize,
    /// The support radius in output-grid pixels.
    support: usize,
    origin: (usize, usize),
}

impl ConvFunc {
    /// Make a new kernel. `taps` is indexed `[x, y]`, and its origin (the tap
    /// corresponding to zero offset) is at `((nx - 1) / 2, (ny - 1) / 2)`.
    pub fn new(taps: Array2<c32>, sampling: usize, support: usize) -> Result<ConvFunc, CfError> {
        if sampling == 0 {
            return Err(CfError::ZeroSampling);
        }
        let (nx, ny) = taps.dim();
        if nx == 0 || ny == 0 {
            return Err(CfError::EmptyKernel);
        }
        let origin = ((nx - 1) / 2, (ny - 1) / 2);
        let needed = support * sampling;
        if origin.0 < needed
            || nx - 1 - origin.0 < needed
            || origin.1 < needed
            || ny - 1 - origin.1 < needed
        {
            return Err(CfError::KernelTooSmall {
                shape: (nx, ny),
                support,
                sampling,
                needed,
            });
        }

        let taps = if taps.t().is_standard_layout() {
            taps
        } else {
            let mut t = Array2::zeros((nx, ny).f());
            t.assign(&taps);
            t
        };

        Ok(ConvFunc {
            taps,
            sampling,
            support,
            origin,
        })
    }

    /// A single-tap kernel with a value of 1. Gridding with this puts each
    /// visibility into exactly one grid cell.
    pub fn single_tap() -> ConvFunc {
        ConvFunc {
            taps: Array2::from_elem((1, 1).f(), c32::new(1.0, 0.0)),
            sampling: 1,
            support: 0,
            origin: (0, 0),
        }
    }

    pub fn taps(&self) -> ArrayView2<c32> {
        self.taps.view()
    }

    /// The taps in memory order; the tap `[x, y]` is at `x + y * nx`.
    pub(crate) fn taps_slice(&self) -> &[c32] {
        self.taps
            .as_slice_memory_order()
            .expect("taps are contiguous")
    }

    pub fn shape(&self) -> (usize, usize) {
        self.taps.dim()
    }

    pub fn sampling(&self) -> usize {
        self.sampling
    }

    pub fn support(&self) -> usize {
        self.support
    }

    pub fn origin(&self) -> (usize, usize) {
        self.origin
    }
}

/// A kernel handed out by a [`ConvFuncTable`]. When `conjugate` is true, the
/// taps must be conjugated before use (the visibility had a negative w).
#[derive(Debug, Clone, Copy)]
pub struct CfRef<'a> {
    pub cf: &'a ConvFunc,
    pub conjugate: bool,
}

/// Collects kernels before freezing them into a [`ConvFuncTable`].
#[derive(Debug, Default)]
pub struct ConvFuncTableBuilder {
    kernels: Vec<(CfKey, ConvFunc)>,
}

impl ConvFuncTableBuilder {
    pub fn new() -> ConvFuncTableBuilder {
        ConvFuncTableBuilder::default()
    }

    pub fn insert(&mut self, key: CfKey, cf: ConvFunc) -> Result<&mut Self, CfError> {
        if self.kernels.iter().any(|(k, _)| *k == key) {
            return Err(CfError::DuplicateKernel(key));
        }
        self.kernels.push((key, cf));
        Ok(self)
    }

    /// Freeze the kernels into a table. Keys need not be dense; any slot that
    /// was not filled is reported as missing when it is asked for.
    pub fn build(self) -> Result<ConvFuncTable, CfError> {
        if self.kernels.is_empty() {
            return Err(CfError::EmptyTable);
        }
        let num_freqs = self.kernels.iter().map(|(k, _)| k.freq).max().unwrap_or(0) + 1;
        let num_w_planes = self.kernels.iter().map(|(k, _)| k.w).max().unwrap_or(0) + 1;
        let num_mueller_rows = self
            .kernels
            .iter()
            .map(|(k, _)| k.mueller_row)
            .max()
            .unwrap_or(0)
            + 1;

        let mut kernels = vec![None; num_freqs * num_w_planes * num_mueller_rows];
        let num_kernels = self.kernels.len();
        for (key, cf) in self.kernels {
            let i = (key.freq * num_w_planes + key.w) * num_mueller_rows + key.mueller_row;
            kernels[i] = Some(cf);
        }
        debug!(
            "Built a convolution-function table with {num_kernels} kernels ({num_freqs} freqs, {num_w_planes} w-planes, {num_mueller_rows} Mueller rows)"
        );

        Ok(ConvFuncTable {
            kernels,
            num_freqs,
            num_w_planes,
            num_mueller_rows,
        })
    }
}

/// A read-only store of oversampled convolution kernels, keyed by
/// (frequency index, w-plane index, Mueller row).
#[derive(Debug, Clone)]
pub struct ConvFuncTable {
    kernels: Vec<Option<ConvFunc>>,
    num_freqs: usize,
    num_w_planes: usize,
    num_mueller_rows: usize,
}

static_assertions::assert_impl_all!(ConvFuncTable: Send, Sync);

impl ConvFuncTable {
    /// Make a table holding a single [`ConvFunc::single_tap`] kernel for every
    /// Mueller row, one frequency and one w-plane.
    pub fn single_tap(num_mueller_rows: usize) -> ConvFuncTable {
        ConvFuncTable {
            kernels: vec![Some(ConvFunc::single_tap()); num_mueller_rows.max(1)],
            num_freqs: 1,
            num_w_planes: 1,
            num_mueller_rows: num_mueller_rows.max(1),
        }
    }

    /// Get the kernel for `key`. If `conjugate` is true, the returned
    /// [`CfRef`] says so; the same taps are used for both signs of w.
    #[inline]
    pub fn get_kernel(&self, key: CfKey, conjugate: bool) -> Result<CfRef, CfError> {
        if key.freq >= self.num_freqs
            || key.w >= self.num_w_planes
            || key.mueller_row >= self.num_mueller_rows
        {
            return Err(CfError::MissingKernel(key));
        }
        let i = (key.freq * self.num_w_planes + key.w) * self.num_mueller_rows + key.mueller_row;
        match &self.kernels[i] {
            Some(cf) => Ok(CfRef { cf, conjugate }),
            None => Err(CfError::MissingKernel(key)),
        }
    }

    /// Get the oversampling factor and support radius of the kernels for a
    /// (frequency, w-plane) pair. The first available Mueller row is used.
    pub fn sampling_and_support(&self, freq: usize, w: usize) -> Option<(usize, usize)> {
        (0..self.num_mueller_rows)
            .find_map(|row| self.get_kernel(CfKey::new(freq, w, row), false).ok())
            .map(|r| (r.cf.sampling, r.cf.support))
    }

    pub fn num_freqs(&self) -> usize {
        self.num_freqs
    }

    pub fn num_w_planes(&self) -> usize {
        self.num_w_planes
    }

    pub fn num_mueller_rows(&self) -> usize {
        self.num_mueller_rows
    }

    /// The biggest support radius of any kernel \[output-grid pixels\].
    pub fn max_support(&self) -> usize {
        self.kernels
            .iter()
            .flatten()
            .map(|cf| cf.support)
            .max()
            .unwrap_or(0)
    }
}
