// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The per-thread gridding and degridding kernel.
//!
//! Everything here runs on a single gridding thread against a single shard;
//! threads never share anything writable.

use std::ops::AddAssign;

use crossbeam_utils::atomic::AtomicCell;
use marlu::c32;
use ndarray::prelude::*;
use num_complex::Complex;
use num_traits::Zero;

use super::{
    footprint::{Bounds, Footprint, Miss, Placement},
    state::SharedState,
    ResamplerError,
};
use crate::{
    cf::{CfKey, PhaseGradCache},
    constants::{TAU, VEL_C},
    grid::{Grid, GridFloat, GridShape},
    vis::VisShard,
};

/// Counts of what happened to the visibilities (row and channel pairs) of a
/// round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResampleStats {
    /// Visibilities that touched the grid.
    pub num_resampled: usize,
    /// Visibilities whose kernels fell entirely outside the grid.
    pub num_off_grid: usize,
    /// Visibilities whose w-plane is beyond the convolution-function table.
    pub num_beyond_w_planes: usize,
}

impl AddAssign for ResampleStats {
    fn add_assign(&mut self, rhs: Self) {
        self.num_resampled += rhs.num_resampled;
        self.num_off_grid += rhs.num_off_grid;
        self.num_beyond_w_planes += rhs.num_beyond_w_planes;
    }
}

/// Grid cells being written to.
struct GridCells<'a, F: GridFloat> {
    cells: &'a mut [Complex<F>],
    strides: [usize; 4],
}

/// The per-thread resampling kernel. Each gridding thread owns a clone of a
/// prototype kernel; the only state is the phase-gradient cache.
#[derive(Debug, Clone, Default)]
pub(crate) struct VisResamplerKernel {
    phase_grad: PhaseGradCache,
}

impl VisResamplerKernel {
    pub(crate) fn new() -> VisResamplerKernel {
        VisResamplerKernel {
            phase_grad: PhaseGradCache::new(),
        }
    }

    pub(crate) fn num_phase_grads_computed(&self) -> usize {
        self.phase_grad.num_computed()
    }

    /// Accumulate a shard onto a grid and its sum of weights.
    ///
    /// If tiling is enabled, the grid is written tile by tile, and the sum of
    /// weights comes from a separate pass over the whole grid, so neither
    /// depends on the tile size.
    pub(crate) fn grid_shard<F: GridFloat>(
        &mut self,
        state: &SharedState,
        shard: &VisShard,
        do_psf: bool,
        grid: &mut Grid<F>,
        sumwt: &mut Array2<F>,
        abort: &AtomicCell<bool>,
    ) -> Result<ResampleStats, ResamplerError> {
        let shape = grid.shape();
        let whole = Bounds::whole(shape);
        match state.tile_size {
            None => self.grid_rows(
                state,
                shard,
                do_psf,
                shape,
                &whole,
                Some(grid),
                Some(sumwt.view_mut()),
                abort,
            ),

            Some(tile_size) => {
                for tile in whole.tiles(tile_size) {
                    self.grid_rows(
                        state,
                        shard,
                        do_psf,
                        shape,
                        &tile,
                        Some(&mut *grid),
                        None,
                        abort,
                    )?;
                }
                self.grid_rows(
                    state,
                    shard,
                    do_psf,
                    shape,
                    &whole,
                    None,
                    Some(sumwt.view_mut()),
                    abort,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn grid_rows<F: GridFloat>(
        &mut self,
        state: &SharedState,
        shard: &VisShard,
        do_psf: bool,
        shape: GridShape,
        bounds: &Bounds,
        grid: Option<&mut Grid<F>>,
        mut sumwt: Option<ArrayViewMut2<F>>,
        abort: &AtomicCell<bool>,
    ) -> Result<ResampleStats, ResamplerError> {
        let batch = &shard.batch;
        let cf_table = state.conv_func()?;
        let freq_map = state.freq_map(batch)?;
        let cf_map = state.cf_map(batch.conj_freq);
        let mut grid = grid.map(|g| {
            let strides = g.strides();
            GridCells {
                cells: g.as_slice_mut(),
                strides,
            }
        });
        let mut stats = ResampleStats::default();

        for row in shard.rows.clone() {
            if abort.load() {
                break;
            }
            if batch.row_flags[row] {
                continue;
            }
            let uvw = batch.uvws[row];
            let dphase = batch.dphase[row];

            for chan in batch.active_chans.clone() {
                let weight = batch.weights[(row, chan)];
                if weight == 0.0 {
                    continue;
                }
                let grid_chan = match state.chan_map[chan] {
                    Some(c) if c < shape.nchan => c,
                    _ => continue,
                };
                let freq = batch.freqs[chan];
                let placement = match Placement::new(state, uvw, freq, cf_table.num_w_planes()) {
                    Ok(p) => p,
                    Err(miss) => {
                        stats.record_miss(miss);
                        continue;
                    }
                };
                let cf_freq = freq_map.map(|m| m[chan]).unwrap_or(0);
                let weight_f = F::from_f32(weight);
                let phasor = phasor::<F>(dphase, freq);

                let mut attempted = false;
                let mut touched = false;
                for (corr, terms) in cf_map.iter().enumerate() {
                    if batch.flags[(row, chan, corr)] {
                        continue;
                    }
                    let pol = match state.pol_map[corr] {
                        Some(p) if p < shape.npol => p,
                        _ => continue,
                    };

                    let mut norm = Complex::<F>::zero();
                    for term in terms {
                        if batch.flags[(row, chan, term.corr)] {
                            continue;
                        }
                        let cf = cf_table.get_kernel(
                            CfKey::new(cf_freq, placement.w_plane, term.mueller_row),
                            placement.conjugate,
                        )?;
                        attempted = true;
                        let footprint = match Footprint::new(&placement, cf.cf, bounds) {
                            Some(f) => f,
                            None => continue,
                        };
                        touched = true;

                        let value = if do_psf {
                            Complex::new(weight_f, F::zero())
                        } else {
                            widen::<F>(batch.vis[(row, chan, term.corr)]) * weight_f * phasor
                        };
                        let grad = self.phase_grad.get(batch.pointing_offset, cf.cf);
                        let walk = TapWalk {
                            taps: cf.cf.taps_slice(),
                            num_taps_x: cf.cf.shape().0,
                            sampling: cf.cf.sampling() as i64,
                            grad,
                            conjugate: cf.conjugate,
                        };
                        norm += walk.scatter(
                            grid.as_mut(),
                            &footprint,
                            placement.loc,
                            pol,
                            grid_chan,
                            value,
                        );
                    }

                    if let Some(sumwt) = sumwt.as_mut() {
                        sumwt[(pol, grid_chan)] += norm.norm() * weight_f;
                    }
                }

                if touched {
                    stats.num_resampled += 1;
                } else if attempted {
                    stats.num_off_grid += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Predict visibilities for a shard from a grid, overwriting `out`, which
    /// holds the shard's rows only. If `residual` is true, the prediction is
    /// subtracted from the observed visibilities. Flagged visibilities are
    /// zero either way.
    pub(crate) fn degrid_shard<F: GridFloat>(
        &mut self,
        state: &SharedState,
        shard: &VisShard,
        grid: &Grid<F>,
        mut out: ArrayViewMut3<c32>,
        residual: bool,
        abort: &AtomicCell<bool>,
    ) -> Result<ResampleStats, ResamplerError> {
        let batch = &shard.batch;
        let cf_table = state.conv_func()?;
        let freq_map = state.freq_map(batch)?;
        let cf_map = state.cf_map(batch.conj_freq);
        let shape = grid.shape();
        let whole = Bounds::whole(shape);
        let cells = grid.as_slice();
        let strides = grid.strides();

        let (_, num_chans, num_corrs) = batch.vis_dim();
        debug_assert_eq!(out.dim(), (shard.rows.len(), num_chans, num_corrs));
        out.fill(c32::new(0.0, 0.0));
        let mut stats = ResampleStats::default();

        for (row, mut out) in shard.rows.clone().zip(out.outer_iter_mut()) {
            if abort.load() {
                break;
            }
            if batch.row_flags[row] {
                continue;
            }
            let uvw = batch.uvws[row];
            let dphase = batch.dphase[row];

            for (chan, mut out) in out.outer_iter_mut().enumerate() {
                // Cells that aren't predicted are zero in the model, so the
                // residual is the observed visibility.
                if residual {
                    for (corr, out) in out.iter_mut().enumerate() {
                        if !batch.flags[(row, chan, corr)] {
                            *out = batch.vis[(row, chan, corr)];
                        }
                    }
                }

                if !batch.active_chans.contains(&chan) {
                    continue;
                }
                let grid_chan = match state.chan_map[chan] {
                    Some(c) if c < shape.nchan => c,
                    _ => continue,
                };
                let freq = batch.freqs[chan];
                let placement = match Placement::new(state, uvw, freq, cf_table.num_w_planes()) {
                    Ok(p) => p,
                    Err(miss) => {
                        stats.record_miss(miss);
                        continue;
                    }
                };
                let cf_freq = freq_map.map(|m| m[chan]).unwrap_or(0);
                let unphasor = phasor::<F>(dphase, freq).conj();

                let mut attempted = false;
                let mut touched = false;
                for (corr, terms) in cf_map.iter().enumerate() {
                    if batch.flags[(row, chan, corr)] {
                        continue;
                    }

                    let mut sum = Complex::<F>::zero();
                    let mut norm = Complex::<F>::zero();
                    for term in terms {
                        let pol = match state.pol_map[term.corr] {
                            Some(p) if p < shape.npol => p,
                            _ => continue,
                        };
                        let cf = cf_table.get_kernel(
                            CfKey::new(cf_freq, placement.w_plane, term.mueller_row),
                            placement.conjugate,
                        )?;
                        attempted = true;
                        let footprint = match Footprint::new(&placement, cf.cf, &whole) {
                            Some(f) => f,
                            None => continue,
                        };
                        touched = true;

                        let grad = self.phase_grad.get(batch.pointing_offset, cf.cf);
                        let walk = TapWalk {
                            taps: cf.cf.taps_slice(),
                            num_taps_x: cf.cf.shape().0,
                            sampling: cf.cf.sampling() as i64,
                            grad,
                            conjugate: cf.conjugate,
                        };
                        let (s, n) = walk.gather(
                            cells,
                            strides,
                            &footprint,
                            placement.loc,
                            pol,
                            grid_chan,
                        );
                        sum += s;
                        norm += n;
                    }

                    let predicted = if norm.is_zero() {
                        Complex::zero()
                    } else {
                        sum / norm * unphasor
                    };
                    let predicted = narrow(predicted);
                    if residual {
                        out[corr] -= predicted;
                    } else {
                        out[corr] = predicted;
                    }
                }

                if touched {
                    stats.num_resampled += 1;
                } else if attempted {
                    stats.num_off_grid += 1;
                }
            }
        }

        Ok(stats)
    }
}

impl ResampleStats {
    fn record_miss(&mut self, miss: Miss) {
        match miss {
            Miss::BadPosition => self.num_off_grid += 1,
            Miss::BeyondWPlanes => self.num_beyond_w_planes += 1,
        }
    }
}

/// Walks the taps of one kernel over a footprint.
struct TapWalk<'a> {
    taps: &'a [c32],
    num_taps_x: usize,
    sampling: i64,
    grad: Option<&'a [c32]>,
    conjugate: bool,
}

impl TapWalk<'_> {
    #[inline(always)]
    fn tap(&self, i: usize) -> c32 {
        let mut k = self.taps[i];
        if let Some(grad) = self.grad {
            k *= grad[i];
        }
        if self.conjugate {
            k.conj()
        } else {
            k
        }
    }

    /// Add `value` times each tap into the grid (if there is one). Returns the
    /// sum of the taps used.
    #[inline]
    fn scatter<F: GridFloat>(
        &self,
        mut grid: Option<&mut GridCells<F>>,
        footprint: &Footprint,
        loc: [i64; 2],
        pol: usize,
        chan: usize,
        value: Complex<F>,
    ) -> Complex<F> {
        let mut norm = Complex::zero();
        for iy in footprint.y.lo..=footprint.y.hi {
            let ty = (footprint.tap_origin[1] + iy * self.sampling) as usize;
            let gy = (loc[1] + iy) as usize;
            for ix in footprint.x.lo..=footprint.x.hi {
                let tx = (footprint.tap_origin[0] + ix * self.sampling) as usize;
                let k = widen::<F>(self.tap(tx + ty * self.num_taps_x));
                norm += k;
                if let Some(grid) = grid.as_deref_mut() {
                    let gx = (loc[0] + ix) as usize;
                    let i = gx * grid.strides[0]
                        + gy * grid.strides[1]
                        + pol * grid.strides[2]
                        + chan * grid.strides[3];
                    grid.cells[i] += k * value;
                }
            }
        }
        norm
    }

    /// Sum the grid cells under a footprint, weighted by the taps. Returns the
    /// weighted sum and the sum of the taps used.
    #[inline]
    fn gather<F: GridFloat>(
        &self,
        cells: &[Complex<F>],
        strides: [usize; 4],
        footprint: &Footprint,
        loc: [i64; 2],
        pol: usize,
        chan: usize,
    ) -> (Complex<F>, Complex<F>) {
        let mut sum = Complex::zero();
        let mut norm = Complex::zero();
        let plane = pol * strides[2] + chan * strides[3];
        for iy in footprint.y.lo..=footprint.y.hi {
            let ty = (footprint.tap_origin[1] + iy * self.sampling) as usize;
            let gy = (loc[1] + iy) as usize;
            for ix in footprint.x.lo..=footprint.x.hi {
                let tx = (footprint.tap_origin[0] + ix * self.sampling) as usize;
                let gx = (loc[0] + ix) as usize;
                let k = widen::<F>(self.tap(tx + ty * self.num_taps_x));
                norm += k;
                sum += k * cells[plane + gx * strides[0] + gy * strides[1]];
            }
        }
        (sum, norm)
    }
}

/// The phase correction for a residual delay `dphase` \[metres\].
#[inline]
fn phasor<F: GridFloat>(dphase: f64, freq_hz: f64) -> Complex<F> {
    if dphase == 0.0 {
        return Complex::new(F::one(), F::zero());
    }
    let (s, c) = (-TAU * dphase * freq_hz / VEL_C).sin_cos();
    Complex::new(F::from_f64(c), F::from_f64(s))
}

#[inline(always)]
fn widen<F: GridFloat>(c: c32) -> Complex<F> {
    Complex::new(F::from_f32(c.re), F::from_f32(c.im))
}

#[inline(always)]
fn narrow<F: GridFloat>(c: Complex<F>) -> c32 {
    c32::new(c.re.as_f32(), c.im.as_f32())
}
