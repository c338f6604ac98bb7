// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Where a visibility's kernel lands on the grid.

use std::ops::Range;

use marlu::UVW;

use super::state::SharedState;
use crate::{cf::ConvFunc, constants::VEL_C, grid::GridShape};

/// A rectangle of grid pixels; either the whole grid or one tile of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub(crate) x: Range<usize>,
    pub(crate) y: Range<usize>,
}

impl Bounds {
    pub(crate) fn whole(shape: GridShape) -> Bounds {
        Bounds {
            x: 0..shape.nx,
            y: 0..shape.ny,
        }
    }

    /// Split these bounds into square tiles of side `tile_size` (the tiles
    /// along the far edges may be smaller).
    pub(crate) fn tiles(&self, tile_size: usize) -> Vec<Bounds> {
        let tile_size = tile_size.max(1);
        let split = |r: &Range<usize>| -> Vec<Range<usize>> {
            (r.start..r.end)
                .step_by(tile_size)
                .map(|s| s..(s + tile_size).min(r.end))
                .collect()
        };
        let xs = split(&self.x);
        let ys = split(&self.y);
        ys.iter()
            .flat_map(|y| {
                xs.iter().map(move |x| Bounds {
                    x: x.clone(),
                    y: y.clone(),
                })
            })
            .collect()
    }
}

/// Positions further than this from pixel 0 are never on a grid. Keeping pixel
/// indices this small means that footprint arithmetic can't overflow.
const MAX_PIXEL: f64 = i32::MAX as f64;

/// Where a visibility sits on the grid for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Placement {
    /// The continuous pixel position.
    pub(crate) pos: [f64; 2],
    /// The nearest pixel.
    pub(crate) loc: [i64; 2],
    pub(crate) w_plane: usize,
    /// Negative-w visibilities use conjugated kernels.
    pub(crate) conjugate: bool,
}

/// Why a visibility couldn't be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Miss {
    /// The position isn't finite, or is too far from any grid to be
    /// represented as a pixel index.
    BadPosition,
    /// The w-plane index is beyond the CF table.
    BeyondWPlanes,
}

impl Placement {
    pub(crate) fn new(
        state: &SharedState,
        uvw: UVW,
        freq_hz: f64,
        num_w_planes: usize,
    ) -> Result<Placement, Miss> {
        let one_on_lambda = freq_hz / VEL_C;
        let pos = [
            state.uvw_scale[0] * uvw.u * one_on_lambda + state.offset[0],
            state.uvw_scale[1] * uvw.v * one_on_lambda + state.offset[1],
        ];
        if !(pos[0].abs() <= MAX_PIXEL && pos[1].abs() <= MAX_PIXEL) {
            return Err(Miss::BadPosition);
        }

        // W-planes are quadratically spaced.
        let w_pos = (state.uvw_scale[2] * uvw.w * one_on_lambda).abs().sqrt() + state.offset[2];
        let w_plane = w_pos.round();
        if !(w_plane >= 0.0 && w_plane < num_w_planes as f64) {
            return Err(Miss::BeyondWPlanes);
        }

        Ok(Placement {
            pos,
            loc: [pos[0].round() as i64, pos[1].round() as i64],
            w_plane: w_plane as usize,
            conjugate: uvw.w < 0.0,
        })
    }

    /// The sub-pixel offset of this visibility in units of kernel taps.
    pub(crate) fn tap_offset(&self, sampling: usize) -> [i64; 2] {
        let s = sampling as f64;
        [
            ((self.loc[0] as f64 - self.pos[0]) * s).round() as i64,
            ((self.loc[1] as f64 - self.pos[1]) * s).round() as i64,
        ]
    }
}

/// An inclusive range of pixel offsets from a visibility's nearest pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) lo: i64,
    pub(crate) hi: i64,
}

/// The part of a visibility's kernel that falls within some bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footprint {
    pub(crate) x: Span,
    pub(crate) y: Span,
    /// The kernel tap used at offset 0 along x and y; offset `i` uses tap
    /// `tap_origin + i * sampling`.
    pub(crate) tap_origin: [i64; 2],
}

impl Footprint {
    /// Intersect a visibility's support with `bounds` and with the kernel's
    /// taps. `None` means nothing is left; the visibility misses.
    pub(crate) fn new(placement: &Placement, cf: &ConvFunc, bounds: &Bounds) -> Option<Footprint> {
        let off = placement.tap_offset(cf.sampling());
        let (nx, ny) = cf.shape();
        let (ox, oy) = cf.origin();
        let tap_origin = [ox as i64 + off[0], oy as i64 + off[1]];
        let x = clip_axis(
            placement.loc[0],
            tap_origin[0],
            cf.support(),
            cf.sampling(),
            nx,
            &bounds.x,
        )?;
        let y = clip_axis(
            placement.loc[1],
            tap_origin[1],
            cf.support(),
            cf.sampling(),
            ny,
            &bounds.y,
        )?;
        Some(Footprint { x, y, tap_origin })
    }

    pub(crate) fn num_pixels(&self) -> usize {
        ((self.x.hi - self.x.lo + 1) * (self.y.hi - self.y.lo + 1)) as usize
    }
}

/// Clip the offsets `-support..=support` so that `loc + i` is within `bounds`
/// and `tap_origin + i * sampling` is a valid tap.
fn clip_axis(
    loc: i64,
    tap_origin: i64,
    support: usize,
    sampling: usize,
    num_taps: usize,
    bounds: &Range<usize>,
) -> Option<Span> {
    let support = support as i64;
    let sampling = sampling as i64;

    let lo = (-support)
        .max(bounds.start as i64 - loc)
        .max(ceil_div(-tap_origin, sampling));
    let hi = support
        .min(bounds.end as i64 - 1 - loc)
        .min((num_taps as i64 - 1 - tap_origin).div_euclid(sampling));

    (lo <= hi).then_some(Span { lo, hi })
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}
