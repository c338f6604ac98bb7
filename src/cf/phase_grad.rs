// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to cache the phase gradients used for antenna-pointing offsets.
//!
//! A pointing offset shifts the aperture illumination, which is applied as a
//! linear phase gradient across a kernel's taps. The gradient is a moderately
//! expensive trigonometric array, and a pointing offset rarely changes between
//! visibility batches, so each gridding thread keeps the gradients for the last
//! offset it saw.

use std::collections::HashMap;

use marlu::c32;
use ndarray::{prelude::*, ShapeBuilder};

use super::ConvFunc;

/// The parts of a kernel that its phase gradient depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct KernelGeometry {
    shape: (usize, usize),
    origin: (usize, usize),
    sampling: usize,
}

impl KernelGeometry {
    fn new(cf: &ConvFunc) -> KernelGeometry {
        KernelGeometry {
            shape: cf.shape(),
            origin: cf.origin(),
            sampling: cf.sampling(),
        }
    }
}

/// A cache of unit-amplitude phase gradients for the last pointing offset
/// seen. Kernels of different sizes (e.g. on different w-planes) each get
/// their own gradient, all of which are kept until the offset changes.
#[derive(Debug, Clone, Default)]
pub(crate) struct PhaseGradCache {
    /// We can't compare f64 values for equality sensibly, so use their bits.
    offset_bits: Option<[u64; 2]>,
    /// Indexed `[x, y]`, column major, like the kernel taps.
    grads: HashMap<KernelGeometry, Array2<c32>>,
    num_computed: usize,
}

impl PhaseGradCache {
    pub(crate) fn new() -> PhaseGradCache {
        PhaseGradCache::default()
    }

    /// Get the phase gradient for a pointing offset and kernel. `offset` is the
    /// phase change per output-grid pixel along x and y \[radians\]. `None` is
    /// returned when there is no offset; callers should then not apply any
    /// gradient at all.
    pub(crate) fn get(&mut self, offset: Option<[f64; 2]>, cf: &ConvFunc) -> Option<&[c32]> {
        let offset = match offset {
            None => return None,
            Some(o) if o[0] == 0.0 && o[1] == 0.0 => return None,
            Some(o) => o,
        };

        let offset_bits = [offset[0].to_bits(), offset[1].to_bits()];
        if self.offset_bits != Some(offset_bits) {
            self.grads.clear();
            self.offset_bits = Some(offset_bits);
        }
        let num_computed = &mut self.num_computed;
        let grad = self
            .grads
            .entry(KernelGeometry::new(cf))
            .or_insert_with(|| {
                *num_computed += 1;
                Self::compute(offset, cf)
            });
        Some(
            grad.as_slice_memory_order()
                .expect("phase gradient is contiguous"),
        )
    }

    /// How many gradients have been computed.
    pub(crate) fn num_computed(&self) -> usize {
        self.num_computed
    }

    fn compute(offset: [f64; 2], cf: &ConvFunc) -> Array2<c32> {
        let (nx, ny) = cf.shape();
        let (ox, oy) = cf.origin();
        let sampling = cf.sampling() as f64;
        let dx = offset[0] / sampling;
        let dy = offset[1] / sampling;
        Array2::from_shape_fn((nx, ny).f(), |(ix, iy)| {
            let phase = (ix as f64 - ox as f64) * dx + (iy as f64 - oy as f64) * dy;
            let (s, c) = phase.sin_cos();
            c32::new(c as f32, s as f32)
        })
    }
}
