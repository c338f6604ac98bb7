// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fourier-plane grids and their sums of weights.
//!
//! A [`Grid`] is indexed `[x, y, pol, chan]` and stored column-major, so that
//! consecutive `x` pixels are adjacent in memory; this is the axis walked by
//! the innermost gridding loop. The sum of weights is a plain `[pol, chan]`
//! [`Array2`].

mod error;

pub use error::GridError;

use std::fmt::{Debug, Display};

use ndarray::{prelude::*, ShapeBuilder};
use num_complex::Complex;
use num_traits::{Float, NumAssign};
use strum_macros::Display;

/// The float precision that a grid accumulates in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    #[strum(serialize = "single")]
    Single,

    #[strum(serialize = "double")]
    Double,
}

/// A float type that grids and sums of weights can accumulate in. This is only
/// implemented for `f32` and `f64`.
pub trait GridFloat: Float + NumAssign + Default + Debug + Send + Sync + 'static {
    const PRECISION: Precision;

    fn from_f32(x: f32) -> Self;

    fn from_f64(x: f64) -> Self;

    fn as_f32(self) -> f32;
}

impl GridFloat for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline(always)]
    fn from_f32(x: f32) -> Self {
        x
    }

    #[inline(always)]
    fn from_f64(x: f64) -> Self {
        x as f32
    }

    #[inline(always)]
    fn as_f32(self) -> f32 {
        self
    }
}

impl GridFloat for f64 {
    const PRECISION: Precision = Precision::Double;

    #[inline(always)]
    fn from_f32(x: f32) -> Self {
        x as f64
    }

    #[inline(always)]
    fn from_f64(x: f64) -> Self {
        x
    }

    #[inline(always)]
    fn as_f32(self) -> f32 {
        self as f32
    }
}

/// The dimensions of a [`Grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridShape {
    pub nx: usize,
    pub ny: usize,
    pub npol: usize,
    pub nchan: usize,
}

impl GridShape {
    pub fn new(nx: usize, ny: usize, npol: usize, nchan: usize) -> GridShape {
        GridShape {
            nx,
            ny,
            npol,
            nchan,
        }
    }

    /// The shape of the sum-of-weights matrix that accompanies a grid of this
    /// shape.
    pub fn sumwt_dim(self) -> (usize, usize) {
        (self.npol, self.nchan)
    }

    pub fn num_cells(self) -> usize {
        self.nx * self.ny * self.npol * self.nchan
    }
}

impl Display for GridShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} x {} x {} pols x {} chans]",
            self.nx, self.ny, self.npol, self.nchan
        )
    }
}

/// A dense, 4-D grid of complex accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<F: GridFloat> {
    data: Array4<Complex<F>>,
    shape: GridShape,
    /// The distance between consecutive elements along each axis, in the order
    /// `[x, y, pol, chan]`.
    strides: [usize; 4],
}

impl<F: GridFloat> Grid<F> {
    pub fn zeros(shape: GridShape) -> Grid<F> {
        let data = Array4::zeros((shape.nx, shape.ny, shape.npol, shape.nchan).f());
        Grid {
            data,
            shape,
            strides: Self::column_major_strides(shape),
        }
    }

    /// Make a grid from an existing array indexed `[x, y, pol, chan]`. The
    /// array is copied if it isn't already column major.
    pub fn from_array(array: Array4<Complex<F>>) -> Grid<F> {
        let (nx, ny, npol, nchan) = array.dim();
        let shape = GridShape::new(nx, ny, npol, nchan);
        let data = if array.t().is_standard_layout() {
            array
        } else {
            let mut data = Array4::zeros((nx, ny, npol, nchan).f());
            data.assign(&array);
            data
        };
        Grid {
            data,
            shape,
            strides: Self::column_major_strides(shape),
        }
    }

    fn column_major_strides(shape: GridShape) -> [usize; 4] {
        let y = shape.nx;
        let pol = y * shape.ny;
        let chan = pol * shape.npol;
        [1, y, pol, chan]
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub(crate) fn strides(&self) -> [usize; 4] {
        self.strides
    }

    /// The position of the cell `[x, y, pol, chan]` in [`Grid::as_slice`].
    #[inline(always)]
    pub fn offset(&self, x: usize, y: usize, pol: usize, chan: usize) -> usize {
        x * self.strides[0] + y * self.strides[1] + pol * self.strides[2] + chan * self.strides[3]
    }

    pub fn view(&self) -> ArrayView4<Complex<F>> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut4<Complex<F>> {
        self.data.view_mut()
    }

    pub fn into_array(self) -> Array4<Complex<F>> {
        self.data
    }

    /// All grid cells in memory order (`x` varies fastest).
    pub fn as_slice(&self) -> &[Complex<F>] {
        self.data
            .as_slice_memory_order()
            .expect("grid is contiguous")
    }

    pub fn as_slice_mut(&mut self) -> &mut [Complex<F>] {
        self.data
            .as_slice_memory_order_mut()
            .expect("grid is contiguous")
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(Complex::default());
    }

    /// Element-wise add another grid into this one.
    pub fn add_assign(&mut self, other: &Grid<F>) -> Result<(), GridError> {
        if self.shape != other.shape {
            return Err(GridError::ShapeMismatch {
                expected: self.shape,
                got: other.shape,
            });
        }
        // Both grids are column major, so their memory orders line up.
        self.as_slice_mut()
            .iter_mut()
            .zip(other.as_slice())
            .for_each(|(a, b)| *a += *b);
        Ok(())
    }
}

/// Make a zeroed sum-of-weights matrix for a grid of the given shape.
pub fn sumwt_zeros<F: GridFloat>(shape: GridShape) -> Array2<F> {
    Array2::zeros(shape.sumwt_dim())
}

/// Add one sum-of-weights matrix into another.
pub fn add_sumwt<F: GridFloat>(
    mut acc: ArrayViewMut2<F>,
    other: ArrayView2<F>,
) -> Result<(), GridError> {
    if acc.dim() != other.dim() {
        return Err(GridError::SumOfWeightsShapeMismatch {
            expected: acc.dim(),
            got: other.dim(),
        });
    }
    acc += &other;
    Ok(())
}

/// Divide every `[pol, chan]` plane of `grid` by its sum of weights. If any
/// sum of weights is zero, an error naming that plane is returned and `grid`
/// is not modified.
pub fn normalise_grid<F: GridFloat>(
    grid: &mut Grid<F>,
    sumwt: ArrayView2<F>,
) -> Result<(), GridError> {
    let shape = grid.shape();
    if sumwt.dim() != shape.sumwt_dim() {
        return Err(GridError::SumOfWeightsShapeMismatch {
            expected: shape.sumwt_dim(),
            got: sumwt.dim(),
        });
    }
    if let Some(((pol, chan), _)) = sumwt.indexed_iter().find(|(_, w)| **w == F::zero()) {
        return Err(GridError::ZeroSumOfWeights { pol, chan });
    }

    for ((pol, chan), &w) in sumwt.indexed_iter() {
        grid.data
            .slice_mut(s![.., .., pol, chan])
            .mapv_inplace(|c| c / w);
    }
    Ok(())
}
