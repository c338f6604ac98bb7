// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod config;
mod imaging;

use std::f64::consts::TAU;
use std::sync::Arc;

use ndarray::prelude::*;

use hyperdrive_gridder::{
    c32, constants::VEL_C, diagonal_mueller_map, CfKey, ConvFunc, ConvFuncTable,
    ConvFuncTableBuilder, GridFloat, GridShape, Resampler, VisBatch, UVW,
};

/// At this frequency, 1 metre is 1 wavelength.
const FREQ: f64 = VEL_C;

const SHAPE: GridShape = GridShape {
    nx: 32,
    ny: 32,
    npol: 1,
    nchan: 1,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A prolate-ish Gaussian kernel with support 3, oversampled 8 times.
fn gaussian_table() -> ConvFuncTable {
    let taps = Array2::from_shape_fn((49, 49), |(ix, iy)| {
        let dx = (ix as f32 - 24.0) / 8.0;
        let dy = (iy as f32 - 24.0) / 8.0;
        c32::new((-(dx * dx + dy * dy)).exp(), 0.0)
    });
    let mut builder = ConvFuncTableBuilder::new();
    builder
        .insert(CfKey::new(0, 0, 0), ConvFunc::new(taps, 8, 3).unwrap())
        .unwrap();
    builder.build().unwrap()
}

fn get_resampler<F: GridFloat>(num_threads: usize, table: ConvFuncTable) -> Resampler<F> {
    let mut resampler = Resampler::new(Some(num_threads));
    resampler.set_params([1.0, 1.0, 0.0], [16.0, 16.0, 0.0]);
    resampler.set_maps(vec![Some(0)], vec![Some(0)]);
    resampler.set_cf_maps(diagonal_mueller_map(1), diagonal_mueller_map(1));
    resampler.set_conv_func(Arc::new(table));
    resampler
}

/// Visibilities of a unit point source at direction cosines `(l, m)`, sampled
/// along a spiral in the uv plane. Every seventh row is flagged.
fn point_source_batch(num_rows: usize, l: f64, m: f64) -> VisBatch {
    let uvws = Array1::from_shape_fn(num_rows, |i| {
        let t = i as f64 / num_rows as f64;
        let r = 12.0 * t;
        UVW {
            u: r * (9.0 * t).cos(),
            v: r * (9.0 * t).sin(),
            w: 0.0,
        }
    });
    let vis = Array3::from_shape_fn((num_rows, 1, 1), |(i, _, _)| {
        let phase = TAU * (uvws[i].u * l + uvws[i].v * m);
        c32::new(phase.cos() as f32, phase.sin() as f32)
    });
    let flags = Array3::from_shape_fn((num_rows, 1, 1), |(i, _, _)| i % 7 == 3);
    VisBatch::new(
        uvws,
        array![FREQ],
        vis,
        flags,
        Array1::from_elem(num_rows, false),
        Array2::ones((num_rows, 1)),
    )
    .unwrap()
}
