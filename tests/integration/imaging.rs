// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gridding and degridding through the public interface, the way an imager
//! would drive it.

use approx::assert_abs_diff_eq;
use hyperdrive_gridder::{normalise_grid, sumwt_zeros, ConvFuncTable, Grid, PartitionScheme};

use super::*;

fn grid_batch<F: GridFloat>(
    resampler: &mut Resampler<F>,
    batch: &VisBatch,
) -> (Grid<F>, Array2<F>) {
    let stats = resampler.data_to_grid(SHAPE, batch, false).unwrap();
    let num_flagged = batch.flags().iter().filter(|f| **f).count();
    assert_eq!(stats.num_resampled, batch.num_rows() - num_flagged);
    assert_eq!(stats.num_off_grid, 0);

    let mut grid = Grid::zeros(SHAPE);
    let mut sumwt = sumwt_zeros(SHAPE);
    resampler
        .gather_grids(&mut grid, sumwt.view_mut())
        .unwrap();
    (grid, sumwt)
}

#[test]
fn test_imaging_cycle_is_independent_of_threads() {
    init_logging();
    let batch = point_source_batch(300, 0.01, -0.02);

    let mut serial = get_resampler::<f64>(1, gaussian_table());
    let (grid1, sumwt1) = grid_batch(&mut serial, &batch);

    let mut parallel = get_resampler::<f64>(4, gaussian_table());
    parallel.set_partition_scheme(PartitionScheme::Legacy);
    let (grid4, sumwt4) = grid_batch(&mut parallel, &batch);

    assert_abs_diff_eq!(sumwt1, sumwt4, epsilon = 1e-9);
    assert_abs_diff_eq!(grid1.view(), grid4.view(), epsilon = 1e-9);

    let mut grid1 = grid1;
    let mut grid4 = grid4;
    normalise_grid(&mut grid1, sumwt1.view()).unwrap();
    normalise_grid(&mut grid4, sumwt4.view()).unwrap();
    let grid1 = Arc::new(grid1);
    let grid4 = Arc::new(grid4);

    let mut model1 = Array3::zeros(batch.vis_dim());
    let mut model4 = Array3::zeros(batch.vis_dim());
    serial
        .grid_to_data(&batch, &grid1, model1.view_mut())
        .unwrap();
    parallel
        .grid_to_data(&batch, &grid4, model4.view_mut())
        .unwrap();
    assert_abs_diff_eq!(model1, model4, epsilon = 1e-5);

    // Flagged visibilities are never predicted.
    for (flag, model) in batch.flags().iter().zip(model4.iter()) {
        if *flag {
            assert_eq!(*model, c32::new(0.0, 0.0));
        }
    }
}

#[test]
fn test_residuals_complement_the_model() {
    init_logging();
    let batch = point_source_batch(200, -0.03, 0.015);
    let mut resampler = get_resampler::<f32>(3, gaussian_table());
    let (mut grid, sumwt) = grid_batch(&mut resampler, &batch);
    normalise_grid(&mut grid, sumwt.view()).unwrap();
    let grid = Arc::new(grid);

    let mut model = Array3::zeros(batch.vis_dim());
    let mut residuals = Array3::zeros(batch.vis_dim());
    resampler
        .grid_to_data(&batch, &grid, model.view_mut())
        .unwrap();
    let stats = resampler
        .compute_residuals(&batch, &grid, residuals.view_mut())
        .unwrap();
    assert_eq!(stats.num_beyond_w_planes, 0);

    for (((obs, model), residual), flag) in batch
        .vis()
        .iter()
        .zip(model.iter())
        .zip(residuals.iter())
        .zip(batch.flags().iter())
    {
        if *flag {
            assert_eq!(*residual, c32::new(0.0, 0.0));
        } else {
            assert_abs_diff_eq!(*residual + *model, *obs, epsilon = 1e-5);
        }
    }
}

#[test]
fn test_single_tap_imaging_recovers_weighted_visibilities() {
    init_logging();
    // Integer uv coordinates, all in different cells.
    let num_rows = 10;
    let uvws = Array1::from_shape_fn(num_rows, |i| UVW {
        u: i as f64 - 5.0,
        v: (2 * i) as f64 - 9.0,
        w: 0.0,
    });
    let vis = Array3::from_shape_fn((num_rows, 1, 1), |(i, _, _)| {
        c32::new(i as f32, 1.0 - i as f32)
    });
    let weights = Array2::from_shape_fn((num_rows, 1), |(i, _)| 1.0 + i as f32);
    let batch = VisBatch::new(
        uvws,
        array![FREQ],
        vis.clone(),
        Array3::from_elem((num_rows, 1, 1), false),
        Array1::from_elem(num_rows, false),
        weights.clone(),
    )
    .unwrap();

    let mut resampler = get_resampler::<f64>(2, ConvFuncTable::single_tap(1));
    let (mut grid, sumwt) = grid_batch(&mut resampler, &batch);
    let total_weight: f64 = weights.iter().map(|w| *w as f64).sum();
    assert_abs_diff_eq!(sumwt[(0, 0)], total_weight, epsilon = 1e-9);

    normalise_grid(&mut grid, sumwt.view()).unwrap();
    let mut model = Array3::zeros(batch.vis_dim());
    resampler
        .grid_to_data(&batch, &Arc::new(grid), model.view_mut())
        .unwrap();
    for i in 0..num_rows {
        let expected = vis[(i, 0, 0)] * weights[(i, 0)] / total_weight as f32;
        assert_abs_diff_eq!(model[(i, 0, 0)], expected, epsilon = 1e-6);
    }
}

#[test]
fn test_repeated_batches_accumulate_until_reset() {
    init_logging();
    let batch = point_source_batch(50, 0.0, 0.0);
    let mut resampler = get_resampler::<f64>(2, gaussian_table());
    resampler.data_to_grid(SHAPE, &batch, false).unwrap();
    resampler.data_to_grid(SHAPE, &batch, false).unwrap();
    let mut twice = sumwt_zeros(SHAPE);
    resampler
        .gather_grids(&mut Grid::zeros(SHAPE), twice.view_mut())
        .unwrap();

    resampler.reset_grids().unwrap();
    assert_eq!(resampler.grid_shape(), None);
    resampler.data_to_grid(SHAPE, &batch, false).unwrap();
    let mut once = sumwt_zeros(SHAPE);
    resampler
        .gather_grids(&mut Grid::zeros(SHAPE), once.view_mut())
        .unwrap();

    assert_abs_diff_eq!(twice[(0, 0)], 2.0 * once[(0, 0)], epsilon = 1e-9);
}
