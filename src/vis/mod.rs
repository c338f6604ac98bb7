// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility batches, and the row-range shards they are split into for the
//! gridding threads.

mod error;

pub use error::VisError;

use std::ops::Range;

use marlu::{c32, UVW};
use ndarray::{prelude::*, ArcArray1, ArcArray2};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A batch of visibilities to be gridded or degridded.
///
/// All arrays are shared, so cloning a batch (e.g. to send a part of it to a
/// gridding thread) doesn't copy any visibilities. Visibility-shaped arrays
/// are indexed `[row, chan, corr]`.
#[derive(Debug, Clone)]
pub struct VisBatch {
    /// The [`UVW`] coordinates of each row \[metres\].
    pub(crate) uvws: ArcArray1<UVW>,
    /// The frequency of each channel \[Hz\].
    pub(crate) freqs: ArcArray1<f64>,
    /// The observed visibilities.
    pub(crate) vis: ArcArray<c32, Ix3>,
    /// Per-cell flags; `true` means flagged.
    pub(crate) flags: ArcArray<bool, Ix3>,
    /// Per-row flags; `true` means the whole row is flagged.
    pub(crate) row_flags: ArcArray1<bool>,
    /// Imaging weights, indexed `[row, chan]`.
    pub(crate) weights: ArcArray2<f32>,
    /// A residual delay for each row, removed with a phase rotation before
    /// gridding \[metres\]. All zeros unless set.
    pub(crate) dphase: ArcArray1<f64>,
    /// The spectral window that these visibilities belong to.
    pub(crate) spw: usize,
    /// The channels to use. All channels are used unless set.
    pub(crate) active_chans: Range<usize>,
    /// Should the conjugate-frequency maps be used?
    pub(crate) conj_freq: bool,
    /// The antenna-pointing offset, as a phase change per output-grid pixel
    /// along x and y \[radians\].
    pub(crate) pointing_offset: Option<[f64; 2]>,
}

impl VisBatch {
    /// Make a new batch. The number of rows is taken from `uvws`, the number
    /// of channels from `freqs`, and the number of correlations from `vis`;
    /// all other arrays must agree with these.
    pub fn new(
        uvws: Array1<UVW>,
        freqs: Array1<f64>,
        vis: Array3<c32>,
        flags: Array3<bool>,
        row_flags: Array1<bool>,
        weights: Array2<f32>,
    ) -> Result<VisBatch, VisError> {
        let num_rows = uvws.len();
        let num_chans = freqs.len();
        let num_corrs = vis.len_of(Axis(2));
        let expected = [num_rows, num_chans, num_corrs];

        let check = |array: &'static str, expected: &[usize], got: &[usize]| {
            if expected == got {
                Ok(())
            } else {
                Err(VisError::ShapeMismatch {
                    array,
                    expected: expected.to_vec(),
                    got: got.to_vec(),
                })
            }
        };
        check("data", &expected, vis.shape())?;
        check("flags", &expected, flags.shape())?;
        check("row flags", &[num_rows], row_flags.shape())?;
        check("weights", &[num_rows, num_chans], weights.shape())?;

        Ok(VisBatch {
            uvws: uvws.into_shared(),
            freqs: freqs.into_shared(),
            vis: vis.into_shared(),
            flags: flags.into_shared(),
            row_flags: row_flags.into_shared(),
            weights: weights.into_shared(),
            dphase: Array1::zeros(num_rows).into_shared(),
            spw: 0,
            active_chans: 0..num_chans,
            conj_freq: false,
            pointing_offset: None,
        })
    }

    pub fn with_dphase(mut self, dphase: Array1<f64>) -> Result<VisBatch, VisError> {
        if dphase.len() != self.num_rows() {
            return Err(VisError::ShapeMismatch {
                array: "dphase",
                expected: vec![self.num_rows()],
                got: dphase.shape().to_vec(),
            });
        }
        self.dphase = dphase.into_shared();
        Ok(self)
    }

    pub fn with_spw(mut self, spw: usize) -> VisBatch {
        self.spw = spw;
        self
    }

    /// Only use a contiguous range of channels, e.g. when accumulating part of
    /// a band.
    pub fn with_active_chans(mut self, range: Range<usize>) -> Result<VisBatch, VisError> {
        if range.start > range.end || range.end > self.num_chans() {
            return Err(VisError::BadActiveChannels {
                range,
                num_chans: self.num_chans(),
            });
        }
        self.active_chans = range;
        Ok(self)
    }

    pub fn with_conj_freq(mut self, conj_freq: bool) -> VisBatch {
        self.conj_freq = conj_freq;
        self
    }

    pub fn with_pointing_offset(mut self, offset: Option<[f64; 2]>) -> VisBatch {
        self.pointing_offset = offset;
        self
    }

    pub fn num_rows(&self) -> usize {
        self.uvws.len()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs.len()
    }

    pub fn num_corrs(&self) -> usize {
        self.vis.len_of(Axis(2))
    }

    /// The shape of visibility-shaped arrays, `(rows, chans, corrs)`.
    pub fn vis_dim(&self) -> (usize, usize, usize) {
        self.vis.dim()
    }

    pub fn spw(&self) -> usize {
        self.spw
    }

    pub fn vis(&self) -> ArrayView3<c32> {
        self.vis.view()
    }

    pub fn flags(&self) -> ArrayView3<bool> {
        self.flags.view()
    }

    pub fn row_flags(&self) -> ArrayView1<bool> {
        self.row_flags.view()
    }

    pub fn weights(&self) -> ArrayView2<f32> {
        self.weights.view()
    }

    pub fn active_chans(&self) -> Range<usize> {
        self.active_chans.clone()
    }

    /// Split this batch into shards for `num_parts` threads.
    pub(crate) fn shards(
        &self,
        scheme: PartitionScheme,
        num_parts: usize,
    ) -> Result<Vec<VisShard>, VisError> {
        Ok(scheme
            .partition(self.num_rows(), num_parts)?
            .into_iter()
            .map(|rows| VisShard {
                batch: self.clone(),
                rows,
            })
            .collect())
    }
}

/// A contiguous range of rows of a [`VisBatch`].
#[derive(Debug, Clone)]
pub(crate) struct VisShard {
    pub(crate) batch: VisBatch,
    pub(crate) rows: Range<usize>,
}

impl VisShard {
    pub(crate) fn whole(batch: &VisBatch) -> VisShard {
        VisShard {
            batch: batch.clone(),
            rows: 0..batch.num_rows(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// How the rows of a batch are divided between gridding threads. Every scheme
/// gives contiguous, disjoint ranges that cover all rows.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PartitionScheme {
    /// Each thread gets either `rows / threads` rows or one more.
    #[default]
    #[strum(serialize = "balanced")]
    Balanced,

    /// Each thread gets `ceil(rows / threads)` rows, until the rows run out;
    /// trailing threads may get nothing.
    #[strum(serialize = "legacy")]
    Legacy,
}

impl PartitionScheme {
    pub fn partition(
        self,
        num_rows: usize,
        num_parts: usize,
    ) -> Result<Vec<Range<usize>>, VisError> {
        if num_parts == 0 {
            return Err(VisError::ZeroParts);
        }

        let ranges = match self {
            PartitionScheme::Legacy => {
                let sub_rows = num_rows.div_ceil(num_parts);
                (0..num_parts)
                    .map(|i| (i * sub_rows).min(num_rows)..((i + 1) * sub_rows).min(num_rows))
                    .collect()
            }

            PartitionScheme::Balanced => {
                let base = num_rows / num_parts;
                let remainder = num_rows % num_parts;
                let mut start = 0;
                (0..num_parts)
                    .map(|i| {
                        let end = start + base + usize::from(i < remainder);
                        let range = start..end;
                        start = end;
                        range
                    })
                    .collect()
            }
        };
        Ok(ranges)
    }
}
