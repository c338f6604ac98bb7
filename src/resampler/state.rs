// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Read-only state broadcast to every gridding thread.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;

use super::ResamplerError;
use crate::{
    cf::{CfKey, ConvFuncTable, MuellerTerm},
    vis::VisBatch,
};

/// Maps from (spectral window, visibility channel) to CF frequency index.
#[derive(Debug, Clone, Default)]
pub(crate) struct FreqMaps {
    pub(crate) map: HashMap<usize, Vec<usize>>,
    pub(crate) conj_map: HashMap<usize, Vec<usize>>,
}

/// Everything the gridding threads need to know besides the visibilities
/// themselves. The coordinator only changes this between rounds; a worker
/// holds an [`Arc`] to it only while it works on a round.
#[derive(Debug, Clone)]
pub(crate) struct SharedState {
    /// Multiplies u, v and w (in wavelengths) to get pixels (for u and v) or
    /// the w-plane spacing (for w).
    pub(crate) uvw_scale: [f64; 3],
    /// Added to the scaled u, v and w-plane positions.
    pub(crate) offset: [f64; 3],
    /// Visibility channel -> grid channel.
    pub(crate) chan_map: Vec<Option<usize>>,
    /// Visibility correlation -> grid polarisation.
    pub(crate) pol_map: Vec<Option<usize>>,
    /// Visibility correlation -> the Mueller terms contributing to it.
    pub(crate) cf_map: Vec<Vec<MuellerTerm>>,
    /// As `cf_map`, but for batches using the conjugate-frequency maps.
    pub(crate) conj_cf_map: Vec<Vec<MuellerTerm>>,
    pub(crate) conv_func: Option<Arc<ConvFuncTable>>,
    /// If this isn't set, every channel uses the first CF frequency.
    pub(crate) freq_maps: Option<FreqMaps>,
    /// The side length of square grid tiles that gridding is blocked into
    /// \[pixels\].
    pub(crate) tile_size: Option<usize>,
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState {
            uvw_scale: [1.0, 1.0, 0.0],
            offset: [0.0; 3],
            chan_map: vec![],
            pol_map: vec![],
            cf_map: vec![],
            conj_cf_map: vec![],
            conv_func: None,
            freq_maps: None,
            tile_size: None,
        }
    }
}

impl SharedState {
    /// The Mueller map that applies to a batch.
    pub(crate) fn cf_map(&self, conj_freq: bool) -> &[Vec<MuellerTerm>] {
        if conj_freq {
            &self.conj_cf_map
        } else {
            &self.cf_map
        }
    }

    /// The CF frequency index of each channel of a batch. `None` means every
    /// channel uses CF frequency index 0.
    pub(crate) fn freq_map(&self, batch: &VisBatch) -> Result<Option<&[usize]>, ResamplerError> {
        let maps = match &self.freq_maps {
            None => return Ok(None),
            Some(m) => m,
        };
        let map = if batch.conj_freq {
            &maps.conj_map
        } else {
            &maps.map
        };
        map.get(&batch.spw)
            .map(|m| Some(m.as_slice()))
            .ok_or(ResamplerError::MissingFreqMap {
                spw: batch.spw,
                conjugate: batch.conj_freq,
            })
    }

    pub(crate) fn conv_func(&self) -> Result<&ConvFuncTable, ResamplerError> {
        self.conv_func.as_deref().ok_or(ResamplerError::NoConvFunc)
    }

    /// Check that a batch is consistent with this state. Anything that would
    /// otherwise be silently truncated is an error.
    pub(crate) fn validate(&self, batch: &VisBatch) -> Result<(), ResamplerError> {
        self.conv_func()?;

        let num_chans = batch.num_chans();
        let num_corrs = batch.num_corrs();
        if self.chan_map.len() != num_chans {
            return Err(ResamplerError::ChannelCountMismatch {
                map: "channel",
                expected: self.chan_map.len(),
                got: num_chans,
            });
        }
        if self.pol_map.len() != num_corrs {
            return Err(ResamplerError::CorrelationCountMismatch {
                map: "polarisation",
                expected: self.pol_map.len(),
                got: num_corrs,
            });
        }

        let (cf_map, map_name) = if batch.conj_freq {
            (&self.conj_cf_map, "conjugate Mueller")
        } else {
            (&self.cf_map, "Mueller")
        };
        if cf_map.len() != num_corrs {
            return Err(ResamplerError::CorrelationCountMismatch {
                map: map_name,
                expected: cf_map.len(),
                got: num_corrs,
            });
        }
        for (corr, terms) in cf_map.iter().enumerate() {
            if let Some(term) = terms.iter().find(|t| t.corr >= num_corrs) {
                return Err(ResamplerError::BadMuellerTerm {
                    corr,
                    term_corr: term.corr,
                    num_corrs,
                });
            }
        }

        let freq_map = self.freq_map(batch)?;
        if let Some(freq_map) = freq_map {
            if freq_map.len() != num_chans {
                return Err(ResamplerError::ChannelCountMismatch {
                    map: "frequency",
                    expected: freq_map.len(),
                    got: num_chans,
                });
            }
        }

        self.check_kernels(batch, freq_map, cf_map)
    }

    /// Every kernel that a batch could ask for must be in the table, so that
    /// a round can't fail after some visibilities were already gridded.
    fn check_kernels(
        &self,
        batch: &VisBatch,
        freq_map: Option<&[usize]>,
        cf_map: &[Vec<MuellerTerm>],
    ) -> Result<(), ResamplerError> {
        let cf_table = self.conv_func()?;
        let cf_freqs = batch
            .active_chans()
            .filter(|&chan| self.chan_map[chan].is_some())
            .map(|chan| freq_map.map(|m| m[chan]).unwrap_or(0))
            .unique();
        let mueller_rows = cf_map
            .iter()
            .flatten()
            .map(|term| term.mueller_row)
            .unique()
            .collect::<Vec<_>>();

        for cf_freq in cf_freqs {
            for (w, &mueller_row) in (0..cf_table.num_w_planes()).cartesian_product(&mueller_rows) {
                cf_table.get_kernel(CfKey::new(cf_freq, w, mueller_row), false)?;
            }
        }
        Ok(())
    }
}
