//! The per-bin 3x3 neighbourhood test.
//!
//! ```text
//!   [0] [1] [2]      lines through the centre used for the flatness test:
//!   [3] [4] [5]        0-8, 1-7, 2-6, 3-5
//!   [6] [7] [8]
//! ```
//!
//! A flat neighbourhood is judged against its local noise, the mean of the
//! cell standard deviations. A sloped one is judged against the spread of the
//! cell averages themselves. Either way the reference is scaled by
//! [`REFERENCE_STD_FACTOR`] and then by the configured `filter_std`.

use pfm_core::{neighborhood, sample_std_dev, BinCoord, DepthRecord, DepthSummary, SoundingId, Validity};

use super::context::AccumulatorGrid;
use crate::config::FilterConfig;

/// Empirically tuned multiplier on the reference standard deviation.
pub const REFERENCE_STD_FACTOR: f64 = 2.0;

/// Neighbourhood index pairs of the four lines through the centre.
const LINES: [(usize, usize); 4] = [(0, 8), (1, 7), (2, 6), (3, 5)];

const CENTER: usize = 4;

/// Statistics of a centre bin's 3x3 neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborhoodStats {
    /// Cells holding valid data, centre included.
    pub valid_cells: usize,
    /// Mean of the valid cells' average depths.
    pub average: f64,
    /// No line through the centre is steeper than the slope limit.
    pub flat: bool,
    /// Reference standard deviation, already scaled by [`REFERENCE_STD_FACTOR`].
    pub reference_std: f64,
}

impl NeighborhoodStats {
    /// Deviation at or beyond which a sounding is an outlier.
    #[inline]
    pub fn threshold(&self, filter_std: f32) -> f64 {
        filter_std as f64 * self.reference_std
    }
}

/// Gather the statistics for `center` (a local coordinate).
///
/// `None` when the centre has no valid data or fewer than
/// `config.min_neighbors` cells do.
pub fn neighborhood_stats(
    grid: &AccumulatorGrid,
    center: BinCoord,
    config: &FilterConfig,
) -> Option<NeighborhoodStats> {
    let cells = neighborhood(center);
    let summaries: [Option<&DepthSummary>; 9] =
        core::array::from_fn(|i| grid.cell(cells[i]).and_then(|c| c.summary()));
    summaries[CENTER]?;

    let valid: Vec<&DepthSummary> = summaries.iter().flatten().copied().collect();
    if valid.len() < config.min_neighbors {
        return None;
    }

    let averages: Vec<f64> = valid.iter().map(|s| s.average).collect();
    let average = averages.iter().sum::<f64>() / averages.len() as f64;

    let geometry = grid.geometry();
    let flat = LINES.iter().all(|&(a, b)| match (summaries[a], summaries[b]) {
        (Some(sa), Some(sb)) => {
            let pa = geometry.bin_center(grid.global(cells[a]));
            let pb = geometry.bin_center(grid.global(cells[b]));
            let run = geometry.distance_m(pa, pb);
            run <= 0.0 || (sa.average - sb.average).abs() / run <= config.flat_slope_limit
        }
        _ => true,
    });

    let reference_std = if flat {
        let mean_std = valid.iter().map(|s| s.std_dev).sum::<f64>() / valid.len() as f64;
        REFERENCE_STD_FACTOR * mean_std
    } else {
        REFERENCE_STD_FACTOR * sample_std_dev(&averages)
    };

    Some(NeighborhoodStats {
        valid_cells: valid.len(),
        average,
        flat,
        reference_std,
    })
}

/// Filter the soundings of one centre bin.
///
/// Every still-valid sounding whose deviation from the neighbourhood average
/// reaches the threshold (only in the deeper direction when
/// `deep_filter_only`) and that `eligible` accepts is marked
/// [`Validity::FILTER_INVAL`] in the grid. The bin's summary is then
/// recomputed so later neighbourhoods see it. Returns the soundings
/// invalidated.
pub fn area_filter_bin(
    grid: &mut AccumulatorGrid,
    center: BinCoord,
    config: &FilterConfig,
    eligible: &dyn Fn(&DepthRecord) -> bool,
) -> Vec<SoundingId> {
    let Some(stats) = neighborhood_stats(grid, center, config) else {
        return Vec::new();
    };
    let threshold = stats.threshold(config.filter_std);
    if threshold <= 0.0 {
        return Vec::new();
    }

    let mut killed = Vec::new();
    if let Some(cell) = grid.cell_mut(center) {
        for record in cell.records.iter_mut().filter(|r| r.is_valid()) {
            let deviation = record.z - stats.average;
            let outlier = if config.deep_filter_only {
                deviation >= threshold
            } else {
                deviation.abs() >= threshold
            };
            if outlier && eligible(record) {
                record.validity |= Validity::FILTER_INVAL;
                killed.push(record.id());
            }
        }
    }
    if !killed.is_empty() {
        grid.recompute(center);
    }
    killed
}
