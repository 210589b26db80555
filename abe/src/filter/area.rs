//! The area filter driver.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use pfm_core::{
    point_in_polygon, polygon_mbr, BinCoord, DepthRecord, Mbr, Point2, SoundingId, Validity,
};
use pfm_io::{OpenMode, PfmError, PfmFile};

use super::context::{AccumulatorGrid, FilterState};
use super::features::{FeatureSet, RecordMask};
use super::neighborhood::area_filter_bin;
use crate::config::FilterConfig;
use crate::error::{AbeError, Result};

/// Region a filter run may invalidate soundings in.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArea {
    /// Axis-aligned rectangle, west and south edges inclusive.
    Rectangle(Mbr),
    /// Closed polygon.
    Polygon(Vec<Point2>),
}

impl FilterArea {
    /// Bounding rectangle. `None` for a degenerate area.
    pub fn mbr(&self) -> Option<Mbr> {
        match self {
            FilterArea::Rectangle(m) => m.is_valid().then_some(*m),
            FilterArea::Polygon(poly) if poly.len() >= 3 => {
                polygon_mbr(poly).filter(Mbr::is_valid)
            }
            FilterArea::Polygon(_) => None,
        }
    }

    /// Whether `p` lies in the area.
    pub fn contains(&self, p: Point2) -> bool {
        match self {
            FilterArea::Rectangle(m) => m.contains(p),
            FilterArea::Polygon(poly) => point_in_polygon(p, poly),
        }
    }
}

/// How a filter run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Invalidations were written and the affected bins recomputed.
    Completed {
        /// Soundings marked `FILTER_INVAL`.
        invalidated: usize,
        /// Inner bins examined.
        bins_filtered: usize,
    },
    /// The run was cancelled; nothing on disk changed.
    Cancelled,
}

/// Context of one filter run: the accumulator window, the kill list and the
/// feature geometry in force. Dropping it releases all of them.
#[derive(Debug)]
pub struct FilterRun<'a> {
    state: FilterState,
    config: &'a FilterConfig,
    area: &'a FilterArea,
    features: FeatureSet,
    grid: AccumulatorGrid,
    kills: Vec<SoundingId>,
    bins_filtered: usize,
}

impl<'a> FilterRun<'a> {
    /// Size the accumulator window for `area` (grown by one bin on each
    /// side and clipped to the structure) and load the features that reach it.
    pub fn new(
        pfm: &PfmFile,
        area: &'a FilterArea,
        config: &'a FilterConfig,
        features: &FeatureSet,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = *pfm.geometry();
        log::debug!("area filter: {} -> {}", FilterState::Idle, FilterState::Initializing);

        let area_mbr = area.mbr().ok_or(AbeError::InvalidArea {
            reason: "area has no extent",
        })?;
        let window = area_mbr
            .expand(geometry.x_bin_size, geometry.y_bin_size)
            .intersection(&geometry.mbr)
            .ok_or(AbeError::InvalidArea {
                reason: "area does not overlap the structure",
            })?;

        let clamp = |c: BinCoord| {
            BinCoord::new(
                c.row.clamp(0, geometry.height as i32 - 1),
                c.col.clamp(0, geometry.width as i32 - 1),
            )
        };
        let lo = clamp(geometry.compute_index_unbounded(Point2::new(window.min_x, window.min_y)));
        let hi = clamp(geometry.compute_index_unbounded(Point2::new(window.max_x, window.max_y)));
        let rows = (hi.row - lo.row + 1) as usize;
        let cols = (hi.col - lo.col + 1) as usize;

        let grid = AccumulatorGrid::new(geometry, lo, rows, cols, pfm.recompute_options().average)?;
        let features = features.load_for_area(&area_mbr, config.feature_radius as f64, &geometry)?;
        log::info!(
            "area filter: {}x{} bin window at ({}, {}), {} features in force",
            rows,
            cols,
            lo.row,
            lo.col,
            features.len()
        );

        Ok(Self {
            state: FilterState::Initializing,
            config,
            area,
            features,
            grid,
            kills: Vec::new(),
            bins_filtered: 0,
        })
    }

    /// Current phase.
    #[inline]
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// The accumulator window.
    #[inline]
    pub fn grid(&self) -> &AccumulatorGrid {
        &self.grid
    }

    /// Soundings invalidated in memory so far.
    #[inline]
    pub fn kills(&self) -> &[SoundingId] {
        &self.kills
    }

    fn transition(&mut self, next: FilterState) {
        log::debug!("area filter: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run every phase. On cancellation the structure is left untouched.
    pub fn run(
        &mut self,
        pfm: &mut PfmFile,
        mask: &dyn RecordMask,
        cancel: &AtomicBool,
    ) -> Result<FilterOutcome> {
        self.accumulate(pfm)?;
        self.transition(FilterState::ComputingAggregates);
        self.grid.recompute_all();

        if !self.filter(mask, cancel)? {
            self.transition(FilterState::Cancelled);
            log::info!(
                "area filter cancelled, {} pending invalidations discarded",
                self.kills.len()
            );
            self.kills.clear();
            return Ok(FilterOutcome::Cancelled);
        }

        let invalidated = self.write_back(pfm)?;
        self.transition(FilterState::Done);
        log::info!(
            "area filter: {} soundings invalidated over {} bins",
            invalidated,
            self.bins_filtered
        );
        Ok(FilterOutcome::Completed {
            invalidated,
            bins_filtered: self.bins_filtered,
        })
    }

    fn accumulate(&mut self, pfm: &mut PfmFile) -> Result<()> {
        self.transition(FilterState::Accumulating);
        for row in 0..self.grid.rows() as i32 {
            for col in 0..self.grid.cols() as i32 {
                let local = BinCoord::new(row, col);
                let records = match pfm.read_depth_array(self.grid.global(local)) {
                    Ok(records) => records,
                    Err(PfmError::NoData { .. }) => continue,
                    Err(e) => return Err(e.into()),
                };
                if let Some(cell) = self.grid.cell_mut(local) {
                    cell.records = records;
                }
            }
        }
        log::debug!("area filter: {} soundings accumulated", self.grid.num_records());
        Ok(())
    }

    /// Neighbourhood pass over the inner bins, row by row. Returns `false`
    /// when cancelled.
    fn filter(&mut self, mask: &dyn RecordMask, cancel: &AtomicBool) -> Result<bool> {
        self.transition(FilterState::Filtering);
        let Self {
            config,
            area,
            features,
            grid,
            kills,
            bins_filtered,
            ..
        } = self;
        let geometry = *grid.geometry();
        let radius = config.feature_radius as f64;
        let eligible = |r: &DepthRecord| {
            area.contains(r.position)
                && mask.accepts(r)
                && !features.protects(r.position, radius, &geometry)
        };

        let (rows, cols) = (grid.rows(), grid.cols());
        for row in 1..rows.saturating_sub(1) {
            if (row - 1) % config.cancel_check_rows == 0 && cancel.load(Ordering::Acquire) {
                return Ok(false);
            }
            for col in 1..cols - 1 {
                let killed = area_filter_bin(grid, BinCoord::new(row as i32, col as i32), config, &eligible);
                *bins_filtered += 1;
                kills
                    .try_reserve(killed.len())
                    .map_err(|_| AbeError::Allocation { bins: rows * cols })?;
                kills.extend(killed);
            }
        }
        Ok(true)
    }

    /// Write each invalidated sounding and recompute its bin on disk.
    ///
    /// If any write or recompute fails, the invalidations already written
    /// are reverted and their bins recomputed before the error is returned.
    fn write_back(&mut self, pfm: &mut PfmFile) -> Result<usize> {
        self.transition(FilterState::WritingBack);
        let mut applied = Vec::new();
        applied
            .try_reserve_exact(self.kills.len())
            .map_err(|_| AbeError::Allocation {
                bins: self.grid.rows() * self.grid.cols(),
            })?;

        match self.apply_kills(pfm, &mut applied) {
            Ok(()) => {
                pfm.flush()?;
                Ok(applied.len())
            }
            Err(e) => {
                log::warn!(
                    "area filter: write-back failed after {} of {} invalidations: {}",
                    applied.len(),
                    self.kills.len(),
                    e
                );
                roll_back(pfm, &applied);
                Err(e)
            }
        }
    }

    fn apply_kills(&self, pfm: &mut PfmFile, applied: &mut Vec<DepthRecord>) -> Result<()> {
        let origin = self.grid.origin();
        for id in &self.kills {
            let local = BinCoord::new(id.coord.row - origin.row, id.coord.col - origin.col);
            let record = self
                .grid
                .cell(local)
                .and_then(|c| c.records.get(id.chain_position as usize));
            if let Some(record) = record {
                pfm.update_depth_record(record)?;
                applied.push(*record);
            }
        }

        let options = pfm.recompute_options();
        let touched: BTreeSet<BinCoord> = applied.iter().map(|r| r.coord).collect();
        for &coord in &touched {
            let mut bin = pfm.read_bin_record(coord)?;
            pfm.recompute_bin_values(coord, &mut bin, options)?;
        }
        Ok(())
    }
}

/// Clear `FILTER_INVAL` from every written record, newest first, then
/// recompute their bins from what is on disk.
fn roll_back(pfm: &mut PfmFile, applied: &[DepthRecord]) {
    let mut touched = BTreeSet::new();
    for record in applied.iter().rev() {
        let mut original = *record;
        original.validity.remove(Validity::FILTER_INVAL);
        if let Err(e) = pfm.update_depth_record(&original) {
            log::warn!(
                "area filter: could not revert sounding {} of bin ({}, {}): {}",
                record.chain_position,
                record.coord.row,
                record.coord.col,
                e
            );
        }
        touched.insert(record.coord);
    }

    let options = pfm.recompute_options();
    for coord in touched {
        let result = pfm
            .read_bin_record(coord)
            .and_then(|mut bin| pfm.recompute_bin_values(coord, &mut bin, options));
        if let Err(e) = result {
            log::warn!(
                "area filter: could not recompute bin ({}, {}): {}",
                coord.row,
                coord.col,
                e
            );
        }
    }
    if let Err(e) = pfm.flush() {
        log::warn!("area filter: flush after revert failed: {}", e);
    }
}

/// Run the statistical area filter over `area`.
///
/// Soundings the filter flags are only invalidated if they lie inside the
/// area, `mask` accepts them and no feature protects them. Setting `cancel`
/// abandons the run at the next row check with nothing written.
pub fn filter_poly_area(
    pfm: &mut PfmFile,
    area: &FilterArea,
    config: &FilterConfig,
    features: &FeatureSet,
    mask: &dyn RecordMask,
    cancel: &AtomicBool,
) -> Result<FilterOutcome> {
    if pfm.mode() != OpenMode::Update {
        return Err(PfmError::ReadOnly.into());
    }
    let mut run = FilterRun::new(pfm, area, config, features)?;
    run.run(pfm, mask, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_mbr() {
        let rect = FilterArea::Rectangle(Mbr::new(0.0, 0.0, 5.0, 2.0));
        assert_eq!(rect.mbr(), Some(Mbr::new(0.0, 0.0, 5.0, 2.0)));
        assert!(rect.contains(Point2::new(0.0, 1.0)));
        assert!(!rect.contains(Point2::new(5.0, 1.0)));

        let tri = FilterArea::Polygon(vec![
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(0.0, 4.0),
        ]);
        assert_eq!(tri.mbr(), Some(Mbr::new(0.0, 0.0, 4.0, 4.0)));
        assert!(tri.contains(Point2::new(1.0, 1.0)));
        assert!(!tri.contains(Point2::new(3.0, 3.0)));
    }

    #[test]
    fn test_degenerate_areas() {
        assert_eq!(FilterArea::Rectangle(Mbr::new(1.0, 1.0, 1.0, 4.0)).mbr(), None);
        assert_eq!(
            FilterArea::Polygon(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)]).mbr(),
            None
        );
        assert_eq!(
            FilterArea::Polygon(vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 2.0)
            ])
            .mbr(),
            None
        );
    }
}
