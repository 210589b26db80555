//! Per-run filter state.
//!
//! Every filter run owns its own [`AccumulatorGrid`]: a rectangular window of
//! bins copied out of the PFM structure, each holding its soundings and the
//! summary derived from the currently valid ones. All invalidations happen in
//! this copy; the structure on disk is only touched once the run completes.
//!
//! ```text
//!         col 0   col 1   col 2   col 3
//!       +-------+-------+-------+-------+
//! row 3 | edge  | edge  | edge  | edge  |
//!       +-------+-------+-------+-------+
//! row 2 | edge  | inner | inner | edge  |
//!       +-------+-------+-------+-------+
//! row 1 | edge  | inner | inner | edge  |
//!       +-------+-------+-------+-------+
//! row 0 | edge  | edge  | edge  | edge  |   origin = PFM bin of (0, 0)
//!       +-------+-------+-------+-------+
//! ```
//!
//! Only inner bins are filtered; edge bins exist to complete their 3x3
//! neighbourhoods.

use std::fmt;

use pfm_core::{summarize, AverageType, BinCoord, BinGeometry, DepthRecord, DepthSummary};

use crate::error::AbeError;

/// Phase of a filter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    /// Not started.
    #[default]
    Idle,
    /// Allocating the accumulator grid.
    Initializing,
    /// Reading every sounding of the window into the grid.
    Accumulating,
    /// Summarising each bin's valid soundings.
    ComputingAggregates,
    /// 3x3 neighbourhood pass over the inner bins.
    Filtering,
    /// Writing invalidations to disk and recomputing the affected bins.
    WritingBack,
    /// Finished; results are on disk.
    Done,
    /// Abandoned before write-back; nothing on disk changed.
    Cancelled,
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterState::Idle => "idle",
            FilterState::Initializing => "initializing",
            FilterState::Accumulating => "accumulating",
            FilterState::ComputingAggregates => "computing aggregates",
            FilterState::Filtering => "filtering",
            FilterState::WritingBack => "writing back",
            FilterState::Done => "done",
            FilterState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One bin of the accumulator grid.
#[derive(Debug, Clone, Default)]
pub struct BinCell {
    /// Soundings in chain order.
    pub records: Vec<DepthRecord>,
    summary: Option<DepthSummary>,
}

impl BinCell {
    /// Summary of the valid soundings, `None` when there are none.
    #[inline]
    pub fn summary(&self) -> Option<&DepthSummary> {
        self.summary.as_ref()
    }

    /// Whether any sounding is valid.
    #[inline]
    pub fn has_valid_data(&self) -> bool {
        self.summary.is_some()
    }

    /// Rederive the summary from the valid soundings.
    pub fn recompute(&mut self, average: AverageType) {
        let depths: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.z)
            .collect();
        self.summary = summarize(&depths, average);
    }
}

/// A window of bins held in memory for one filter run.
#[derive(Debug)]
pub struct AccumulatorGrid {
    geometry: BinGeometry,
    origin: BinCoord,
    rows: usize,
    cols: usize,
    average: AverageType,
    cells: Vec<BinCell>,
}

impl AccumulatorGrid {
    /// Allocate an empty `rows x cols` window whose local (0, 0) is PFM bin
    /// `origin`.
    ///
    /// Fails with [`AbeError::Allocation`] instead of aborting when the
    /// window cannot be allocated.
    pub fn new(
        geometry: BinGeometry,
        origin: BinCoord,
        rows: usize,
        cols: usize,
        average: AverageType,
    ) -> Result<Self, AbeError> {
        let bins = rows
            .checked_mul(cols)
            .ok_or(AbeError::Allocation { bins: usize::MAX })?;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(bins)
            .map_err(|_| AbeError::Allocation { bins })?;
        cells.resize_with(bins, BinCell::default);
        Ok(Self {
            geometry,
            origin,
            rows,
            cols,
            average,
            cells,
        })
    }

    /// Grid of the PFM structure the window was cut from.
    #[inline]
    pub fn geometry(&self) -> &BinGeometry {
        &self.geometry
    }

    /// PFM bin at local (0, 0).
    #[inline]
    pub fn origin(&self) -> BinCoord {
        self.origin
    }

    /// Rows in the window.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Columns in the window.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Average type used for bin summaries.
    #[inline]
    pub fn average(&self) -> AverageType {
        self.average
    }

    /// PFM bin of a local coordinate.
    #[inline]
    pub fn global(&self, local: BinCoord) -> BinCoord {
        self.origin.offset(local.row, local.col)
    }

    fn index(&self, local: BinCoord) -> Option<usize> {
        let (row, col) = (usize::try_from(local.row).ok()?, usize::try_from(local.col).ok()?);
        (row < self.rows && col < self.cols).then_some(row * self.cols + col)
    }

    /// Whether `local` has a full 3x3 neighbourhood inside the window.
    #[inline]
    pub fn is_interior(&self, local: BinCoord) -> bool {
        local.row >= 1
            && local.col >= 1
            && (local.row as usize) + 1 < self.rows
            && (local.col as usize) + 1 < self.cols
    }

    /// Bin at `local`, `None` outside the window.
    #[inline]
    pub fn cell(&self, local: BinCoord) -> Option<&BinCell> {
        self.index(local).map(|i| &self.cells[i])
    }

    /// Mutable bin at `local`.
    #[inline]
    pub fn cell_mut(&mut self, local: BinCoord) -> Option<&mut BinCell> {
        self.index(local).map(move |i| &mut self.cells[i])
    }

    /// Replace a bin's soundings and summarise them.
    pub fn set_records(&mut self, local: BinCoord, records: Vec<DepthRecord>) {
        let average = self.average;
        if let Some(cell) = self.cell_mut(local) {
            cell.records = records;
            cell.recompute(average);
        }
    }

    /// Rederive one bin's summary.
    pub fn recompute(&mut self, local: BinCoord) {
        let average = self.average;
        if let Some(cell) = self.cell_mut(local) {
            cell.recompute(average);
        }
    }

    /// Rederive every bin's summary.
    pub fn recompute_all(&mut self) {
        let average = self.average;
        for cell in &mut self.cells {
            cell.recompute(average);
        }
    }

    /// Total soundings held.
    pub fn num_records(&self) -> usize {
        self.cells.iter().map(|c| c.records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfm_core::{Mbr, Point2, Validity};

    fn grid(rows: usize, cols: usize) -> AccumulatorGrid {
        let geometry = BinGeometry::new(Mbr::new(0.0, 0.0, 100.0, 100.0), 10.0, 10.0, true).unwrap();
        AccumulatorGrid::new(geometry, BinCoord::new(2, 3), rows, cols, AverageType::Mean).unwrap()
    }

    #[test]
    fn test_interior() {
        let g = grid(4, 4);
        assert!(!g.is_interior(BinCoord::new(0, 1)));
        assert!(g.is_interior(BinCoord::new(1, 1)));
        assert!(g.is_interior(BinCoord::new(2, 2)));
        assert!(!g.is_interior(BinCoord::new(3, 2)));
        assert!(!g.is_interior(BinCoord::new(2, 3)));
    }

    #[test]
    fn test_local_to_global() {
        let g = grid(3, 3);
        assert_eq!(g.global(BinCoord::new(1, 2)), BinCoord::new(3, 5));
        assert!(g.cell(BinCoord::new(-1, 0)).is_none());
        assert!(g.cell(BinCoord::new(0, 3)).is_none());
    }

    #[test]
    fn test_summary_tracks_validity() {
        let mut g = grid(3, 3);
        let at = BinCoord::new(1, 1);
        let rec = |z| DepthRecord::new(Point2::new(45.0, 35.0), z, 0, 0, 0);
        g.set_records(at, vec![rec(9.0), rec(10.0), rec(11.0)]);
        assert_eq!(g.cell(at).unwrap().summary().unwrap().mean, 10.0);

        for r in &mut g.cell_mut(at).unwrap().records {
            r.validity |= Validity::FILTER_INVAL;
        }
        g.recompute(at);
        assert!(!g.cell(at).unwrap().has_valid_data());
        assert_eq!(g.num_records(), 3);
    }

    #[test]
    fn test_huge_window_is_allocation_error() {
        let geometry = BinGeometry::new(Mbr::new(0.0, 0.0, 1.0, 1.0), 1.0, 1.0, true).unwrap();
        let err = AccumulatorGrid::new(geometry, BinCoord::new(0, 0), usize::MAX / 2, 4, AverageType::Mean)
            .unwrap_err();
        assert!(matches!(err, AbeError::Allocation { .. }));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FilterState::ComputingAggregates.to_string(), "computing aggregates");
    }
}
