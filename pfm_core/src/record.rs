//! Bin and depth record types.
//!
//! A [`DepthRecord`] is one raw sounding, owned by the bin it is chained under
//! and identified externally by `(bin coordinate, chain position)`. A
//! [`BinRecord`] is the bin's cached aggregate view of its valid soundings plus
//! the on-disk addresses of its depth chain.

#[cfg(any(feature = "std", feature = "alloc"))]
use crate::stats::DepthSummary;
use crate::types::{BinCoord, Point2};
use crate::validity::Validity;

/// External identity of a sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundingId {
    /// Bin the sounding is chained under.
    pub coord: BinCoord,
    /// Zero-based position in the bin's chain.
    pub chain_position: u32,
}

impl SoundingId {
    /// Create a new SoundingId.
    #[inline]
    pub const fn new(coord: BinCoord, chain_position: u32) -> Self {
        Self {
            coord,
            chain_position,
        }
    }
}

/// One raw sounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRecord {
    /// Bin the sounding belongs to.
    pub coord: BinCoord,
    /// Position in the bin's chain.
    pub chain_position: u32,
    /// Horizontal position.
    pub position: Point2,
    /// Depth, positive down.
    pub z: f64,
    /// Horizontal error estimate (metres).
    pub horizontal_error: f32,
    /// Vertical error estimate (metres).
    pub vertical_error: f32,
    /// Validity flags.
    pub validity: Validity,
    /// Source file number in the list file manifest.
    pub file_number: u16,
    /// Record number within the source file.
    pub record_number: u32,
    /// Sub-record (beam or return) within the source record.
    pub subrecord: u16,
}

impl DepthRecord {
    /// A sounding that has not yet been placed in a bin.
    pub const fn new(
        position: Point2,
        z: f64,
        file_number: u16,
        record_number: u32,
        subrecord: u16,
    ) -> Self {
        Self {
            coord: BinCoord::new(0, 0),
            chain_position: 0,
            position,
            z,
            horizontal_error: 0.0,
            vertical_error: 0.0,
            validity: Validity::empty(),
            file_number,
            record_number,
            subrecord,
        }
    }

    /// Set error estimates.
    #[inline]
    pub const fn with_errors(mut self, horizontal: f32, vertical: f32) -> Self {
        self.horizontal_error = horizontal;
        self.vertical_error = vertical;
        self
    }

    /// Set validity flags.
    #[inline]
    pub const fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    /// External identity of this sounding.
    #[inline]
    pub const fn id(&self) -> SoundingId {
        SoundingId::new(self.coord, self.chain_position)
    }

    /// Whether this sounding contributes to bin aggregates.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }
}

/// Cached aggregate state of one bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinRecord {
    /// Bin coordinate.
    pub coord: BinCoord,
    /// Total soundings chained under the bin, valid or not.
    pub num_soundings: u32,
    /// Soundings that contribute to the aggregates.
    pub num_valid: u32,
    /// OR of the validity flags of every chained sounding.
    pub validity: Validity,
    /// Average filtered depth, or the null depth when the bin has no valid data.
    pub avg_filtered_depth: f64,
    /// Shoalest valid depth, or the null depth.
    pub min_filtered_depth: f64,
    /// Deepest valid depth, or the null depth.
    pub max_filtered_depth: f64,
    /// Sample standard deviation of the valid depths.
    pub standard_dev: f64,
    /// Depth-file address of the first buffer in the chain; 0 when empty.
    pub first_buffer: u64,
    /// Depth-file address of the last buffer in the chain; 0 when empty.
    pub last_buffer: u64,
}

impl BinRecord {
    /// A bin with no soundings.
    pub const fn empty(coord: BinCoord, null_depth: f64) -> Self {
        Self {
            coord,
            num_soundings: 0,
            num_valid: 0,
            validity: Validity::empty(),
            avg_filtered_depth: null_depth,
            min_filtered_depth: null_depth,
            max_filtered_depth: null_depth,
            standard_dev: 0.0,
            first_buffer: 0,
            last_buffer: 0,
        }
    }

    /// Whether any valid sounding contributes.
    #[inline]
    pub const fn has_valid_data(&self) -> bool {
        self.num_valid > 0
    }

    #[cfg(any(feature = "std", feature = "alloc"))]
    /// Overwrite the aggregate fields from a summary of the valid depths.
    ///
    /// `validity` is the OR of every chained sounding's flags. Chain addresses
    /// and `num_soundings` are left alone.
    pub fn apply_summary(&mut self, summary: Option<DepthSummary>, validity: Validity, null_depth: f64) {
        self.validity = validity;
        match summary {
            Some(s) => {
                self.num_valid = s.count;
                self.avg_filtered_depth = s.average;
                self.min_filtered_depth = s.min;
                self.max_filtered_depth = s.max;
                self.standard_dev = s.std_dev;
            }
            None => {
                self.num_valid = 0;
                self.avg_filtered_depth = null_depth;
                self.min_filtered_depth = null_depth;
                self.max_filtered_depth = null_depth;
                self.standard_dev = 0.0;
            }
        }
    }
}
