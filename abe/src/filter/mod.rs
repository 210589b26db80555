//! Statistical area filter.
//!
//! ```text
//! Idle -> Initializing -> Accumulating -> ComputingAggregates -> Filtering -> WritingBack -> Done
//!                                                                    |
//!                                                                    +--> Cancelled
//! ```
//!
//! A run copies a window of bins around the filter area into memory,
//! invalidates outliers there bin by bin in row-major order, and only then
//! writes the invalidations back and recomputes the affected bins on disk.
//! Cancelling during the neighbourhood pass therefore leaves the structure
//! exactly as it was.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::atomic::AtomicBool;
//! use abe::filter::{filter_poly_area, AcceptAll, FeatureSet, FilterArea};
//! use abe::FilterConfig;
//!
//! let area = FilterArea::Rectangle(Mbr::new(0.0, 0.0, 250.0, 250.0));
//! let outcome = filter_poly_area(
//!     &mut pfm,
//!     &area,
//!     &FilterConfig::new().with_filter_std(3.0),
//!     &FeatureSet::new(),
//!     &AcceptAll,
//!     &AtomicBool::new(false),
//! )?;
//! ```

pub mod area;
pub mod context;
pub mod features;
pub mod neighborhood;

pub use area::{filter_poly_area, FilterArea, FilterOutcome, FilterRun};
pub use context::{AccumulatorGrid, BinCell, FilterState};
pub use features::{AcceptAll, Feature, FeatureSet, RecordMask};
pub use neighborhood::{area_filter_bin, neighborhood_stats, NeighborhoodStats, REFERENCE_STD_FACTOR};
