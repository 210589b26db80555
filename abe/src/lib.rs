//! # abe
//!
//! Area-based editor runtime for PFM structures.
//!
//! This crate sits on top of [`pfm_io`] and provides what the editor process
//! family does with an open structure: the statistical area filter, the
//! ordered layer stack published through ABE_SHARE, and the small pieces of
//! process plumbing around them.
//!
//! ## Features
//!
//! - **Area filter**: 3x3 neighbourhood outlier invalidation with feature
//!   protection and all-or-nothing cancellation
//! - **Layer stack**: layers, display flags and caches reordered in lock-step
//! - **Event-pumping worker**: one long operation off the calling thread
//! - **Edit return status**: the status line read by shell wrappers
//!
//! ## Architecture
//!
//! ```text
//! pfm_core (bit packing, geometry, statistics)
//!     │
//!     ▼
//! pfm_io (storage engine, large-file I/O, ABE_SHARE)
//!     │
//!     ▼
//! abe (area filter, layer stack, worker, pfm_area_filter binary)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod filter;
pub mod layers;
pub mod status;
pub mod worker;

pub use config::FilterConfig;
pub use error::{AbeError, ConfigError, Result};
pub use filter::{
    area_filter_bin, filter_poly_area, AcceptAll, Feature, FeatureSet, FilterArea, FilterOutcome,
    FilterState, RecordMask,
};
pub use layers::{Layer, LayerStack};
pub use status::{format_edit_return_status, parse_edit_return_status, report_filter_status};
pub use worker::run_with_event_pump;

// Re-export from pfm_core and pfm_io for convenience
pub use pfm_core::{BinCoord, DepthRecord, Mbr, Point2, Validity};
pub use pfm_io::{OpenMode, PfmFile};
