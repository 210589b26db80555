//! # pfm_core
//!
//! Pure primitives for PFM bin-indexed sounding storage.
//!
//! A PFM structure partitions a rectangular area into fixed-size bins. Every
//! raw sounding is chained under the bin it falls in and carries a validity
//! bitmask; each bin caches aggregate statistics of its valid soundings. This
//! crate holds the parts of that model that need no I/O:
//!
//! - **no_std compatible**: Works in embedded environments with the `alloc` feature
//! - **Bit-exact codecs**: MSB-first bit packing with both historical 64-bit splits
//! - **Bin geometry**: position to bin mapping and back
//!
//! ## Feature Flags
//!
//! - `std` (default): Enables standard library support
//! - `alloc`: Enables heap allocation (Vec, etc.) without full std
//!
//! ## Modules
//!
//! - [`bitpack`]: Bit-granular field packing and the PFM/IVS 64-bit splits
//! - [`types`]: Core data types (Point2, BinCoord, Mbr)
//! - [`coords`]: Bin geometry and coordinate conversion
//! - [`validity`]: Per-sounding validity flags
//! - [`record`]: Bin and depth record types
//! - [`stats`]: Aggregate statistics of valid soundings
//! - [`polygon`]: Point-in-polygon for area edits
//! - [`error`]: Error types
//!
//! ## Usage
//!
//! ```ignore
//! use pfm_core::prelude::*;
//!
//! let geometry = BinGeometry::new(Mbr::new(0.0, 0.0, 100.0, 100.0), 5.0, 5.0, true)?;
//! let coord = geometry.compute_index(Point2::new(12.0, 48.0)).unwrap();
//! assert_eq!(geometry.compute_index(geometry.bin_center(coord)), Some(coord));
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Conditional std/alloc support
#[cfg(feature = "std")]
extern crate std;

#[cfg(all(feature = "alloc", not(feature = "std")))]
extern crate alloc;

// Internal alloc prelude for conditional compilation
#[cfg(feature = "std")]
mod alloc_prelude {
    pub use std::vec::Vec;
}

#[cfg(all(feature = "alloc", not(feature = "std")))]
mod alloc_prelude {
    pub use alloc::vec::Vec;
}

pub mod bitpack;
pub mod coords;
pub mod error;
pub mod polygon;
pub mod record;
#[cfg(any(feature = "std", feature = "alloc"))]
pub mod stats;
pub mod types;
pub mod validity;

/// Prelude module for convenient imports.
///
/// Provides the most commonly used types and functions.
pub mod prelude {
    pub use crate::bitpack::{
        bit_pack, bit_unpack, ivs_double_bit_pack, ivs_double_bit_unpack, pfm_double_bit_pack,
        pfm_double_bit_unpack, PointerPacking,
    };
    pub use crate::coords::{bin_center, compute_index, neighborhood, BinGeometry};
    pub use crate::error::PfmCoreError;
    pub use crate::polygon::{point_in_polygon, BoundedPolygon};
    pub use crate::record::{BinRecord, DepthRecord, SoundingId};
    pub use crate::types::{BinCoord, Mbr, Point2};
    pub use crate::validity::Validity;

    #[cfg(any(feature = "std", feature = "alloc"))]
    pub use crate::stats::{summarize, AverageType, DepthSummary};
}

// Re-export everything at crate root for convenience
pub use bitpack::{
    bit_pack, bit_unpack, bytes_for_bits, checked_field, ivs_double_bit_pack,
    ivs_double_bit_unpack, max_unsigned, pfm_double_bit_pack, pfm_double_bit_unpack, sign_extend,
    PointerPacking,
};
pub use coords::{bin_center, compute_index, neighborhood, BinGeometry, METERS_PER_DEGREE_LAT};
pub use error::PfmCoreError;
pub use polygon::{point_in_polygon, polygon_mbr, BoundedPolygon};
pub use record::{BinRecord, DepthRecord, SoundingId};
#[cfg(any(feature = "std", feature = "alloc"))]
pub use stats::{median, sample_std_dev, summarize, AverageType, DepthSummary};
pub use types::{BinCoord, Mbr, Point2};
pub use validity::Validity;
