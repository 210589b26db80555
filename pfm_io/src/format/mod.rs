//! PFM on-disk format.
//!
//! A structure is a list file naming a bin file and a depth file. This module
//! holds the fixed-size binary pieces; the list file lives in
//! [`crate::list_file`].
//!
//! # Format Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ BIN FILE                                                           │
//! │   header (1024 bytes, little-endian scalars)                       │
//! │   bin record[row * width + col]   (38 bytes, bit-packed, MSB first)│
//! ├────────────────────────────────────────────────────────────────────┤
//! │ DEPTH FILE                                                         │
//! │   "PFMDEPTH"                                                       │
//! │   buffer = continuation (6 bytes) + records_per_buffer * 26 bytes  │
//! │   chain position p lives in buffer p / rpb, slot p % rpb           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chain addresses are 48-bit fields written with the 64-bit split named by
//! the header: [`PointerPacking::Pfm`](pfm_core::PointerPacking::Pfm) for
//! structures written here, [`PointerPacking::Ivs`](pfm_core::PointerPacking::Ivs)
//! for legacy IVS structures.

pub mod bin_record;
pub mod depth_record;
pub mod header;

pub use bin_record::{BinRecordCodec, DepthScaling, BIN_RECORD_SIZE};
pub use depth_record::{DepthRecordCodec, DEPTH_MAGIC, DEPTH_RECORD_SIZE, POINTER_BYTES};
pub use header::{has_pfm_magic, PfmHeader, HEADER_SIZE, PFM_FORMAT_VERSION, PFM_MAGIC};
