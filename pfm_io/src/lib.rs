//! pfm_io - storage, large-file I/O and shared memory for PFM structures.
//!
//! This crate is the std layer over [`pfm_core`]: it owns the on-disk PFM
//! format, the handle-table file layer underneath it, and the ABE_SHARE
//! segments through which cooperating editor, viewer and filter processes
//! exchange session state.
//!
//! # Core Types
//!
//! - [`PfmFile`]: An open PFM structure (bin file, depth file, list file)
//! - [`LargeFileTable`]: Bounded pool of 64-bit file handles
//! - [`AbeShareSegment`]: The per-session shared segment and its lock
//! - [`PointCloudSegment`]: The editor's live soundings for ancillary filters
//!
//! # Example
//!
//! ```ignore
//! use pfm_io::{OpenMode, PfmCreateParams, PfmFile};
//! use pfm_core::{DepthRecord, Mbr, Point2};
//!
//! let params = PfmCreateParams::new(Mbr::new(0.0, 0.0, 100.0, 100.0), 5.0, 5.0, true);
//! let mut pfm = PfmFile::create("survey.pfm", &params)?;
//! let file = pfm.add_list_file("/data/line_001.gsf")?;
//! pfm.add_depth_record(&DepthRecord::new(Point2::new(12.0, 48.0), 21.5, file, 0, 0))?;
//! pfm.close()?;
//!
//! let mut pfm = PfmFile::open("survey.pfm", OpenMode::ReadOnly)?;
//! let bin = pfm.read_bin_record(pfm.compute_index(Point2::new(12.0, 48.0)).unwrap())?;
//! assert_eq!(bin.num_valid, 1);
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod lfio;
pub mod list_file;
pub mod open_args;
pub mod shared;
pub mod storage;

// Re-export core types from pfm_core
pub use pfm_core::{
    AverageType, BinCoord, BinGeometry, BinRecord, DepthRecord, Mbr, Point2, PointerPacking,
    SoundingId, Validity,
};

// Re-export main types
pub use config::PfmCreateParams;
pub use error::{LargeFileError, PfmError, Result, ShareError};
pub use lfio::{LargeFileTable, LfHandle, LfMode, MAX_LARGE_FILES};
pub use list_file::{ListEntry, ListFile};
pub use open_args::OpenArgs;
pub use storage::{OpenMode, PfmFile, RecomputeOptions};

// Re-export format types
pub use format::{PfmHeader, BIN_RECORD_SIZE, DEPTH_RECORD_SIZE, HEADER_SIZE, PFM_MAGIC};

// Re-export shared memory types
pub use shared::{
    lock_is_held_by_this_thread, report_result, take_forwarded_edit, take_result,
    AbeShareSegment, ChildResult, FilterParams, ModCode, PointCloudSegment, ShareConfig,
    ShareGuard, ShareState, SharedOpenArgs, SharedPoint,
};
