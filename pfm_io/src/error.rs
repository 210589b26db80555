//! Error types for pfm_io operations.
//!
//! Each layer has its own enum: the handle table reports [`LargeFileError`],
//! the shared segment reports [`ShareError`], and the storage engine translates
//! both into [`PfmError`].

use std::io;
use std::path::PathBuf;

use pfm_core::{BinCoord, PfmCoreError};
use thiserror::Error;

/// Errors from the large-file handle table.
#[derive(Error, Debug)]
pub enum LargeFileError {
    /// Every slot in the handle table is in use.
    #[error("large-file handle table exhausted: all {capacity} handles are open")]
    OutOfHandles {
        /// Size of the table.
        capacity: usize,
    },

    /// The native open call failed.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The handle does not name an open slot.
    #[error("invalid large-file handle {0}")]
    InvalidHandle(usize),

    /// Fewer bytes were transferred than a positioned read or write required.
    #[error("short transfer at offset {offset}: expected {expected} bytes, got {got}")]
    ShortTransfer {
        /// File offset of the transfer.
        offset: u64,
        /// Bytes requested.
        expected: usize,
        /// Bytes transferred.
        got: usize,
    },

    /// Native I/O failure.
    #[error("large-file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the ABE shared-memory segments.
#[derive(Error, Debug)]
pub enum ShareError {
    /// No segment exists under the key.
    #[error("shared segment {key} does not exist")]
    NotFound {
        /// Segment key.
        key: String,
    },

    /// A segment already exists under the key.
    #[error("shared segment {key} already exists")]
    AlreadyExists {
        /// Segment key.
        key: String,
    },

    /// The backing region is too small or carries the wrong magic.
    #[error("shared segment {key} is not a valid segment: {reason}")]
    BadSegment {
        /// Segment key.
        key: String,
        /// What failed validation.
        reason: &'static str,
    },

    /// A fixed-capacity array in the segment cannot hold the request.
    #[error("{what} holds at most {max} entries, got {got}")]
    CapacityExceeded {
        /// Which array.
        what: &'static str,
        /// Its capacity.
        max: usize,
        /// Entries requested.
        got: usize,
    },

    /// Native I/O or mapping failure.
    #[error("shared memory I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the PFM storage engine.
#[derive(Error, Debug)]
pub enum PfmError {
    /// The list file or bin header is not a PFM structure.
    #[error("{} is not a PFM structure", path.display())]
    NotAPfmFile {
        /// Offending path.
        path: PathBuf,
    },

    /// The structure is recognisably PFM but internally inconsistent.
    #[error("corrupt PFM structure: {reason}")]
    CorruptFile {
        /// What is inconsistent.
        reason: String,
    },

    /// A load was interrupted; the checkpoint marker is still present.
    #[error("checkpoint file {} exists, a previous load did not complete", path.display())]
    CheckpointExists {
        /// Path of the marker file.
        path: PathBuf,
    },

    /// A bin's depth chain is broken.
    #[error("corrupt depth chain in bin ({}, {}): {reason}", coord.row, coord.col)]
    CorruptChain {
        /// Bin whose chain is broken.
        coord: BinCoord,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The bin has no depth records.
    #[error("no data in bin ({}, {})", coord.row, coord.col)]
    NoData {
        /// Empty bin.
        coord: BinCoord,
    },

    /// A chain position past the end of the bin's chain.
    #[error("bin ({}, {}) has no record at chain position {position}", coord.row, coord.col)]
    NoSuchRecord {
        /// Bin addressed.
        coord: BinCoord,
        /// Requested position.
        position: u32,
    },

    /// A bin coordinate or position outside the grid.
    #[error("bin ({}, {}) is outside the grid", coord.row, coord.col)]
    OutOfGrid {
        /// Offending coordinate.
        coord: BinCoord,
    },

    /// An edited position no longer lies in the bin the record is chained under.
    #[error("position of record {position} leaves bin ({}, {})", coord.row, coord.col)]
    OutsideBin {
        /// Bin the record is chained under.
        coord: BinCoord,
        /// Chain position of the record.
        position: u32,
    },

    /// The record's source file is deleted; its edit flags are frozen.
    #[error("source file {file_number} is deleted, its records cannot be edited")]
    FileDeleted {
        /// Deleted source file.
        file_number: u16,
    },

    /// A mutating call on a structure opened read-only.
    #[error("PFM structure is open read-only")]
    ReadOnly,

    /// The file number is not in the manifest.
    #[error("source file {file_number} is not in the list file")]
    UnknownFile {
        /// Requested file number.
        file_number: u16,
    },

    /// Creation parameters are unusable.
    #[error("invalid PFM parameters: {reason}")]
    InvalidParams {
        /// What is wrong.
        reason: String,
    },

    /// Field encoding failure.
    #[error("record encoding error: {0}")]
    Core(#[from] PfmCoreError),

    /// Handle table failure.
    #[error(transparent)]
    LargeFile(#[from] LargeFileError),

    /// Native I/O failure outside the handle table.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for pfm_io storage operations.
pub type Result<T> = std::result::Result<T, PfmError>;
