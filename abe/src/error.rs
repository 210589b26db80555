//! Error types for abe.

use std::io;
use std::path::PathBuf;

use pfm_io::{PfmError, ShareError};
use thiserror::Error;

/// Errors in a filter configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The JSON text could not be parsed.
    #[error("invalid filter configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A field is outside its usable range.
    #[error("invalid filter configuration: {field} {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Errors that can occur in the area-based editor runtime.
#[derive(Error, Debug)]
pub enum AbeError {
    /// Storage engine failure.
    #[error(transparent)]
    Pfm(#[from] PfmError),

    /// Shared segment failure.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// Unusable filter configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The filter's per-run memory could not be allocated.
    #[error("cannot allocate filter accumulator for {bins} bins")]
    Allocation {
        /// Bins requested.
        bins: usize,
    },

    /// The filter area is empty or does not overlap the structure.
    #[error("invalid filter area: {reason}")]
    InvalidArea {
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A layer index past the end of the stack.
    #[error("no layer {index}, the stack holds {len}")]
    NoSuchLayer {
        /// Requested index.
        index: usize,
        /// Layers in the stack.
        len: usize,
    },

    /// The worker thread ended without handing back its result.
    #[error("worker thread exited without a result")]
    WorkerLost,

    /// Native I/O failure (worker thread creation, feature files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for abe operations.
pub type Result<T> = std::result::Result<T, AbeError>;
