//! Error types for pfm_core operations.
//!
//! Provides a simple error enum with no external dependencies for no_std compatibility.

use core::fmt;

/// Error types that can occur during pfm_core operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PfmCoreError {
    /// Bin grid parameters do not describe a usable grid.
    InvalidGeometry {
        /// What was wrong.
        reason: &'static str,
    },
    /// A bit field width is outside the supported range.
    InvalidBitWidth {
        /// Requested width.
        bits: u32,
        /// Largest width accepted.
        max: u32,
    },
    /// A value does not fit in its bit field.
    ValueOutOfRange {
        /// Field the value was destined for.
        field: &'static str,
        /// The offending value.
        value: i64,
    },
    /// A stored tag does not name a known variant.
    UnknownTag {
        /// Kind of tag.
        kind: &'static str,
        /// The tag value.
        tag: u8,
    },
}

impl fmt::Display for PfmCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PfmCoreError::InvalidGeometry { reason } => {
                write!(f, "invalid bin geometry: {}", reason)
            }
            PfmCoreError::InvalidBitWidth { bits, max } => {
                write!(f, "bit width {} exceeds maximum {}", bits, max)
            }
            PfmCoreError::ValueOutOfRange { field, value } => {
                write!(f, "value {} does not fit in field {}", value, field)
            }
            PfmCoreError::UnknownTag { kind, tag } => {
                write!(f, "unknown {} tag {}", kind, tag)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PfmCoreError {}
