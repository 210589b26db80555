//! Fixed binary layout of the ABE_SHARE segment.
//!
//! Every type here is `#[repr(C)]` and valid when all-zero, so a freshly
//! created (zero-filled) backing file is a well-formed, empty segment once the
//! header words are set.
//!
//! Memory layout:
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  magic: u32 | version: u32 | lock: AtomicU32 | ppid: u32      │
//! │  key: u32 | modcode: AtomicI32 | progress: AtomicU32          │
//! │  pfm_count: u32                                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │  open_args: [SharedOpenArgs; MAX_ABE_PFMS]                    │
//! │  display_pfm: [u8; MAX_ABE_PFMS]                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │  polygon: EditPolygon  (count, x[MAX_POLY], y[MAX_POLY], mbr) │
//! ├───────────────────────────────────────────────────────────────┤
//! │  modified_point: u32 | modified_value: f64                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │  delete_file_queue_count: u32                                 │
//! │  delete_file_queue: [[u32; 2]; MAX_DELETE_FILE_QUEUE]         │
//! ├───────────────────────────────────────────────────────────────┤
//! │  filter: FilterParams                                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use core::sync::atomic::{AtomicI32, AtomicU32};

use pfm_core::validity::NUM_USER_FLAGS;

/// Magic number for segment validation ("ABE1").
pub const ABE_SHARE_MAGIC: u32 = 0x4142_4531;

/// Layout version.
pub const ABE_SHARE_VERSION: u32 = 1;

/// Most PFM layers a session can hold.
pub const MAX_ABE_PFMS: usize = 16;

/// Most vertices in the edit polygon.
pub const MAX_POLY: usize = 200;

/// Most pending file deletions.
pub const MAX_DELETE_FILE_QUEUE: usize = 100;

/// Bytes reserved for a layer's list-file path, NUL padded.
pub const SHARED_PATH_LEN: usize = 512;

/// Bytes reserved for a user flag name, NUL padded.
pub const SHARED_FLAG_NAME_LEN: usize = 32;

/// What kind of change the last ancillary process made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModCode {
    /// Nothing pending.
    #[default]
    None,
    /// Child finished and nothing needs re-reading.
    NoActionRequired,
    /// One point was edited; see `modified_point` and `modified_value`.
    PositionValueEdit,
    /// Soundings in the edit area were invalidated on disk.
    AreaInvalidated,
    /// The layer stack changed.
    LayersChanged,
    /// Source files were queued for deletion.
    FilesDeleted,
    /// A consumed point edit left for the second-tier (monitor) consumer.
    ForwardToMonitor,
}

impl ModCode {
    /// Raw value stored in the segment.
    pub const fn raw(self) -> i32 {
        match self {
            ModCode::None => 0,
            ModCode::NoActionRequired => -1,
            ModCode::PositionValueEdit => 1,
            ModCode::AreaInvalidated => 2,
            ModCode::LayersChanged => 3,
            ModCode::FilesDeleted => 4,
            ModCode::ForwardToMonitor => 5,
        }
    }

    /// Decode a raw value. Unknown values are `None` rather than a silent no-op.
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ModCode::None),
            -1 => Some(ModCode::NoActionRequired),
            1 => Some(ModCode::PositionValueEdit),
            2 => Some(ModCode::AreaInvalidated),
            3 => Some(ModCode::LayersChanged),
            4 => Some(ModCode::FilesDeleted),
            5 => Some(ModCode::ForwardToMonitor),
            _ => None,
        }
    }
}

/// One layer's open parameters in fixed binary form.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedOpenArgs {
    /// List-file path, UTF-8, NUL padded.
    pub list_path: [u8; SHARED_PATH_LEN],
    /// min_x, min_y, max_x, max_y.
    pub mbr: [f64; 4],
    /// Bin size along x.
    pub x_bin_size: f64,
    /// Bin size along y.
    pub y_bin_size: f64,
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Nonzero for projected coordinates.
    pub projected: u32,
    /// Null-depth sentinel.
    pub null_depth: f32,
    /// User flag names, NUL padded.
    pub user_flag_names: [[u8; SHARED_FLAG_NAME_LEN]; NUM_USER_FLAGS],
}

impl SharedOpenArgs {
    /// All-zero value; an empty slot.
    pub const ZERO: Self = Self {
        list_path: [0; SHARED_PATH_LEN],
        mbr: [0.0; 4],
        x_bin_size: 0.0,
        y_bin_size: 0.0,
        width: 0,
        height: 0,
        projected: 0,
        null_depth: 0.0,
        user_flag_names: [[0; SHARED_FLAG_NAME_LEN]; NUM_USER_FLAGS],
    };

    /// Whether the slot holds a layer.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list_path[0] == 0
    }
}

impl Default for SharedOpenArgs {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Copy `s` into a NUL-padded field. `None` when it does not fit with a NUL.
pub fn encode_fixed_str<const L: usize>(s: &str) -> Option<[u8; L]> {
    let bytes = s.as_bytes();
    if bytes.len() >= L {
        return None;
    }
    let mut out = [0u8; L];
    out[..bytes.len()].copy_from_slice(bytes);
    Some(out)
}

/// Read a NUL-padded field. Invalid UTF-8 yields `None`.
pub fn decode_fixed_str(field: &[u8]) -> Option<&str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..end]).ok()
}

/// The current edit area.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditPolygon {
    /// Vertices in use.
    pub count: u32,
    _padding: u32,
    /// Vertex x coordinates.
    pub x: [f64; MAX_POLY],
    /// Vertex y coordinates.
    pub y: [f64; MAX_POLY],
    /// Bounding rectangle: min_x, min_y, max_x, max_y.
    pub mbr: [f64; 4],
}

impl EditPolygon {
    /// Empty polygon.
    pub const ZERO: Self = Self {
        count: 0,
        _padding: 0,
        x: [0.0; MAX_POLY],
        y: [0.0; MAX_POLY],
        mbr: [0.0; 4],
    };
}

/// Filter parameters published by the editor for ancillary filters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterParams {
    /// Neighbourhood search radius in metres.
    pub search_radius: f64,
    /// Rise threshold for spike detection, metres.
    pub rise_threshold: f64,
    /// Standard-deviation multiplier of the area filter.
    pub filter_std: f32,
    /// Radius around point features that is never filtered, metres.
    pub feature_radius: f32,
    /// Nonzero: only invalidate soundings deeper than the neighbourhood.
    pub deep_filter_only: u32,
    /// Nonzero: the AC-zero offset must be present before filtering.
    pub ac_zero_offset_required: u32,
}

/// The whole session segment.
#[repr(C)]
pub struct AbeShare {
    /// Must equal [`ABE_SHARE_MAGIC`].
    pub magic: u32,
    /// Must equal [`ABE_SHARE_VERSION`].
    pub version: u32,
    /// Advisory lock word: 0 free, otherwise the holder's pid.
    pub lock: AtomicU32,
    /// Pid of the process that created the session; 0 means torn down.
    pub ppid: u32,
    /// Numeric session id the key was derived from.
    pub key: u32,
    /// Raw [`ModCode`].
    pub modcode: AtomicI32,
    /// Progress of a long-running ancillary task, 0..=100.
    pub progress: AtomicU32,
    /// Layers in use in `open_args`.
    pub pfm_count: u32,
    /// Open layers; index 0 is the editable top layer.
    pub open_args: [SharedOpenArgs; MAX_ABE_PFMS],
    /// Nonzero when the layer is displayed.
    pub display_pfm: [u8; MAX_ABE_PFMS],
    /// Edit area.
    pub polygon: EditPolygon,
    /// Index of the last single-point edit in the point-cloud segment.
    pub modified_point: u32,
    _padding: u32,
    /// New depth of the last single-point edit.
    pub modified_value: f64,
    /// Entries in use in `delete_file_queue`.
    pub delete_file_queue_count: u32,
    /// Pending deletions as `[layer index, file number]`.
    pub delete_file_queue: [[u32; 2]; MAX_DELETE_FILE_QUEUE],
    /// Filter parameters.
    pub filter: FilterParams,
}

/// Size of the segment in bytes.
pub const ABE_SHARE_SIZE: usize = core::mem::size_of::<AbeShare>();

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, size_of};

    #[test]
    fn test_modcode_raw_roundtrip() {
        for code in [
            ModCode::None,
            ModCode::NoActionRequired,
            ModCode::PositionValueEdit,
            ModCode::AreaInvalidated,
            ModCode::LayersChanged,
            ModCode::FilesDeleted,
            ModCode::ForwardToMonitor,
        ] {
            assert_eq!(ModCode::from_raw(code.raw()), Some(code));
        }
        assert_eq!(ModCode::from_raw(99), None);
        assert_eq!(ModCode::default().raw(), 0);
    }

    #[test]
    fn test_fixed_str() {
        let field: [u8; 8] = encode_fixed_str("abc").unwrap();
        assert_eq!(decode_fixed_str(&field), Some("abc"));
        assert!(encode_fixed_str::<4>("abcd").is_none());
    }

    #[test]
    fn test_layout_is_stable() {
        assert_eq!(align_of::<AbeShare>(), 8);
        assert_eq!(size_of::<EditPolygon>(), 8 + 2 * MAX_POLY * 8 + 32);
        assert_eq!(size_of::<FilterParams>(), 32);
        assert!(ABE_SHARE_SIZE > MAX_ABE_PFMS * SHARED_PATH_LEN);
    }

    #[test]
    fn test_zero_open_args_is_empty() {
        assert!(SharedOpenArgs::ZERO.is_empty());
        let mut a = SharedOpenArgs::ZERO;
        a.list_path = encode_fixed_str("/data/a.pfm").unwrap();
        assert!(!a.is_empty());
    }
}
