//! ABE_SHARE shared-memory coordination.
//!
//! Cooperating editor, viewer and filter processes exchange session state
//! through one fixed-layout segment per editing session, keyed `"<id>_abe"`,
//! plus a point-cloud segment keyed `"<ppid>_abe_pfmEdit"` that exposes the
//! editor's live soundings to ancillary filters.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 <shm dir>/<id>_abe  (AbeShare)                │
//! ├───────────────────────────────────────────────────────────────┤
//! │  magic | version | lock: AtomicU32 | ppid | key               │
//! │  modcode: AtomicI32 | progress: AtomicU32                     │
//! │  open_args[MAX_ABE_PFMS] | display_pfm[MAX_ABE_PFMS]          │
//! │  edit polygon[MAX_POLY] + MBR                                 │
//! │  modified_point | modified_value                              │
//! │  delete_file_queue[MAX_DELETE_FILE_QUEUE]                     │
//! │  filter parameters                                            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking discipline
//!
//! Reads never lock. Any write that spans more than one field happens inside a
//! [`ShareGuard`] obtained from [`AbeShareSegment::lock`]. The lock is an
//! advisory spin lock with no timeout and no owner check; a crashed holder is
//! recovered with [`AbeShareSegment::force_unlock`].
//!
//! The guard must never be held across a blocking call. The guard is `!Send`
//! and the large-file layer asserts [`lock_is_held_by_this_thread`] is false in
//! debug builds.

pub mod handshake;
pub mod layout;
pub mod point_cloud;
pub mod segment;

use std::cell::Cell;
use std::path::{Path, PathBuf};

pub use handshake::{report_result, take_forwarded_edit, take_result, ChildResult};
pub use layout::{
    AbeShare, EditPolygon, FilterParams, ModCode, SharedOpenArgs, ABE_SHARE_MAGIC,
    ABE_SHARE_VERSION, MAX_ABE_PFMS, MAX_DELETE_FILE_QUEUE, MAX_POLY,
};
pub use point_cloud::{PointCloudSegment, SharedPoint};
pub use segment::{AbeShareSegment, ShareGuard, ShareState};

/// Environment variable overriding the shared-memory directory.
pub const SHM_DIR_ENV: &str = "ABE_SHM_DIR";

/// Where shared segments live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
    /// Directory holding the segment backing files.
    pub dir: PathBuf,
}

impl ShareConfig {
    /// Use `dir` for segment backing files.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$ABE_SHM_DIR`, else `/dev/shm` when present, else the temp directory.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(SHM_DIR_ENV) {
            return Self::new(dir);
        }
        let dev_shm = Path::new("/dev/shm");
        if dev_shm.is_dir() {
            Self::new(dev_shm)
        } else {
            Self::new(std::env::temp_dir())
        }
    }

    /// Backing file for a segment key.
    pub fn segment_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Key of the session segment for `id`.
#[inline]
pub fn share_key(id: u32) -> String {
    format!("{}_abe", id)
}

/// Key of the point-cloud segment published by editor `ppid`.
#[inline]
pub fn point_cloud_key(ppid: u32) -> String {
    format!("{}_abe_pfmEdit", ppid)
}

thread_local! {
    static LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Whether the calling thread currently holds an ABE_SHARE lock.
pub fn lock_is_held_by_this_thread() -> bool {
    LOCK_DEPTH.with(|d| d.get() > 0)
}

pub(crate) fn note_lock_acquired() {
    LOCK_DEPTH.with(|d| d.set(d.get() + 1));
}

pub(crate) fn note_lock_released() {
    LOCK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(share_key(4242), "4242_abe");
        assert_eq!(point_cloud_key(4242), "4242_abe_pfmEdit");
    }

    #[test]
    fn test_segment_path() {
        let cfg = ShareConfig::new("/tmp/abe");
        assert_eq!(cfg.segment_path("7_abe"), PathBuf::from("/tmp/abe/7_abe"));
    }

    #[test]
    fn test_lock_depth_tracking() {
        assert!(!lock_is_held_by_this_thread());
        note_lock_acquired();
        assert!(lock_is_held_by_this_thread());
        note_lock_released();
        assert!(!lock_is_held_by_this_thread());
    }
}
