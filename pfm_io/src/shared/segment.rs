//! File-backed mapping of the ABE_SHARE segment and its advisory lock.

use core::marker::PhantomData;
use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use pfm_core::{Mbr, Point2};

use super::layout::{
    AbeShare, EditPolygon, FilterParams, ModCode, SharedOpenArgs, ABE_SHARE_MAGIC,
    ABE_SHARE_SIZE, ABE_SHARE_VERSION, MAX_ABE_PFMS, MAX_DELETE_FILE_QUEUE, MAX_POLY,
};
use super::{note_lock_acquired, note_lock_released, share_key, ShareConfig};
use crate::error::ShareError;

type Result<T> = std::result::Result<T, ShareError>;

/// Spins before yielding the time slice while waiting for the lock.
const SPINS_BEFORE_YIELD: u32 = 64;

/// A mapped ABE_SHARE segment.
///
/// Reads through [`snapshot`](Self::snapshot) and the single-word accessors
/// never lock. Multi-field writes go through [`lock`](Self::lock).
pub struct AbeShareSegment {
    key: String,
    path: PathBuf,
    mmap: MmapMut,
}

impl std::fmt::Debug for AbeShareSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbeShareSegment")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

/// Owned copy of the segment's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareState {
    /// Creating process, 0 when torn down.
    pub ppid: u32,
    /// Session id.
    pub key: u32,
    /// Pending modification, `None` if the raw code is unknown.
    pub modcode: Option<ModCode>,
    /// Progress of an ancillary task.
    pub progress: u32,
    /// Layers in use.
    pub open_args: Vec<SharedOpenArgs>,
    /// Display flag per layer in use.
    pub display: Vec<bool>,
    /// Edit polygon vertices.
    pub polygon: Vec<Point2>,
    /// Edit polygon bounding rectangle.
    pub polygon_mbr: Mbr,
    /// Last single-point edit.
    pub modified_point: u32,
    /// Value of the last single-point edit.
    pub modified_value: f64,
    /// Pending deletions as `(layer, file number)`.
    pub delete_file_queue: Vec<(u32, u32)>,
    /// Filter parameters.
    pub filter: FilterParams,
}

impl AbeShareSegment {
    /// Create the segment for session `id`. Fails if it already exists.
    pub fn create(id: u32, config: &ShareConfig) -> Result<Self> {
        let key = share_key(id);
        let path = config.segment_path(&key);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ShareError::AlreadyExists { key: key.clone() },
                _ => ShareError::Io(e),
            })?;
        file.set_len(ABE_SHARE_SIZE as u64)?;

        // SAFETY: the file was just created with the segment's size and is only
        // accessed through this mapping and atomics inside it
        let mmap = unsafe { MmapOptions::new().len(ABE_SHARE_SIZE).map_mut(&file)? };

        let segment = Self { key, path, mmap };
        let p = segment.ptr();
        // SAFETY: p points at ABE_SHARE_SIZE zeroed bytes; AbeShare is valid when zeroed
        unsafe {
            addr_of_mut!((*p).version).write_volatile(ABE_SHARE_VERSION);
            addr_of_mut!((*p).ppid).write_volatile(std::process::id());
            addr_of_mut!((*p).key).write_volatile(id);
            addr_of_mut!((*p).magic).write_volatile(ABE_SHARE_MAGIC);
        }
        segment.mmap.flush()?;

        log::info!("created shared segment {} at {}", segment.key, segment.path.display());
        Ok(segment)
    }

    /// Attach to the existing segment for session `id`.
    ///
    /// Only the magic, version and size are checked. A torn-down session reads
    /// as zeroes; callers should check [`ppid`](Self::ppid) before trusting it.
    pub fn attach(id: u32, config: &ShareConfig) -> Result<Self> {
        let key = share_key(id);
        let path = config.segment_path(&key);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ShareError::NotFound { key: key.clone() },
                _ => ShareError::Io(e),
            })?;

        if file.metadata()?.len() < ABE_SHARE_SIZE as u64 {
            return Err(ShareError::BadSegment {
                key,
                reason: "backing file smaller than the segment layout",
            });
        }

        // SAFETY: size checked above; contents validated below before use
        let mmap = unsafe { MmapOptions::new().len(ABE_SHARE_SIZE).map_mut(&file)? };
        let segment = Self { key, path, mmap };

        let p = segment.ptr();
        // SAFETY: mapping is ABE_SHARE_SIZE bytes
        let (magic, version) = unsafe {
            (
                addr_of!((*p).magic).read_volatile(),
                addr_of!((*p).version).read_volatile(),
            )
        };
        if magic != ABE_SHARE_MAGIC {
            return Err(ShareError::BadSegment {
                key: segment.key,
                reason: "bad magic",
            });
        }
        if version != ABE_SHARE_VERSION {
            return Err(ShareError::BadSegment {
                key: segment.key,
                reason: "unsupported layout version",
            });
        }

        log::debug!("attached shared segment {}", segment.key);
        Ok(segment)
    }

    /// Create the segment, or attach if another process already did.
    pub fn create_or_attach(id: u32, config: &ShareConfig) -> Result<Self> {
        match Self::create(id, config) {
            Err(ShareError::AlreadyExists { .. }) => Self::attach(id, config),
            other => other,
        }
    }

    #[inline]
    fn ptr(&self) -> *mut AbeShare {
        self.mmap.as_ptr() as *mut AbeShare
    }

    #[inline]
    fn lock_word(&self) -> &AtomicU32 {
        // SAFETY: atomics are always accessed through shared references
        unsafe { &*addr_of!((*self.ptr()).lock) }
    }

    #[inline]
    fn modcode_word(&self) -> &AtomicI32 {
        // SAFETY: as above
        unsafe { &*addr_of!((*self.ptr()).modcode) }
    }

    #[inline]
    fn progress_word(&self) -> &AtomicU32 {
        // SAFETY: as above
        unsafe { &*addr_of!((*self.ptr()).progress) }
    }

    /// Segment key, `"<id>_abe"`.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creating process id, 0 once the session is torn down.
    pub fn ppid(&self) -> u32 {
        // SAFETY: in-bounds read of a plain u32
        unsafe { addr_of!((*self.ptr()).ppid).read_volatile() }
    }

    /// Whether a live session owns the segment.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.ppid() != 0
    }

    /// Current modification code. `None` for an unknown raw value.
    pub fn modcode(&self) -> Option<ModCode> {
        ModCode::from_raw(self.modcode_word().load(Ordering::Acquire))
    }

    /// Progress of an ancillary task.
    pub fn progress(&self) -> u32 {
        self.progress_word().load(Ordering::Relaxed)
    }

    /// Publish progress. A single word, so no lock is needed.
    pub fn set_progress(&self, percent: u32) {
        self.progress_word().store(percent.min(100), Ordering::Relaxed);
    }

    /// Holder of the lock, 0 when free.
    pub fn lock_holder(&self) -> u32 {
        self.lock_word().load(Ordering::Acquire)
    }

    /// Copy the segment without locking.
    ///
    /// Fields written concurrently by another process may be torn across the
    /// copy; writers keep their locked windows short for that reason.
    pub fn snapshot(&self) -> ShareState {
        let p = self.ptr();
        // SAFETY: every field is plain data valid for any bit pattern; reads are in bounds
        unsafe {
            let pfm_count = (addr_of!((*p).pfm_count).read_volatile() as usize).min(MAX_ABE_PFMS);
            let open_args = addr_of!((*p).open_args).read_volatile();
            let display = addr_of!((*p).display_pfm).read_volatile();
            let polygon = addr_of!((*p).polygon).read_volatile();
            let queue_count = (addr_of!((*p).delete_file_queue_count).read_volatile() as usize)
                .min(MAX_DELETE_FILE_QUEUE);
            let queue = addr_of!((*p).delete_file_queue).read_volatile();

            let vertex_count = (polygon.count as usize).min(MAX_POLY);
            ShareState {
                ppid: addr_of!((*p).ppid).read_volatile(),
                key: addr_of!((*p).key).read_volatile(),
                modcode: self.modcode(),
                progress: self.progress(),
                open_args: open_args[..pfm_count].to_vec(),
                display: display[..pfm_count].iter().map(|&d| d != 0).collect(),
                polygon: (0..vertex_count)
                    .map(|i| Point2::new(polygon.x[i], polygon.y[i]))
                    .collect(),
                polygon_mbr: Mbr::new(polygon.mbr[0], polygon.mbr[1], polygon.mbr[2], polygon.mbr[3]),
                modified_point: addr_of!((*p).modified_point).read_volatile(),
                modified_value: addr_of!((*p).modified_value).read_volatile(),
                delete_file_queue: queue[..queue_count].iter().map(|e| (e[0], e[1])).collect(),
                filter: addr_of!((*p).filter).read_volatile(),
            }
        }
    }

    /// Acquire the advisory lock, spinning until it is free.
    ///
    /// There is no timeout. Keep the returned guard alive only for the few
    /// field writes it brackets.
    pub fn lock(&self) -> ShareGuard<'_> {
        let me = std::process::id().max(1);
        let word = self.lock_word();
        let mut spins = 0u32;
        while word
            .compare_exchange_weak(0, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins = spins.wrapping_add(1);
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }
        note_lock_acquired();
        ShareGuard {
            segment: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<ShareGuard<'_>> {
        let me = std::process::id().max(1);
        self.lock_word()
            .compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        note_lock_acquired();
        Some(ShareGuard {
            segment: self,
            _not_send: PhantomData,
        })
    }

    /// Clear the lock word regardless of holder.
    ///
    /// Recovery for a holder that crashed inside its locked window.
    pub fn force_unlock(&self) {
        let holder = self.lock_word().swap(0, Ordering::Release);
        if holder != 0 {
            log::warn!("forced unlock of {} held by pid {}", self.key, holder);
        }
    }

    /// Tear the session down: zero `ppid` for late readers and remove the
    /// backing file.
    pub fn destroy(self) -> Result<()> {
        let p = self.ptr();
        // SAFETY: in-bounds write of a plain u32
        unsafe { addr_of_mut!((*p).ppid).write_volatile(0) };
        self.mmap.flush()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("destroyed shared segment {}", self.key);
        Ok(())
    }
}

/// Exclusive write window on an [`AbeShareSegment`].
///
/// Dropping the guard unlocks unconditionally. The guard is `!Send` so it cannot
/// be moved to a worker thread that might block while holding it.
pub struct ShareGuard<'a> {
    segment: &'a AbeShareSegment,
    _not_send: PhantomData<*const ()>,
}

impl ShareGuard<'_> {
    #[inline]
    fn ptr(&self) -> *mut AbeShare {
        self.segment.ptr()
    }

    /// The locked segment.
    #[inline]
    pub fn segment(&self) -> &AbeShareSegment {
        self.segment
    }

    /// Set the modification code.
    pub fn set_modcode(&mut self, code: ModCode) {
        self.segment.modcode_word().store(code.raw(), Ordering::Release);
    }

    /// Record a single-point edit.
    pub fn set_modified(&mut self, point: u32, value: f64) {
        let p = self.ptr();
        // SAFETY: in-bounds plain writes under the lock
        unsafe {
            addr_of_mut!((*p).modified_point).write_volatile(point);
            addr_of_mut!((*p).modified_value).write_volatile(value);
        }
    }

    /// Last single-point edit.
    pub fn modified(&self) -> (u32, f64) {
        let p = self.ptr();
        // SAFETY: in-bounds plain reads
        unsafe {
            (
                addr_of!((*p).modified_point).read_volatile(),
                addr_of!((*p).modified_value).read_volatile(),
            )
        }
    }

    /// Replace the edit polygon.
    pub fn set_edit_polygon(&mut self, vertices: &[Point2]) -> Result<()> {
        if vertices.len() > MAX_POLY {
            return Err(ShareError::CapacityExceeded {
                what: "edit polygon",
                max: MAX_POLY,
                got: vertices.len(),
            });
        }
        let mut polygon = EditPolygon::ZERO;
        polygon.count = vertices.len() as u32;
        for (i, v) in vertices.iter().enumerate() {
            polygon.x[i] = v.x;
            polygon.y[i] = v.y;
        }
        if let Some(mbr) = Mbr::from_points(vertices) {
            polygon.mbr = [mbr.min_x, mbr.min_y, mbr.max_x, mbr.max_y];
        }
        // SAFETY: in-bounds plain write under the lock
        unsafe { addr_of_mut!((*self.ptr()).polygon).write_volatile(polygon) };
        Ok(())
    }

    /// Replace the layer list. Index 0 is the editable top layer.
    pub fn set_layers(&mut self, layers: &[(SharedOpenArgs, bool)]) -> Result<()> {
        if layers.len() > MAX_ABE_PFMS {
            return Err(ShareError::CapacityExceeded {
                what: "layer list",
                max: MAX_ABE_PFMS,
                got: layers.len(),
            });
        }
        let mut args = [SharedOpenArgs::ZERO; MAX_ABE_PFMS];
        let mut display = [0u8; MAX_ABE_PFMS];
        for (i, (a, shown)) in layers.iter().enumerate() {
            args[i] = *a;
            display[i] = u8::from(*shown);
        }
        let p = self.ptr();
        // SAFETY: in-bounds plain writes under the lock
        unsafe {
            addr_of_mut!((*p).open_args).write_volatile(args);
            addr_of_mut!((*p).display_pfm).write_volatile(display);
            addr_of_mut!((*p).pfm_count).write_volatile(layers.len() as u32);
        }
        Ok(())
    }

    /// Toggle one layer's display flag.
    pub fn set_display(&mut self, layer: usize, shown: bool) -> Result<()> {
        if layer >= MAX_ABE_PFMS {
            return Err(ShareError::CapacityExceeded {
                what: "layer list",
                max: MAX_ABE_PFMS,
                got: layer + 1,
            });
        }
        let p = self.ptr();
        // SAFETY: index checked above
        unsafe {
            let flags = addr_of_mut!((*p).display_pfm) as *mut u8;
            flags.add(layer).write_volatile(u8::from(shown));
        }
        Ok(())
    }

    /// Queue a source file of a layer for deletion.
    pub fn push_delete_file(&mut self, layer: u32, file_number: u32) -> Result<()> {
        let p = self.ptr();
        // SAFETY: count is clamped before indexing
        unsafe {
            let count = addr_of!((*p).delete_file_queue_count).read_volatile() as usize;
            if count >= MAX_DELETE_FILE_QUEUE {
                return Err(ShareError::CapacityExceeded {
                    what: "delete file queue",
                    max: MAX_DELETE_FILE_QUEUE,
                    got: count + 1,
                });
            }
            let queue = addr_of_mut!((*p).delete_file_queue) as *mut [u32; 2];
            queue.add(count).write_volatile([layer, file_number]);
            addr_of_mut!((*p).delete_file_queue_count).write_volatile(count as u32 + 1);
        }
        Ok(())
    }

    /// Drain the delete queue.
    pub fn take_delete_queue(&mut self) -> Vec<(u32, u32)> {
        let p = self.ptr();
        // SAFETY: count is clamped to the array length
        unsafe {
            let count = (addr_of!((*p).delete_file_queue_count).read_volatile() as usize)
                .min(MAX_DELETE_FILE_QUEUE);
            let queue = addr_of!((*p).delete_file_queue).read_volatile();
            addr_of_mut!((*p).delete_file_queue_count).write_volatile(0);
            queue[..count].iter().map(|e| (e[0], e[1])).collect()
        }
    }

    /// Publish filter parameters.
    pub fn set_filter_params(&mut self, params: FilterParams) {
        // SAFETY: in-bounds plain write under the lock
        unsafe { addr_of_mut!((*self.ptr()).filter).write_volatile(params) };
    }
}

impl Drop for ShareGuard<'_> {
    fn drop(&mut self) {
        self.segment.lock_word().store(0, Ordering::Release);
        note_lock_released();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::lock_is_held_by_this_thread;

    fn config() -> (tempfile::TempDir, ShareConfig) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ShareConfig::new(dir.path());
        (dir, cfg)
    }

    #[test]
    fn test_create_attach_snapshot() {
        let (_dir, cfg) = config();
        let owner = AbeShareSegment::create(77, &cfg).unwrap();
        assert_eq!(owner.key(), "77_abe");
        assert_eq!(owner.ppid(), std::process::id());

        let other = AbeShareSegment::attach(77, &cfg).unwrap();
        {
            let mut g = owner.lock();
            g.set_modified(12, 33.5);
            g.set_modcode(ModCode::PositionValueEdit);
        }
        let state = other.snapshot();
        assert_eq!(state.key, 77);
        assert_eq!(state.modcode, Some(ModCode::PositionValueEdit));
        assert_eq!(state.modified_point, 12);
        assert_eq!(state.modified_value, 33.5);
    }

    #[test]
    fn test_create_twice_fails() {
        let (_dir, cfg) = config();
        let _a = AbeShareSegment::create(5, &cfg).unwrap();
        assert!(matches!(
            AbeShareSegment::create(5, &cfg),
            Err(ShareError::AlreadyExists { .. })
        ));
        assert!(AbeShareSegment::create_or_attach(5, &cfg).is_ok());
    }

    #[test]
    fn test_attach_missing() {
        let (_dir, cfg) = config();
        assert!(matches!(
            AbeShareSegment::attach(6, &cfg),
            Err(ShareError::NotFound { .. })
        ));
    }

    #[test]
    fn test_attach_rejects_garbage() {
        let (dir, cfg) = config();
        std::fs::write(dir.path().join("8_abe"), vec![0xAAu8; ABE_SHARE_SIZE]).unwrap();
        assert!(matches!(
            AbeShareSegment::attach(8, &cfg),
            Err(ShareError::BadSegment { reason: "bad magic", .. })
        ));
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let (_dir, cfg) = config();
        let seg = AbeShareSegment::create(9, &cfg).unwrap();
        {
            let _g = seg.lock();
            assert!(lock_is_held_by_this_thread());
            assert_ne!(seg.lock_holder(), 0);
            assert!(seg.try_lock().is_none());
        }
        assert!(!lock_is_held_by_this_thread());
        assert_eq!(seg.lock_holder(), 0);
    }

    #[test]
    fn test_force_unlock() {
        let (_dir, cfg) = config();
        let seg = AbeShareSegment::create(10, &cfg).unwrap();
        let g = seg.lock();
        std::mem::forget(g);
        note_lock_released();
        seg.force_unlock();
        assert!(seg.try_lock().is_some());
    }

    #[test]
    fn test_polygon_and_queue() {
        let (_dir, cfg) = config();
        let seg = AbeShareSegment::create(11, &cfg).unwrap();
        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 3.0),
            Point2::new(0.0, 3.0),
        ];
        {
            let mut g = seg.lock();
            g.set_edit_polygon(&square).unwrap();
            g.push_delete_file(0, 3).unwrap();
            g.push_delete_file(1, 7).unwrap();
            let too_many = vec![Point2::default(); MAX_POLY + 1];
            assert!(g.set_edit_polygon(&too_many).is_err());
        }
        let s = seg.snapshot();
        assert_eq!(s.polygon, square.to_vec());
        assert_eq!(s.polygon_mbr, Mbr::new(0.0, 0.0, 4.0, 3.0));
        assert_eq!(s.delete_file_queue, vec![(0, 3), (1, 7)]);

        let drained = seg.lock().take_delete_queue();
        assert_eq!(drained.len(), 2);
        assert!(seg.snapshot().delete_file_queue.is_empty());
    }

    #[test]
    fn test_destroy_zeroes_ppid_for_attached_readers() {
        let (_dir, cfg) = config();
        let owner = AbeShareSegment::create(12, &cfg).unwrap();
        let reader = AbeShareSegment::attach(12, &cfg).unwrap();
        let path = owner.path().to_path_buf();
        owner.destroy().unwrap();
        assert!(!path.exists());
        assert!(!reader.is_live());
    }
}
