//! Point-cloud segment: the editor's in-memory soundings, exposed to
//! ancillary filters by the editor process that owns them.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ magic | version | count | capacity            │  PointCloudHeader (16 B)
//! ├───────────────────────────────────────────────┤
//! │ SharedPoint[0] .. SharedPoint[capacity - 1]   │  56 B each
//! └───────────────────────────────────────────────┘
//! ```

use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use memmap2::{MmapMut, MmapOptions};
use pfm_core::{BinCoord, DepthRecord, SoundingId, Validity};

use super::{point_cloud_key, ShareConfig};
use crate::error::ShareError;

type Result<T> = std::result::Result<T, ShareError>;

/// Magic number of a point-cloud segment ("PCL1").
pub const POINT_CLOUD_MAGIC: u32 = 0x5043_4C31;

/// Layout version.
pub const POINT_CLOUD_VERSION: u32 = 1;

#[repr(C)]
struct PointCloudHeader {
    magic: u32,
    version: u32,
    count: u32,
    capacity: u32,
}

const HEADER_SIZE: usize = size_of::<PointCloudHeader>();

/// One sounding as the editor holds it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SharedPoint {
    /// Position x.
    pub x: f64,
    /// Position y.
    pub y: f64,
    /// Depth.
    pub z: f32,
    /// Horizontal error.
    pub herr: f32,
    /// Vertical error.
    pub verr: f32,
    /// Record number in the source file.
    pub record: u32,
    /// Validity bits.
    pub validity: u16,
    /// Layer index.
    pub pfm: u16,
    /// Source file number.
    pub file: u16,
    /// Sub-record.
    pub subrecord: u16,
    /// Bin row.
    pub row: i32,
    /// Bin column.
    pub col: i32,
    /// Position in the bin's chain.
    pub chain_position: u32,
    _padding: u32,
}

impl SharedPoint {
    /// Copy a depth record held in layer `pfm`.
    pub fn from_record(record: &DepthRecord, pfm: u16) -> Self {
        Self {
            x: record.position.x,
            y: record.position.y,
            z: record.z as f32,
            herr: record.horizontal_error,
            verr: record.vertical_error,
            record: record.record_number,
            validity: record.validity.bits(),
            pfm,
            file: record.file_number,
            subrecord: record.subrecord,
            row: record.coord.row,
            col: record.coord.col,
            chain_position: record.chain_position,
            _padding: 0,
        }
    }

    /// Identity of the sounding in its layer.
    #[inline]
    pub fn id(&self) -> SoundingId {
        SoundingId::new(BinCoord::new(self.row, self.col), self.chain_position)
    }

    /// Validity flags, dropping unknown bits.
    #[inline]
    pub fn validity(&self) -> Validity {
        Validity::from_bits_truncate(self.validity)
    }
}

/// Mapped point-cloud segment.
pub struct PointCloudSegment {
    key: String,
    path: PathBuf,
    mmap: MmapMut,
    capacity: usize,
}

impl std::fmt::Debug for PointCloudSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloudSegment")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PointCloudSegment {
    /// Create the segment for editor `ppid` with room for `capacity` points.
    pub fn create(ppid: u32, capacity: usize, config: &ShareConfig) -> Result<Self> {
        let key = point_cloud_key(ppid);
        let path = config.segment_path(&key);
        let cap = u32::try_from(capacity).map_err(|_| ShareError::CapacityExceeded {
            what: "point cloud",
            max: u32::MAX as usize,
            got: capacity,
        })?;
        let total = HEADER_SIZE + capacity * size_of::<SharedPoint>();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ShareError::AlreadyExists { key: key.clone() },
                _ => ShareError::Io(e),
            })?;
        file.set_len(total as u64)?;

        // SAFETY: freshly sized file, accessed only through this mapping
        let mmap = unsafe { MmapOptions::new().len(total).map_mut(&file)? };
        let segment = Self {
            key,
            path,
            mmap,
            capacity,
        };
        let h = segment.header_ptr();
        // SAFETY: the mapping holds at least the header
        unsafe {
            addr_of_mut!((*h).version).write_volatile(POINT_CLOUD_VERSION);
            addr_of_mut!((*h).capacity).write_volatile(cap);
            addr_of_mut!((*h).count).write_volatile(0);
            addr_of_mut!((*h).magic).write_volatile(POINT_CLOUD_MAGIC);
        }
        log::debug!("created point cloud {} ({} points)", segment.key, capacity);
        Ok(segment)
    }

    /// Attach to the segment published by editor `ppid`.
    pub fn attach(ppid: u32, config: &ShareConfig) -> Result<Self> {
        let key = point_cloud_key(ppid);
        let path = config.segment_path(&key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ShareError::NotFound { key: key.clone() },
                _ => ShareError::Io(e),
            })?;

        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(ShareError::BadSegment {
                key,
                reason: "backing file smaller than the header",
            });
        }
        // SAFETY: length read from the file; contents validated below
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        let mut segment = Self {
            key,
            path,
            mmap,
            capacity: 0,
        };

        let h = segment.header_ptr();
        // SAFETY: header is in bounds
        let (magic, capacity) = unsafe {
            (
                addr_of!((*h).magic).read_volatile(),
                addr_of!((*h).capacity).read_volatile() as usize,
            )
        };
        if magic != POINT_CLOUD_MAGIC {
            return Err(ShareError::BadSegment {
                key: segment.key,
                reason: "bad magic",
            });
        }
        if HEADER_SIZE + capacity * size_of::<SharedPoint>() > len {
            return Err(ShareError::BadSegment {
                key: segment.key,
                reason: "capacity exceeds backing file",
            });
        }
        segment.capacity = capacity;
        Ok(segment)
    }

    #[inline]
    fn header_ptr(&self) -> *mut PointCloudHeader {
        self.mmap.as_ptr() as *mut PointCloudHeader
    }

    /// Segment key, `"<ppid>_abe_pfmEdit"`.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Most points the segment holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points currently published.
    pub fn len(&self) -> usize {
        // SAFETY: header is in bounds
        let count = unsafe { addr_of!((*self.header_ptr()).count).read_volatile() } as usize;
        count.min(self.capacity)
    }

    /// Whether no points are published.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the number of published points.
    pub fn set_len(&mut self, count: usize) -> Result<()> {
        if count > self.capacity {
            return Err(ShareError::CapacityExceeded {
                what: "point cloud",
                max: self.capacity,
                got: count,
            });
        }
        // SAFETY: header is in bounds
        unsafe { addr_of_mut!((*self.header_ptr()).count).write_volatile(count as u32) };
        Ok(())
    }

    /// Published points.
    pub fn points(&self) -> &[SharedPoint] {
        let len = self.len();
        // SAFETY: the points region follows the 16-byte header, which keeps the
        // 8-byte alignment of the page-aligned mapping; len <= capacity was
        // validated against the mapping length
        unsafe {
            let base = self.mmap.as_ptr().add(HEADER_SIZE) as *const SharedPoint;
            std::slice::from_raw_parts(base, len)
        }
    }

    /// Published points, mutable.
    pub fn points_mut(&mut self) -> &mut [SharedPoint] {
        let len = self.len();
        // SAFETY: as in `points`; &mut self gives exclusive access to the mapping
        unsafe {
            let base = self.mmap.as_mut_ptr().add(HEADER_SIZE) as *mut SharedPoint;
            std::slice::from_raw_parts_mut(base, len)
        }
    }

    /// Replace the published points.
    pub fn publish(&mut self, points: &[SharedPoint]) -> Result<()> {
        if points.len() > self.capacity {
            return Err(ShareError::CapacityExceeded {
                what: "point cloud",
                max: self.capacity,
                got: points.len(),
            });
        }
        self.set_len(points.len())?;
        self.points_mut().copy_from_slice(points);
        Ok(())
    }

    /// Remove the backing file.
    pub fn destroy(self) -> Result<()> {
        drop(self.mmap);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
