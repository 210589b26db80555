//! Handle-indexed large-file I/O.
//!
//! A [`LargeFileTable`] owns a bounded pool of open files addressed by small
//! integer handles. All offsets are 64-bit. Each slot remembers whether its
//! last operation was a read or a write and flushes its write-behind buffer
//! when the direction changes, so reads always observe earlier writes.
//!
//! ```text
//!   slot 0: [file | mode | last_op | pos | pending bytes @ pending_start]
//!   slot 1: [ empty ]
//!   ...
//!   slot MAX_LARGE_FILES - 1
//! ```
//!
//! None of these calls may run while the ABE shared-memory lock is held by the
//! calling thread; debug builds assert this.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::LargeFileError;
use crate::shared::lock_is_held_by_this_thread;

/// Default number of concurrently open handles.
pub const MAX_LARGE_FILES: usize = 64;

/// Write-behind buffer size per handle.
pub const WRITE_BEHIND_CAPACITY: usize = 64 * 1024;

type Result<T> = std::result::Result<T, LargeFileError>;

/// Index of an open slot in a [`LargeFileTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LfHandle(usize);

impl LfHandle {
    /// Slot index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// How a large file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LfMode {
    /// Existing file, reads only.
    ReadOnly,
    /// Existing file, reads and writes.
    ReadWrite,
    /// Create or truncate, then read and write.
    Create,
}

impl LfMode {
    fn options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            LfMode::ReadOnly => {
                opts.read(true);
            }
            LfMode::ReadWrite => {
                opts.read(true).write(true);
            }
            LfMode::Create => {
                opts.read(true).write(true).create(true).truncate(true);
            }
        }
        opts
    }

    /// Mode used to reopen after a truncate; never truncates again.
    fn reopen_mode(self) -> Self {
        match self {
            LfMode::Create => LfMode::ReadWrite,
            other => other,
        }
    }

    /// Whether writes are permitted.
    #[inline]
    pub fn is_writable(self) -> bool {
        !matches!(self, LfMode::ReadOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOp {
    None,
    Read,
    Write,
}

#[derive(Debug)]
struct LargeFile {
    file: File,
    path: PathBuf,
    mode: LfMode,
    last_op: LastOp,
    pos: u64,
    pending: Vec<u8>,
    pending_start: u64,
}

impl LargeFile {
    fn pending_end(&self) -> u64 {
        self.pending_start + self.pending.len() as u64
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.pending_start))?;
        self.file.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }

    fn switch_to(&mut self, op: LastOp) -> io::Result<()> {
        if self.last_op == LastOp::Write && op == LastOp::Read {
            self.flush_pending()?;
            self.file.flush()?;
        }
        self.last_op = op;
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        let on_disk = self.file.metadata()?.len();
        Ok(on_disk.max(self.pending_end()))
    }
}

/// Bounded table of open large files.
#[derive(Debug)]
pub struct LargeFileTable {
    slots: Vec<Option<LargeFile>>,
}

impl Default for LargeFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LargeFileTable {
    /// Table with [`MAX_LARGE_FILES`] slots.
    pub fn new() -> Self {
        Self::with_capacity(MAX_LARGE_FILES)
    }

    /// Table with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of open handles.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Open `path` in the first free slot.
    pub fn open(&mut self, path: impl AsRef<Path>, mode: LfMode) -> Result<LfHandle> {
        debug_assert!(!lock_is_held_by_this_thread());
        let path = path.as_ref();
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(LargeFileError::OutOfHandles {
                capacity: self.slots.len(),
            })?;

        let file = mode.options().open(path).map_err(|source| LargeFileError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        self.slots[index] = Some(LargeFile {
            file,
            path: path.to_path_buf(),
            mode,
            last_op: LastOp::None,
            pos: 0,
            pending: Vec::new(),
            pending_start: 0,
        });
        log::debug!("lfio: opened {} as handle {} ({:?})", path.display(), index, mode);
        Ok(LfHandle(index))
    }

    fn slot(&mut self, handle: LfHandle) -> Result<&mut LargeFile> {
        self.slots
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(LargeFileError::InvalidHandle(handle.0))
    }

    /// Read up to `item_count` items of `item_size` bytes at the current
    /// position. Returns the number of whole items read.
    pub fn read(
        &mut self,
        handle: LfHandle,
        buffer: &mut [u8],
        item_size: usize,
        item_count: usize,
    ) -> Result<usize> {
        debug_assert!(!lock_is_held_by_this_thread());
        if item_size == 0 {
            return Ok(0);
        }
        let count = item_count.min(buffer.len() / item_size);
        let wanted = count * item_size;

        let lf = self.slot(handle)?;
        lf.switch_to(LastOp::Read)?;
        lf.file.seek(SeekFrom::Start(lf.pos))?;

        let mut got = 0;
        while got < wanted {
            match lf.file.read(&mut buffer[got..wanted]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        lf.pos += got as u64;
        Ok(got / item_size)
    }

    /// Write `item_count` items of `item_size` bytes at the current position.
    /// Returns the number of items accepted.
    pub fn write(
        &mut self,
        handle: LfHandle,
        buffer: &[u8],
        item_size: usize,
        item_count: usize,
    ) -> Result<usize> {
        debug_assert!(!lock_is_held_by_this_thread());
        if item_size == 0 {
            return Ok(0);
        }
        let count = item_count.min(buffer.len() / item_size);
        let bytes = &buffer[..count * item_size];

        let lf = self.slot(handle)?;
        if !lf.mode.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open read-only", lf.path.display()),
            )
            .into());
        }
        lf.switch_to(LastOp::Write)?;

        if lf.pending.is_empty() {
            lf.pending_start = lf.pos;
        } else if lf.pos != lf.pending_end() {
            lf.flush_pending()?;
            lf.pending_start = lf.pos;
        }
        lf.pending.extend_from_slice(bytes);
        lf.pos += bytes.len() as u64;

        if lf.pending.len() >= WRITE_BEHIND_CAPACITY {
            lf.flush_pending()?;
        }
        Ok(count)
    }

    /// Move the position. Seeking before the start is an error.
    pub fn seek(&mut self, handle: LfHandle, pos: SeekFrom) -> Result<u64> {
        let lf = self.slot(handle)?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => lf.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => lf.len()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        lf.pos = target;
        Ok(target)
    }

    /// Current position.
    pub fn tell(&mut self, handle: LfHandle) -> Result<u64> {
        Ok(self.slot(handle)?.pos)
    }

    /// Logical length, including bytes still in the write-behind buffer.
    pub fn len(&mut self, handle: LfHandle) -> Result<u64> {
        Ok(self.slot(handle)?.len()?)
    }

    /// Write any pending bytes and flush the native stream.
    pub fn flush(&mut self, handle: LfHandle) -> Result<()> {
        debug_assert!(!lock_is_held_by_this_thread());
        let lf = self.slot(handle)?;
        lf.flush_pending()?;
        lf.file.flush()?;
        Ok(())
    }

    /// Truncate or extend to `length` bytes.
    ///
    /// The native handle is closed around the truncate and the file is
    /// reopened into the same slot with its original mode. The position is
    /// kept, clamped to the new length.
    pub fn truncate(&mut self, handle: LfHandle, length: u64) -> Result<()> {
        debug_assert!(!lock_is_held_by_this_thread());
        let index = handle.0;
        let mut lf = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(LargeFileError::InvalidHandle(index))?;

        let outcome = (|| -> Result<File> {
            lf.flush_pending()?;
            lf.file.flush()?;
            let reopen = lf.mode.reopen_mode();
            {
                let native = OpenOptions::new().write(true).open(&lf.path)?;
                native.set_len(length)?;
            }
            reopen.options().open(&lf.path).map_err(|source| LargeFileError::Open {
                path: lf.path.clone(),
                source,
            })
        })();

        match outcome {
            Ok(file) => {
                lf.file = file;
                lf.mode = lf.mode.reopen_mode();
                lf.pos = lf.pos.min(length);
                lf.last_op = LastOp::None;
                self.slots[index] = Some(lf);
                Ok(())
            }
            Err(e) => {
                // put the old handle back so the slot is not silently freed
                self.slots[index] = Some(lf);
                Err(e)
            }
        }
    }

    /// Flush and release a handle.
    pub fn close(&mut self, handle: LfHandle) -> Result<()> {
        debug_assert!(!lock_is_held_by_this_thread());
        let mut lf = self
            .slots
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(LargeFileError::InvalidHandle(handle.0))?;
        lf.flush_pending()?;
        lf.file.flush()?;
        log::debug!("lfio: closed handle {} ({})", handle.0, lf.path.display());
        Ok(())
    }

    /// Read exactly `buffer.len()` bytes at `offset`.
    pub fn read_exact_at(&mut self, handle: LfHandle, offset: u64, buffer: &mut [u8]) -> Result<()> {
        self.seek(handle, SeekFrom::Start(offset))?;
        let got = self.read(handle, buffer, 1, buffer.len())?;
        if got != buffer.len() {
            return Err(LargeFileError::ShortTransfer {
                offset,
                expected: buffer.len(),
                got,
            });
        }
        Ok(())
    }

    /// Write all of `buffer` at `offset`.
    pub fn write_all_at(&mut self, handle: LfHandle, offset: u64, buffer: &[u8]) -> Result<()> {
        self.seek(handle, SeekFrom::Start(offset))?;
        let put = self.write(handle, buffer, 1, buffer.len())?;
        if put != buffer.len() {
            return Err(LargeFileError::ShortTransfer {
                offset,
                expected: buffer.len(),
                got: put,
            });
        }
        Ok(())
    }

    /// Close every open handle, returning the first error.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for index in 0..self.slots.len() {
            if self.slots[index].is_some() {
                if let Err(e) = self.close(LfHandle(index)) {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for LargeFileTable {
    fn drop(&mut self) {
        for lf in self.slots.iter_mut().flatten() {
            if let Err(e) = lf.flush_pending() {
                log::warn!("lfio: lost pending writes to {}: {}", lf.path.display(), e);
            }
        }
    }
}
