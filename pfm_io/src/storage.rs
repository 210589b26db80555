//! PFM storage engine.
//!
//! A [`PfmFile`] maps bin coordinates to durable records. Bin records sit at
//! fixed offsets in the bin file; each bin's soundings sit in a chain of
//! fixed-size buffers in the depth file. Records are appended and rewritten in
//! place, never removed.
//!
//! # Aggregate consistency
//!
//! A bin's cached aggregates describe its currently valid soundings only.
//! [`PfmFile::update_depth_record`] does not recompute them; callers follow it
//! with [`PfmFile::recompute_bin_values`]. [`PfmFile::add_depth_record`]
//! recomputes immediately, except between [`PfmFile::begin_load`] and
//! [`PfmFile::finish_load`] where touched bins are recomputed once at the end.
//!
//! # File deletion
//!
//! Deleting a source file is a manifest flag plus a sweep over every bin that
//! sets `DELETED` on the file's records. A `<list>.sweep` marker is written
//! before the manifest changes and removed after the sweep, so an interrupted
//! delete or restore is finished the next time the structure is opened for
//! update. [`PfmFile::reconcile_deleted_files`] rederives every record's
//! `DELETED` bit from the manifest.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use pfm_core::{
    summarize, AverageType, BinCoord, BinGeometry, BinRecord, DepthRecord, Point2, SoundingId,
    Validity,
};

use crate::config::PfmCreateParams;
use crate::error::{LargeFileError, PfmError, Result};
use crate::format::bin_record::checked_pointer;
use crate::format::{
    has_pfm_magic, BinRecordCodec, DepthRecordCodec, PfmHeader, BIN_RECORD_SIZE, DEPTH_MAGIC,
    DEPTH_RECORD_SIZE, HEADER_SIZE, PFM_FORMAT_VERSION, POINTER_BYTES,
};
use crate::lfio::{LargeFileTable, LfHandle, LfMode};
use crate::list_file::{resolve, sibling, ListEntry, ListFile, SweepIntent};
use crate::open_args::OpenArgs;

/// Bins written per chunk when initialising a new bin file.
const INIT_CHUNK_BINS: usize = 4096;

/// How a structure is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpenMode {
    /// No mutation allowed.
    #[default]
    ReadOnly,
    /// Edits, appends and manifest changes allowed.
    Update,
}

/// Options for [`PfmFile::recompute_bin_values`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecomputeOptions {
    /// Statistic stored in `avg_filtered_depth`.
    pub average: AverageType,
}

/// An open PFM structure.
#[derive(Debug)]
pub struct PfmFile {
    list_path: PathBuf,
    list: ListFile,
    header: PfmHeader,
    mode: OpenMode,
    files: LargeFileTable,
    bin: LfHandle,
    depth: LfHandle,
    bin_codec: BinRecordCodec,
    depth_codec: DepthRecordCodec,
    loading: bool,
    touched: BTreeSet<BinCoord>,
    closed: bool,
}

/// `<list>.ckpt`, present while a load is in progress.
pub fn checkpoint_path(list_path: &Path) -> PathBuf {
    sibling(list_path, "ckpt")
}

impl PfmFile {
    /// Create a new, empty structure at `list_path`.
    ///
    /// The bin and depth files are created next to it as `<stem>.bin` and
    /// `<stem>.dep`. The returned handle is open for update.
    pub fn create(list_path: impl AsRef<Path>, params: &PfmCreateParams) -> Result<Self> {
        let list_path = list_path.as_ref().to_path_buf();
        params.validate()?;
        if list_path.exists() {
            return Err(PfmError::InvalidParams {
                reason: format!("{} already exists", list_path.display()),
            });
        }

        let stem = list_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| PfmError::InvalidParams {
                reason: format!("{} has no file name", list_path.display()),
            })?;
        let list = ListFile::new(format!("{}.bin", stem), format!("{}.dep", stem));

        let header = PfmHeader {
            version: PFM_FORMAT_VERSION,
            pointer_packing: params.pointer_packing,
            average_type: params.average_type,
            geometry: params.geometry()?,
            null_depth: params.null_depth,
            depth_scale: params.depth_scale,
            depth_offset: params.depth_offset,
            horizontal_error_scale: params.horizontal_error_scale,
            vertical_error_scale: params.vertical_error_scale,
            records_per_buffer: params.records_per_buffer,
            user_flag_names: params.user_flag_names.clone(),
            bin_record_size: BIN_RECORD_SIZE as u16,
            depth_record_size: DEPTH_RECORD_SIZE as u16,
        };
        let header_bytes = header.to_bytes()?;
        let bin_codec = BinRecordCodec::from_header(&header);
        let depth_codec = DepthRecordCodec::from_header(&header);

        let mut files = LargeFileTable::new();
        let bin = files.open(resolve(&list_path, &list.bin_file), LfMode::Create)?;
        let depth = files.open(resolve(&list_path, &list.depth_file), LfMode::Create)?;

        files.write_all_at(bin, 0, &header_bytes)?;
        let mut empty = [0u8; BIN_RECORD_SIZE];
        bin_codec.encode(&BinRecord::empty(BinCoord::default(), bin_codec.null_depth()), &mut empty)?;
        let total = header.geometry.num_bins();
        let chunk: Vec<u8> = empty.repeat(INIT_CHUNK_BINS);
        let mut written = 0u64;
        while written < total {
            let n = (total - written).min(INIT_CHUNK_BINS as u64) as usize;
            files.write_all_at(bin, header.bin_offset(written), &chunk[..n * BIN_RECORD_SIZE])?;
            written += n as u64;
        }
        files.write_all_at(depth, 0, &DEPTH_MAGIC)?;
        files.flush(bin)?;
        files.flush(depth)?;

        list.save(&list_path)?;
        log::info!(
            "created PFM {} ({}x{} bins, {} records per buffer)",
            list_path.display(),
            header.geometry.width,
            header.geometry.height,
            header.records_per_buffer
        );

        Ok(Self {
            list_path,
            list,
            header,
            mode: OpenMode::Update,
            files,
            bin,
            depth,
            bin_codec,
            depth_codec,
            loading: false,
            touched: BTreeSet::new(),
            closed: false,
        })
    }

    /// Open an existing structure.
    ///
    /// Fails with [`PfmError::CheckpointExists`] when a previous load did not
    /// finish. In update mode an interrupted delete or restore is completed
    /// before the handle is returned.
    pub fn open(list_path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let list_path = list_path.as_ref().to_path_buf();
        let ckpt = checkpoint_path(&list_path);
        if ckpt.exists() {
            log::warn!("checkpoint {} found, refusing to open", ckpt.display());
            return Err(PfmError::CheckpointExists { path: ckpt });
        }

        let list = ListFile::load(&list_path)?;
        let bin_path = resolve(&list_path, &list.bin_file);
        let depth_path = resolve(&list_path, &list.depth_file);
        let lf_mode = match mode {
            OpenMode::ReadOnly => LfMode::ReadOnly,
            OpenMode::Update => LfMode::ReadWrite,
        };

        let mut files = LargeFileTable::new();
        let bin = files.open(&bin_path, lf_mode)?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        match files.read_exact_at(bin, 0, &mut header_bytes) {
            Ok(()) => {}
            Err(LargeFileError::ShortTransfer { .. }) => {
                return Err(PfmError::NotAPfmFile { path: bin_path })
            }
            Err(e) => return Err(e.into()),
        }
        if !has_pfm_magic(&header_bytes) {
            return Err(PfmError::NotAPfmFile { path: bin_path });
        }
        let header = PfmHeader::from_bytes(&header_bytes).map_err(|e| PfmError::CorruptFile {
            reason: format!("{}: {}", bin_path.display(), e),
        })?;
        if header.bin_record_size as usize != BIN_RECORD_SIZE
            || header.depth_record_size as usize != DEPTH_RECORD_SIZE
        {
            return Err(PfmError::CorruptFile {
                reason: format!(
                    "{}: record sizes {}/{} do not match this format ({}/{})",
                    bin_path.display(),
                    header.bin_record_size,
                    header.depth_record_size,
                    BIN_RECORD_SIZE,
                    DEPTH_RECORD_SIZE
                ),
            });
        }
        if header.records_per_buffer == 0 {
            return Err(PfmError::CorruptFile {
                reason: format!("{}: zero records per buffer", bin_path.display()),
            });
        }
        if files.len(bin)? < header.bin_offset(header.geometry.num_bins()) {
            return Err(PfmError::CorruptFile {
                reason: format!("{}: bin file is truncated", bin_path.display()),
            });
        }

        let depth = files.open(&depth_path, lf_mode)?;
        let mut magic = [0u8; DEPTH_MAGIC.len()];
        let magic_ok = files.read_exact_at(depth, 0, &mut magic).is_ok() && magic == DEPTH_MAGIC;
        if !magic_ok {
            return Err(PfmError::CorruptFile {
                reason: format!("{}: not a PFM depth file", depth_path.display()),
            });
        }

        let mut pfm = Self {
            bin_codec: BinRecordCodec::from_header(&header),
            depth_codec: DepthRecordCodec::from_header(&header),
            list_path,
            list,
            header,
            mode,
            files,
            bin,
            depth,
            loading: false,
            touched: BTreeSet::new(),
            closed: false,
        };

        if mode == OpenMode::Update {
            if let Some(intent) = SweepIntent::read(&pfm.list_path)? {
                log::warn!(
                    "{}: completing interrupted {:?}",
                    pfm.list_path.display(),
                    intent
                );
                pfm.apply_sweep_intent(intent)?;
            }
        }

        log::info!(
            "opened PFM {} ({:?}, {}x{} bins, {} source files)",
            pfm.list_path.display(),
            mode,
            pfm.header.geometry.width,
            pfm.header.geometry.height,
            pfm.list.entries().len()
        );
        Ok(pfm)
    }

    fn require_update(&self) -> Result<()> {
        match self.mode {
            OpenMode::Update => Ok(()),
            OpenMode::ReadOnly => Err(PfmError::ReadOnly),
        }
    }

    /// The list file this structure was opened from.
    #[inline]
    pub fn list_path(&self) -> &Path {
        &self.list_path
    }

    /// Open mode.
    #[inline]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Layer description for the session segment.
    pub fn open_args(&self) -> OpenArgs {
        OpenArgs {
            list_path: self.list_path.clone(),
            geometry: self.header.geometry,
            null_depth: self.header.null_depth,
            user_flag_names: self.header.user_flag_names.clone(),
        }
    }

    /// Bin-file header.
    #[inline]
    pub fn header(&self) -> &PfmHeader {
        &self.header
    }

    /// Bin grid.
    #[inline]
    pub fn geometry(&self) -> &BinGeometry {
        &self.header.geometry
    }

    /// Null-depth sentinel as stored in bin aggregates.
    #[inline]
    pub fn null_depth(&self) -> f64 {
        self.bin_codec.null_depth()
    }

    /// Recompute options matching the header's average type.
    #[inline]
    pub fn recompute_options(&self) -> RecomputeOptions {
        RecomputeOptions {
            average: self.header.average_type,
        }
    }

    /// Bin containing `point`.
    #[inline]
    pub fn compute_index(&self, point: Point2) -> Option<BinCoord> {
        self.header.geometry.compute_index(point)
    }

    /// Centre of bin `coord`.
    #[inline]
    pub fn bin_center(&self, coord: BinCoord) -> Point2 {
        self.header.geometry.bin_center(coord)
    }

    fn bin_offset(&self, coord: BinCoord) -> Result<u64> {
        let index = self
            .header
            .geometry
            .linear_index(coord)
            .ok_or(PfmError::OutOfGrid { coord })?;
        Ok(self.header.bin_offset(index))
    }

    /// Read one bin record.
    pub fn read_bin_record(&mut self, coord: BinCoord) -> Result<BinRecord> {
        let offset = self.bin_offset(coord)?;
        let mut buf = [0u8; BIN_RECORD_SIZE];
        self.files.read_exact_at(self.bin, offset, &mut buf)?;
        Ok(self.bin_codec.decode(coord, &buf))
    }

    fn store_bin_record(&mut self, record: &BinRecord) -> Result<()> {
        let offset = self.bin_offset(record.coord)?;
        let mut buf = [0u8; BIN_RECORD_SIZE];
        self.bin_codec.encode(record, &mut buf)?;
        self.files.write_all_at(self.bin, offset, &buf)?;
        Ok(())
    }

    /// Overwrite a bin's cached aggregate fields.
    ///
    /// The sounding count and chain addresses on disk are kept; the depth
    /// chain is never touched.
    pub fn write_bin_record(&mut self, record: &BinRecord) -> Result<()> {
        self.require_update()?;
        let stored = self.read_bin_record(record.coord)?;
        let merged = BinRecord {
            num_soundings: stored.num_soundings,
            first_buffer: stored.first_buffer,
            last_buffer: stored.last_buffer,
            ..*record
        };
        self.store_bin_record(&merged)
    }

    /// Addresses of every buffer in a bin's chain, validated.
    fn chain_buffers(&mut self, bin: &BinRecord) -> Result<Vec<u64>> {
        let rpb = self.header.records_per_buffer as u64;
        let needed = (bin.num_soundings as u64).div_ceil(rpb) as usize;
        let depth_len = self.files.len(self.depth)?;
        let buffer_size = self.header.depth_buffer_size();

        let mut buffers = Vec::with_capacity(needed);
        let mut address = bin.first_buffer;
        let mut head = [0u8; POINTER_BYTES];
        for i in 0..needed {
            if address == 0 {
                return Err(PfmError::CorruptChain {
                    coord: bin.coord,
                    reason: "chain ends before the last sounding",
                });
            }
            if address < DEPTH_MAGIC.len() as u64 || address + buffer_size > depth_len {
                return Err(PfmError::CorruptChain {
                    coord: bin.coord,
                    reason: "buffer address outside the depth file",
                });
            }
            buffers.push(address);
            if i + 1 < needed {
                self.files.read_exact_at(self.depth, address, &mut head)?;
                address = self.depth_codec.continuation(&head);
            }
        }
        if buffers.last().copied().unwrap_or(0) != bin.last_buffer {
            return Err(PfmError::CorruptChain {
                coord: bin.coord,
                reason: "last buffer does not match the bin record",
            });
        }
        Ok(buffers)
    }

    fn read_buffer(&mut self, address: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.header.depth_buffer_size() as usize];
        self.files.read_exact_at(self.depth, address, &mut buf)?;
        Ok(buf)
    }

    #[inline]
    fn slot_range(slot: usize) -> std::ops::Range<usize> {
        let start = POINTER_BYTES + slot * DEPTH_RECORD_SIZE;
        start..start + DEPTH_RECORD_SIZE
    }

    fn records_of(&mut self, bin: &BinRecord) -> Result<Vec<DepthRecord>> {
        let buffers = self.chain_buffers(bin)?;
        let rpb = self.header.records_per_buffer as usize;
        let total = bin.num_soundings as usize;
        let mut out = Vec::with_capacity(total);
        for (b, address) in buffers.into_iter().enumerate() {
            let buf = self.read_buffer(address)?;
            let in_buffer = (total - b * rpb).min(rpb);
            for slot in 0..in_buffer {
                let position = (b * rpb + slot) as u32;
                out.push(self.depth_codec.decode(bin.coord, position, &buf[Self::slot_range(slot)]));
            }
        }
        Ok(out)
    }

    /// Every sounding chained under `coord`, in chain order.
    pub fn read_depth_array(&mut self, coord: BinCoord) -> Result<Vec<DepthRecord>> {
        let bin = self.read_bin_record(coord)?;
        if bin.num_soundings == 0 {
            return Err(PfmError::NoData { coord });
        }
        self.records_of(&bin)
    }

    /// Rewrite one sounding in place.
    ///
    /// `record.coord` and `record.chain_position` select the sounding. Its
    /// provenance (file, record and subrecord numbers) is not editable and its
    /// `DELETED` bit follows the manifest, not the caller. Its position must stay
    /// inside the bin, edges included. The new contents are
    /// encoded completely before anything is written. Aggregates are not
    /// recomputed.
    pub fn update_depth_record(&mut self, record: &DepthRecord) -> Result<()> {
        self.require_update()?;
        let bin = self.read_bin_record(record.coord)?;
        if record.chain_position >= bin.num_soundings {
            return Err(PfmError::NoSuchRecord {
                coord: record.coord,
                position: record.chain_position,
            });
        }

        if !self.header.geometry.bin_mbr(record.coord).contains_closed(record.position) {
            return Err(PfmError::OutsideBin {
                coord: record.coord,
                position: record.chain_position,
            });
        }

        let rpb = self.header.records_per_buffer;
        let buffers = self.chain_buffers(&bin)?;
        let address = buffers[(record.chain_position / rpb) as usize];
        let range = Self::slot_range((record.chain_position % rpb) as usize);
        let offset = address + range.start as u64;

        let mut stored_bytes = [0u8; DEPTH_RECORD_SIZE];
        self.files.read_exact_at(self.depth, offset, &mut stored_bytes)?;
        let stored = self
            .depth_codec
            .decode(record.coord, record.chain_position, &stored_bytes);
        if self.list.is_deleted(stored.file_number)? || stored.validity.is_deleted() {
            return Err(PfmError::FileDeleted {
                file_number: stored.file_number,
            });
        }

        let mut validity = record.validity;
        validity.set(Validity::DELETED, stored.validity.is_deleted());
        let updated = DepthRecord {
            file_number: stored.file_number,
            record_number: stored.record_number,
            subrecord: stored.subrecord,
            validity,
            ..*record
        };
        let mut bytes = [0u8; DEPTH_RECORD_SIZE];
        self.depth_codec.encode(&updated, &mut bytes)?;
        self.files.write_all_at(self.depth, offset, &bytes)?;
        Ok(())
    }

    /// Append a sounding to the bin containing its position.
    ///
    /// The record's `coord` and `chain_position` are assigned here. Its
    /// `DELETED` bit follows the manifest.
    pub fn add_depth_record(&mut self, record: &DepthRecord) -> Result<SoundingId> {
        self.require_update()?;
        let coord = self.compute_index(record.position).ok_or(PfmError::OutOfGrid {
            coord: self.header.geometry.compute_index_unbounded(record.position),
        })?;
        let deleted = self.list.is_deleted(record.file_number)?;

        let mut bin = self.read_bin_record(coord)?;
        let mut validity = record.validity;
        validity.set(Validity::DELETED, deleted);
        let placed = DepthRecord {
            coord,
            chain_position: bin.num_soundings,
            validity,
            ..*record
        };
        let mut bytes = [0u8; DEPTH_RECORD_SIZE];
        self.depth_codec.encode(&placed, &mut bytes)?;

        let rpb = self.header.records_per_buffer;
        let slot = (bin.num_soundings % rpb) as usize;
        if slot == 0 {
            let address = self.files.len(self.depth)?;
            checked_pointer(self.header.pointer_packing, address)?;
            let mut buffer = vec![0u8; self.header.depth_buffer_size() as usize];
            buffer[Self::slot_range(0)].copy_from_slice(&bytes);
            self.files.write_all_at(self.depth, address, &buffer)?;
            if bin.last_buffer != 0 {
                let mut head = [0u8; POINTER_BYTES];
                self.depth_codec.set_continuation(&mut head, address)?;
                self.files.write_all_at(self.depth, bin.last_buffer, &head)?;
            } else {
                bin.first_buffer = address;
            }
            bin.last_buffer = address;
        } else {
            let offset = bin.last_buffer + Self::slot_range(slot).start as u64;
            self.files.write_all_at(self.depth, offset, &bytes)?;
        }
        bin.num_soundings += 1;
        self.store_bin_record(&bin)?;

        if self.loading {
            self.touched.insert(coord);
        } else {
            let options = self.recompute_options();
            self.recompute_bin_values(coord, &mut bin, options)?;
        }
        Ok(placed.id())
    }

    /// Rederive a bin's aggregates from its currently valid soundings.
    ///
    /// `bin` receives the stored result. Its validity becomes the OR of every
    /// chained sounding's flags.
    pub fn recompute_bin_values(
        &mut self,
        coord: BinCoord,
        bin: &mut BinRecord,
        options: RecomputeOptions,
    ) -> Result<()> {
        self.require_update()?;
        let mut fresh = self.read_bin_record(coord)?;
        let records = self.records_of(&fresh)?;

        let mut flags = Validity::empty();
        let mut depths = Vec::with_capacity(records.len());
        for r in &records {
            flags |= r.validity;
            if r.is_valid() {
                depths.push(r.z);
            }
        }
        fresh.apply_summary(summarize(&depths, options.average), flags, self.null_depth());
        self.store_bin_record(&fresh)?;
        *bin = fresh;
        Ok(())
    }

    /// Register a source file and return its number.
    pub fn add_list_file(&mut self, path: impl Into<PathBuf>) -> Result<u16> {
        self.require_update()?;
        let number = self.list.add(path)?;
        self.list.save(&self.list_path)?;
        log::debug!("{}: added source file {}", self.list_path.display(), number);
        Ok(number)
    }

    /// Every source file in the manifest.
    #[inline]
    pub fn list_files(&self) -> &[ListEntry] {
        self.list.entries()
    }

    /// Logically delete a source file and mark its soundings `DELETED`.
    ///
    /// Returns the number of soundings changed.
    pub fn delete_list_file(&mut self, file_number: u16) -> Result<usize> {
        self.set_file_deleted(SweepIntent::Delete(file_number))
    }

    /// Undo [`delete_list_file`](Self::delete_list_file).
    pub fn restore_list_file(&mut self, file_number: u16) -> Result<usize> {
        self.set_file_deleted(SweepIntent::Restore(file_number))
    }

    fn set_file_deleted(&mut self, intent: SweepIntent) -> Result<usize> {
        self.require_update()?;
        self.list.is_deleted(intent.file_number())?;
        SweepIntent::write(intent, &self.list_path)?;
        self.apply_sweep_intent(intent)
    }

    fn apply_sweep_intent(&mut self, intent: SweepIntent) -> Result<usize> {
        let n = intent.file_number();
        if self.list.set_deleted(n, intent.deletes())? != intent.deletes() {
            self.list.save(&self.list_path)?;
        }
        let changed = self.sweep_file_status(n)?;
        self.flush()?;
        SweepIntent::clear(&self.list_path)?;
        log::info!(
            "{}: {:?} swept, {} soundings changed",
            self.list_path.display(),
            intent,
            changed
        );
        Ok(changed)
    }

    /// Make every sounding of `file_number` carry `DELETED` exactly when the
    /// manifest marks the file deleted. Idempotent.
    pub fn sweep_file_status(&mut self, file_number: u16) -> Result<usize> {
        self.require_update()?;
        let deleted = self.list.is_deleted(file_number)?;
        self.sweep(|file| (file == file_number).then_some(deleted))
    }

    /// Rederive `DELETED` on every sounding from the manifest.
    pub fn reconcile_deleted_files(&mut self) -> Result<usize> {
        self.require_update()?;
        let status: Vec<bool> = self.list.entries().iter().map(|e| e.deleted).collect();
        let changed = self.sweep(|file| status.get(file as usize).copied())?;
        if changed > 0 {
            log::warn!(
                "{}: reconciliation changed {} soundings",
                self.list_path.display(),
                changed
            );
        }
        Ok(changed)
    }

    /// Walk every bin, setting or clearing `DELETED` per `wanted(file)`
    /// (`None` leaves the sounding alone). Bins that change are recomputed.
    fn sweep(&mut self, wanted: impl Fn(u16) -> Option<bool>) -> Result<usize> {
        let rpb = self.header.records_per_buffer as usize;
        let options = self.recompute_options();
        let (width, height) = (self.header.geometry.width as i32, self.header.geometry.height as i32);
        let mut changed = 0usize;

        for row in 0..height {
            for col in 0..width {
                let coord = BinCoord::new(row, col);
                let mut bin = self.read_bin_record(coord)?;
                if bin.num_soundings == 0 {
                    continue;
                }
                let total = bin.num_soundings as usize;
                let mut bin_changed = false;
                for (b, address) in self.chain_buffers(&bin)?.into_iter().enumerate() {
                    let mut buf = self.read_buffer(address)?;
                    let mut dirty = false;
                    for slot in 0..(total - b * rpb).min(rpb) {
                        let bytes = &mut buf[Self::slot_range(slot)];
                        let Some(want) = wanted(DepthRecordCodec::file_number(bytes)) else {
                            continue;
                        };
                        let validity = DepthRecordCodec::validity(bytes);
                        if validity.is_deleted() != want {
                            let mut v = validity;
                            v.set(Validity::DELETED, want);
                            DepthRecordCodec::set_validity(bytes, v);
                            dirty = true;
                            changed += 1;
                        }
                    }
                    if dirty {
                        self.files.write_all_at(self.depth, address, &buf)?;
                        bin_changed = true;
                    }
                }
                if bin_changed {
                    self.recompute_bin_values(coord, &mut bin, options)?;
                }
            }
        }
        Ok(changed)
    }

    /// Start a bulk load: write the checkpoint marker and defer aggregate
    /// recomputation of appended bins until [`finish_load`](Self::finish_load).
    pub fn begin_load(&mut self) -> Result<()> {
        self.require_update()?;
        fs::write(checkpoint_path(&self.list_path), format!("{}\n", std::process::id()))?;
        self.loading = true;
        log::info!("{}: load started", self.list_path.display());
        Ok(())
    }

    /// Recompute every bin touched by the load, flush, and remove the
    /// checkpoint marker. Returns the number of bins recomputed.
    pub fn finish_load(&mut self) -> Result<usize> {
        self.require_update()?;
        let touched = std::mem::take(&mut self.touched);
        let options = self.recompute_options();
        for &coord in &touched {
            let mut bin = self.read_bin_record(coord)?;
            self.recompute_bin_values(coord, &mut bin, options)?;
        }
        self.flush()?;
        match fs::remove_file(checkpoint_path(&self.list_path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.loading = false;
        log::info!(
            "{}: load finished, {} bins recomputed",
            self.list_path.display(),
            touched.len()
        );
        Ok(touched.len())
    }

    /// Write pending bytes to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.files.flush(self.bin)?;
        self.files.flush(self.depth)?;
        Ok(())
    }

    /// Flush and close. A load still in progress leaves its checkpoint behind.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        if self.loading {
            log::warn!(
                "{}: closed during a load, checkpoint left in place",
                self.list_path.display()
            );
        }
        self.files.close_all()?;
        log::info!("closed PFM {}", self.list_path.display());
        Ok(())
    }
}

impl Drop for PfmFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.files.close_all() {
            log::warn!("{}: error closing on drop: {}", self.list_path.display(), e);
        }
    }
}
