//! Depth-file buffers and the bit-packed depth record codec.
//!
//! ```text
//! depth file:  "PFMDEPTH" | buffer | buffer | ...
//! buffer:      continuation (48 bits) | record[0] .. record[rpb - 1]
//!
//! record:
//! bit   0  file_number        16
//! bit  16  record_number      32
//! bit  48  subrecord          16
//! bit  64  x_offset           32   fraction of bin width * (2^32 - 1)
//! bit  96  y_offset           32   fraction of bin height * (2^32 - 1)
//! bit 128  depth              32   round((z + offset) * scale)
//! bit 160  horizontal_error   16   clamped
//! bit 176  vertical_error     16   clamped
//! bit 192  validity           16
//! ```

use pfm_core::{
    bit_pack, bit_unpack, max_unsigned, BinCoord, BinGeometry, DepthRecord, PfmCoreError,
    PointerPacking, Validity,
};

use super::bin_record::{checked_pointer, DepthScaling, POINTER_BITS};
use super::header::PfmHeader;

/// Magic at the start of a depth file. No buffer lives at address 0.
pub const DEPTH_MAGIC: [u8; 8] = *b"PFMDEPTH";

/// Bytes of a buffer's continuation address.
pub const POINTER_BYTES: usize = (POINTER_BITS as usize + 7) / 8;

/// Bits in one depth record.
pub const DEPTH_RECORD_BITS: u32 = 208;

/// Bytes in one depth record.
pub const DEPTH_RECORD_SIZE: usize = (DEPTH_RECORD_BITS as usize + 7) / 8;

const FILE_NUMBER: u32 = 0;
const RECORD_NUMBER: u32 = 16;
const SUBRECORD: u32 = 48;
const X_OFFSET: u32 = 64;
const Y_OFFSET: u32 = 96;
const DEPTH: u32 = 128;
const HERR: u32 = 160;
const VERR: u32 = 176;
const VALIDITY: u32 = 192;

/// Bit offset of the validity field, for flag-only rewrites.
pub const VALIDITY_BIT_OFFSET: u32 = VALIDITY;

/// Encoder/decoder for depth records of one structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRecordCodec {
    packing: PointerPacking,
    geometry: BinGeometry,
    depth: DepthScaling,
    herr_scale: f64,
    verr_scale: f64,
}

impl DepthRecordCodec {
    /// Codec for the structure described by `header`.
    pub fn from_header(header: &PfmHeader) -> Self {
        Self {
            packing: header.pointer_packing,
            geometry: header.geometry,
            depth: DepthScaling::from_header(header),
            herr_scale: header.horizontal_error_scale as f64,
            verr_scale: header.vertical_error_scale as f64,
        }
    }

    fn encode_error(value: f32, scale: f64) -> u32 {
        let scaled = (value as f64 * scale).round();
        scaled.clamp(0.0, max_unsigned(16) as f64) as u32
    }

    /// Encode `record` into `buf`. Every field is validated before `buf` is
    /// touched, so a failure leaves it unchanged.
    pub fn encode(&self, record: &DepthRecord, buf: &mut [u8]) -> Result<(), PfmCoreError> {
        let depth = self.depth.encode("depth", record.z)?;
        let (x_off, y_off) = self.geometry.encode_position(record.position, record.coord);
        let herr = Self::encode_error(record.horizontal_error, self.herr_scale);
        let verr = Self::encode_error(record.vertical_error, self.verr_scale);

        let out = &mut buf[..DEPTH_RECORD_SIZE];
        bit_pack(out, FILE_NUMBER, 16, record.file_number as i32);
        bit_pack(out, RECORD_NUMBER, 32, record.record_number as i32);
        bit_pack(out, SUBRECORD, 16, record.subrecord as i32);
        bit_pack(out, X_OFFSET, 32, x_off as i32);
        bit_pack(out, Y_OFFSET, 32, y_off as i32);
        bit_pack(out, DEPTH, 32, depth as i32);
        bit_pack(out, HERR, 16, herr as i32);
        bit_pack(out, VERR, 16, verr as i32);
        bit_pack(out, VALIDITY, 16, record.validity.bits() as i32);
        Ok(())
    }

    /// Decode the record at `chain_position` of bin `coord`.
    pub fn decode(&self, coord: BinCoord, chain_position: u32, buf: &[u8]) -> DepthRecord {
        let buf = &buf[..DEPTH_RECORD_SIZE];
        let position = self.geometry.decode_position(
            coord,
            bit_unpack(buf, X_OFFSET, 32),
            bit_unpack(buf, Y_OFFSET, 32),
        );
        DepthRecord {
            coord,
            chain_position,
            position,
            z: self.depth.decode(bit_unpack(buf, DEPTH, 32)),
            horizontal_error: (bit_unpack(buf, HERR, 16) as f64 / self.herr_scale) as f32,
            vertical_error: (bit_unpack(buf, VERR, 16) as f64 / self.verr_scale) as f32,
            validity: Validity::from_bits_retain(bit_unpack(buf, VALIDITY, 16) as u16),
            file_number: bit_unpack(buf, FILE_NUMBER, 16) as u16,
            record_number: bit_unpack(buf, RECORD_NUMBER, 32),
            subrecord: bit_unpack(buf, SUBRECORD, 16) as u16,
        }
    }

    /// Source file number of an encoded record.
    #[inline]
    pub fn file_number(buf: &[u8]) -> u16 {
        bit_unpack(buf, FILE_NUMBER, 16) as u16
    }

    /// Validity bits of an encoded record.
    #[inline]
    pub fn validity(buf: &[u8]) -> Validity {
        Validity::from_bits_retain(bit_unpack(buf, VALIDITY, 16) as u16)
    }

    /// Rewrite only the validity field of an encoded record.
    #[inline]
    pub fn set_validity(buf: &mut [u8], validity: Validity) {
        bit_pack(buf, VALIDITY, 16, validity.bits() as i32);
    }

    /// Read a buffer's continuation address.
    #[inline]
    pub fn continuation(&self, buffer_head: &[u8]) -> u64 {
        self.packing.unpack(buffer_head, 0, POINTER_BITS) as u64
    }

    /// Write a buffer's continuation address.
    pub fn set_continuation(&self, buffer_head: &mut [u8], address: u64) -> Result<(), PfmCoreError> {
        let value = checked_pointer(self.packing, address)?;
        self.packing.pack(buffer_head, 0, POINTER_BITS, value);
        Ok(())
    }
}
