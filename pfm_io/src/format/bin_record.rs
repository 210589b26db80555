//! Bit-packed bin record codec.
//!
//! ```text
//! bit   0  num_soundings       32
//! bit  32  num_valid           32
//! bit  64  validity            16
//! bit  80  avg_filtered_depth  32
//! bit 112  min_filtered_depth  32
//! bit 144  max_filtered_depth  32
//! bit 176  standard_dev        32
//! bit 208  first_buffer        48   64-bit split per header
//! bit 256  last_buffer         48   64-bit split per header
//! ```

use pfm_core::{bit_pack, bit_unpack, checked_field, BinCoord, BinRecord, PfmCoreError, PointerPacking, Validity};

use super::header::PfmHeader;

/// Bits in one bin record.
pub const BIN_RECORD_BITS: u32 = 304;

/// Bytes in one bin record.
pub const BIN_RECORD_SIZE: usize = (BIN_RECORD_BITS as usize + 7) / 8;

/// Width of a chain address field.
pub const POINTER_BITS: u32 = 48;

const NUM_SOUNDINGS: u32 = 0;
const NUM_VALID: u32 = 32;
const VALIDITY: u32 = 64;
const AVG: u32 = 80;
const MIN: u32 = 112;
const MAX: u32 = 144;
const STD: u32 = 176;
const FIRST_BUFFER: u32 = 208;
const LAST_BUFFER: u32 = 256;

/// Scaled depth encoding shared by bin and depth records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthScaling {
    scale: f64,
    offset: f64,
    null_depth: f64,
    null_raw: Option<u32>,
}

impl DepthScaling {
    /// Scaling described by the header.
    pub fn from_header(header: &PfmHeader) -> Self {
        let mut s = Self {
            scale: header.depth_scale as f64,
            offset: header.depth_offset as f64,
            null_depth: header.null_depth as f64,
            null_raw: None,
        };
        s.null_raw = s.encode("null depth", s.null_depth).ok();
        s
    }

    /// Quantise a depth into a 32-bit field.
    pub fn encode(&self, field: &'static str, z: f64) -> Result<u32, PfmCoreError> {
        if z == self.null_depth {
            if let Some(raw) = self.null_raw {
                return Ok(raw);
            }
        }
        let scaled = ((z + self.offset) * self.scale).round();
        if !scaled.is_finite() {
            return Err(PfmCoreError::ValueOutOfRange { field, value: i64::MAX });
        }
        checked_field(field, scaled as i64, 32)
    }

    /// Inverse of [`encode`](Self::encode). The null sentinel decodes exactly.
    pub fn decode(&self, raw: u32) -> f64 {
        if Some(raw) == self.null_raw {
            return self.null_depth;
        }
        raw as f64 / self.scale - self.offset
    }

    /// Quantise a standard deviation (no offset).
    pub fn encode_spread(&self, std: f64) -> Result<u32, PfmCoreError> {
        checked_field("standard deviation", (std * self.scale).round() as i64, 32)
    }

    /// Inverse of [`encode_spread`](Self::encode_spread).
    pub fn decode_spread(&self, raw: u32) -> f64 {
        raw as f64 / self.scale
    }

    /// Null-depth sentinel.
    #[inline]
    pub fn null_depth(&self) -> f64 {
        self.null_depth
    }
}

/// Check a chain address fits the packing scheme's 48-bit field.
pub fn checked_pointer(packing: PointerPacking, address: u64) -> Result<i64, PfmCoreError> {
    let value = i64::try_from(address).unwrap_or(i64::MAX);
    if value > packing.max_value(POINTER_BITS) {
        return Err(PfmCoreError::ValueOutOfRange {
            field: "depth buffer address",
            value,
        });
    }
    Ok(value)
}

/// Encoder/decoder for bin records of one structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinRecordCodec {
    packing: PointerPacking,
    depth: DepthScaling,
}

impl BinRecordCodec {
    /// Codec for the structure described by `header`.
    pub fn from_header(header: &PfmHeader) -> Self {
        Self {
            packing: header.pointer_packing,
            depth: DepthScaling::from_header(header),
        }
    }

    /// Null-depth sentinel.
    #[inline]
    pub fn null_depth(&self) -> f64 {
        self.depth.null_depth()
    }

    /// Encode every field before touching `buf`, so a failure leaves it unchanged.
    pub fn encode(&self, record: &BinRecord, buf: &mut [u8]) -> Result<(), PfmCoreError> {
        let avg = self.depth.encode("avg_filtered_depth", record.avg_filtered_depth)?;
        let min = self.depth.encode("min_filtered_depth", record.min_filtered_depth)?;
        let max = self.depth.encode("max_filtered_depth", record.max_filtered_depth)?;
        let std = self.depth.encode_spread(record.standard_dev)?;
        let first = checked_pointer(self.packing, record.first_buffer)?;
        let last = checked_pointer(self.packing, record.last_buffer)?;

        let out = &mut buf[..BIN_RECORD_SIZE];
        bit_pack(out, NUM_SOUNDINGS, 32, record.num_soundings as i32);
        bit_pack(out, NUM_VALID, 32, record.num_valid as i32);
        bit_pack(out, VALIDITY, 16, record.validity.bits() as i32);
        bit_pack(out, AVG, 32, avg as i32);
        bit_pack(out, MIN, 32, min as i32);
        bit_pack(out, MAX, 32, max as i32);
        bit_pack(out, STD, 32, std as i32);
        self.packing.pack(out, FIRST_BUFFER, POINTER_BITS, first);
        self.packing.pack(out, LAST_BUFFER, POINTER_BITS, last);
        Ok(())
    }

    /// Decode the record of bin `coord`.
    pub fn decode(&self, coord: BinCoord, buf: &[u8]) -> BinRecord {
        let buf = &buf[..BIN_RECORD_SIZE];
        BinRecord {
            coord,
            num_soundings: bit_unpack(buf, NUM_SOUNDINGS, 32),
            num_valid: bit_unpack(buf, NUM_VALID, 32),
            validity: Validity::from_bits_retain(bit_unpack(buf, VALIDITY, 16) as u16),
            avg_filtered_depth: self.depth.decode(bit_unpack(buf, AVG, 32)),
            min_filtered_depth: self.depth.decode(bit_unpack(buf, MIN, 32)),
            max_filtered_depth: self.depth.decode(bit_unpack(buf, MAX, 32)),
            standard_dev: self.depth.decode_spread(bit_unpack(buf, STD, 32)),
            first_buffer: self.packing.unpack(buf, FIRST_BUFFER, POINTER_BITS) as u64,
            last_buffer: self.packing.unpack(buf, LAST_BUFFER, POINTER_BITS) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfm_core::{AverageType, BinGeometry, Mbr};

    fn header(packing: PointerPacking) -> PfmHeader {
        PfmHeader {
            version: 1,
            pointer_packing: packing,
            average_type: AverageType::Mean,
            geometry: BinGeometry::new(Mbr::new(0.0, 0.0, 10.0, 10.0), 1.0, 1.0, true).unwrap(),
            null_depth: 1_000_000.0,
            depth_scale: 1000.0,
            depth_offset: 1000.0,
            horizontal_error_scale: 100.0,
            vertical_error_scale: 100.0,
            records_per_buffer: 8,
            user_flag_names: Default::default(),
            bin_record_size: BIN_RECORD_SIZE as u16,
            depth_record_size: 26,
        }
    }

    #[test]
    fn test_record_size() {
        assert_eq!(BIN_RECORD_SIZE, 38);
    }

    #[test]
    fn test_empty_bin_decodes_null_exactly() {
        let codec = BinRecordCodec::from_header(&header(PointerPacking::Pfm));
        let rec = BinRecord::empty(BinCoord::new(1, 2), codec.null_depth());
        let mut buf = [0u8; BIN_RECORD_SIZE];
        codec.encode(&rec, &mut buf).unwrap();
        let back = codec.decode(BinCoord::new(1, 2), &buf);
        assert_eq!(back, rec);
    }

    #[test]
    fn test_aggregates_within_quantum() {
        let codec = BinRecordCodec::from_header(&header(PointerPacking::Pfm));
        let mut rec = BinRecord::empty(BinCoord::new(0, 0), codec.null_depth());
        rec.num_soundings = 12;
        rec.num_valid = 9;
        rec.validity = Validity::SUSPECT | Validity::FILTER_INVAL;
        rec.avg_filtered_depth = 10.1234;
        rec.min_filtered_depth = -3.5;
        rec.max_filtered_depth = 250.0;
        rec.standard_dev = 0.0421;
        rec.first_buffer = 8;
        rec.last_buffer = (1u64 << 33) + 118;

        let mut buf = [0u8; BIN_RECORD_SIZE];
        codec.encode(&rec, &mut buf).unwrap();
        let back = codec.decode(rec.coord, &buf);
        assert_eq!(back.num_soundings, 12);
        assert_eq!(back.num_valid, 9);
        assert_eq!(back.validity, rec.validity);
        assert!((back.avg_filtered_depth - 10.1234).abs() <= 0.0005);
        assert!((back.min_filtered_depth + 3.5).abs() <= 0.0005);
        assert!((back.standard_dev - 0.0421).abs() <= 0.0005);
        assert_eq!(back.first_buffer, 8);
        assert_eq!(back.last_buffer, (1u64 << 33) + 118);
    }

    #[test]
    fn test_depth_out_of_range_leaves_buffer() {
        let codec = BinRecordCodec::from_header(&header(PointerPacking::Pfm));
        let mut rec = BinRecord::empty(BinCoord::new(0, 0), codec.null_depth());
        rec.avg_filtered_depth = -2000.0;
        let mut buf = [0xA5u8; BIN_RECORD_SIZE];
        assert!(codec.encode(&rec, &mut buf).is_err());
        assert!(buf.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_ivs_pointer_limit() {
        let ivs = BinRecordCodec::from_header(&header(PointerPacking::Ivs));
        let mut rec = BinRecord::empty(BinCoord::new(0, 0), ivs.null_depth());
        rec.first_buffer = 1u64 << 47;
        let mut buf = [0u8; BIN_RECORD_SIZE];
        assert!(ivs.encode(&rec, &mut buf).is_err());

        rec.first_buffer = (1u64 << 40) + 3;
        ivs.encode(&rec, &mut buf).unwrap();
        assert_eq!(ivs.decode(rec.coord, &buf).first_buffer, (1u64 << 40) + 3);
    }
}
