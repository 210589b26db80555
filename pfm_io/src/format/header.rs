//! PFM bin-file header definition.

use pfm_core::validity::NUM_USER_FLAGS;
use pfm_core::{AverageType, BinGeometry, Mbr, PfmCoreError, PointerPacking};

use crate::shared::layout::{decode_fixed_str, encode_fixed_str, SHARED_FLAG_NAME_LEN};

/// Magic bytes at the start of a bin file.
pub const PFM_MAGIC: [u8; 4] = *b"PFMB";

/// Format version written by this crate.
pub const PFM_FORMAT_VERSION: u32 = 1;

/// Header size in bytes. Bin records start immediately after it.
pub const HEADER_SIZE: usize = 1024;

/// Bytes per user flag name.
pub const FLAG_NAME_LEN: usize = SHARED_FLAG_NAME_LEN;

const FLAG_NAMES_OFFSET: usize = 96;

/// Bin-file header.
///
/// Layout (1024 bytes, little-endian scalars):
/// - Bytes 0-3: Magic "PFMB"
/// - Bytes 4-7: version (u32)
/// - Byte 8: pointer packing tag (0 = PFM, 1 = IVS)
/// - Byte 9: projected flag
/// - Byte 10: average type tag
/// - Byte 11: reserved
/// - Bytes 12-15: width (u32)
/// - Bytes 16-19: height (u32)
/// - Bytes 20-23: records per depth buffer (u32)
/// - Bytes 24-55: MBR min_x, min_y, max_x, max_y (f64)
/// - Bytes 56-71: x/y bin size (f64)
/// - Bytes 72-91: null depth, depth scale, depth offset, horizontal and
///   vertical error scale (f32)
/// - Bytes 92-95: bin record size, depth record size (u16)
/// - Bytes 96-255: five user flag names, 32 bytes each, NUL padded
/// - Bytes 256-1023: reserved, zero
#[derive(Debug, Clone, PartialEq)]
pub struct PfmHeader {
    /// Format version.
    pub version: u32,
    /// 64-bit split used for chain addresses.
    pub pointer_packing: PointerPacking,
    /// What a bin's average filtered depth holds.
    pub average_type: AverageType,
    /// Bin grid.
    pub geometry: BinGeometry,
    /// Sentinel depth of bins with no valid data.
    pub null_depth: f32,
    /// Depth quantisation: stored = round((z + offset) * scale).
    pub depth_scale: f32,
    /// Offset added to depths before scaling.
    pub depth_offset: f32,
    /// Horizontal error quantisation scale.
    pub horizontal_error_scale: f32,
    /// Vertical error quantisation scale.
    pub vertical_error_scale: f32,
    /// Depth records per chain buffer.
    pub records_per_buffer: u32,
    /// Names of USER_01..USER_05.
    pub user_flag_names: [String; NUM_USER_FLAGS],
    /// Bin record size in bytes as written.
    pub bin_record_size: u16,
    /// Depth record size in bytes as written.
    pub depth_record_size: u16,
}

/// Whether `bytes` starts with the bin-file magic.
#[inline]
pub fn has_pfm_magic(bytes: &[u8]) -> bool {
    bytes.len() >= PFM_MAGIC.len() && bytes[..PFM_MAGIC.len()] == PFM_MAGIC
}

impl PfmHeader {
    /// Serialize the header.
    ///
    /// Fails if a user flag name does not fit its 32-byte field.
    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE], PfmCoreError> {
        let mut bytes = [0u8; HEADER_SIZE];
        let g = &self.geometry;

        bytes[0..4].copy_from_slice(&PFM_MAGIC);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8] = self.pointer_packing.tag();
        bytes[9] = u8::from(g.projected);
        bytes[10] = self.average_type as u8;
        bytes[12..16].copy_from_slice(&g.width.to_le_bytes());
        bytes[16..20].copy_from_slice(&g.height.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.records_per_buffer.to_le_bytes());
        bytes[24..32].copy_from_slice(&g.mbr.min_x.to_le_bytes());
        bytes[32..40].copy_from_slice(&g.mbr.min_y.to_le_bytes());
        bytes[40..48].copy_from_slice(&g.mbr.max_x.to_le_bytes());
        bytes[48..56].copy_from_slice(&g.mbr.max_y.to_le_bytes());
        bytes[56..64].copy_from_slice(&g.x_bin_size.to_le_bytes());
        bytes[64..72].copy_from_slice(&g.y_bin_size.to_le_bytes());
        bytes[72..76].copy_from_slice(&self.null_depth.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.depth_scale.to_le_bytes());
        bytes[80..84].copy_from_slice(&self.depth_offset.to_le_bytes());
        bytes[84..88].copy_from_slice(&self.horizontal_error_scale.to_le_bytes());
        bytes[88..92].copy_from_slice(&self.vertical_error_scale.to_le_bytes());
        bytes[92..94].copy_from_slice(&self.bin_record_size.to_le_bytes());
        bytes[94..96].copy_from_slice(&self.depth_record_size.to_le_bytes());

        for (i, name) in self.user_flag_names.iter().enumerate() {
            let field: [u8; FLAG_NAME_LEN] =
                encode_fixed_str(name).ok_or(PfmCoreError::ValueOutOfRange {
                    field: "user flag name length",
                    value: name.len() as i64,
                })?;
            let start = FLAG_NAMES_OFFSET + i * FLAG_NAME_LEN;
            bytes[start..start + FLAG_NAME_LEN].copy_from_slice(&field);
        }

        Ok(bytes)
    }

    /// Deserialize a header. The caller checks [`has_pfm_magic`] first.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, PfmCoreError> {
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
        let f32_at = |o: usize| f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let f64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[o..o + 8]);
            f64::from_le_bytes(b)
        };

        let pointer_packing = PointerPacking::try_from_tag(bytes[8])?;
        let average_type = AverageType::from_tag(bytes[10]).ok_or(PfmCoreError::UnknownTag {
            kind: "average type",
            tag: bytes[10],
        })?;

        // Stored MBR is already snapped; rebuilding through BinGeometry::new
        // could round the bin count differently.
        let geometry = BinGeometry {
            mbr: Mbr::new(f64_at(24), f64_at(32), f64_at(40), f64_at(48)),
            x_bin_size: f64_at(56),
            y_bin_size: f64_at(64),
            width: u32_at(12),
            height: u32_at(16),
            projected: bytes[9] != 0,
        };
        if geometry.width == 0 || geometry.height == 0 {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "grid has no bins",
            });
        }
        if !(geometry.x_bin_size > 0.0 && geometry.y_bin_size > 0.0) {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "bin size must be positive",
            });
        }

        let user_flag_names = core::array::from_fn(|i| {
            let start = FLAG_NAMES_OFFSET + i * FLAG_NAME_LEN;
            decode_fixed_str(&bytes[start..start + FLAG_NAME_LEN])
                .unwrap_or_default()
                .to_string()
        });

        Ok(Self {
            version: u32_at(4),
            pointer_packing,
            average_type,
            geometry,
            null_depth: f32_at(72),
            depth_scale: f32_at(76),
            depth_offset: f32_at(80),
            horizontal_error_scale: f32_at(84),
            vertical_error_scale: f32_at(88),
            records_per_buffer: u32_at(20),
            user_flag_names,
            bin_record_size: u16_at(92),
            depth_record_size: u16_at(94),
        })
    }

    /// Bytes of one depth-chain buffer.
    #[inline]
    pub fn depth_buffer_size(&self) -> u64 {
        super::depth_record::POINTER_BYTES as u64
            + self.records_per_buffer as u64 * self.depth_record_size as u64
    }

    /// File offset of a bin record.
    #[inline]
    pub fn bin_offset(&self, linear_index: u64) -> u64 {
        HEADER_SIZE as u64 + linear_index * self.bin_record_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PfmHeader {
        PfmHeader {
            version: PFM_FORMAT_VERSION,
            pointer_packing: PointerPacking::Pfm,
            average_type: AverageType::Mean,
            geometry: BinGeometry::new(Mbr::new(0.0, 0.0, 25.0, 25.0), 5.0, 5.0, true).unwrap(),
            null_depth: 1_000_000.0,
            depth_scale: 1000.0,
            depth_offset: 1000.0,
            horizontal_error_scale: 100.0,
            vertical_error_scale: 100.0,
            records_per_buffer: 4,
            user_flag_names: [
                "Hockey puck".into(),
                String::new(),
                String::new(),
                String::new(),
                "Review".into(),
            ],
            bin_record_size: 38,
            depth_record_size: 26,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes().unwrap();
        assert!(has_pfm_magic(&bytes));
        let restored = PfmHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, restored);
    }

    #[test]
    fn test_header_magic() {
        let mut bytes = sample_header().to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"BADM");
        assert!(!has_pfm_magic(&bytes));
        assert!(!has_pfm_magic(b"PF"));
    }

    #[test]
    fn test_ivs_tag_survives() {
        let mut header = sample_header();
        header.pointer_packing = PointerPacking::Ivs;
        let restored = PfmHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.pointer_packing, PointerPacking::Ivs);
    }

    #[test]
    fn test_unknown_packing_tag() {
        let mut bytes = sample_header().to_bytes().unwrap();
        bytes[8] = 7;
        assert!(matches!(
            PfmHeader::from_bytes(&bytes),
            Err(PfmCoreError::UnknownTag { tag: 7, .. })
        ));
    }

    #[test]
    fn test_flag_name_too_long() {
        let mut header = sample_header();
        header.user_flag_names[0] = "x".repeat(FLAG_NAME_LEN);
        assert!(header.to_bytes().is_err());
    }

    #[test]
    fn test_offsets() {
        let header = sample_header();
        assert_eq!(header.bin_offset(0), 1024);
        assert_eq!(header.bin_offset(3), 1024 + 3 * 38);
        assert_eq!(header.depth_buffer_size(), 6 + 4 * 26);
    }
}
