//! Bit-granular packing of integer fields into byte buffers.
//!
//! Every on-disk PFM record is a run of fixed-width integer fields laid end to
//! end with no byte alignment. Byte 0 of the buffer is the most significant, and
//! within a byte bit 7 comes first, so a field starting at bit `start` occupies
//! bits `[start, start + num_bits)` counted from the MSB of `buffer[0]`.
//!
//! # Three-phase masking
//!
//! A field that spans several bytes is written as
//!
//! ```text
//!   byte:   | first (partial) | full | full | ... | last (partial) |
//!   bits:   | ....xxxx        | xxxx xxxx   ...   | xxx.....       |
//! ```
//!
//! The foreign bits of the first and last byte are masked and preserved; the
//! bytes in between are assigned whole. A field that fits in one byte is a
//! single masked read-modify-write.
//!
//! # 64-bit fields
//!
//! Two historical schemes exist for fields wider than 32 bits and both stay
//! readable:
//!
//! - [`pfm_double_bit_pack`]: high-order sub-field of `num_bits - 31` bits
//!   followed by a 31-bit low-order field. Used by every file this crate creates.
//! - [`ivs_double_bit_pack`]: legacy IVS layout. It divides by 2^31 as well but
//!   writes the remainder into a **32-bit** low-order field, giving the
//!   high-order sub-field only `num_bits - 32` bits.
//!
//! The two agree for values below 2^31 and disagree for anything that needs
//! the high-order word. They must never be merged.

use crate::error::PfmCoreError;

/// Widest field the single-word packer accepts.
pub const MAX_PACK_BITS: u32 = 32;

/// Number of bits carried by the low-order field of the PFM 64-bit scheme.
pub const PFM_LOW_ORDER_BITS: u32 = 31;

/// Number of bits carried by the low-order field of the IVS 64-bit scheme.
pub const IVS_LOW_ORDER_BITS: u32 = 32;

const SPLIT_DIVISOR_SHIFT: u32 = 31;
const SPLIT_LOW_MASK: i64 = (1i64 << SPLIT_DIVISOR_SHIFT) - 1;

/// Number of bytes a buffer needs to hold bits `[0, start + num_bits)`.
#[inline]
pub const fn bytes_for_bits(start: u32, num_bits: u32) -> usize {
    ((start as usize + num_bits as usize) + 7) / 8
}

/// Pack the low `num_bits` bits of `value` at bit offset `start`.
///
/// Bits outside `[start, start + num_bits)` are left untouched. `num_bits == 0`
/// is a no-op. `buffer` must hold at least [`bytes_for_bits`]`(start, num_bits)`
/// bytes.
pub fn bit_pack(buffer: &mut [u8], start: u32, num_bits: u32, value: i32) {
    debug_assert!(num_bits <= MAX_PACK_BITS, "bit_pack field wider than 32 bits");
    if num_bits == 0 {
        return;
    }

    let value = value as u32 as u64;
    let start_byte = (start / 8) as usize;
    let end_bit = start + num_bits;
    let end_byte = ((end_bit - 1) / 8) as usize;
    let start_offset = start % 8;
    let last_used = end_bit - (end_byte as u32) * 8;

    if start_byte == end_byte {
        let shift = 8 - last_used;
        let mask = (((1u16 << num_bits) - 1) << shift) as u8;
        let bits = ((value << shift) as u8) & mask;
        buffer[start_byte] = (buffer[start_byte] & !mask) | bits;
        return;
    }

    // Phase 1: first partial byte takes the most significant bits.
    let mut remaining = num_bits - (8 - start_offset);
    let first_mask = 0xFFu8 >> start_offset;
    buffer[start_byte] = (buffer[start_byte] & !first_mask) | (((value >> remaining) as u8) & first_mask);

    // Phase 2: whole bytes.
    for byte in buffer.iter_mut().take(end_byte).skip(start_byte + 1) {
        remaining -= 8;
        *byte = (value >> remaining) as u8;
    }

    // Phase 3: last partial byte, `remaining` is in 1..=8 here.
    let shift = 8 - remaining;
    let last_mask = 0xFFu8 << shift;
    buffer[end_byte] = (buffer[end_byte] & !last_mask) | (((value << shift) as u8) & last_mask);
}

/// Unpack `num_bits` bits starting at bit offset `start`.
///
/// The result is zero-extended. Use [`sign_extend`] for signed fields.
pub fn bit_unpack(buffer: &[u8], start: u32, num_bits: u32) -> u32 {
    debug_assert!(num_bits <= MAX_PACK_BITS, "bit_unpack field wider than 32 bits");
    if num_bits == 0 {
        return 0;
    }

    let start_byte = (start / 8) as usize;
    let end_bit = start + num_bits;
    let end_byte = ((end_bit - 1) / 8) as usize;
    let start_offset = start % 8;
    let last_used = end_bit - (end_byte as u32) * 8;

    if start_byte == end_byte {
        let shift = 8 - last_used;
        let mask = ((1u16 << num_bits) - 1) as u8;
        return ((buffer[start_byte] >> shift) & mask) as u32;
    }

    let mut value = (buffer[start_byte] & (0xFFu8 >> start_offset)) as u64;
    let mut remaining = num_bits - (8 - start_offset);

    for &byte in buffer.iter().take(end_byte).skip(start_byte + 1) {
        value = (value << 8) | byte as u64;
        remaining -= 8;
    }

    let shift = 8 - remaining;
    value = (value << remaining) | (buffer[end_byte] >> shift) as u64;
    value as u32
}

/// Check that an unsigned `value` fits in a field of `num_bits`.
///
/// Codecs call this before [`bit_pack`], which silently truncates.
pub fn checked_field(field: &'static str, value: i64, num_bits: u32) -> Result<u32, PfmCoreError> {
    if num_bits > MAX_PACK_BITS {
        return Err(PfmCoreError::InvalidBitWidth {
            bits: num_bits,
            max: MAX_PACK_BITS,
        });
    }
    if value < 0 || value > max_unsigned(num_bits) as i64 {
        return Err(PfmCoreError::ValueOutOfRange { field, value });
    }
    Ok(value as u32)
}

/// Largest unsigned value a field of `num_bits` (at most 32) can hold.
#[inline]
pub const fn max_unsigned(num_bits: u32) -> u32 {
    if num_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << num_bits) - 1
    }
}

/// Sign-extend the low `num_bits` bits of `value`.
#[inline]
pub const fn sign_extend(value: u32, num_bits: u32) -> i32 {
    if num_bits == 0 {
        return 0;
    }
    if num_bits >= 32 {
        return value as i32;
    }
    let shift = 32 - num_bits;
    ((value << shift) as i32) >> shift
}

/// Pack a non-negative value wider than 32 bits using the PFM split.
///
/// Layout: `[high: num_bits - 31][low: 31]`, where `high = value / 2^31` and
/// `low = value % 2^31`. `num_bits` must be in `32..=63`; values must be below
/// `2^num_bits`.
pub fn pfm_double_bit_pack(buffer: &mut [u8], start: u32, num_bits: u32, value: i64) {
    debug_assert!(num_bits > PFM_LOW_ORDER_BITS && num_bits - PFM_LOW_ORDER_BITS <= MAX_PACK_BITS);
    let high = (value >> SPLIT_DIVISOR_SHIFT) as i32;
    let low = (value & SPLIT_LOW_MASK) as i32;
    let high_bits = num_bits - PFM_LOW_ORDER_BITS;

    bit_pack(buffer, start, high_bits, high);
    bit_pack(buffer, start + high_bits, PFM_LOW_ORDER_BITS, low);
}

/// Inverse of [`pfm_double_bit_pack`].
pub fn pfm_double_bit_unpack(buffer: &[u8], start: u32, num_bits: u32) -> i64 {
    debug_assert!(num_bits > PFM_LOW_ORDER_BITS && num_bits - PFM_LOW_ORDER_BITS <= MAX_PACK_BITS);
    let high_bits = num_bits - PFM_LOW_ORDER_BITS;
    let high = bit_unpack(buffer, start, high_bits) as i64;
    let low = bit_unpack(buffer, start + high_bits, PFM_LOW_ORDER_BITS) as i64;
    (high << SPLIT_DIVISOR_SHIFT) + low
}

/// Pack a non-negative value wider than 32 bits using the legacy IVS split.
///
/// Layout: `[high: num_bits - 32][low: 32]`, where `high = value / 2^31` and
/// `low = value % 2^31`. Only files whose header declares IVS pointer packing
/// use this. Values must be below `2^(num_bits - 1)`.
pub fn ivs_double_bit_pack(buffer: &mut [u8], start: u32, num_bits: u32, value: i64) {
    debug_assert!(num_bits > IVS_LOW_ORDER_BITS && num_bits - IVS_LOW_ORDER_BITS <= MAX_PACK_BITS);
    let high = (value >> SPLIT_DIVISOR_SHIFT) as i32;
    let low = (value & SPLIT_LOW_MASK) as i32;
    let high_bits = num_bits - IVS_LOW_ORDER_BITS;

    bit_pack(buffer, start, high_bits, high);
    bit_pack(buffer, start + high_bits, IVS_LOW_ORDER_BITS, low);
}

/// Inverse of [`ivs_double_bit_pack`].
pub fn ivs_double_bit_unpack(buffer: &[u8], start: u32, num_bits: u32) -> i64 {
    debug_assert!(num_bits > IVS_LOW_ORDER_BITS && num_bits - IVS_LOW_ORDER_BITS <= MAX_PACK_BITS);
    let high_bits = num_bits - IVS_LOW_ORDER_BITS;
    let high = bit_unpack(buffer, start, high_bits) as i64;
    let low = bit_unpack(buffer, start + high_bits, IVS_LOW_ORDER_BITS) as i64;
    (high << SPLIT_DIVISOR_SHIFT) + low
}

/// Which 64-bit split a file was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PointerPacking {
    /// `pfm_double_bit_pack`, written by this crate.
    #[default]
    Pfm = 0,
    /// `ivs_double_bit_pack`, legacy IVS-written structures.
    Ivs = 1,
}

impl PointerPacking {
    /// Decode the header tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PointerPacking::Pfm),
            1 => Some(PointerPacking::Ivs),
            _ => None,
        }
    }

    /// Decode the header tag, rejecting unknown values.
    pub const fn try_from_tag(tag: u8) -> Result<Self, PfmCoreError> {
        match Self::from_tag(tag) {
            Some(p) => Ok(p),
            None => Err(PfmCoreError::UnknownTag {
                kind: "pointer packing",
                tag,
            }),
        }
    }

    /// Header tag for this scheme.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Pack with the scheme this value names.
    #[inline]
    pub fn pack(self, buffer: &mut [u8], start: u32, num_bits: u32, value: i64) {
        match self {
            PointerPacking::Pfm => pfm_double_bit_pack(buffer, start, num_bits, value),
            PointerPacking::Ivs => ivs_double_bit_pack(buffer, start, num_bits, value),
        }
    }

    /// Unpack with the scheme this value names.
    #[inline]
    pub fn unpack(self, buffer: &[u8], start: u32, num_bits: u32) -> i64 {
        match self {
            PointerPacking::Pfm => pfm_double_bit_unpack(buffer, start, num_bits),
            PointerPacking::Ivs => ivs_double_bit_unpack(buffer, start, num_bits),
        }
    }

    /// Largest value the scheme can round-trip in a field of `num_bits`.
    pub const fn max_value(self, num_bits: u32) -> i64 {
        match self {
            PointerPacking::Pfm => (1i64 << num_bits) - 1,
            PointerPacking::Ivs => (1i64 << (num_bits - 1)) - 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_field() {
        let mut buf = [0u8; 2];
        bit_pack(&mut buf, 2, 3, 0b101);
        assert_eq!(buf[0], 0b0010_1000);
        assert_eq!(bit_unpack(&buf, 2, 3), 0b101);
    }

    #[test]
    fn test_msb_first_byte_order() {
        let mut buf = [0u8; 4];
        bit_pack(&mut buf, 0, 32, 0x1234_5678);
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_unaligned_span() {
        let mut buf = [0xFFu8; 4];
        bit_pack(&mut buf, 5, 14, 0);
        // bits 5..19 cleared, everything else kept
        assert_eq!(buf, [0b1111_1000, 0x00, 0b0001_1111, 0xFF]);
        bit_pack(&mut buf, 5, 14, 0x3FFF);
        assert_eq!(buf, [0xFF; 4]);
    }

    #[test]
    fn test_zero_width() {
        let mut buf = [0xA5u8; 2];
        bit_pack(&mut buf, 3, 0, -1);
        assert_eq!(buf, [0xA5, 0xA5]);
        assert_eq!(bit_unpack(&buf, 3, 0), 0);
    }

    #[test]
    fn test_negative_value_truncated() {
        let mut buf = [0u8; 2];
        bit_pack(&mut buf, 4, 6, -1);
        assert_eq!(bit_unpack(&buf, 4, 6), 0x3F);
        assert_eq!(sign_extend(bit_unpack(&buf, 4, 6), 6), -1);
    }

    #[test]
    fn test_checked_field() {
        assert_eq!(checked_field("count", 65535, 16), Ok(65535));
        assert_eq!(
            checked_field("count", 65536, 16),
            Err(PfmCoreError::ValueOutOfRange {
                field: "count",
                value: 65536
            })
        );
        assert!(checked_field("count", -1, 16).is_err());
        assert_eq!(checked_field("wide", 0, 33), Err(PfmCoreError::InvalidBitWidth { bits: 33, max: 32 }));
        assert_eq!(max_unsigned(32), u32::MAX);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0b0111, 4), 7);
        assert_eq!(sign_extend(0b1000, 4), -8);
        assert_eq!(sign_extend(0xFFFF_FFFF, 32), -1);
        assert_eq!(sign_extend(5, 0), 0);
    }

    #[test]
    fn test_pfm_double_roundtrip() {
        let mut buf = [0u8; 8];
        for &v in &[0i64, 1, (1 << 31) - 1, 1 << 31, (1 << 32) + 7, (1 << 47) + 12345] {
            pfm_double_bit_pack(&mut buf, 3, 48, v);
            assert_eq!(pfm_double_bit_unpack(&buf, 3, 48), v);
        }
    }

    #[test]
    fn test_ivs_double_roundtrip() {
        let mut buf = [0u8; 8];
        for &v in &[0i64, 1, (1 << 31) - 1, 1 << 31, (1 << 32) + 7, (1 << 46) + 99] {
            ivs_double_bit_pack(&mut buf, 3, 48, v);
            assert_eq!(ivs_double_bit_unpack(&buf, 3, 48), v);
        }
    }

    #[test]
    fn test_schemes_agree_below_high_word() {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        pfm_double_bit_pack(&mut a, 0, 48, 0x7FFF_0000);
        ivs_double_bit_pack(&mut b, 0, 48, 0x7FFF_0000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pointer_packing_tag() {
        assert_eq!(PointerPacking::from_tag(0), Some(PointerPacking::Pfm));
        assert_eq!(PointerPacking::from_tag(1), Some(PointerPacking::Ivs));
        assert_eq!(PointerPacking::from_tag(9), None);
        assert!(PointerPacking::Ivs.max_value(48) < PointerPacking::Pfm.max_value(48));
    }
}
