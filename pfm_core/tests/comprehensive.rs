//! Comprehensive Test Suite for pfm_core
//!
//! Each section pins down one piece of observable behaviour that the storage
//! engine and the area filter rely on.
//!
//! # Test Categories
//!
//! 1. **Bit Packing** - Round-trips, foreign-bit preservation, boundary widths
//! 2. **64-bit Splits** - PFM and legacy IVS layouts and where they diverge
//! 3. **Bin Geometry** - Index/centre round-trips and grid edges
//! 4. **Validity** - Which flags exclude a sounding from aggregates
//! 5. **Statistics** - Aggregates over valid soundings only

use pfm_core::prelude::*;
use pfm_core::*;
use proptest::prelude::*;

// =============================================================================
// SECTION 1: Bit Packing
// =============================================================================

mod bit_packing_tests {
    use super::*;

    #[test]
    fn test_every_width_at_every_offset() {
        for num_bits in 1..=32u32 {
            for start in 0..16u32 {
                let mut buf = [0u8; 8];
                let value = max_unsigned(num_bits);
                bit_pack(&mut buf, start, num_bits, value as i32);
                assert_eq!(
                    bit_unpack(&buf, start, num_bits),
                    value,
                    "width {} at offset {}",
                    num_bits,
                    start
                );
            }
        }
    }

    #[test]
    fn test_adjacent_fields_independent() {
        let mut buf = [0u8; 16];
        let fields = [(0u32, 16u32, 0xBEEFu32), (16, 32, 0xDEAD_BEEF), (48, 7, 0x55), (55, 9, 0x1A5)];
        for &(start, bits, value) in &fields {
            bit_pack(&mut buf, start, bits, value as i32);
        }
        for &(start, bits, value) in &fields {
            assert_eq!(bit_unpack(&buf, start, bits), value);
        }
    }

    #[test]
    fn test_bytes_for_bits() {
        assert_eq!(bytes_for_bits(0, 8), 1);
        assert_eq!(bytes_for_bits(0, 9), 2);
        assert_eq!(bytes_for_bits(7, 2), 2);
        assert_eq!(bytes_for_bits(0, 208), 26);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Unpack returns the low `num_bits` bits of whatever was packed.
    #[test]
    fn pack_unpack_roundtrip(
        num_bits in 1u32..=32,
        start in 0u32..64,
        value in any::<u32>(),
    ) {
        let mut buf = [0u8; 12];
        bit_pack(&mut buf, start, num_bits, value as i32);
        prop_assert_eq!(bit_unpack(&buf, start, num_bits), value & max_unsigned(num_bits));
    }

    /// Bits outside the field survive a pack, whatever they were.
    #[test]
    fn pack_preserves_foreign_bits(
        num_bits in 1u32..=32,
        start in 0u32..64,
        value in any::<u32>(),
        fill in prop_oneof![Just(0x00u8), Just(0xFFu8), any::<u8>()],
    ) {
        let mut buf = [fill; 12];
        let before = buf;
        bit_pack(&mut buf, start, num_bits, value as i32);

        for bit in 0..96u32 {
            if bit >= start && bit < start + num_bits {
                continue;
            }
            let byte = (bit / 8) as usize;
            let mask = 0x80u8 >> (bit % 8);
            prop_assert_eq!(buf[byte] & mask, before[byte] & mask, "bit {} changed", bit);
        }
    }

    /// Sign extension recovers negative values packed into narrow fields.
    #[test]
    fn signed_field_roundtrip(num_bits in 2u32..=32, value in any::<i32>()) {
        let lo = -(1i64 << (num_bits - 1));
        let hi = (1i64 << (num_bits - 1)) - 1;
        let v = (value as i64).clamp(lo, hi) as i32;
        let mut buf = [0u8; 6];
        bit_pack(&mut buf, 3, num_bits, v);
        prop_assert_eq!(sign_extend(bit_unpack(&buf, 3, num_bits), num_bits), v);
    }

    /// The PFM split is a bijection on `[0, 2^48)`.
    #[test]
    fn pfm_double_roundtrip(value in 0i64..(1i64 << 48), start in 0u32..16) {
        let mut buf = [0u8; 10];
        pfm_double_bit_pack(&mut buf, start, 48, value);
        prop_assert_eq!(pfm_double_bit_unpack(&buf, start, 48), value);
    }

    /// The IVS split round-trips on its own, narrower range.
    #[test]
    fn ivs_double_roundtrip(value in 0i64..(1i64 << 47), start in 0u32..16) {
        let mut buf = [0u8; 10];
        ivs_double_bit_pack(&mut buf, start, 48, value);
        prop_assert_eq!(ivs_double_bit_unpack(&buf, start, 48), value);
    }

    /// Below 2^31 both splits produce identical bytes.
    #[test]
    fn splits_agree_below_high_word(value in 0i64..(1i64 << 31)) {
        let mut a = [0u8; 6];
        let mut b = [0u8; 6];
        pfm_double_bit_pack(&mut a, 0, 48, value);
        ivs_double_bit_pack(&mut b, 0, 48, value);
        prop_assert_eq!(a, b);
    }

    /// Every in-grid bin centre maps back to its own bin.
    #[test]
    fn bin_center_roundtrip(
        width in 1u32..200,
        height in 1u32..200,
        bin_size in 0.5f64..50.0,
        row_frac in 0.0f64..1.0,
        col_frac in 0.0f64..1.0,
    ) {
        let mbr = Mbr::new(
            1000.0,
            -500.0,
            1000.0 + width as f64 * bin_size,
            -500.0 + height as f64 * bin_size,
        );
        let g = BinGeometry::new(mbr, bin_size, bin_size, true).unwrap();
        let coord = BinCoord::new(
            ((height - 1) as f64 * row_frac) as i32,
            ((width - 1) as f64 * col_frac) as i32,
        );
        prop_assert_eq!(g.compute_index(g.bin_center(coord)), Some(coord));
    }
}

// =============================================================================
// SECTION 2: 64-bit Splits
// =============================================================================

mod double_pack_tests {
    use super::*;

    #[test]
    fn test_pfm_layout() {
        // 2^31 + 5 -> high = 1, low = 5
        let mut buf = [0u8; 6];
        pfm_double_bit_pack(&mut buf, 0, 48, (1i64 << 31) + 5);
        assert_eq!(bit_unpack(&buf, 0, 17), 1);
        assert_eq!(bit_unpack(&buf, 17, 31), 5);
    }

    #[test]
    fn test_ivs_layout() {
        let mut buf = [0u8; 6];
        ivs_double_bit_pack(&mut buf, 0, 48, (1i64 << 31) + 5);
        assert_eq!(bit_unpack(&buf, 0, 16), 1);
        assert_eq!(bit_unpack(&buf, 16, 32), 5);
    }

    #[test]
    fn test_schemes_diverge_above_high_word() {
        let value = 1i64 << 32;
        let mut buf = [0u8; 6];
        pfm_double_bit_pack(&mut buf, 0, 48, value);
        assert_eq!(pfm_double_bit_unpack(&buf, 0, 48), value);
        assert_ne!(ivs_double_bit_unpack(&buf, 0, 48), value);
        assert_eq!(ivs_double_bit_unpack(&buf, 0, 48), 1i64 << 31);
    }

    #[test]
    fn test_pointer_packing_dispatch() {
        for packing in [PointerPacking::Pfm, PointerPacking::Ivs] {
            let mut buf = [0u8; 6];
            let v = packing.max_value(48);
            packing.pack(&mut buf, 0, 48, v);
            assert_eq!(packing.unpack(&buf, 0, 48), v);
        }
        assert_eq!(
            PointerPacking::try_from_tag(4),
            Err(PfmCoreError::UnknownTag {
                kind: "pointer packing",
                tag: 4
            })
        );
    }
}

// =============================================================================
// SECTION 3: Bin Geometry
// =============================================================================

mod geometry_tests {
    use super::*;

    #[test]
    fn test_geographic_grid() {
        let mbr = Mbr::new(-70.0, 42.0, -69.9, 42.1);
        let g = BinGeometry::from_meters(mbr, 50.0, false).unwrap();
        assert!(!g.projected);
        assert!(g.width > 0 && g.height > 0);
        let c = g.compute_index(Point2::new(-69.95, 42.05)).unwrap();
        assert!(g.bin_mbr(c).contains(Point2::new(-69.95, 42.05)));
    }

    #[test]
    fn test_outside_returns_none() {
        let g = BinGeometry::new(Mbr::new(0.0, 0.0, 10.0, 10.0), 1.0, 1.0, true).unwrap();
        assert_eq!(compute_index(Point2::new(-0.01, 5.0), &g), None);
        assert_eq!(compute_index(Point2::new(5.0, 10.0), &g), None);
        assert_eq!(compute_index(Point2::new(9.999, 9.999), &g), Some(BinCoord::new(9, 9)));
    }

    #[test]
    fn test_linear_index_row_major() {
        let g = BinGeometry::new(Mbr::new(0.0, 0.0, 4.0, 3.0), 1.0, 1.0, true).unwrap();
        assert_eq!(g.linear_index(BinCoord::new(0, 0)), Some(0));
        assert_eq!(g.linear_index(BinCoord::new(1, 0)), Some(4));
        assert_eq!(g.linear_index(BinCoord::new(2, 3)), Some(11));
        assert_eq!(g.linear_index(BinCoord::new(3, 0)), None);
        assert_eq!(g.linear_index(BinCoord::new(0, -1)), None);
    }

    /// Fraction of the grid extent; 1.0 stands for the east or north edge.
    fn edge_fraction() -> impl Strategy<Value = f64> {
        prop_oneof![4 => 0.0..1.0f64, 1 => Just(1.0)]
    }

    /// Coordinate at fraction `f` of `[min, max)`, pulled just inside `max`.
    fn inside(min: f64, max: f64, bin_size: f64, f: f64) -> f64 {
        let v = min + f * (max - min);
        if v >= max {
            max - bin_size * 1e-6
        } else {
            v
        }
    }

    proptest! {
        #[test]
        fn prop_point_within_half_bin_of_its_center(
            min_x in -1000.0..1000.0f64,
            min_y in -1000.0..1000.0f64,
            x_bin in 0.1..10.0f64,
            y_bin in 0.1..10.0f64,
            cols in 1u32..60,
            rows in 1u32..60,
            fx in edge_fraction(),
            fy in edge_fraction(),
        ) {
            let mbr = Mbr::new(
                min_x,
                min_y,
                min_x + cols as f64 * x_bin,
                min_y + rows as f64 * y_bin,
            );
            let g = BinGeometry::new(mbr, x_bin, y_bin, true).unwrap();
            let p = Point2::new(
                inside(g.mbr.min_x, g.mbr.max_x, x_bin, fx),
                inside(g.mbr.min_y, g.mbr.max_y, y_bin, fy),
            );

            let c = compute_index(p, &g).unwrap();
            prop_assert!(g.contains(c));
            let center = bin_center(c, &g);
            let tol = 1e-9 * (min_x.abs().max(min_y.abs()) + 1000.0);
            prop_assert!((center.x - p.x).abs() <= x_bin / 2.0 + tol, "{:?} -> {:?}", p, c);
            prop_assert!((center.y - p.y).abs() <= y_bin / 2.0 + tol, "{:?} -> {:?}", p, c);
            if fx == 1.0 {
                prop_assert_eq!(c.col, g.width as i32 - 1);
            }
            if fy == 1.0 {
                prop_assert_eq!(c.row, g.height as i32 - 1);
            }
        }
    }
}

// =============================================================================
// SECTION 4: Validity
// =============================================================================

mod validity_tests {
    use super::*;

    #[test]
    fn test_only_excluded_flags_invalidate() {
        for bit in 0..16 {
            let flag = Validity::from_bits_truncate(1 << bit);
            let expected = !Validity::EXCLUDED.contains(flag);
            assert_eq!(flag.is_valid(), expected, "flag {:?}", flag);
        }
    }

    #[test]
    fn test_depth_record_validity() {
        let r = DepthRecord::new(Point2::new(0.0, 0.0), 5.0, 0, 0, 0);
        assert!(r.is_valid());
        assert!(!r.with_validity(Validity::REFERENCE).is_valid());
    }
}

// =============================================================================
// SECTION 5: Statistics
// =============================================================================

mod stats_tests {
    use super::*;

    #[test]
    fn test_excluded_soundings_do_not_contribute() {
        let soundings = [
            (10.0, Validity::empty()),
            (10.2, Validity::CHECKED),
            (50.0, Validity::MANUALLY_INVAL),
            (60.0, Validity::DELETED),
        ];
        let valid: Vec<f64> = soundings
            .iter()
            .filter(|(_, v)| v.is_valid())
            .map(|(z, _)| *z)
            .collect();
        let s = summarize(&valid, AverageType::Mean).unwrap();
        assert_eq!(s.count, 2);
        assert!((s.mean - 10.1).abs() < 1e-12);
        assert_eq!(s.max, 10.2);
    }

    #[test]
    fn test_no_valid_soundings() {
        assert!(summarize(&[], AverageType::Median).is_none());
        let mut bin = BinRecord::empty(BinCoord::new(3, 3), -99.0);
        bin.apply_summary(None, Validity::DELETED, -99.0);
        assert!(!bin.has_valid_data());
        assert_eq!(bin.min_filtered_depth, -99.0);
    }
}
