//! Area filter tests against PFM structures on disk.
//!
//! The tests build square grids of 5 m bins holding three soundings per bin
//! at a flat 10 m, with chosen bins raised to 50 m. Most use a 5x5 grid.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use abe::{
    filter_poly_area, AbeError, AcceptAll, BinCoord, DepthRecord, Feature, FeatureSet, FilterArea,
    FilterConfig, FilterOutcome, Mbr, OpenMode, PfmFile, Point2, Validity,
};
use pfm_io::{PfmCreateParams, PfmError};

const GRID: Mbr = Mbr::new(0.0, 0.0, 25.0, 25.0);

fn build_pfm(dir: &Path, spike: Option<BinCoord>) -> PathBuf {
    build_grid(dir, 5, spike.as_slice())
}

/// `size` x `size` bins of 5 m, soundings appended bin by bin in row-major
/// order.
fn build_grid(dir: &Path, size: i32, spikes: &[BinCoord]) -> PathBuf {
    let path = dir.join("area.pfm");
    let extent = 5.0 * size as f64;
    let params = PfmCreateParams::new(Mbr::new(0.0, 0.0, extent, extent), 5.0, 5.0, true)
        .with_records_per_buffer(2);
    let mut pfm = PfmFile::create(&path, &params).unwrap();
    let file = pfm.add_list_file("/data/line_001.gsf").unwrap();

    let mut record_number = 0;
    for row in 0..size {
        for col in 0..size {
            let coord = BinCoord::new(row, col);
            let center = pfm.bin_center(coord);
            for i in 0..3 {
                let z = if spikes.contains(&coord) {
                    50.0
                } else {
                    10.0 + 0.02 * (i as f64 - 1.0)
                };
                let position = Point2::new(center.x + 0.5 * (i as f64 - 1.0), center.y);
                pfm.add_depth_record(&DepthRecord::new(position, z, file, record_number, 0))
                    .unwrap();
                record_number += 1;
            }
        }
    }
    pfm.close().unwrap();
    path
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| {
            let bytes = std::fs::read(&p).unwrap();
            (p, bytes)
        })
        .collect()
}

fn whole_grid() -> FilterArea {
    FilterArea::Rectangle(GRID)
}

fn config() -> FilterConfig {
    FilterConfig::new().with_filter_std(3.0)
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[test]
fn test_spike_is_invalidated() {
    let dir = tempfile::tempdir().unwrap();
    let spike = BinCoord::new(2, 2);
    let path = build_pfm(dir.path(), Some(spike));

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let cancel = AtomicBool::new(false);
    let outcome = filter_poly_area(
        &mut pfm,
        &whole_grid(),
        &config(),
        &FeatureSet::new(),
        &AcceptAll,
        &cancel,
    )
    .unwrap();
    pfm.close().unwrap();

    assert_eq!(
        outcome,
        FilterOutcome::Completed {
            invalidated: 3,
            bins_filtered: 9
        }
    );

    let mut pfm = PfmFile::open(&path, OpenMode::ReadOnly).unwrap();
    for row in 0..5 {
        for col in 0..5 {
            let coord = BinCoord::new(row, col);
            let records = pfm.read_depth_array(coord).unwrap();
            let bin = pfm.read_bin_record(coord).unwrap();
            assert_eq!(bin.num_soundings, 3);
            if coord == spike {
                assert!(records.iter().all(|r| r.validity.contains(Validity::FILTER_INVAL)));
                assert_eq!(bin.num_valid, 0);
                assert_eq!(bin.avg_filtered_depth, pfm.null_depth());
            } else {
                assert!(records.iter().all(|r| r.is_valid()), "bin {:?}", coord);
                assert_eq!(bin.num_valid, 3);
                assert!((bin.avg_filtered_depth - 10.0).abs() < 1e-3);
            }
        }
    }
}

#[test]
fn test_flat_surface_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), None);
    let before = snapshot(dir.path());

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let outcome = filter_poly_area(
        &mut pfm,
        &whole_grid(),
        &config(),
        &FeatureSet::new(),
        &AcceptAll,
        &AtomicBool::new(false),
    )
    .unwrap();
    pfm.close().unwrap();

    assert!(matches!(outcome, FilterOutcome::Completed { invalidated: 0, .. }));
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_feature_protects_spike() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), Some(BinCoord::new(2, 2)));

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let features: FeatureSet = std::iter::once(Feature::point(Point2::new(12.5, 12.5))).collect();
    let outcome = filter_poly_area(
        &mut pfm,
        &whole_grid(),
        &config().with_feature_radius(5.0),
        &features,
        &AcceptAll,
        &AtomicBool::new(false),
    )
    .unwrap();

    assert!(matches!(outcome, FilterOutcome::Completed { invalidated: 0, .. }));
    let records = pfm.read_depth_array(BinCoord::new(2, 2)).unwrap();
    assert!(records.iter().all(|r| r.is_valid()));
}

#[test]
fn test_area_limits_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), Some(BinCoord::new(2, 2)));

    // covers the western sounding of the spiked bin only
    let area = FilterArea::Rectangle(Mbr::new(0.0, 0.0, 12.25, 25.0));
    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let outcome = filter_poly_area(
        &mut pfm,
        &area,
        &config(),
        &FeatureSet::new(),
        &AcceptAll,
        &AtomicBool::new(false),
    )
    .unwrap();

    assert!(matches!(outcome, FilterOutcome::Completed { invalidated: 1, .. }));
    let records = pfm.read_depth_array(BinCoord::new(2, 2)).unwrap();
    let flags: Vec<bool> = records
        .iter()
        .map(|r| r.validity.contains(Validity::FILTER_INVAL))
        .collect();
    assert_eq!(flags, vec![true, false, false]);
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[test]
fn test_cancel_leaves_files_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), Some(BinCoord::new(1, 2)));
    let before = snapshot(dir.path());

    let cancel = AtomicBool::new(false);
    let offered = Cell::new(0usize);
    // cancels as soon as the first outlier in row 1 is offered
    let mask = |_: &DepthRecord| {
        offered.set(offered.get() + 1);
        cancel.store(true, Ordering::Release);
        true
    };

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let mut cfg = config();
    cfg.cancel_check_rows = 1;
    let outcome =
        filter_poly_area(&mut pfm, &whole_grid(), &cfg, &FeatureSet::new(), &mask, &cancel)
            .unwrap();
    pfm.close().unwrap();

    assert_eq!(outcome, FilterOutcome::Cancelled);
    assert_eq!(offered.get(), 3);
    assert_eq!(snapshot(dir.path()), before);
}

// =============================================================================
// Write-Back Failure Tests
// =============================================================================

#[test]
fn test_failed_write_back_reverts_applied_invalidations() {
    let dir = tempfile::tempdir().unwrap();
    let near = BinCoord::new(1, 1);
    let far = BinCoord::new(5, 5);
    let path = build_grid(dir.path(), 7, &[near, far]);
    let depth_file = dir.path().join("area.dep");

    // Cut the depth file in half once filtering starts: the chain of `near`
    // survives, the chain of `far` does not.
    let truncated = Cell::new(false);
    let mask = |_: &DepthRecord| {
        if !truncated.get() {
            let file = OpenOptions::new().write(true).open(&depth_file).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len / 2).unwrap();
            truncated.set(true);
        }
        true
    };

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let area = FilterArea::Rectangle(Mbr::new(0.0, 0.0, 35.0, 35.0));
    let result = filter_poly_area(
        &mut pfm,
        &area,
        &config(),
        &FeatureSet::new(),
        &mask,
        &AtomicBool::new(false),
    );
    assert!(truncated.get());
    assert!(matches!(result, Err(AbeError::Pfm(_))));
    pfm.close().unwrap();

    // every bin whose chain is still readable agrees with its soundings
    let mut pfm = PfmFile::open(&path, OpenMode::ReadOnly).unwrap();
    for row in 0..3 {
        for col in 0..7 {
            let coord = BinCoord::new(row, col);
            let records = pfm.read_depth_array(coord).unwrap();
            let bin = pfm.read_bin_record(coord).unwrap();
            let valid: Vec<f64> = records.iter().filter(|r| r.is_valid()).map(|r| r.z).collect();
            assert_eq!(bin.num_valid as usize, valid.len(), "bin {:?}", coord);
            let mean = valid.iter().sum::<f64>() / valid.len() as f64;
            assert!((bin.avg_filtered_depth - mean).abs() < 1e-3, "bin {:?}", coord);
        }
    }
    let records = pfm.read_depth_array(near).unwrap();
    assert!(records.iter().all(|r| r.is_valid()));
    assert_eq!(pfm.read_bin_record(near).unwrap().num_valid, 3);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_read_only_structure_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), Some(BinCoord::new(2, 2)));

    let mut pfm = PfmFile::open(&path, OpenMode::ReadOnly).unwrap();
    let result = filter_poly_area(
        &mut pfm,
        &whole_grid(),
        &config(),
        &FeatureSet::new(),
        &AcceptAll,
        &AtomicBool::new(false),
    );
    assert!(matches!(result, Err(AbeError::Pfm(PfmError::ReadOnly))));
}

#[test]
fn test_area_outside_structure() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), None);

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let area = FilterArea::Rectangle(Mbr::new(100.0, 100.0, 120.0, 120.0));
    let result = filter_poly_area(
        &mut pfm,
        &area,
        &config(),
        &FeatureSet::new(),
        &AcceptAll,
        &AtomicBool::new(false),
    );
    assert!(matches!(result, Err(AbeError::InvalidArea { .. })));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = build_pfm(dir.path(), None);

    let mut pfm = PfmFile::open(&path, OpenMode::Update).unwrap();
    let result = filter_poly_area(
        &mut pfm,
        &whole_grid(),
        &config().with_filter_std(-1.0),
        &FeatureSet::new(),
        &AcceptAll,
        &AtomicBool::new(false),
    );
    assert!(matches!(result, Err(AbeError::Config(_))));
}
