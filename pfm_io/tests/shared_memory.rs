//! Shared-memory tests for pfm_io.
//!
//! Each test plays both sides of an editor session: a parent that creates the
//! ABE_SHARE segment and one or more children that attach to it by id.

use std::sync::{Arc, Barrier};
use std::thread;

use pfm_core::{BinCoord, DepthRecord, Mbr, Point2};
use pfm_io::{
    lock_is_held_by_this_thread, report_result, take_forwarded_edit, take_result,
    AbeShareSegment, ChildResult, FilterParams, ModCode, OpenArgs, PfmCreateParams, PfmFile,
    PointCloudSegment, ShareConfig, ShareError, SharedPoint,
};

fn share_dir() -> (tempfile::TempDir, ShareConfig) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ShareConfig::new(dir.path());
    (dir, cfg)
}

// =============================================================================
// Segment Lifecycle Tests
// =============================================================================

#[test]
fn test_child_sees_parent_state() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(7, &cfg).unwrap();
    {
        let mut guard = parent.lock();
        guard
            .set_edit_polygon(&[
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                Point2::new(10.0, 5.0),
            ])
            .unwrap();
        guard.set_filter_params(FilterParams {
            filter_std: 2.4,
            deep_filter_only: 1,
            ..FilterParams::default()
        });
    }

    let child = AbeShareSegment::attach(7, &cfg).unwrap();
    let state = child.snapshot();
    assert_eq!(state.ppid, std::process::id());
    assert_eq!(state.polygon.len(), 3);
    assert_eq!(state.polygon_mbr, Mbr::new(0.0, 0.0, 10.0, 5.0));
    assert_eq!(state.filter.filter_std, 2.4);
    assert_eq!(state.filter.deep_filter_only, 1);
    assert!(child.is_live());
}

#[test]
fn test_destroyed_session_is_gone() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(8, &cfg).unwrap();
    let child = AbeShareSegment::attach(8, &cfg).unwrap();
    parent.destroy().unwrap();

    assert_eq!(child.ppid(), 0);
    assert!(matches!(
        AbeShareSegment::attach(8, &cfg),
        Err(ShareError::NotFound { .. })
    ));
}

// =============================================================================
// Lock Tests
// =============================================================================

#[test]
fn test_lock_excludes_other_attachment() {
    let (_dir, cfg) = share_dir();
    let a = AbeShareSegment::create(9, &cfg).unwrap();
    let b = AbeShareSegment::attach(9, &cfg).unwrap();

    let guard = a.lock();
    assert!(lock_is_held_by_this_thread());
    assert!(b.try_lock().is_none());
    assert_eq!(b.lock_holder(), std::process::id().max(1));
    drop(guard);

    assert!(!lock_is_held_by_this_thread());
    assert!(b.try_lock().is_some());
    assert_eq!(a.lock_holder(), 0);
}

#[test]
fn test_lock_serializes_writers_across_threads() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(10, &cfg).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let mut guard = parent.lock();
    let child = {
        let cfg = cfg.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let seg = AbeShareSegment::attach(10, &cfg).unwrap();
            barrier.wait();
            // blocks until the parent releases
            let g = seg.lock();
            let seen = g.modified();
            drop(g);
            seen
        })
    };

    barrier.wait();
    guard.set_modified(42, 17.25);
    drop(guard);

    assert_eq!(child.join().unwrap(), (42, 17.25));
}

#[test]
fn test_force_unlock_recovers_dead_holder() {
    let (_dir, cfg) = share_dir();
    let seg = AbeShareSegment::create(11, &cfg).unwrap();
    let other = AbeShareSegment::attach(11, &cfg).unwrap();
    let guard = seg.lock();
    std::mem::forget(guard);

    assert!(other.try_lock().is_none());
    other.force_unlock();
    assert!(other.try_lock().is_some());
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[test]
fn test_point_edit_forwards_to_monitor() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(12, &cfg).unwrap();
    let child = AbeShareSegment::attach(12, &cfg).unwrap();
    let monitor = AbeShareSegment::attach(12, &cfg).unwrap();

    report_result(
        &child,
        &ChildResult::PositionValueEdit {
            point: 3,
            value: -12.5,
        },
    );
    assert_eq!(
        take_result(&parent),
        Some(ChildResult::PositionValueEdit {
            point: 3,
            value: -12.5
        })
    );
    assert_eq!(parent.modcode(), Some(ModCode::ForwardToMonitor));
    assert_eq!(take_result(&parent), None);

    assert_eq!(take_forwarded_edit(&monitor), Some((3, -12.5)));
    assert_eq!(take_forwarded_edit(&monitor), None);
    assert_eq!(parent.modcode(), Some(ModCode::None));
}

#[test]
fn test_each_result_consumed_once() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(13, &cfg).unwrap();
    let child = AbeShareSegment::attach(13, &cfg).unwrap();

    for result in [
        ChildResult::NoActionRequired,
        ChildResult::AreaInvalidated,
        ChildResult::LayersChanged,
        ChildResult::FilesDeleted,
    ] {
        report_result(&child, &result);
        assert_eq!(take_result(&parent), Some(result));
        assert_eq!(take_result(&parent), None);
        assert_eq!(take_forwarded_edit(&parent), None);
    }
}

#[test]
fn test_delete_queue_drains() {
    let (_dir, cfg) = share_dir();
    let parent = AbeShareSegment::create(14, &cfg).unwrap();
    let child = AbeShareSegment::attach(14, &cfg).unwrap();
    {
        let mut guard = child.lock();
        guard.push_delete_file(0, 4).unwrap();
        guard.push_delete_file(1, 0).unwrap();
    }
    report_result(&child, &ChildResult::FilesDeleted);

    assert_eq!(take_result(&parent), Some(ChildResult::FilesDeleted));
    let queue = parent.lock().take_delete_queue();
    assert_eq!(queue, vec![(0, 4), (1, 0)]);
    assert!(parent.snapshot().delete_file_queue.is_empty());
}

// =============================================================================
// Layer Publication Tests
// =============================================================================

#[test]
fn test_open_args_published_to_children() {
    let (dir, cfg) = share_dir();
    let params = PfmCreateParams::new(Mbr::new(0.0, 0.0, 40.0, 20.0), 10.0, 10.0, true)
        .with_user_flag_name(2, "Shoal");
    let a = PfmFile::create(dir.path().join("a.pfm"), &params).unwrap();
    let b = PfmFile::create(dir.path().join("b.pfm"), &params).unwrap();

    let parent = AbeShareSegment::create(15, &cfg).unwrap();
    parent
        .lock()
        .set_layers(&[
            (a.open_args().to_shared().unwrap(), true),
            (b.open_args().to_shared().unwrap(), false),
        ])
        .unwrap();

    let child = AbeShareSegment::attach(15, &cfg).unwrap();
    let state = child.snapshot();
    assert_eq!(state.open_args.len(), 2);
    assert_eq!(state.display, vec![true, false]);

    let first = OpenArgs::from_shared(&state.open_args[0]).unwrap();
    assert_eq!(first, a.open_args());
    assert_eq!(first.user_flag_names[2], "Shoal");
    assert_eq!(first.geometry.width, 4);
    assert_eq!(first.geometry.height, 2);
}

// =============================================================================
// Point Cloud Tests
// =============================================================================

#[test]
fn test_point_cloud_shared_with_filter() {
    let (dir, cfg) = share_dir();
    let params = PfmCreateParams::new(Mbr::new(0.0, 0.0, 20.0, 20.0), 10.0, 10.0, true);
    let mut pfm = PfmFile::create(dir.path().join("cloud.pfm"), &params).unwrap();
    let f = pfm.add_list_file("/data/a.gsf").unwrap();
    for i in 0..4 {
        let z = 10.0 + i as f64;
        pfm.add_depth_record(&DepthRecord::new(Point2::new(3.0, 2.0 + i as f64), z, f, i, 0))
            .unwrap();
    }
    let records = pfm.read_depth_array(BinCoord::new(0, 0)).unwrap();
    let points: Vec<SharedPoint> = records.iter().map(|r| SharedPoint::from_record(r, 0)).collect();

    let ppid = std::process::id();
    let mut editor = PointCloudSegment::create(ppid, 16, &cfg).unwrap();
    editor.publish(&points).unwrap();

    let mut filter = PointCloudSegment::attach(ppid, &cfg).unwrap();
    assert_eq!(filter.len(), 4);
    assert_eq!(filter.points()[2].id(), records[2].id());
    filter.points_mut()[2].validity |= pfm_core::Validity::FILTER_INVAL.bits();

    assert!(editor.points()[2].validity().contains(pfm_core::Validity::FILTER_INVAL));
    assert!(editor.publish(&[points[0]; 17]).is_err());
    editor.destroy().unwrap();
}
