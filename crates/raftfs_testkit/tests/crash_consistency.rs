//! Crash-consistency tests for the blocking segment operations.
//!
//! Every test runs the real OS through `FaultyOs`, whose crash model tracks
//! which directory entries and file sizes would survive a power loss.

use proptest::prelude::*;
use raftfs_storage::FsErrorKind;
use raftfs_testkit::prelude::*;
use std::io;

#[test]
fn created_segment_survives_crash() {
    init_tracing();
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();

    let file = store.fs.create_file_blocking(&dir, "segment-1", 4096).unwrap();
    assert_eq!(file.len().unwrap(), 4096);

    let survivors = store.surviving_files();
    assert_eq!(survivors.get("segment-1"), Some(&Some(4096)));
}

#[test]
fn create_protocol_order() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();

    drop(store.fs.create_file_blocking(&dir, "segment-1", 4096).unwrap());
    assert_eq!(
        store.os.ops(),
        vec![
            OsOp::OpenExclusive,
            OsOp::Allocate,
            OsOp::SyncFile,
            OsOp::OpenDir,
            OsOp::SyncDir,
            OsOp::Close,
        ]
    );
}

#[test]
fn empty_segment_skips_allocation() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();

    drop(store.fs.create_file_blocking(&dir, "segment-1", 0).unwrap());
    assert!(!store.os.ops().contains(&OsOp::Allocate));
    assert_eq!(store.surviving_files().get("segment-1"), Some(&Some(0)));
}

#[test]
fn existing_segment_is_never_overwritten() {
    let mut store = FaultyStore::new();
    store.dir.write("segment-1", b"committed");
    let dir = store.dir.path().to_path_buf();

    let err = store
        .fs
        .create_file_blocking(&dir, "segment-1", 4096)
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::Open);
    assert_eq!(std::fs::read(store.dir.join("segment-1")).unwrap(), b"committed");
    assert!(!store.os.ops().contains(&OsOp::Unlink));
}

#[test]
fn every_create_fault_unwinds() {
    let cases = [
        (OsOp::OpenExclusive, FsErrorKind::Open, "open: "),
        (OsOp::Allocate, FsErrorKind::SpaceProvision, "fallocate: "),
        (OsOp::SyncFile, FsErrorKind::DurabilitySync, "fsync: "),
        (OsOp::OpenDir, FsErrorKind::DurabilitySync, "open directory: "),
        (OsOp::SyncDir, FsErrorKind::DurabilitySync, "fsync directory: "),
    ];

    for (op, kind, prefix) in cases {
        let mut store = FaultyStore::new();
        store.os.inject(op, Fault::once(io::ErrorKind::Other));
        let dir = store.dir.path().to_path_buf();

        let err = store
            .fs
            .create_file_blocking(&dir, "segment-1", 4096)
            .unwrap_err();
        assert_eq!(err.kind(), kind, "fault at {op}");
        let message = store.fs.last_error().unwrap();
        assert!(message.starts_with(prefix), "fault at {op}: {message}");
        assert!(!store.dir.contains("segment-1"), "fault at {op} left a file");
        assert!(store.model.live_files(&dir).is_empty(), "fault at {op}");
    }
}

#[test]
fn create_reports_disk_full() {
    let mut store = FaultyStore::new();
    // ENOSPC on Linux.
    store
        .os
        .inject(OsOp::Allocate, Fault::once(io::ErrorKind::Other).with_os_error(28));
    let dir = store.dir.path().to_path_buf();

    let err = store
        .fs
        .create_file_blocking(&dir, "segment-1", 1 << 20)
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::SpaceProvision);
    assert_eq!(err.io_error().and_then(io::Error::raw_os_error), Some(28));
    assert!(!store.dir.contains("segment-1"));
}

#[test]
fn remove_tolerates_directory_sync_failure() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();
    drop(store.fs.create_file_blocking(&dir, "segment-1", 4096).unwrap());

    store.os.inject(OsOp::SyncDir, Fault::once(io::ErrorKind::Other));
    store.fs.remove_file(&dir, "segment-1").unwrap();

    assert!(!store.dir.contains("segment-1"));
    assert_eq!(
        store.fs.last_error(),
        Some("fsync directory: injected sync_dir failure")
    );
    // The unlink is not yet durable.
    assert!(store.surviving_files().contains_key("segment-1"));
}

#[test]
fn remove_is_durable() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();
    drop(store.fs.create_file_blocking(&dir, "segment-1", 4096).unwrap());

    store.fs.remove_file(&dir, "segment-1").unwrap();
    assert!(store.surviving_files().is_empty());
    assert!(store.fs.last_error().is_none());
}

#[test]
fn truncate_directory_sync_failure_is_fatal() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();
    drop(store.fs.create_file_blocking(&dir, "open-1", 4096).unwrap());

    store.os.inject(OsOp::SyncDir, Fault::once(io::ErrorKind::Other));
    let err = store
        .fs
        .truncate_and_rename_file(&dir, 100, "open-1", "1-8")
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::DurabilitySync);
}

#[test]
fn truncate_faults_leave_original() {
    let cases = [
        (OsOp::OpenReadWrite, FsErrorKind::Open),
        (OsOp::Truncate, FsErrorKind::Truncate),
        (OsOp::SyncFile, FsErrorKind::DurabilitySync),
        (OsOp::Rename, FsErrorKind::Rename),
    ];

    for (op, kind) in cases {
        let mut store = FaultyStore::new();
        let dir = store.dir.path().to_path_buf();
        drop(store.fs.create_file_blocking(&dir, "open-1", 4096).unwrap());
        store.os.clear_journal();
        store.os.inject(op, Fault::once(io::ErrorKind::Other));

        let err = store
            .fs
            .truncate_and_rename_file(&dir, 100, "open-1", "1-8")
            .unwrap_err();
        assert_eq!(err.kind(), kind, "fault at {op}");
        assert!(store.dir.contains("open-1"), "fault at {op}");
        assert!(!store.dir.contains("1-8"), "fault at {op}");

        // Every handle opened was closed.
        let ops = store.os.ops();
        let opened = ops.iter().filter(|call| **call == OsOp::OpenReadWrite).count();
        let succeeded_open = usize::from(op != OsOp::OpenReadWrite) * opened;
        let closed = ops.iter().filter(|call| **call == OsOp::Close).count();
        assert_eq!(closed, succeeded_open, "fault at {op}: {ops:?}");
    }
}

#[test]
fn truncate_to_zero_leaves_target_alone() {
    let mut store = FaultyStore::new();
    let dir = store.dir.path().to_path_buf();
    drop(store.fs.create_file_blocking(&dir, "open-1", 4096).unwrap());
    store.dir.write("1-8", b"closed segment");

    store
        .fs
        .truncate_and_rename_file(&dir, 0, "open-1", "1-8")
        .unwrap();
    assert!(!store.dir.contains("open-1"));
    assert_eq!(std::fs::read(store.dir.join("1-8")).unwrap(), b"closed segment");
    assert!(!store.os.ops().contains(&OsOp::Rename));
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn created_size_is_durable(name in segment_name_strategy(), size in segment_size_strategy()) {
        let mut store = FaultyStore::new();
        let dir = store.dir.path().to_path_buf();

        let file = store.fs.create_file_blocking(&dir, &name, size).unwrap();
        prop_assert_eq!(file.len().unwrap(), size);
        prop_assert_eq!(store.surviving_files().get(&name).copied(), Some(Some(size)));
    }

    #[test]
    fn truncate_and_rename_outcome(
        (size, target) in (1u64..=16 * 1024)
            .prop_flat_map(|size| (Just(size), truncate_size_strategy(size)))
    ) {
        let mut store = FaultyStore::new();
        let dir = store.dir.path().to_path_buf();
        drop(store.fs.create_file_blocking(&dir, "open-1", size).unwrap());
        if target == 0 {
            store.dir.write("1-8", b"untouched");
        }

        store.fs.truncate_and_rename_file(&dir, target, "open-1", "1-8").unwrap();
        prop_assert!(!store.dir.contains("open-1"));
        let survivors = store.surviving_files();
        prop_assert!(!survivors.contains_key("open-1"));
        if target == 0 {
            prop_assert_eq!(std::fs::read(store.dir.join("1-8")).unwrap(), b"untouched".to_vec());
        } else {
            prop_assert_eq!(file_len(&store.dir.join("1-8")), target);
            prop_assert_eq!(survivors.get("1-8").copied(), Some(Some(target)));
        }
    }

    #[test]
    fn injected_create_fault_never_leaves_a_file(op in fallible_op_strategy(), fault in fault_strategy()) {
        let mut store = FaultyStore::new();
        store.os.inject(op, fault);
        let dir = store.dir.path().to_path_buf();

        match store.fs.create_file_blocking(&dir, "segment-1", 4096) {
            Ok(file) => {
                prop_assert_eq!(file.len().unwrap(), 4096);
                prop_assert_eq!(store.surviving_files().get("segment-1").copied(), Some(Some(4096)));
            }
            Err(_) => prop_assert!(!store.dir.contains("segment-1")),
        }
    }
}
