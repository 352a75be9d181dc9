//! Retained error messages are released when replaced.
//!
//! Every Rust allocation in this binary goes through the heap facade, with a
//! counting table installed around the code under test. The binary runs
//! without the test harness so no other thread allocates meanwhile.

use raftfs_heap::{Heap, HeapTable, StatsHeap, SystemHeap};
use raftfs_storage::DurableFs;
use raftfs_testkit::ManualQueue;
use std::sync::Arc;

#[global_allocator]
static HEAP: Heap = Heap;

static STATS: StatsHeap = StatsHeap::new(SystemHeap);
static STATS_TABLE: HeapTable = HeapTable::new("stats", &STATS);

fn repeated_set_error_retains_one_message() {
    let mut fs = DurableFs::new(Arc::new(ManualQueue::new()));
    let messages: Vec<String> = (0..500).map(|i| format!("open: attempt {i}")).collect();

    raftfs_heap::install(&STATS_TABLE).unwrap();
    let before = STATS.stats();
    for message in &messages {
        fs.set_error(Some(message.clone()));
    }
    let retained = STATS.stats().since(&before);
    fs.set_error(None);
    let cleared = STATS.stats().since(&before);
    raftfs_heap::restore_default().unwrap();

    assert_eq!(retained.outstanding(), 1, "{retained}");
    assert_eq!(cleared.outstanding(), 0, "{cleared}");
    assert!(fs.last_error().is_none());
}

fn failed_operations_replace_message() {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = DurableFs::new(Arc::new(ManualQueue::new()));
    std::fs::write(dir.path().join("segment-1"), b"x").unwrap();

    // First failure allocates whatever the store keeps around for messages.
    assert!(fs.create_file_blocking(dir.path(), "segment-1", 16).is_err());

    raftfs_heap::install(&STATS_TABLE).unwrap();
    let before = STATS.stats();
    for _ in 0..50 {
        assert!(fs.create_file_blocking(dir.path(), "segment-1", 16).is_err());
    }
    let after = STATS.stats().since(&before);
    raftfs_heap::restore_default().unwrap();

    assert_eq!(after.outstanding(), 0, "{after}");
    assert!(fs.last_error().unwrap().starts_with("open: "));
}

fn main() {
    repeated_set_error_retains_one_message();
    println!("test repeated_set_error_retains_one_message ... ok");
    failed_operations_replace_message();
    println!("test failed_operations_replace_message ... ok");
}
