//! Benchmark utilities.

use rand::Rng;
use raftfs_storage::{DurableFs, FsConfig, ThreadPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generate random payload of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of random allocation sizes up to `max`.
pub fn random_sizes(count: usize, max: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(1..=max)).collect()
}

/// Returns a segment name never handed out before in this process.
pub fn unique_segment_name() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("bench-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Builds a store backed by a pool of `threads` workers.
pub fn pooled_store(threads: usize) -> DurableFs {
    let pool = ThreadPool::new(threads).expect("Failed to start thread pool");
    DurableFs::with_config(Arc::new(pool), FsConfig::new().worker_threads(threads))
}
