//! A heap wrapper that counts every operation.
//!
//! Install it through a [`crate::HeapTable`] to verify that a code path
//! releases everything it allocates:
//!
//! ```rust
//! use raftfs_heap::{HeapTable, StatsHeap, SystemHeap};
//!
//! static STATS: StatsHeap = StatsHeap::new(SystemHeap);
//! static TABLE: HeapTable = HeapTable::new("stats", &STATS);
//!
//! raftfs_heap::install(&TABLE).unwrap();
//! let ptr = raftfs_heap::allocate(128);
//! unsafe { raftfs_heap::release(ptr) };
//! raftfs_heap::restore_default().unwrap();
//!
//! assert_eq!(STATS.stats().outstanding(), 0);
//! ```

use crate::raw::{RawHeap, SystemHeap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A snapshot of [`StatsHeap`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful `allocate` calls.
    pub allocations: usize,
    /// Successful `zero_allocate` calls.
    pub zero_allocations: usize,
    /// Successful `aligned_allocate` calls.
    pub aligned_allocations: usize,
    /// `reallocate` calls that returned a block.
    pub reallocations: usize,
    /// `release` calls on non-null pointers.
    pub releases: usize,
    /// `aligned_release` calls on non-null pointers.
    pub aligned_releases: usize,
    /// Requests the inner heap could not satisfy.
    pub failures: usize,
}

impl HeapStats {
    /// Blocks handed out and not yet released.
    ///
    /// Signed because a table installed mid-flight may see releases of
    /// blocks it never handed out.
    #[must_use]
    pub fn outstanding(&self) -> isize {
        let acquired = self.allocations + self.zero_allocations + self.aligned_allocations;
        let released = self.releases + self.aligned_releases;
        acquired as isize - released as isize
    }

    /// Whether any block is still outstanding.
    #[must_use]
    pub fn has_leaks(&self) -> bool {
        self.outstanding() > 0
    }

    /// Counter-wise difference `self - earlier`.
    #[must_use]
    pub fn since(&self, earlier: &HeapStats) -> HeapStats {
        HeapStats {
            allocations: self.allocations.wrapping_sub(earlier.allocations),
            zero_allocations: self.zero_allocations.wrapping_sub(earlier.zero_allocations),
            aligned_allocations: self
                .aligned_allocations
                .wrapping_sub(earlier.aligned_allocations),
            reallocations: self.reallocations.wrapping_sub(earlier.reallocations),
            releases: self.releases.wrapping_sub(earlier.releases),
            aligned_releases: self.aligned_releases.wrapping_sub(earlier.aligned_releases),
            failures: self.failures.wrapping_sub(earlier.failures),
        }
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocations={} zeroed={} aligned={} reallocations={} releases={} aligned_releases={} failures={} outstanding={}",
            self.allocations,
            self.zero_allocations,
            self.aligned_allocations,
            self.reallocations,
            self.releases,
            self.aligned_releases,
            self.failures,
            self.outstanding()
        )
    }
}

/// Counts operations, forwarding them to an inner heap.
///
/// Counting uses relaxed atomics only, so the wrapper is safe to use as the
/// backing of the global allocator.
#[derive(Debug, Default)]
pub struct StatsHeap<H = SystemHeap> {
    inner: H,
    allocations: AtomicUsize,
    zero_allocations: AtomicUsize,
    aligned_allocations: AtomicUsize,
    reallocations: AtomicUsize,
    releases: AtomicUsize,
    aligned_releases: AtomicUsize,
    failures: AtomicUsize,
}

impl<H> StatsHeap<H> {
    /// Wraps `inner` with zeroed counters.
    pub const fn new(inner: H) -> Self {
        Self {
            inner,
            allocations: AtomicUsize::new(0),
            zero_allocations: AtomicUsize::new(0),
            aligned_allocations: AtomicUsize::new(0),
            reallocations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            aligned_releases: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            zero_allocations: self.zero_allocations.load(Ordering::Relaxed),
            aligned_allocations: self.aligned_allocations.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            aligned_releases: self.aligned_releases.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.allocations,
            &self.zero_allocations,
            &self.aligned_allocations,
            &self.reallocations,
            &self.releases,
            &self.aligned_releases,
            &self.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn count(&self, ptr: *mut u8, success: &AtomicUsize) -> *mut u8 {
        if ptr.is_null() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        } else {
            success.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }
}

// SAFETY: every operation forwards unchanged to `inner`, which upholds the
// RawHeap contract; the counters never allocate.
unsafe impl<H: RawHeap> RawHeap for StatsHeap<H> {
    fn allocate(&self, size: usize) -> *mut u8 {
        self.count(self.inner.allocate(size), &self.allocations)
    }

    unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded contract.
        unsafe { self.inner.release(ptr) }
    }

    fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        self.count(self.inner.zero_allocate(count, size), &self.zero_allocations)
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: forwarded contract.
        let out = unsafe { self.inner.reallocate(ptr, size) };
        if ptr.is_null() {
            // realloc(NULL, n) is a fresh allocation.
            return self.count(out, &self.allocations);
        }
        self.count(out, &self.reallocations)
    }

    fn aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8 {
        self.count(
            self.inner.aligned_allocate(alignment, size),
            &self.aligned_allocations,
        )
    }

    unsafe fn aligned_release(&self, alignment: usize, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        self.aligned_releases.fetch_add(1, Ordering::Relaxed);
        // SAFETY: forwarded contract.
        unsafe { self.inner.aligned_release(alignment, ptr) }
    }
}
