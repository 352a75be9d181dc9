//! The process-wide heap table and the facade operations.
//!
//! One global pointer addresses the active [`HeapTable`]. Swapping it is a
//! single atomic store, so a reader always sees a complete table. The
//! pointer is not otherwise synchronized: install a table during the
//! configuration window, before concurrent allocation starts, and close the
//! window with [`seal`] once configuration is done. Blocks must be released
//! by the table that allocated them.

use crate::diagnostics;
use crate::error::{AllocError, HeapError, HeapResult};
use crate::raw::{RawHeap, SystemHeap};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// A named heap, installable as the process-wide allocator.
pub struct HeapTable {
    name: &'static str,
    heap: &'static dyn RawHeap,
}

impl HeapTable {
    /// Creates a table around `heap`.
    #[must_use]
    pub const fn new(name: &'static str, heap: &'static dyn RawHeap) -> Self {
        Self { name, heap }
    }

    /// Returns the table's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the heap behind the table.
    #[must_use]
    pub fn heap(&self) -> &'static dyn RawHeap {
        self.heap
    }
}

impl fmt::Debug for HeapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapTable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

static DEFAULT_TABLE: HeapTable = HeapTable::new("system", &SystemHeap);

static CURRENT: AtomicPtr<HeapTable> = AtomicPtr::new(ptr::addr_of!(DEFAULT_TABLE).cast_mut());

static SEALED: AtomicBool = AtomicBool::new(false);

/// Installs `table` as the process-wide heap.
///
/// # Errors
///
/// Returns [`HeapError::Sealed`] once [`seal`] has been called.
pub fn install(table: &'static HeapTable) -> HeapResult<()> {
    if SEALED.load(Ordering::Acquire) {
        return Err(HeapError::Sealed);
    }
    CURRENT.store(ptr::from_ref(table).cast_mut(), Ordering::Release);
    Ok(())
}

/// Reinstalls the built-in system heap.
///
/// # Errors
///
/// Returns [`HeapError::Sealed`] once [`seal`] has been called.
pub fn restore_default() -> HeapResult<()> {
    install(&DEFAULT_TABLE)
}

/// Closes the configuration window. Later swaps fail.
pub fn seal() {
    SEALED.store(true, Ordering::Release);
}

/// Whether [`seal`] has been called.
#[must_use]
pub fn is_sealed() -> bool {
    SEALED.load(Ordering::Acquire)
}

/// Returns the active table.
#[must_use]
pub fn current() -> &'static HeapTable {
    // SAFETY: CURRENT only ever holds pointers derived from `&'static`.
    unsafe { &*CURRENT.load(Ordering::Acquire) }
}

/// Whether the built-in system heap is active.
#[must_use]
pub fn is_default() -> bool {
    ptr::eq(current(), &DEFAULT_TABLE)
}

/// Allocates `size` bytes from the active heap. Null on failure.
///
/// Requests above the diagnostic threshold are reported first.
#[must_use]
pub fn allocate(size: usize) -> *mut u8 {
    diagnostics::check_allocate(size);
    current().heap.allocate(size)
}

/// Like [`allocate`], but reports failure as an error.
///
/// # Errors
///
/// Returns [`AllocError`] when the active heap returns null.
pub fn try_allocate(size: usize) -> Result<NonNull<u8>, AllocError> {
    NonNull::new(allocate(size)).ok_or(AllocError { size, alignment: 0 })
}

/// Releases a block from [`allocate`], [`zero_allocate`] or
/// [`reallocate`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live block from the active table's plain
/// operations.
pub unsafe fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: forwarded contract.
    unsafe { current().heap.release(ptr) }
}

/// Allocates `count * size` zeroed bytes. Null on failure.
#[must_use]
pub fn zero_allocate(count: usize, size: usize) -> *mut u8 {
    diagnostics::check_zero_allocate(count, size);
    current().heap.zero_allocate(count, size)
}

/// Resizes a block. Null on failure, in which case `ptr` stays valid.
///
/// # Safety
///
/// Same requirements as [`release`].
#[must_use]
pub unsafe fn reallocate(ptr: *mut u8, size: usize) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { current().heap.reallocate(ptr, size) }
}

/// Allocates `size` bytes aligned to `alignment`. Null on failure.
#[must_use]
pub fn aligned_allocate(alignment: usize, size: usize) -> *mut u8 {
    current().heap.aligned_allocate(alignment, size)
}

/// Like [`aligned_allocate`], but reports failure as an error.
///
/// # Errors
///
/// Returns [`AllocError`] when the active heap returns null.
pub fn try_aligned_allocate(alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
    NonNull::new(aligned_allocate(alignment, size)).ok_or(AllocError { size, alignment })
}

/// Releases a block from [`aligned_allocate`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live block from the active table's
/// [`aligned_allocate`] with the same `alignment`.
pub unsafe fn aligned_release(alignment: usize, ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: forwarded contract.
    unsafe { current().heap.aligned_release(alignment, ptr) }
}
