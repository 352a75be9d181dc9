//! `GlobalAlloc` bridge routing Rust allocations through the facade.

use crate::table;
use std::alloc::{GlobalAlloc, Layout};
use std::ptr;

/// Largest alignment the plain operations guarantee.
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64",
    target_arch = "s390x",
    target_arch = "riscv64",
    target_arch = "loongarch64",
))]
const MIN_ALIGN: usize = 16;
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64",
    target_arch = "s390x",
    target_arch = "riscv64",
    target_arch = "loongarch64",
)))]
const MIN_ALIGN: usize = 8;

/// Global allocator that forwards to the active [`crate::HeapTable`].
///
/// ```rust,ignore
/// #[global_allocator]
/// static HEAP: raftfs_heap::Heap = raftfs_heap::Heap;
/// ```
///
/// Layouts the plain operations can satisfy go to `allocate`/`release`,
/// the rest to the aligned pair. The choice depends only on the layout, so
/// a block always returns to the operation family that produced it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

#[inline]
fn is_plain(layout: &Layout) -> bool {
    layout.align() <= MIN_ALIGN && layout.align() <= layout.size()
}

// SAFETY: the facade operations return null or blocks satisfying the
// layout: plain blocks are malloc-aligned and only used when the layout's
// alignment does not exceed that, the rest use the aligned pair.
unsafe impl GlobalAlloc for Heap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if is_plain(&layout) {
            table::allocate(layout.size())
        } else {
            table::aligned_allocate(layout.align(), layout.size())
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` was produced by `alloc` with the same layout, hence
        // by the same operation family.
        unsafe {
            if is_plain(&layout) {
                table::release(ptr);
            } else {
                table::aligned_release(layout.align(), ptr);
            }
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if is_plain(&layout) {
            return table::zero_allocate(layout.size(), 1);
        }
        let ptr = table::aligned_allocate(layout.align(), layout.size());
        if !ptr.is_null() {
            // SAFETY: the block is valid for `layout.size()` bytes.
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: the caller guarantees `new_size`, rounded up to the
        // alignment, does not overflow isize.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        if is_plain(&layout) && is_plain(&new_layout) {
            // SAFETY: `ptr` is a live plain block.
            return unsafe { table::reallocate(ptr, new_size) };
        }
        // SAFETY: `new_layout` is valid per the caller's contract; on
        // success both blocks are live for the copied range.
        unsafe {
            let new_ptr = self.alloc(new_layout);
            if !new_ptr.is_null() {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
            new_ptr
        }
    }
}
