//! The heap capability set and its libc-backed default.

use std::mem;
use std::ptr;

/// A raw heap: the six operations every allocation in raftfs goes through.
///
/// The implementing value plays the role of the opaque context; the trait
/// object is the operation table. All operations report failure by
/// returning a null pointer and must never panic or abort.
///
/// # Safety
///
/// Implementors must return either null or a pointer to a fresh block of at
/// least the requested size, suitably aligned (the platform's `malloc`
/// alignment for the plain operations, the requested alignment for the
/// aligned pair). Blocks returned by `allocate`, `zero_allocate` and
/// `reallocate` must be accepted by `release` and `reallocate`; blocks
/// returned by `aligned_allocate` must be accepted by `aligned_release`.
/// Implementations are called from any thread and from inside the global
/// allocator, so they must not allocate through the Rust global allocator
/// themselves.
pub unsafe trait RawHeap: Sync {
    /// Allocates `size` bytes.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `allocate`, `zero_allocate` or
    /// `reallocate` of this heap and not have been released yet.
    unsafe fn release(&self, ptr: *mut u8);

    /// Allocates `count * size` zeroed bytes.
    fn zero_allocate(&self, count: usize, size: usize) -> *mut u8;

    /// Resizes a block, moving it if needed.
    ///
    /// # Safety
    ///
    /// Same requirements on `ptr` as [`RawHeap::release`].
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Allocates `size` bytes aligned to `alignment`.
    fn aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8;

    /// Releases a block obtained from `aligned_allocate`. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `aligned_allocate` of this heap with
    /// the same `alignment`, and not have been released yet.
    unsafe fn aligned_release(&self, alignment: usize, ptr: *mut u8);
}

/// The built-in heap, forwarding to the C library allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

// SAFETY: every operation forwards to the libc allocator, which is
// thread-safe, returns malloc-aligned memory or null, and accepts null in
// free(). Aligned blocks come from posix_memalign and are released by free.
unsafe impl RawHeap for SystemHeap {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc accepts any size and returns null on exhaustion.
        unsafe { libc::malloc(size).cast() }
    }

    unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: caller guarantees `ptr` came from this heap.
        unsafe { libc::free(ptr.cast()) }
    }

    fn zero_allocate(&self, count: usize, size: usize) -> *mut u8 {
        // SAFETY: calloc checks `count * size` for overflow itself.
        unsafe { libc::calloc(count, size).cast() }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` is null or came from this heap.
        unsafe { libc::realloc(ptr.cast(), size).cast() }
    }

    fn aligned_allocate(&self, alignment: usize, size: usize) -> *mut u8 {
        if !alignment.is_power_of_two() {
            return ptr::null_mut();
        }
        // posix_memalign wants a multiple of the pointer size.
        let alignment = alignment.max(mem::size_of::<*mut u8>());
        let mut out: *mut libc::c_void = ptr::null_mut();
        // SAFETY: `alignment` is a power of two and a multiple of the
        // pointer size; `out` is a valid place to store the result.
        let rc = unsafe { libc::posix_memalign(&mut out, alignment, size) };
        if rc == 0 {
            out.cast()
        } else {
            ptr::null_mut()
        }
    }

    unsafe fn aligned_release(&self, _alignment: usize, ptr: *mut u8) {
        // SAFETY: posix_memalign blocks are released with free.
        unsafe { self.release(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release() {
        let heap = SystemHeap;
        let ptr = heap.allocate(64);
        assert!(!ptr.is_null());
        unsafe {
            ptr.write_bytes(0xAB, 64);
            assert_eq!(*ptr.add(63), 0xAB);
            heap.release(ptr);
        }
    }

    #[test]
    fn release_null_is_noop() {
        unsafe {
            SystemHeap.release(ptr::null_mut());
            SystemHeap.aligned_release(64, ptr::null_mut());
        }
    }

    #[test]
    fn zero_allocate_is_zeroed() {
        let heap = SystemHeap;
        let ptr = heap.zero_allocate(16, 8);
        assert!(!ptr.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 128) };
        assert!(bytes.iter().all(|b| *b == 0));
        unsafe { heap.release(ptr) };
    }

    #[test]
    fn reallocate_preserves_prefix() {
        let heap = SystemHeap;
        unsafe {
            let ptr = heap.allocate(8);
            ptr.copy_from_nonoverlapping(b"segment!".as_ptr(), 8);
            let grown = heap.reallocate(ptr, 4096);
            assert!(!grown.is_null());
            assert_eq!(std::slice::from_raw_parts(grown, 8), b"segment!");
            heap.release(grown);
        }
    }

    #[test]
    fn reallocate_null_allocates() {
        let heap = SystemHeap;
        unsafe {
            let ptr = heap.reallocate(ptr::null_mut(), 32);
            assert!(!ptr.is_null());
            heap.release(ptr);
        }
    }

    #[test]
    fn aligned_allocate_honours_alignment() {
        let heap = SystemHeap;
        for alignment in [1usize, 8, 64, 4096] {
            let ptr = heap.aligned_allocate(alignment, 100);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % alignment, 0);
            unsafe { heap.aligned_release(alignment, ptr) };
        }
    }

    #[test]
    fn aligned_allocate_rejects_bad_alignment() {
        assert!(SystemHeap.aligned_allocate(48, 100).is_null());
        assert!(SystemHeap.aligned_allocate(0, 100).is_null());
    }

    #[test]
    fn exhaustion_reports_null() {
        assert!(SystemHeap.allocate(usize::MAX).is_null());
        assert!(SystemHeap.zero_allocate(usize::MAX, 2).is_null());
    }
}
