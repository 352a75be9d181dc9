//! # raftfs heap
//!
//! Process-wide, swappable heap facade for raftfs.
//!
//! Every dynamic allocation in the engine goes through one indirection: the
//! active [`HeapTable`]. The built-in table forwards to the C library
//! allocator; embedders can install their own (an arena, a statistics
//! wrapper, a fault injector) during configuration.
//!
//! ## Pieces
//!
//! - [`RawHeap`] - the six operations a heap provides
//! - [`SystemHeap`] - libc-backed default
//! - [`install`] / [`restore_default`] / [`seal`] - table management
//! - [`allocate`], [`release`], [`zero_allocate`], [`reallocate`],
//!   [`aligned_allocate`], [`aligned_release`] - the facade
//! - [`StatsHeap`] - counting wrapper for leak checks
//! - [`Diagnostics`] - oversized-request reporting
//! - [`Heap`] - `GlobalAlloc` bridge so Rust collections use the facade too
//!
//! ## Example
//!
//! ```rust
//! let ptr = raftfs_heap::allocate(4096);
//! assert!(!ptr.is_null());
//! unsafe { raftfs_heap::release(ptr) };
//! ```

#![warn(missing_docs)]

pub mod diagnostics;
mod error;
mod global;
mod raw;
mod stats;
mod table;

pub use diagnostics::{
    reset_diagnostics, set_diagnostics, DiagnosticSink, Diagnostics, NullSink, OversizedRequest,
    RequestKind, StdoutSink, TracingSink, ALLOCATE_THRESHOLD, ZERO_ALLOCATE_THRESHOLD,
};
pub use error::{AllocError, HeapError, HeapResult};
pub use global::Heap;
pub use raw::{RawHeap, SystemHeap};
pub use stats::{HeapStats, StatsHeap};
pub use table::{
    aligned_allocate, aligned_release, allocate, current, install, is_default, is_sealed,
    reallocate, release, restore_default, seal, try_aligned_allocate, try_allocate,
    zero_allocate, HeapTable,
};
