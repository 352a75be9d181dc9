//! # raftfs Storage
//!
//! Crash-consistent segment file store for a Raft log.
//!
//! A Raft node persists its log as a sequence of segment files. This crate
//! creates, deletes and finalizes those files so that a power loss at any
//! instant leaves the directory in a recoverable state.
//!
//! ## Guarantees
//!
//! - Creation never overwrites an existing file
//! - A created segment has its full size reserved up front
//! - Success is reported only after the file and its directory entry are
//!   durable
//! - A failed operation leaves no partially created file behind
//!
//! ## Operations
//!
//! - [`DurableFs::create_file_blocking`], [`DurableFs::remove_file`] and
//!   [`DurableFs::truncate_and_rename_file`] run on the caller's thread
//! - [`DurableFs::submit_create`] runs a creation on a [`WorkQueue`] and
//!   reports back on the control thread, with cooperative cancellation
//!
//! ## Memory
//!
//! This crate allocates through Rust's global allocator and does not depend
//! on `raftfs_heap` directly. Routing its allocations, retained error
//! messages included, through the swappable heap facade is opt-in: the final
//! binary installs the facade as its global allocator.
//!
//! ```rust,ignore
//! #[global_allocator]
//! static HEAP: raftfs_heap::Heap = raftfs_heap::Heap;
//! ```
//!
//! Without that declaration the store uses the platform allocator and heap
//! table swaps have no effect on it.
//!
//! ## Example
//!
//! ```rust
//! use raftfs_storage::{DurableFs, ThreadPool};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut fs = DurableFs::new(Arc::new(ThreadPool::new(1).unwrap()));
//!
//! let segment = fs.create_file_blocking(dir.path(), "open-1", 4096).unwrap();
//! assert_eq!(segment.len().unwrap(), 4096);
//! drop(segment);
//!
//! fs.truncate_and_rename_file(dir.path(), 100, "open-1", "1-8").unwrap();
//! assert!(dir.path().join("1-8").exists());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod fs;
mod os;
mod path;
mod request;
mod work;

pub use config::{FsConfig, DEFAULT_FILE_MODE, DEFAULT_MAX_PATH_LEN, DEFAULT_WORKER_THREADS};
pub use error::{FsError, FsErrorKind, FsResult};
pub use fs::DurableFs;
pub use os::{FileHandle, OsPrimitives, StdOs};
pub use path::join_path;
pub use request::{CreateCallback, CreateHandle, CreateRequest, RequestId, RequestState};
pub use work::{Job, QueueError, ThreadPool, WorkQueue};
