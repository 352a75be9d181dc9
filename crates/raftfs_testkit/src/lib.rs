//! # raftfs Testkit
//!
//! Test utilities for raftfs.
//!
//! This crate provides:
//! - Fault-injecting OS primitives with a call journal
//! - A power-loss model answering "what survives a crash now"
//! - A work queue the test drives by hand
//! - Fixtures and store helpers
//! - Property-based test generators using proptest
//! - A stress harness for asynchronous creation with cancellation
//!
//! Cross-crate integration tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust
//! use raftfs_testkit::prelude::*;
//! use std::io;
//!
//! let mut store = FaultyStore::new();
//! store.os.inject(OsOp::SyncDir, Fault::once(io::ErrorKind::Other));
//!
//! let dir = store.dir.path().to_path_buf();
//! assert!(store.fs.create_file_blocking(&dir, "segment-1", 4096).is_err());
//! assert!(!store.dir.contains("segment-1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod queue;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::queue::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use queue::*;
pub use stress::*;
