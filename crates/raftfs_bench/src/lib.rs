//! Benchmark utilities for raftfs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
