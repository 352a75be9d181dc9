//! Property-based test generators using proptest.

use crate::faults::{Fault, OsOp};
use proptest::prelude::*;
use std::io;

/// Strategy for valid segment file names.
pub fn segment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,31}").expect("Invalid regex")
}

/// Strategy for segment sizes, biased toward small values plus zero.
pub fn segment_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        1 => Just(0u64),
        6 => 1u64..=64 * 1024,
        1 => Just(1024 * 1024),
    ]
}

/// Strategy for a truncate target no larger than `size`.
pub fn truncate_size_strategy(size: u64) -> impl Strategy<Value = u64> {
    0..=size
}

/// Strategy for a fallible primitive.
pub fn fallible_op_strategy() -> impl Strategy<Value = OsOp> {
    prop::sample::select(OsOp::FALLIBLE.to_vec())
}

/// Strategy for a one-shot fault.
pub fn fault_strategy() -> impl Strategy<Value = Fault> {
    prop::sample::select(vec![
        io::ErrorKind::PermissionDenied,
        io::ErrorKind::Other,
        io::ErrorKind::Interrupted,
    ])
    .prop_map(Fault::once)
}

/// Strategy for distinct segment names.
pub fn distinct_names_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(segment_name_strategy(), 1..=max)
        .prop_map(|names| names.into_iter().collect())
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
