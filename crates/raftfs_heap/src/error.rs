//! Error types for heap configuration and fallible allocation.

use thiserror::Error;

/// Result type for heap configuration.
pub type HeapResult<T> = Result<T, HeapError>;

/// Errors raised while configuring the process-wide heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The configuration window was closed by [`crate::seal`].
    #[error("heap configuration is sealed")]
    Sealed,
}

/// The active heap could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocation of {size} bytes (alignment {alignment}) failed")]
pub struct AllocError {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment, 0 for the plain operations.
    pub alignment: usize,
}
