//! Error types for segment file operations.
//!
//! Every failure Displays as `"<operation>: <system error description>"`.
//! That string is what [`crate::DurableFs`] retains as its last error
//! message; callers treat it as opaque display text.

use crate::work::QueueError;
use std::collections::TryReserveError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for file store operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors that can occur while provisioning or replacing segment files.
#[derive(Debug, Error)]
pub enum FsError {
    /// Opening a file failed (including "already exists" on exclusive create).
    #[error("{op}: {source}")]
    Open {
        /// Operation that failed.
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Reserving the file's byte range failed.
    #[error("fallocate: {0}")]
    SpaceProvision(#[source] io::Error),

    /// Forcing a file or directory to stable storage failed.
    #[error("{op}: {source}")]
    DurabilitySync {
        /// Operation that failed.
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Truncating a file failed.
    #[error("truncate: {0}")]
    Truncate(#[source] io::Error),

    /// Renaming a file failed.
    #[error("rename: {0}")]
    Rename(#[source] io::Error),

    /// Deleting a file failed.
    #[error("unlink: {0}")]
    Delete(#[source] io::Error),

    /// The work queue refused the request.
    #[error("queue work: {0}")]
    QueueSubmission(#[from] QueueError),

    /// The request was canceled before completion.
    #[error("canceled")]
    Canceled,

    /// An accepted job was dropped without reporting an outcome.
    #[error("work: request abandoned before completion")]
    Abandoned,

    /// Memory for a path could not be reserved.
    #[error("join: {0}")]
    AllocationFailure(#[from] TryReserveError),

    /// The file name is not a single plain path component.
    #[error("join: {name:?} is not a plain file name")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The joined path exceeds the configured maximum.
    #[error("join: path of {len} bytes exceeds the {max} byte limit")]
    PathTooLong {
        /// Length of the joined path in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl FsError {
    pub(crate) fn open(source: io::Error) -> Self {
        Self::Open { op: "open", source }
    }

    pub(crate) fn sync(op: &'static str, source: io::Error) -> Self {
        Self::DurabilitySync { op, source }
    }

    /// Returns the status code of this error.
    #[must_use]
    pub fn kind(&self) -> FsErrorKind {
        match self {
            Self::Open { .. } => FsErrorKind::Open,
            Self::SpaceProvision(_) => FsErrorKind::SpaceProvision,
            Self::DurabilitySync { .. } => FsErrorKind::DurabilitySync,
            Self::Truncate(_) => FsErrorKind::Truncate,
            Self::Rename(_) => FsErrorKind::Rename,
            Self::Delete(_) => FsErrorKind::Delete,
            Self::QueueSubmission(_) => FsErrorKind::QueueSubmission,
            Self::Canceled => FsErrorKind::Canceled,
            Self::Abandoned => FsErrorKind::Abandoned,
            Self::AllocationFailure(_) => FsErrorKind::AllocationFailure,
            Self::InvalidName { .. } => FsErrorKind::InvalidName,
            Self::PathTooLong { .. } => FsErrorKind::PathTooLong,
        }
    }

    /// Returns the underlying OS error, if there is one.
    #[must_use]
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Open { source, .. } | Self::DurabilitySync { source, .. } => Some(source),
            Self::SpaceProvision(source)
            | Self::Truncate(source)
            | Self::Rename(source)
            | Self::Delete(source) => Some(source),
            _ => None,
        }
    }
}

/// Status code of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// See [`FsError::Open`].
    Open,
    /// See [`FsError::SpaceProvision`].
    SpaceProvision,
    /// See [`FsError::DurabilitySync`].
    DurabilitySync,
    /// See [`FsError::Truncate`].
    Truncate,
    /// See [`FsError::Rename`].
    Rename,
    /// See [`FsError::Delete`].
    Delete,
    /// See [`FsError::QueueSubmission`].
    QueueSubmission,
    /// See [`FsError::Canceled`].
    Canceled,
    /// See [`FsError::Abandoned`].
    Abandoned,
    /// See [`FsError::AllocationFailure`].
    AllocationFailure,
    /// See [`FsError::InvalidName`].
    InvalidName,
    /// See [`FsError::PathTooLong`].
    PathTooLong,
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open error",
            Self::SpaceProvision => "space provision error",
            Self::DurabilitySync => "durability sync error",
            Self::Truncate => "truncate error",
            Self::Rename => "rename error",
            Self::Delete => "delete error",
            Self::QueueSubmission => "queue submission error",
            Self::Canceled => "canceled",
            Self::Abandoned => "abandoned",
            Self::AllocationFailure => "allocation failure",
            Self::InvalidName => "invalid file name",
            Self::PathTooLong => "path too long",
        };
        f.write_str(name)
    }
}
