//! Fault-injecting OS primitives.
//!
//! [`FaultyOs`] forwards to the real OS ([`StdOs`]) but can fail any
//! primitive on demand, records every call in a journal, and reports each
//! successful call to an optional [`CrashModel`].

use crate::crash::CrashModel;
use parking_lot::Mutex;
use raftfs_storage::{FileHandle, OsPrimitives, StdOs};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One OS primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsOp {
    /// Exclusive create.
    OpenExclusive,
    /// Open an existing file read-write.
    OpenReadWrite,
    /// Open a directory.
    OpenDir,
    /// Space provisioning.
    Allocate,
    /// File fsync.
    SyncFile,
    /// Directory fsync.
    SyncDir,
    /// Truncate.
    Truncate,
    /// Close.
    Close,
    /// Unlink.
    Unlink,
    /// Rename.
    Rename,
}

impl OsOp {
    /// Every primitive that can be made to fail.
    pub const FALLIBLE: [OsOp; 9] = [
        OsOp::OpenExclusive,
        OsOp::OpenReadWrite,
        OsOp::OpenDir,
        OsOp::Allocate,
        OsOp::SyncFile,
        OsOp::SyncDir,
        OsOp::Truncate,
        OsOp::Unlink,
        OsOp::Rename,
    ];
}

impl fmt::Display for OsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenExclusive => "open_exclusive",
            Self::OpenReadWrite => "open_read_write",
            Self::OpenDir => "open_dir",
            Self::Allocate => "allocate",
            Self::SyncFile => "sync_file",
            Self::SyncDir => "sync_dir",
            Self::Truncate => "truncate",
            Self::Close => "close",
            Self::Unlink => "unlink",
            Self::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// An error to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    kind: io::ErrorKind,
    raw_os_error: Option<i32>,
    persistent: bool,
}

impl Fault {
    /// Fails the next call only.
    #[must_use]
    pub const fn once(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            raw_os_error: None,
            persistent: false,
        }
    }

    /// Fails every call until cleared.
    #[must_use]
    pub const fn always(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            raw_os_error: None,
            persistent: true,
        }
    }

    /// Fails with a raw OS error code (e.g. `ENOSPC`) instead of a kind.
    #[must_use]
    pub const fn with_os_error(mut self, code: i32) -> Self {
        self.raw_os_error = Some(code);
        self
    }

    fn to_error(self, op: OsOp) -> io::Error {
        match self.raw_os_error {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(self.kind, format!("injected {op} failure")),
        }
    }
}

/// A journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsCall {
    /// Which primitive.
    pub op: OsOp,
    /// The path it acted on (the source, for a rename).
    pub path: PathBuf,
    /// Whether it succeeded.
    pub ok: bool,
}

/// [`OsPrimitives`] over the real OS with injectable failures.
#[derive(Default)]
pub struct FaultyOs {
    inner: StdOs,
    faults: Mutex<HashMap<OsOp, Fault>>,
    journal: Mutex<Vec<OsCall>>,
    model: Option<Arc<CrashModel>>,
}

impl FaultyOs {
    /// Creates an instance with no faults armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports every successful call to `model`.
    #[must_use]
    pub fn with_model(mut self, model: Arc<CrashModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Arms a fault for `op`, replacing any previous one.
    pub fn inject(&self, op: OsOp, fault: Fault) {
        self.faults.lock().insert(op, fault);
    }

    /// Disarms the fault for `op`.
    pub fn clear(&self, op: OsOp) {
        self.faults.lock().remove(&op);
    }

    /// Disarms every fault.
    pub fn clear_all(&self) {
        self.faults.lock().clear();
    }

    /// Returns a copy of the call journal.
    #[must_use]
    pub fn journal(&self) -> Vec<OsCall> {
        self.journal.lock().clone()
    }

    /// Returns the operations called so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<OsOp> {
        self.journal.lock().iter().map(|call| call.op).collect()
    }

    /// Empties the journal.
    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Returns the crash model, if one is attached.
    #[must_use]
    pub fn model(&self) -> Option<&Arc<CrashModel>> {
        self.model.as_ref()
    }

    fn run<T>(
        &self,
        op: OsOp,
        path: &Path,
        call: impl FnOnce() -> io::Result<T>,
        observe: impl FnOnce(&CrashModel),
    ) -> io::Result<T> {
        let result = match self.take_fault(op) {
            Some(fault) => Err(fault.to_error(op)),
            None => call(),
        };
        if result.is_ok() {
            if let Some(model) = &self.model {
                observe(model);
            }
        }
        self.journal.lock().push(OsCall {
            op,
            path: path.to_path_buf(),
            ok: result.is_ok(),
        });
        result
    }

    fn take_fault(&self, op: OsOp) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let fault = *faults.get(&op)?;
        if !fault.persistent {
            faults.remove(&op);
        }
        Some(fault)
    }
}

impl fmt::Debug for FaultyOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyOs")
            .field("faults", &*self.faults.lock())
            .field("calls", &self.journal.lock().len())
            .field("model", &self.model.is_some())
            .finish()
    }
}

impl OsPrimitives for FaultyOs {
    fn open_exclusive(&self, path: &Path) -> io::Result<FileHandle> {
        self.run(
            OsOp::OpenExclusive,
            path,
            || self.inner.open_exclusive(path),
            |model| model.created(path),
        )
    }

    fn open_read_write(&self, path: &Path) -> io::Result<FileHandle> {
        self.run(
            OsOp::OpenReadWrite,
            path,
            || self.inner.open_read_write(path),
            |_| {},
        )
    }

    fn open_dir(&self, path: &Path) -> io::Result<FileHandle> {
        self.run(OsOp::OpenDir, path, || self.inner.open_dir(path), |_| {})
    }

    fn allocate(&self, file: &FileHandle, len: u64) -> io::Result<()> {
        self.run(
            OsOp::Allocate,
            file.path(),
            || self.inner.allocate(file, len),
            |model| model.allocated(file.path(), len),
        )
    }

    fn sync_file(&self, file: &FileHandle) -> io::Result<()> {
        self.run(
            OsOp::SyncFile,
            file.path(),
            || self.inner.sync_file(file),
            |model| model.file_synced(file.path()),
        )
    }

    fn sync_dir(&self, dir: &FileHandle) -> io::Result<()> {
        self.run(
            OsOp::SyncDir,
            dir.path(),
            || self.inner.sync_dir(dir),
            |model| model.dir_synced(dir.path()),
        )
    }

    fn truncate(&self, file: &FileHandle, len: u64) -> io::Result<()> {
        self.run(
            OsOp::Truncate,
            file.path(),
            || self.inner.truncate(file, len),
            |model| model.truncated(file.path(), len),
        )
    }

    fn close(&self, file: FileHandle) {
        self.journal.lock().push(OsCall {
            op: OsOp::Close,
            path: file.path().to_path_buf(),
            ok: true,
        });
        self.inner.close(file);
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.run(
            OsOp::Unlink,
            path,
            || self.inner.unlink(path),
            |model| model.unlinked(path),
        )
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.run(
            OsOp::Rename,
            from,
            || self.inner.rename(from, to),
            |model| model.renamed(from, to),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn once_fault_fires_once() {
        let dir = tempdir().unwrap();
        let os = FaultyOs::new();
        os.inject(OsOp::OpenExclusive, Fault::once(io::ErrorKind::PermissionDenied));

        let path = dir.path().join("segment-1");
        let err = os.open_exclusive(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(err.to_string(), "injected open_exclusive failure");
        assert!(!path.exists());

        os.close(os.open_exclusive(&path).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn always_fault_persists_until_cleared() {
        let dir = tempdir().unwrap();
        let os = FaultyOs::new();
        os.inject(OsOp::OpenDir, Fault::always(io::ErrorKind::Other));

        assert!(os.open_dir(dir.path()).is_err());
        assert!(os.open_dir(dir.path()).is_err());
        os.clear(OsOp::OpenDir);
        assert!(os.open_dir(dir.path()).is_ok());
    }

    #[test]
    fn raw_os_error_is_used() {
        let dir = tempdir().unwrap();
        let os = FaultyOs::new();
        os.inject(OsOp::OpenExclusive, Fault::once(io::ErrorKind::Other).with_os_error(28));

        let err = os.open_exclusive(&dir.path().join("x")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(28));
    }

    #[test]
    fn journal_records_order_and_outcome() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment-1");
        let os = FaultyOs::new();
        os.inject(OsOp::Allocate, Fault::once(io::ErrorKind::Other));

        let file = os.open_exclusive(&path).unwrap();
        assert!(os.allocate(&file, 10).is_err());
        os.close(file);

        assert_eq!(os.ops(), vec![OsOp::OpenExclusive, OsOp::Allocate, OsOp::Close]);
        let journal = os.journal();
        assert!(journal[0].ok);
        assert!(!journal[1].ok);
        assert_eq!(journal[2].path, path);

        os.clear_journal();
        assert!(os.journal().is_empty());
    }

    #[test]
    fn failed_calls_do_not_reach_model() {
        let dir = tempdir().unwrap();
        let model = Arc::new(CrashModel::new());
        let os = FaultyOs::new().with_model(Arc::clone(&model));
        os.inject(OsOp::OpenExclusive, Fault::once(io::ErrorKind::Other));

        assert!(os.open_exclusive(&dir.path().join("a")).is_err());
        assert!(model.live_files(dir.path()).is_empty());

        os.close(os.open_exclusive(&dir.path().join("a")).unwrap());
        assert_eq!(model.live_files(dir.path()).get("a"), Some(&0));
    }
}
