//! OS file primitives.
//!
//! The file store depends on these operations as a capability set rather
//! than calling `std::fs` directly, so tests can inject failures and
//! observe the exact order of durability calls.

use crate::config::DEFAULT_FILE_MODE;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// An open file together with the path it was opened at.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    path: PathBuf,
}

impl FileHandle {
    /// Wraps an open file.
    #[must_use]
    pub fn new(file: File, path: PathBuf) -> Self {
        Self { file, path }
    }

    /// Returns the path the file was opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the underlying file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Consumes the handle, returning the underlying file.
    #[must_use]
    pub fn into_file(self) -> File {
        self.file
    }

    /// Returns the current file length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns true if the file is currently empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// File system operations the store is built from.
///
/// # Invariants
///
/// - `open_exclusive` fails if the path already exists and leaves it untouched
/// - `allocate` reserves the whole range `[0, len)` so later writes cannot
///   fail from exhaustion
/// - `sync_file` returns only after data and metadata are on stable storage
/// - `sync_dir` returns only after the directory's entries are on stable
///   storage
pub trait OsPrimitives: Send + Sync {
    /// Creates `path` for writing, failing if it exists.
    ///
    /// # Errors
    ///
    /// Returns the OS error, `AlreadyExists` included.
    fn open_exclusive(&self, path: &Path) -> io::Result<FileHandle>;

    /// Opens an existing file for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn open_read_write(&self, path: &Path) -> io::Result<FileHandle>;

    /// Opens a directory so it can be synced.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn open_dir(&self, path: &Path) -> io::Result<FileHandle>;

    /// Reserves `len` bytes of storage for the file.
    ///
    /// # Errors
    ///
    /// Returns the OS error, `ENOSPC` included.
    fn allocate(&self, file: &FileHandle, len: u64) -> io::Result<()>;

    /// Forces file data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn sync_file(&self, file: &FileHandle) -> io::Result<()>;

    /// Forces a directory's entries to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn sync_dir(&self, dir: &FileHandle) -> io::Result<()>;

    /// Sets the file length to exactly `len`.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn truncate(&self, file: &FileHandle, len: u64) -> io::Result<()>;

    /// Closes a handle.
    fn close(&self, file: FileHandle) {
        drop(file);
    }

    /// Removes a directory entry.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Atomically renames `from` to `to`, replacing `to`.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// The real OS, via `std::fs` and `fs2`.
///
/// On platforms without directory fsync (Windows) `sync_dir` is a no-op:
/// NTFS journaling already makes metadata updates durable.
#[derive(Debug, Clone, Copy)]
pub struct StdOs {
    mode: u32,
}

impl Default for StdOs {
    fn default() -> Self {
        Self::with_mode(DEFAULT_FILE_MODE)
    }
}

impl StdOs {
    /// Creates an instance that creates files with default permissions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an instance that creates files with `mode` (unix only).
    #[must_use]
    pub const fn with_mode(mode: u32) -> Self {
        Self { mode }
    }
}

impl OsPrimitives for StdOs {
    fn open_exclusive(&self, path: &Path) -> io::Result<FileHandle> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }
        let file = options.open(path)?;
        Ok(FileHandle::new(file, path.to_path_buf()))
    }

    fn open_read_write(&self, path: &Path) -> io::Result<FileHandle> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileHandle::new(file, path.to_path_buf()))
    }

    #[cfg(not(windows))]
    fn open_dir(&self, path: &Path) -> io::Result<FileHandle> {
        let file = File::open(path)?;
        Ok(FileHandle::new(file, path.to_path_buf()))
    }

    #[cfg(windows)]
    fn open_dir(&self, path: &Path) -> io::Result<FileHandle> {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
            .open(path)?;
        Ok(FileHandle::new(file, path.to_path_buf()))
    }

    fn allocate(&self, file: &FileHandle, len: u64) -> io::Result<()> {
        fs2::FileExt::allocate(file.file(), len)
    }

    fn sync_file(&self, file: &FileHandle) -> io::Result<()> {
        file.file().sync_all()
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &FileHandle) -> io::Result<()> {
        // fsync on a directory descriptor persists its entries.
        dir.file().sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &FileHandle) -> io::Result<()> {
        Ok(())
    }

    fn truncate(&self, file: &FileHandle, len: u64) -> io::Result<()> {
        file.file().set_len(len)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}
