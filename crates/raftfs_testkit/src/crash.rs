//! A power-loss model of the file system.
//!
//! The model mirrors what a POSIX file system promises about durability:
//!
//! - A directory entry (create, unlink, rename) survives a crash only once
//!   its directory has been synced.
//! - A file's size and reserved space survive only once the file itself has
//!   been synced.
//!
//! [`crate::FaultyOs`] feeds every successful primitive into a
//! [`CrashModel`]. [`CrashModel::surviving_files`] then answers "what would
//! this directory contain if the power failed right now".
//!
//! ## Usage
//!
//! ```rust
//! use raftfs_storage::{DurableFs, FsConfig};
//! use raftfs_testkit::{CrashModel, FaultyOs, ManualQueue, TestDir};
//! use std::sync::Arc;
//!
//! let dir = TestDir::new();
//! let model = Arc::new(CrashModel::new());
//! let os = Arc::new(FaultyOs::new().with_model(Arc::clone(&model)));
//! let mut fs = DurableFs::with_os(Arc::new(ManualQueue::new()), os, FsConfig::default());
//!
//! drop(fs.create_file_blocking(dir.path(), "segment-1", 4096).unwrap());
//! let survivors = model.surviving_files(dir.path());
//! assert_eq!(survivors.get("segment-1"), Some(&Some(4096)));
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

type InodeId = u64;

#[derive(Debug, Clone, Copy, Default)]
struct Inode {
    /// Size as seen by a running process.
    size: u64,
    /// Size a crash would leave, `None` if never synced.
    durable_size: Option<u64>,
}

#[derive(Debug, Default)]
struct ModelState {
    next_inode: InodeId,
    inodes: HashMap<InodeId, Inode>,
    /// Directory entries as seen by a running process.
    live: BTreeMap<PathBuf, InodeId>,
    /// Directory entries a crash would leave.
    durable: BTreeMap<PathBuf, InodeId>,
}

impl ModelState {
    fn new_inode(&mut self, inode: Inode) -> InodeId {
        self.next_inode += 1;
        self.inodes.insert(self.next_inode, inode);
        self.next_inode
    }

    fn live_inode(&mut self, path: &Path) -> Option<&mut Inode> {
        let id = *self.live.get(path)?;
        self.inodes.get_mut(&id)
    }
}

/// Tracks volatile and durable file system state under one directory tree.
#[derive(Debug, Default)]
pub struct CrashModel {
    state: Mutex<ModelState>,
}

impl CrashModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the regular files already in `dir` as fully durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn adopt_existing(&self, dir: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let id = state.new_inode(Inode {
                size: meta.len(),
                durable_size: Some(meta.len()),
            });
            state.live.insert(entry.path(), id);
            state.durable.insert(entry.path(), id);
        }
        Ok(())
    }

    /// A new, empty file appeared at `path`.
    pub fn created(&self, path: &Path) {
        let mut state = self.state.lock();
        let id = state.new_inode(Inode::default());
        state.live.insert(path.to_path_buf(), id);
    }

    /// The file at `path` was extended to at least `len` bytes.
    pub fn allocated(&self, path: &Path, len: u64) {
        if let Some(inode) = self.state.lock().live_inode(path) {
            inode.size = inode.size.max(len);
        }
    }

    /// The file at `path` was set to exactly `len` bytes.
    pub fn truncated(&self, path: &Path, len: u64) {
        if let Some(inode) = self.state.lock().live_inode(path) {
            inode.size = len;
        }
    }

    /// The file at `path` was synced.
    pub fn file_synced(&self, path: &Path) {
        if let Some(inode) = self.state.lock().live_inode(path) {
            inode.durable_size = Some(inode.size);
        }
    }

    /// The entry at `path` was removed.
    pub fn unlinked(&self, path: &Path) {
        self.state.lock().live.remove(path);
    }

    /// The entry at `from` was renamed to `to`, replacing it.
    pub fn renamed(&self, from: &Path, to: &Path) {
        let mut state = self.state.lock();
        if let Some(id) = state.live.remove(from) {
            state.live.insert(to.to_path_buf(), id);
        }
    }

    /// The directory `dir` was synced: its live entries become durable.
    pub fn dir_synced(&self, dir: &Path) {
        let mut state = self.state.lock();
        let ModelState { live, durable, .. } = &mut *state;
        durable.retain(|path, _| path.parent() != Some(dir));
        durable.extend(
            live.iter()
                .filter(|(path, _)| path.parent() == Some(dir))
                .map(|(path, id)| (path.clone(), *id)),
        );
    }

    /// Files in `dir` that would exist after a crash now, by name.
    ///
    /// The size is `None` when the file's contents were never synced, in
    /// which case a crash may leave it at any length.
    #[must_use]
    pub fn surviving_files(&self, dir: &Path) -> BTreeMap<String, Option<u64>> {
        let state = self.state.lock();
        state
            .durable
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, id)| {
                let name = path.file_name().and_then(OsStr::to_str)?.to_owned();
                let size = state.inodes.get(id).and_then(|inode| inode.durable_size);
                Some((name, size))
            })
            .collect()
    }

    /// Files in `dir` as a running process sees them, by name.
    #[must_use]
    pub fn live_files(&self, dir: &Path) -> BTreeMap<String, u64> {
        let state = self.state.lock();
        state
            .live
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, id)| {
                let name = path.file_name().and_then(OsStr::to_str)?.to_owned();
                Some((name, state.inodes.get(id)?.size))
            })
            .collect()
    }
}
