//! The durable segment file store.
//!
//! Every operation follows the same shape: provision the change, force it
//! to stable storage (file first, then the containing directory), and only
//! then report success. A failure partway through unwinds what was done, so
//! no half-created segment is left behind.
//!
//! ```text
//! create:    open(O_CREAT|O_EXCL) -> fallocate -> fsync(file) -> fsync(dir)
//! remove:    unlink -> fsync(dir)                 (dir failure tolerated)
//! truncate:  open -> ftruncate -> fsync(file) -> close -> rename -> fsync(dir)
//! ```

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::os::{FileHandle, OsPrimitives, StdOs};
use crate::path::join_path;
use crate::request::{
    Completion, CreateHandle, CreateRequest, RequestId, RequestShared, RequestState,
    WorkerOutcome,
};
use crate::work::WorkQueue;
use flume::{Receiver, Sender};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A crash-consistent store for fixed-size segment files.
///
/// # Threading
///
/// A `DurableFs` belongs to one control thread. Blocking operations run on
/// the caller's thread for their full duration. Asynchronous creations run
/// on the [`WorkQueue`]'s workers, but their completions are only processed
/// by [`DurableFs::poll`], [`DurableFs::run_once`] and
/// [`DurableFs::run_until_idle`], which take `&mut self`. The retained error
/// message therefore has a single writer. The store is not
/// `Send` once requests with callbacks are in flight.
///
/// # Example
///
/// ```rust,no_run
/// use raftfs_storage::{CreateRequest, DurableFs, ThreadPool};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let pool = Arc::new(ThreadPool::new(2).unwrap());
/// let mut fs = DurableFs::new(pool);
///
/// // Blocking: the very first segment at startup.
/// let first = fs.create_file_blocking(Path::new("/var/lib/raft"), "open-1", 8 << 20).unwrap();
///
/// // Asynchronous: later segments, off the control thread.
/// let handle = fs
///     .submit_create(CreateRequest::new("/var/lib/raft", "open-2", 8 << 20))
///     .unwrap();
/// for request in fs.run_until_idle() {
///     assert_eq!(request.status(), Some(Ok(())));
/// }
/// # drop((first, handle));
/// ```
pub struct DurableFs {
    queue: Arc<dyn WorkQueue>,
    os: Arc<dyn OsPrimitives>,
    config: FsConfig,
    last_error: Option<String>,
    completions_tx: Sender<WorkerOutcome>,
    completions_rx: Receiver<WorkerOutcome>,
    in_flight: HashMap<RequestId, CreateRequest>,
    next_request: u64,
}

impl DurableFs {
    /// Binds a store to `queue` with the default configuration.
    #[must_use]
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self::with_config(queue, FsConfig::default())
    }

    /// Binds a store to `queue` using the real OS.
    #[must_use]
    pub fn with_config(queue: Arc<dyn WorkQueue>, config: FsConfig) -> Self {
        let os = Arc::new(StdOs::with_mode(config.file_mode));
        Self::with_os(queue, os, config)
    }

    /// Binds a store to `queue` using custom OS primitives.
    #[must_use]
    pub fn with_os(queue: Arc<dyn WorkQueue>, os: Arc<dyn OsPrimitives>, config: FsConfig) -> Self {
        let (completions_tx, completions_rx) = flume::unbounded();
        Self {
            queue,
            os,
            config,
            last_error: None,
            completions_tx,
            completions_rx,
            in_flight: HashMap::new(),
            next_request: 0,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Finalizes every in-flight request, then releases the store.
    ///
    /// Callbacks of pending requests run before this returns.
    pub fn close(mut self) -> Vec<CreateRequest> {
        let finalized = self.run_until_idle();
        debug!(finalized = finalized.len(), "file store closed");
        finalized
    }

    /// Returns the retained error message, if any.
    ///
    /// Valid until the next operation records an outcome.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replaces the retained error message, releasing the previous one.
    pub fn set_error(&mut self, message: Option<String>) {
        self.last_error = message;
    }

    fn record<T>(&mut self, result: FsResult<T>) -> FsResult<T> {
        match &result {
            Ok(_) => self.set_error(None),
            Err(err) => self.set_error(Some(err.to_string())),
        }
        result
    }

    fn join(&self, dir: &Path, name: &str) -> FsResult<PathBuf> {
        join_path(dir, name, self.config.max_path_len)
    }

    /// Creates `file_name` in `dir` with `size` bytes provisioned, blocking
    /// until the file and its directory entry are durable.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidName`] if `file_name` is not a plain name
    /// - [`FsError::PathTooLong`] if the joined path is too long
    /// - [`FsError::Open`] if the file exists (it is left untouched)
    /// - [`FsError::SpaceProvision`] if the range cannot be reserved
    /// - [`FsError::DurabilitySync`] if the file or directory sync fails
    ///
    /// After open, any failure closes and deletes the new file first.
    pub fn create_file_blocking(
        &mut self,
        dir: &Path,
        file_name: &str,
        size: u64,
    ) -> FsResult<FileHandle> {
        let result = self
            .join(dir, file_name)
            .and_then(|path| provision(self.os.as_ref(), dir, &path, size));
        self.record(result)
    }

    /// Deletes `file_name` from `dir`, then syncs the directory.
    ///
    /// A successful deletion is reported as success even if the directory
    /// sync fails; the sync error is retained as the last error message.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Delete`] if the unlink fails, or a path error.
    pub fn remove_file(&mut self, dir: &Path, file_name: &str) -> FsResult<()> {
        let path = match self.join(dir, file_name) {
            Ok(path) => path,
            Err(err) => return self.record(Err(err)),
        };
        if let Err(err) = self.os.unlink(&path) {
            return self.record(Err(FsError::Delete(err)));
        }

        match sync_directory(self.os.as_ref(), dir) {
            Ok(()) => self.set_error(None),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "directory sync failed after unlink; removal stands"
                );
                self.set_error(Some(err.to_string()));
            }
        }
        debug!(path = %path.display(), "removed segment file");
        Ok(())
    }

    /// Truncates `old_name` to `size` bytes and renames it to `new_name`.
    ///
    /// With `size == 0` the file is deleted instead and nothing is renamed.
    /// Every successful path ends by syncing `dir`.
    ///
    /// # Errors
    ///
    /// Any failing step is reported ([`FsError::Open`], [`FsError::Truncate`],
    /// [`FsError::DurabilitySync`], [`FsError::Rename`], [`FsError::Delete`]);
    /// open handles are released and the rename is not completed.
    pub fn truncate_and_rename_file(
        &mut self,
        dir: &Path,
        size: u64,
        old_name: &str,
        new_name: &str,
    ) -> FsResult<()> {
        let result = self.join(dir, old_name).and_then(|old_path| {
            let new_path = self.join(dir, new_name)?;
            truncate_and_rename(self.os.as_ref(), dir, size, &old_path, &new_path)
        });
        self.record(result)
    }

    /// Submits an asynchronous creation.
    ///
    /// The request runs the same protocol as
    /// [`DurableFs::create_file_blocking`] on a worker thread. Its outcome is
    /// processed by the next control-thread turn ([`DurableFs::poll`],
    /// [`DurableFs::run_once`], [`DurableFs::run_until_idle`]).
    ///
    /// # Errors
    ///
    /// Returns [`FsError::QueueSubmission`] if the queue refuses the job, or
    /// a path error. The error is also retained, and the request never runs.
    pub fn submit_create(&mut self, mut request: CreateRequest) -> FsResult<CreateHandle> {
        let path = match self.join(request.dir(), request.file_name()) {
            Ok(path) => path,
            Err(err) => return self.record(Err(err)),
        };

        self.next_request += 1;
        let id = RequestId::new(self.next_request);
        let shared = request.arm(id, path.clone());
        let handle = CreateHandle::new(Arc::clone(&shared));

        let job = create_job(
            Arc::clone(&self.os),
            Arc::clone(&shared),
            request.dir().to_path_buf(),
            path,
            request.size(),
            Completion::new(id, self.completions_tx.clone()),
        );

        self.in_flight.insert(id, request);
        shared.advance(RequestState::Queued);
        if let Err(err) = self.queue.queue(job) {
            // The rejected job was dropped; its stray outcome is ignored.
            self.in_flight.remove(&id);
            shared.advance(RequestState::Created);
            return self.record(Err(FsError::from(err)));
        }

        debug!(%id, "create request queued");
        Ok(handle)
    }

    /// Requests cancellation of an in-flight creation.
    ///
    /// Returns false if no such request is in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.in_flight.get(&id).and_then(CreateRequest::shared) {
            Some(shared) => {
                shared.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of submitted requests not yet finalized.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Finalizes every completion that has already arrived, without blocking.
    pub fn poll(&mut self) -> Vec<CreateRequest> {
        let mut finalized = Vec::new();
        while let Ok(outcome) = self.completions_rx.try_recv() {
            finalized.extend(self.finalize(outcome));
        }
        finalized
    }

    /// Blocks until one request is finalized.
    ///
    /// Returns `None` immediately if nothing is in flight.
    pub fn run_once(&mut self) -> Option<CreateRequest> {
        while !self.in_flight.is_empty() {
            // The store holds a sender, so the channel never disconnects.
            let outcome = self.completions_rx.recv().ok()?;
            if let Some(request) = self.finalize(outcome) {
                return Some(request);
            }
        }
        None
    }

    /// Blocks until no request is in flight, finalizing each as it completes.
    pub fn run_until_idle(&mut self) -> Vec<CreateRequest> {
        let mut finalized = Vec::new();
        while let Some(request) = self.run_once() {
            finalized.push(request);
        }
        finalized
    }

    /// Completion phase, on the control thread.
    fn finalize(&mut self, outcome: WorkerOutcome) -> Option<CreateRequest> {
        let Some(mut request) = self.in_flight.remove(&outcome.id) else {
            debug!(id = %outcome.id, "dropping outcome of a request no longer in flight");
            return None;
        };
        let shared = request.shared().map(Arc::clone);
        let canceled = shared.as_ref().is_some_and(|shared| shared.is_canceled());

        let result = if canceled {
            match outcome.result {
                Ok(file) => {
                    let path = file.path().to_path_buf();
                    self.os.close(file);
                    if let Err(err) = self.os.unlink(&path) {
                        warn!(path = %path.display(), error = %err, "failed to undo canceled create");
                    }
                }
                Err(err) => drop(err),
            }
            Err(FsError::Canceled)
        } else {
            outcome.result
        };

        let (file, status, message) = match result {
            Ok(file) => (Some(file), Ok(()), None),
            Err(err) => (None, Err(err.kind()), Some(err.to_string())),
        };
        self.set_error(message);
        request.settle(file, status);

        if let Some(shared) = &shared {
            shared.advance(RequestState::Completed);
        }
        if let Some(callback) = request.take_callback() {
            callback(&mut request, status);
        }
        if let Some(shared) = &shared {
            shared.advance(RequestState::Finalized);
        }

        debug!(id = %outcome.id, ?status, "create request finalized");
        Some(request)
    }
}

impl std::fmt::Debug for DurableFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableFs")
            .field("config", &self.config)
            .field("last_error", &self.last_error)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

fn create_job(
    os: Arc<dyn OsPrimitives>,
    shared: Arc<RequestShared>,
    dir: PathBuf,
    path: PathBuf,
    size: u64,
    completion: Completion,
) -> crate::work::Job {
    Box::new(move || {
        shared.advance(RequestState::Running);
        let result = provision(os.as_ref(), &dir, &path, size);
        shared.advance(RequestState::Completed);
        completion.deliver(result);
    })
}

/// Creates, provisions and persists one segment file.
///
/// Shared by the blocking path and the worker phase.
pub(crate) fn provision(
    os: &dyn OsPrimitives,
    dir: &Path,
    path: &Path,
    size: u64,
) -> FsResult<FileHandle> {
    let file = os.open_exclusive(path).map_err(FsError::open)?;
    match persist(os, dir, &file, size) {
        Ok(()) => {
            debug!(path = %path.display(), size, "created segment file");
            Ok(file)
        }
        Err(err) => {
            os.close(file);
            if let Err(unlink_err) = os.unlink(path) {
                warn!(
                    path = %path.display(),
                    error = %unlink_err,
                    "failed to remove partially created segment"
                );
            }
            Err(err)
        }
    }
}

fn persist(os: &dyn OsPrimitives, dir: &Path, file: &FileHandle, size: u64) -> FsResult<()> {
    // An empty segment has no range to reserve.
    if size > 0 {
        os.allocate(file, size).map_err(FsError::SpaceProvision)?;
    }
    os.sync_file(file).map_err(|err| FsError::sync("fsync", err))?;
    sync_directory(os, dir)
}

fn truncate_and_rename(
    os: &dyn OsPrimitives,
    dir: &Path,
    size: u64,
    old_path: &Path,
    new_path: &Path,
) -> FsResult<()> {
    if size == 0 {
        os.unlink(old_path).map_err(FsError::Delete)?;
    } else {
        let file = os.open_read_write(old_path).map_err(FsError::open)?;
        let shrunk = os
            .truncate(&file, size)
            .map_err(FsError::Truncate)
            .and_then(|()| os.sync_file(&file).map_err(|err| FsError::sync("fsync", err)));
        os.close(file);
        shrunk?;
        os.rename(old_path, new_path).map_err(FsError::Rename)?;
    }
    sync_directory(os, dir)?;

    debug!(
        from = %old_path.display(),
        to = %new_path.display(),
        size,
        "truncated segment file"
    );
    Ok(())
}

/// Forces `dir`'s entries to stable storage.
pub(crate) fn sync_directory(os: &dyn OsPrimitives, dir: &Path) -> FsResult<()> {
    let handle = os
        .open_dir(dir)
        .map_err(|err| FsError::sync("open directory", err))?;
    let synced = os
        .sync_dir(&handle)
        .map_err(|err| FsError::sync("fsync directory", err));
    os.close(handle);
    synced
}
