//! Asynchronous segment creation requests.
//!
//! A [`CreateRequest`] moves through
//! `Created -> Queued -> Running -> Completed -> Finalized`. The worker
//! thread owns `Running` and `Completed`; the control thread (whoever drives
//! the [`crate::DurableFs`]) owns submission and `Finalized`. The worker's
//! result travels back as a move-only [`WorkerOutcome`], so the error it
//! carries is consumed exactly once.

use crate::error::{FsError, FsErrorKind, FsResult};
use crate::os::FileHandle;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use flume::Sender;
use std::sync::Arc;

/// Identifies one submission of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "create#{}", self.0)
    }
}

/// Lifecycle position of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestState {
    /// Built, not submitted.
    Created = 0,
    /// Accepted by the work queue.
    Queued = 1,
    /// A worker is executing the provision protocol.
    Running = 2,
    /// The worker finished; the outcome awaits the control thread.
    Completed = 3,
    /// Cancellation reconciled, error transferred, callback returned.
    Finalized = 4,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Completed,
            _ => Self::Finalized,
        }
    }
}

/// State shared between the control thread, the worker and handles.
#[derive(Debug)]
pub(crate) struct RequestShared {
    id: RequestId,
    cancel: AtomicBool,
    state: AtomicU8,
}

impl RequestShared {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            cancel: AtomicBool::new(false),
            state: AtomicU8::new(RequestState::Created as u8),
        }
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn advance(&self, state: RequestState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// A cloneable, thread-safe view of a submitted request.
///
/// Cancellation is cooperative: it never interrupts a running worker. It is
/// reconciled when the control thread finalizes the request, and always
/// wins over whatever the worker produced.
#[derive(Debug, Clone)]
pub struct CreateHandle {
    shared: Arc<RequestShared>,
}

impl CreateHandle {
    pub(crate) fn new(shared: Arc<RequestShared>) -> Self {
        Self { shared }
    }

    /// Returns the submission's identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.shared.id()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.is_canceled()
    }

    /// Returns the request's current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.shared.state()
    }
}

/// Invoked on the control thread with the finalized request and its status.
pub type CreateCallback = Box<dyn FnOnce(&mut CreateRequest, Result<(), FsErrorKind>)>;

/// A request to create and provision one segment file off the control thread.
pub struct CreateRequest {
    dir: PathBuf,
    file_name: String,
    size: u64,
    callback: Option<CreateCallback>,
    shared: Option<Arc<RequestShared>>,
    path: Option<PathBuf>,
    file: Option<FileHandle>,
    status: Option<Result<(), FsErrorKind>>,
}

impl CreateRequest {
    /// Describes a segment `file_name` of `size` bytes inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            size,
            callback: None,
            shared: None,
            path: None,
            file: None,
            status: None,
        }
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&mut CreateRequest, Result<(), FsErrorKind>) + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Replaces the completion callback, e.g. before resubmitting.
    pub fn set_callback(&mut self, callback: Option<CreateCallback>) {
        self.callback = callback;
    }

    /// Returns the target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the segment file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the requested size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the joined path once the request has been submitted.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the identifier of the latest submission.
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        self.shared.as_ref().map(|shared| shared.id())
    }

    /// Returns the request's current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.shared
            .as_ref()
            .map_or(RequestState::Created, |shared| shared.state())
    }

    /// Returns the final status, once finalized.
    #[must_use]
    pub fn status(&self) -> Option<Result<(), FsErrorKind>> {
        self.status
    }

    /// Returns the created file, if the request succeeded.
    #[must_use]
    pub fn file(&self) -> Option<&FileHandle> {
        self.file.as_ref()
    }

    /// Takes ownership of the created file.
    pub fn take_file(&mut self) -> Option<FileHandle> {
        self.file.take()
    }

    /// Prepares a submission: fresh shared state, cleared results.
    pub(crate) fn arm(&mut self, id: RequestId, path: PathBuf) -> Arc<RequestShared> {
        let shared = Arc::new(RequestShared::new(id));
        self.shared = Some(Arc::clone(&shared));
        self.path = Some(path);
        self.file = None;
        self.status = None;
        shared
    }

    pub(crate) fn shared(&self) -> Option<&Arc<RequestShared>> {
        self.shared.as_ref()
    }

    pub(crate) fn take_callback(&mut self) -> Option<CreateCallback> {
        self.callback.take()
    }

    pub(crate) fn settle(&mut self, file: Option<FileHandle>, status: Result<(), FsErrorKind>) {
        self.file = file;
        self.status = Some(status);
    }
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("dir", &self.dir)
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("id", &self.id())
            .field("state", &self.state())
            .field("status", &self.status)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// What a worker produced for one request.
#[derive(Debug)]
pub(crate) struct WorkerOutcome {
    pub(crate) id: RequestId,
    pub(crate) result: FsResult<FileHandle>,
}

/// Delivers exactly one outcome for an accepted job.
///
/// If the job is dropped unrun, or unwinds, the guard reports
/// [`FsError::Abandoned`] instead.
pub(crate) struct Completion {
    id: RequestId,
    sender: Option<Sender<WorkerOutcome>>,
}

impl Completion {
    pub(crate) fn new(id: RequestId, sender: Sender<WorkerOutcome>) -> Self {
        Self {
            id,
            sender: Some(sender),
        }
    }

    pub(crate) fn deliver(mut self, result: FsResult<FileHandle>) {
        if let Some(sender) = self.sender.take() {
            // The store keeps its receiver alive; a send only fails while it
            // is being dropped, and then nobody is left to report to.
            let _ = sender.send(WorkerOutcome {
                id: self.id,
                result,
            });
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(WorkerOutcome {
                id: self.id,
                result: Err(FsError::Abandoned),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_is_created() {
        let request = CreateRequest::new("/var/raft", "segment-1", 4096);
        assert_eq!(request.state(), RequestState::Created);
        assert_eq!(request.dir(), Path::new("/var/raft"));
        assert_eq!(request.file_name(), "segment-1");
        assert_eq!(request.size(), 4096);
        assert!(request.id().is_none());
        assert!(request.status().is_none());
        assert!(request.path().is_none());
    }

    #[test]
    fn arm_resets_results_and_cancellation() {
        let mut request = CreateRequest::new("/d", "s", 1);
        let first = request.arm(RequestId::new(1), PathBuf::from("/d/s"));
        first.cancel();
        request.settle(None, Err(FsErrorKind::Canceled));

        let second = request.arm(RequestId::new(2), PathBuf::from("/d/s"));
        assert!(!second.is_canceled());
        assert!(request.status().is_none());
        assert_eq!(request.id(), Some(RequestId::new(2)));
    }

    #[test]
    fn handle_reflects_shared_state() {
        let shared = Arc::new(RequestShared::new(RequestId::new(7)));
        let handle = CreateHandle::new(Arc::clone(&shared));
        assert_eq!(handle.id().as_u64(), 7);
        assert_eq!(handle.state(), RequestState::Created);

        shared.advance(RequestState::Running);
        assert_eq!(handle.state(), RequestState::Running);

        handle.clone().cancel();
        assert!(shared.is_canceled());
        assert!(handle.is_cancel_requested());
    }

    #[test]
    fn completion_delivers_once() {
        let (tx, rx) = flume::unbounded();
        Completion::new(RequestId::new(3), tx).deliver(Err(FsError::Canceled));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.id, RequestId::new(3));
        assert!(matches!(outcome.result, Err(FsError::Canceled)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_completion_reports_abandoned() {
        let (tx, rx) = flume::unbounded();
        drop(Completion::new(RequestId::new(4), tx));

        let outcome = rx.try_recv().unwrap();
        assert!(matches!(outcome.result, Err(FsError::Abandoned)));
    }

    #[test]
    fn state_ordering_follows_lifecycle() {
        assert!(RequestState::Created < RequestState::Queued);
        assert!(RequestState::Running < RequestState::Completed);
        assert!(RequestState::Completed < RequestState::Finalized);
    }
}
