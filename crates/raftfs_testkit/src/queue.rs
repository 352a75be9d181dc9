//! Work queues the test controls.

use parking_lot::Mutex;
use raftfs_storage::{Job, QueueError, WorkQueue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

/// Holds accepted jobs until the test runs them.
///
/// Jobs run on a freshly spawned thread, so worker-side code never executes
/// on the test's (control) thread. This lets a test act between the worker
/// phase and the completion phase, e.g. to cancel a request whose file was
/// already created.
#[derive(Default)]
pub struct ManualQueue {
    jobs: Mutex<VecDeque<Job>>,
    rejecting: AtomicBool,
    accepted: AtomicUsize,
}

impl ManualQueue {
    /// Creates an empty, accepting queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later submissions fail with [`QueueError::Rejected`].
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Number of jobs accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Runs the oldest waiting job to completion on a worker thread.
    ///
    /// Returns false if nothing was waiting.
    pub fn run_next(&self) -> bool {
        let Some(job) = self.jobs.lock().pop_front() else {
            return false;
        };
        // A panicking job surfaces as an abandoned request, not here.
        let _ = thread::spawn(job).join();
        true
    }

    /// Runs every waiting job, oldest first. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Drops every waiting job without running it.
    pub fn discard_all(&self) -> usize {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        jobs.len()
    }
}

impl std::fmt::Debug for ManualQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualQueue")
            .field("pending", &self.pending())
            .field("accepted", &self.accepted())
            .field("rejecting", &self.rejecting.load(Ordering::SeqCst))
            .finish()
    }
}

impl WorkQueue for ManualQueue {
    fn queue(&self, job: Job) -> Result<(), QueueError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected("manual queue is rejecting".into()));
        }
        self.jobs.lock().push_back(job);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn holds_jobs_until_run() {
        let queue = ManualQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            queue
                .queue(Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        assert_eq!(queue.pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(queue.run_next());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.run_all(), 2);
        assert!(!queue.run_next());
        assert_eq!(queue.accepted(), 3);
    }

    #[test]
    fn jobs_run_on_another_thread() {
        let queue = ManualQueue::new();
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        queue
            .queue(Box::new(move || *slot.lock() = Some(thread::current().id())))
            .unwrap();

        queue.run_all();
        assert_ne!(*ran_on.lock(), Some(caller));
        assert!(ran_on.lock().is_some());
    }

    #[test]
    fn rejecting_queue_drops_job() {
        let queue = ManualQueue::new();
        queue.set_rejecting(true);
        let err = queue.queue(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, QueueError::Rejected(_)));
        assert_eq!(queue.pending(), 0);

        queue.set_rejecting(false);
        queue.queue(Box::new(|| {})).unwrap();
        assert_eq!(queue.discard_all(), 1);
    }
}
