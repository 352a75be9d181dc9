//! The work-queueing contract and a thread pool implementing it.
//!
//! A [`WorkQueue`] runs blocking jobs off the control thread. Submission can
//! fail synchronously; once a job is accepted it is run exactly once, or
//! dropped if the queue shuts down first. The file store turns both into a
//! completion, so acceptance always implies completion.

use crate::config::FsConfig;
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error};

/// A unit of blocking work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors reported when submitting work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue no longer accepts work.
    #[error("work queue is shut down")]
    ShutDown,

    /// The queue refused the job.
    #[error("work rejected: {0}")]
    Rejected(String),
}

/// Background execution facility for blocking jobs.
pub trait WorkQueue: Send + Sync {
    /// Submits a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job was not accepted. A rejected job is
    /// dropped without running.
    fn queue(&self, job: Job) -> Result<(), QueueError>;
}

/// A fixed-size pool of worker threads pulling from one multi-consumer job
/// channel.
///
/// Jobs run in submission order as workers become free. A panicking job is
/// caught and logged; the worker keeps serving.
pub struct ThreadPool {
    sender: Mutex<Option<flume::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl ThreadPool {
    /// Starts `threads` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if `threads` is zero or a thread cannot be spawned.
    pub fn new(threads: usize) -> io::Result<Self> {
        if threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread pool needs at least one worker",
            ));
        }

        let (sender, receiver) = flume::unbounded::<Job>();
        let pool = Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(threads)),
            threads,
        };

        for index in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("raftfs-worker-{index}"))
                .spawn(move || worker_loop(&receiver))?;
            pool.workers.lock().push(handle);
        }

        debug!(threads, "thread pool started");
        Ok(pool)
    }

    /// Starts a pool sized by `config.worker_threads`.
    ///
    /// # Errors
    ///
    /// See [`ThreadPool::new`].
    pub fn from_config(config: &FsConfig) -> io::Result<Self> {
        Self::new(config.worker_threads)
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Stops accepting work, lets the workers drain the queue and joins them.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        // Dropping the sender ends every worker once the channel is empty.
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
        debug!("thread pool stopped");
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads)
            .field("accepting", &self.sender.lock().is_some())
            .finish()
    }
}

impl WorkQueue for ThreadPool {
    fn queue(&self, job: Job) -> Result<(), QueueError> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(QueueError::ShutDown);
        };
        sender.send(job).map_err(|_| QueueError::ShutDown)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &flume::Receiver<Job>) {
    // Ends once every sender is gone and the queue is drained.
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("worker job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn zero_threads_rejected() {
        assert!(ThreadPool::new(0).is_err());
    }

    #[test]
    fn runs_every_job_once() {
        let pool = ThreadPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.queue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn jobs_run_off_the_caller_thread() {
        let pool = ThreadPool::new(1).unwrap();
        let (tx, rx) = flume::unbounded();
        pool.queue(Box::new(move || {
            let name = thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("raftfs-worker-0"));
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let pool = ThreadPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        let err = pool.queue(Box::new(|| {})).unwrap_err();
        assert_eq!(err, QueueError::ShutDown);
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = ThreadPool::new(1).unwrap();
        pool.queue(Box::new(|| panic!("job failure"))).unwrap();

        let (tx, rx) = flume::unbounded();
        pool.queue(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn workers_run_jobs_concurrently() {
        // Both jobs block on the barrier, so they only finish if two
        // workers take jobs at the same time.
        let pool = ThreadPool::new(2).unwrap();
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = flume::unbounded();

        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            pool.queue(Box::new(move || {
                barrier.wait();
                tx.send(()).unwrap();
            }))
            .unwrap();
        }

        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.queue(Box::new(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn from_config_uses_worker_threads() {
        let pool = ThreadPool::from_config(&FsConfig::new().worker_threads(2)).unwrap();
        assert_eq!(pool.threads(), 2);
    }
}
