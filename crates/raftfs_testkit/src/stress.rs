//! Stress tests for asynchronous segment creation.
//!
//! Many creations are submitted through a real thread pool while the control
//! thread cancels a random subset at random points. Afterwards every
//! request's final status is checked against the directory.

use crate::fixtures::file_len;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use raftfs_storage::{CreateHandle, CreateRequest, DurableFs, FsConfig, FsErrorKind, ThreadPool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total requests finalized.
    pub total_ops: usize,
    /// Requests that created their segment.
    pub successful_ops: usize,
    /// Requests finalized as canceled.
    pub canceled_ops: usize,
    /// Requests that failed for any other reason.
    pub failed_ops: usize,
    /// Disagreements between a final status and the directory.
    pub violations: Vec<String>,
    /// Total duration.
    pub duration: Duration,
    /// Requests per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    fn new(
        successful: usize,
        canceled: usize,
        failed: usize,
        violations: Vec<String>,
        duration: Duration,
    ) -> Self {
        let total = successful + canceled + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            canceled_ops: canceled,
            failed_ops: failed,
            violations,
            duration,
            ops_per_second,
        }
    }

    /// Whether every final status matched the directory.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total requests: {}", self.total_ops);
        println!("Created: {}", self.successful_ops);
        println!("Canceled: {}", self.canceled_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Violations: {}", self.violations.len());
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} req/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of creations to submit.
    pub requests: usize,
    /// Worker threads in the pool.
    pub threads: usize,
    /// Size of each segment in bytes.
    pub segment_size: u64,
    /// Probability that a request is canceled.
    pub cancel_ratio: f64,
    /// Seed for the cancellation schedule.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            requests: 200,
            threads: 4,
            segment_size: 4096,
            cancel_ratio: 0.3,
            seed: 0x5eed,
        }
    }
}

/// Submits `config.requests` creations into `dir`, cancelling at random.
///
/// A request may be canceled right after submission, or later while other
/// requests are being submitted, so cancellation lands before, during and
/// after the worker phase.
///
/// # Panics
///
/// Panics if the thread pool cannot be started.
pub fn stress_async_creates(dir: &Path, config: &StressConfig) -> StressTestResult {
    let pool = ThreadPool::new(config.threads).expect("Failed to start thread pool");
    let mut fs = DurableFs::with_config(Arc::new(pool), FsConfig::new().worker_threads(config.threads));
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut handles: Vec<CreateHandle> = Vec::with_capacity(config.requests);
    let mut finalized = Vec::with_capacity(config.requests);
    let mut submit_failures = 0usize;

    let start = Instant::now();
    for i in 0..config.requests {
        let request = CreateRequest::new(dir, format!("stress-{i}"), config.segment_size);
        match fs.submit_create(request) {
            Ok(handle) => {
                if rng.gen_bool(config.cancel_ratio / 2.0) {
                    handle.cancel();
                }
                handles.push(handle);
            }
            Err(_) => submit_failures += 1,
        }

        if !handles.is_empty() && rng.gen_bool(config.cancel_ratio / 2.0) {
            let victim = rng.gen_range(0..handles.len());
            fs.cancel(handles[victim].id());
        }
        if rng.gen_bool(0.25) {
            finalized.extend(fs.poll());
        }
    }
    finalized.extend(fs.run_until_idle());
    let duration = start.elapsed();

    let mut violations = Vec::new();
    let (mut successful, mut canceled, mut failed) = (0, 0, submit_failures);
    let names: HashMap<_, _> = finalized
        .iter()
        .map(|request| (request.file_name().to_owned(), request.status()))
        .collect();
    if names.len() != handles.len() {
        violations.push(format!(
            "{} requests accepted but {} finalized",
            handles.len(),
            names.len()
        ));
    }

    for (name, status) in names {
        let path = dir.join(&name);
        match status {
            Some(Ok(())) => {
                successful += 1;
                if !path.exists() {
                    violations.push(format!("{name}: created but missing"));
                } else if file_len(&path) != config.segment_size {
                    violations.push(format!("{name}: wrong size {}", file_len(&path)));
                }
            }
            Some(Err(FsErrorKind::Canceled)) => {
                canceled += 1;
                if path.exists() {
                    violations.push(format!("{name}: canceled but present"));
                }
            }
            Some(Err(kind)) => {
                failed += 1;
                if path.exists() {
                    violations.push(format!("{name}: failed with {kind} but present"));
                }
            }
            None => violations.push(format!("{name}: finalized without status")),
        }
    }

    StressTestResult::new(successful, canceled, failed, violations, duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDir;

    #[test]
    fn stress_small_run_is_consistent() {
        let dir = TestDir::new();
        let config = StressConfig {
            requests: 40,
            threads: 2,
            segment_size: 1024,
            ..StressConfig::default()
        };

        let result = stress_async_creates(dir.path(), &config);
        assert!(result.is_consistent(), "{:?}", result.violations);
        assert_eq!(result.total_ops, 40);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(dir.file_names().len(), result.successful_ops);
    }

    #[test]
    fn no_cancellation_creates_everything() {
        let dir = TestDir::new();
        let config = StressConfig {
            requests: 20,
            cancel_ratio: 0.0,
            ..StressConfig::default()
        };

        let result = stress_async_creates(dir.path(), &config);
        assert!(result.is_consistent(), "{:?}", result.violations);
        assert_eq!(result.successful_ops, 20);
    }
}
