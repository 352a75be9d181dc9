//! Test fixtures and store helpers.

use crate::crash::CrashModel;
use crate::faults::FaultyOs;
use crate::queue::ManualQueue;
use raftfs_storage::{DurableFs, FsConfig, ThreadPool};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// A scratch directory removed on drop.
pub struct TestDir {
    temp_dir: TempDir,
}

impl TestDir {
    /// Creates a new scratch directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the path of `name` inside the directory.
    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Whether `name` exists in the directory.
    pub fn contains(&self, name: &str) -> bool {
        self.join(name).exists()
    }

    /// Writes `contents` to `name`, replacing it.
    pub fn write(&self, name: &str, contents: &[u8]) {
        fs::write(self.join(name), contents).expect("Failed to write fixture file");
    }

    /// Names of the regular files in the directory, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .expect("Failed to list temp directory")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A store wired to fault-injecting primitives, a crash model and a
/// manually driven queue.
pub struct FaultyStore {
    /// The store under test.
    pub fs: DurableFs,
    /// The primitives the store uses.
    pub os: Arc<FaultyOs>,
    /// The power-loss model fed by `os`.
    pub model: Arc<CrashModel>,
    /// The queue asynchronous creations go to.
    pub queue: Arc<ManualQueue>,
    /// Scratch directory for segments.
    pub dir: TestDir,
}

impl FaultyStore {
    /// Builds a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(FsConfig::default())
    }

    /// Builds a store with `config`.
    pub fn with_config(config: FsConfig) -> Self {
        let dir = TestDir::new();
        let model = Arc::new(CrashModel::new());
        model
            .adopt_existing(dir.path())
            .expect("Failed to scan temp directory");
        let os = Arc::new(FaultyOs::new().with_model(Arc::clone(&model)));
        let queue = Arc::new(ManualQueue::new());
        let fs = DurableFs::with_os(queue.clone(), os.clone(), config);
        Self {
            fs,
            os,
            model,
            queue,
            dir,
        }
    }

    /// Files that would survive a crash now.
    pub fn surviving_files(&self) -> std::collections::BTreeMap<String, Option<u64>> {
        self.model.surviving_files(self.dir.path())
    }
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a store on the real OS backed by a thread pool of `threads`.
pub fn pooled_store(threads: usize) -> DurableFs {
    let pool = ThreadPool::new(threads).expect("Failed to start thread pool");
    DurableFs::with_config(Arc::new(pool), FsConfig::new().worker_threads(threads))
}

/// Name of the `index`-th open segment.
pub fn segment_name(index: u64) -> String {
    format!("segment-{index}")
}

/// Name of a closed segment holding entries `first..=last`.
pub fn closed_segment_name(first: u64, last: u64) -> String {
    format!("{first:016}-{last:016}")
}

/// Length of the file at `path`.
pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).expect("Failed to stat file").len()
}

/// Installs a `tracing` subscriber for tests, once per process.
///
/// Filtered by `RUST_LOG`, defaulting to `warn`. Output goes through the
/// test harness's capture.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
