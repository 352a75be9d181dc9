//! File store configuration.

/// Default upper bound on joined path length, in bytes.
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Default number of worker threads for [`crate::ThreadPool::from_config`].
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default permission bits for newly created segment files.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Configuration for a [`crate::DurableFs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsConfig {
    /// Maximum length of a joined `dir/name` path in bytes.
    pub max_path_len: usize,

    /// Worker threads for the bundled thread pool.
    pub worker_threads: usize,

    /// Permission bits for created segment files (unix only).
    pub file_mode: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_path_len: DEFAULT_MAX_PATH_LEN,
            worker_threads: DEFAULT_WORKER_THREADS,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl FsConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum joined path length.
    #[must_use]
    pub const fn max_path_len(mut self, bytes: usize) -> Self {
        self.max_path_len = bytes;
        self
    }

    /// Sets the worker thread count.
    #[must_use]
    pub const fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Sets the permission bits for created files.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FsConfig::default();
        assert_eq!(config.max_path_len, 4096);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.file_mode, 0o600);
    }

    #[test]
    fn builder_pattern() {
        let config = FsConfig::new()
            .max_path_len(256)
            .worker_threads(1)
            .file_mode(0o644);

        assert_eq!(config.max_path_len, 256);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.file_mode, 0o644);
    }
}
