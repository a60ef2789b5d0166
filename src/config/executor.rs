//! Executor and worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the concurrency-bounded executor.
///
/// `worker_count` and `max_in_flight` are independent knobs: the pool size
/// fixes how many units of work run in parallel, while the admission gate
/// bounds how many submissions may be waiting on results at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of dedicated worker threads.
    pub worker_count: usize,
    /// Admission gate capacity.
    pub max_in_flight: usize,
    /// Bound of the pool's task queue; full queues reject submissions.
    pub max_queue_depth: usize,
    /// Timeout applied when a request carries none.
    pub default_timeout_secs: u64,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            worker_count: workers,
            max_in_flight: workers,
            max_queue_depth: 1024,
            default_timeout_secs: 300,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl ExecutorConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the admission gate capacity.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the task queue bound.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the default timeout.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Default timeout as a `Duration`.
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Validate executor configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.default_timeout_secs == 0 {
            return Err("default_timeout_secs must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}
