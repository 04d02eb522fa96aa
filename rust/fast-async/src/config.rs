//! Worker pool configuration.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Settings used to construct a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of tasks running at the same time. Must be at least 1.
    pub concurrency_limit: usize,
    /// Prefix for the names of the dispatcher and task threads.
    pub thread_name_prefix: String,
}

impl PoolConfig {
    pub fn with_concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Configuration of the global pool: the limit set through
    /// [`configure_global_concurrency_limit`], or the default.
    pub(crate) fn global() -> Self {
        let limit = GLOBAL_CONCURRENCY_LIMIT.load(Ordering::SeqCst);
        let config = PoolConfig::default();
        if limit == 0 {
            config
        } else {
            config.with_concurrency_limit(limit)
        }
    }

    pub(crate) fn dispatcher_thread_name(&self) -> String {
        format!("{}-dispatcher", self.thread_name_prefix)
    }

    pub(crate) fn task_thread_name(&self, id: crate::TaskId) -> String {
        format!("{}-task-{}", self.thread_name_prefix, id)
    }
}

impl Default for PoolConfig {
    /// One slot per available CPU, or 8 when parallelism cannot be determined.
    fn default() -> Self {
        PoolConfig {
            concurrency_limit: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8),
            thread_name_prefix: "fast-async".to_string(),
        }
    }
}

/// Sets the initial concurrency limit of the global pool.
///
/// Only calls made before the global pool is first used take effect; afterwards use
/// [`set_concurrency_limit`](crate::set_concurrency_limit). Values less than 1 are
/// clamped to 1.
pub fn configure_global_concurrency_limit(limit: usize) {
    GLOBAL_CONCURRENCY_LIMIT.store(limit.max(1), Ordering::SeqCst);
}

/// Zero means "not configured".
static GLOBAL_CONCURRENCY_LIMIT: AtomicUsize = AtomicUsize::new(0);
