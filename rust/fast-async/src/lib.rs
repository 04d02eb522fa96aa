//! Bounded-concurrency task execution.
//!
//! This crate runs user-supplied units of work concurrently under a configurable limit
//! and lets callers observe their completion either by blocking or through callbacks.
//!
//! # Key Components
//!
//! - [`Task`] / [`TaskHandle`] - a unit of work with its captured execution state, and
//!   the cloneable handle used to wait on it or subscribe to its completion
//! - [`WorkerPool`] - admits tasks in submission order and keeps at most
//!   `concurrency_limit` of them running at the same time
//! - [`await_all`] / [`await_first`] - combinators that wait on a group of tasks and
//!   aggregate their outcomes
//!
//! # Failure Reporting
//!
//! A failing task never affects the pool or other tasks. Its failure is captured as a
//! [`fast_async_common::ErrorKind::TaskFailed`] carrying the original cause and the
//! name of the work, and is reported only when the task is observed. Failures of tasks
//! that are never observed are dropped.
//!
//! # Global Pool
//!
//! [`submit_async`] and [`set_concurrency_limit`] operate on a lazily created
//! process-wide pool (see [`WorkerPool::global`]). Libraries should prefer creating
//! and passing their own [`WorkerPool`].

pub mod bootstrap;
pub mod combinators;
mod completion;
pub mod config;
pub mod pool;
pub mod task;

pub use combinators::{await_all, await_first};
pub use config::{PoolConfig, configure_global_concurrency_limit};
pub use pool::WorkerPool;
pub use task::{
    DispatchMode, ErrorCallback, SuccessCallback, Task, TaskHandle, TaskId, TaskStatus,
    WorkPanicked,
};

pub use fast_async_common::{Error, ErrorKind, Result, StdErrorBoxed};

/// Wraps `work` as a task and submits it to the global pool.
pub fn submit_async<F, T, E>(work: F) -> Result<TaskHandle<T>>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<StdErrorBoxed>,
{
    WorkerPool::global()?.spawn(work)
}

/// Wraps `work` as a named task and submits it to the global pool.
pub fn submit_async_named<F, T, E>(work_name: impl Into<String>, work: F) -> Result<TaskHandle<T>>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<StdErrorBoxed>,
{
    WorkerPool::global()?.spawn_named(work_name, work)
}

/// Changes the concurrency limit of the global pool.
pub fn set_concurrency_limit(concurrency_limit: usize) -> Result<()> {
    WorkerPool::global()?.set_concurrency_limit(concurrency_limit)
}
