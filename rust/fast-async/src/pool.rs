//! Bounded-concurrency worker pool.
//!
//! A [`WorkerPool`] admits submitted tasks in FIFO order and keeps at most
//! `concurrency_limit` of them running at once. Submission only appends to the
//! admission queue; a dedicated dispatcher thread is the sole admission authority. It
//! sleeps on a condition variable until a task is queued and a slot is free, then
//! starts the task on its own thread. A finishing task releases its slot and wakes the
//! dispatcher.
//!
//! The admission queue, the active set and the limit live behind a single mutex. The
//! dispatcher is the only writer that adds to the active set; a task's own thread is
//! the only writer that removes its entry.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock},
    thread,
};

use ahash::AHashSet;
use fast_async_common::{Error, Result, StdErrorBoxed, verify_arg};

use crate::{
    bootstrap,
    config::PoolConfig,
    task::{Job, Task, TaskHandle, TaskId},
};

/// A pool that runs tasks under a bounded degree of parallelism.
///
/// ## Cloning
///
/// `WorkerPool` implements [`Clone`] and all clones share the same admission queue and
/// dispatcher. Dropping the last clone closes the pool: further submissions are
/// impossible, while tasks that were already queued still run to completion.
///
/// ## Thread Safety
///
/// All methods are thread-safe and can be called concurrently, including from tasks
/// running on the pool itself (except [`shutdown`](Self::shutdown)).
#[derive(Clone)]
pub struct WorkerPool(Arc<PoolInner>);

struct PoolInner {
    shared: Arc<PoolShared>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shared.close();
    }
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Wakes the dispatcher: a task was queued, a slot was freed, the limit changed or
    /// the pool was closed.
    dispatch: Condvar,
    /// Wakes `shutdown` once the active set drains.
    idle: Condvar,
}

struct PoolState {
    queue: VecDeque<Job>,
    active: AHashSet<TaskId>,
    limit: usize,
    closed: bool,
}

impl PoolState {
    fn can_admit(&self) -> bool {
        !self.queue.is_empty() && self.active.len() < self.limit
    }

    fn is_drained(&self) -> bool {
        self.closed && self.queue.is_empty()
    }
}

impl WorkerPool {
    /// Creates a pool and starts its dispatcher thread.
    ///
    /// Fails with `InvalidArgument` if the concurrency limit is 0, and with
    /// `UnsupportedEnvironment` if the dispatcher thread cannot be spawned.
    pub fn new(config: PoolConfig) -> Result<WorkerPool> {
        verify_arg!(concurrency_limit, config.concurrency_limit >= 1);

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: AHashSet::new(),
                limit: config.concurrency_limit,
                closed: false,
            }),
            dispatch: Condvar::new(),
            idle: Condvar::new(),
            config,
        });

        let dispatcher = thread::Builder::new()
            .name(shared.config.dispatcher_thread_name())
            .spawn({
                let shared = shared.clone();
                move || shared.dispatch_loop()
            })
            .map_err(|e| {
                Error::unsupported_environment(format!("cannot spawn dispatcher thread: {e}"))
            })?;

        log::debug!(
            "worker pool '{}' started with concurrency limit {}",
            shared.config.thread_name_prefix,
            shared.config.concurrency_limit
        );
        Ok(WorkerPool(Arc::new(PoolInner {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        })))
    }

    /// Creates a pool with the default configuration and the given limit.
    pub fn with_concurrency_limit(concurrency_limit: usize) -> Result<WorkerPool> {
        WorkerPool::new(PoolConfig::default().with_concurrency_limit(concurrency_limit))
    }

    /// Returns the process-wide pool, creating it on first use.
    ///
    /// The first call verifies that the host supports threads (see
    /// [`bootstrap::check_environment`]) and sizes the pool from
    /// [`configure_global_concurrency_limit`](crate::configure_global_concurrency_limit)
    /// or the default configuration. The global pool is never shut down.
    pub fn global() -> Result<&'static WorkerPool> {
        static POOL: OnceLock<WorkerPool> = OnceLock::new();
        if let Some(pool) = POOL.get() {
            return Ok(pool);
        }
        bootstrap::check_environment()?;
        let pool = WorkerPool::new(PoolConfig::global())?;
        Ok(POOL.get_or_init(move || pool))
    }

    /// Appends `task` to the admission queue and returns its handle. Never blocks.
    ///
    /// After [`shutdown`](Self::shutdown) the task is failed with `PoolShutDown` and
    /// the same error is returned.
    pub fn submit<T: Send + Sync + 'static>(&self, task: Task<T>) -> Result<TaskHandle<T>> {
        let handle = task.handle();
        self.0.shared.enqueue(task.into_job())?;
        Ok(handle)
    }

    /// Wraps `work` as a task and submits it.
    pub fn spawn<F, T, E>(&self, work: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<StdErrorBoxed>,
    {
        self.submit(Task::new(work))
    }

    /// Wraps `work` as a named task and submits it.
    pub fn spawn_named<F, T, E>(&self, work_name: impl Into<String>, work: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<StdErrorBoxed>,
    {
        self.submit(Task::named(work_name, work))
    }

    /// Changes the maximum number of concurrently running tasks.
    ///
    /// Raising the limit lets queued tasks start right away. Lowering it never
    /// preempts running tasks; admission resumes once enough of them finish.
    pub fn set_concurrency_limit(&self, concurrency_limit: usize) -> Result<()> {
        verify_arg!(concurrency_limit, concurrency_limit >= 1);
        let shared = &self.0.shared;
        {
            let mut state = shared.lock();
            log::debug!(
                "concurrency limit changed from {} to {concurrency_limit}",
                state.limit
            );
            state.limit = concurrency_limit;
        }
        shared.dispatch.notify_all();
        Ok(())
    }

    pub fn concurrency_limit(&self) -> usize {
        self.0.shared.lock().limit
    }

    /// Number of tasks currently admitted and not yet finished.
    pub fn running_count(&self) -> usize {
        self.0.shared.lock().active.len()
    }

    /// Number of tasks waiting for a free slot.
    pub fn queued_count(&self) -> usize {
        self.0.shared.lock().queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.shared.lock().closed
    }

    /// Stops accepting submissions, lets every queued task run, and blocks until the
    /// dispatcher has exited and no task is running.
    ///
    /// Calling this from a task running on the same pool deadlocks.
    pub fn shutdown(&self) {
        let shared = &self.0.shared;
        shared.close();

        let dispatcher = self
            .0
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(dispatcher) = dispatcher {
            if dispatcher.join().is_err() {
                log::error!("worker pool dispatcher panicked");
            }
        }

        let state = shared.lock();
        let _state = shared
            .idle
            .wait_while(state, |state| !state.active.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        log::info!(
            "worker pool '{}' shut down",
            shared.config.thread_name_prefix
        );
    }
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            log::warn!(
                "rejected task {} ('{}'): worker pool is shut down",
                job.control.id(),
                job.control.work_name()
            );
            job.control.abandon(Error::shut_down());
            return Err(Error::shut_down());
        }
        log::trace!(
            "queued task {} ('{}'), {} waiting",
            job.control.id(),
            job.control.work_name(),
            state.queue.len() + 1
        );
        state.queue.push_back(job);
        drop(state);
        self.dispatch.notify_all();
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            log::debug!("worker pool '{}' closed", self.config.thread_name_prefix);
        }
        drop(state);
        self.dispatch.notify_all();
    }

    /// Admits queued tasks in FIFO order while slots are free. Exits once the pool
    /// is closed and the queue is empty.
    fn dispatch_loop(self: Arc<Self>) {
        loop {
            let job = {
                let state = self.lock();
                let mut state = self
                    .dispatch
                    .wait_while(state, |state| !state.can_admit() && !state.is_drained())
                    .unwrap_or_else(|e| e.into_inner());
                if !state.can_admit() {
                    break;
                }
                let Some(job) = state.queue.pop_front() else {
                    continue;
                };
                state.active.insert(job.control.id());
                log::debug!(
                    "admitted task {} ('{}'), {}/{} running",
                    job.control.id(),
                    job.control.work_name(),
                    state.active.len(),
                    state.limit
                );
                job
            };
            self.launch(job);
        }
        log::debug!(
            "worker pool '{}' dispatcher stopped",
            self.config.thread_name_prefix
        );
    }

    fn launch(self: &Arc<Self>, job: Job) {
        let Job { control, body } = job;
        let id = control.id();
        if !control.start() {
            // Already finished elsewhere (abandoned); its work must not run.
            log::warn!(
                "task {id} ('{}') was no longer pending at admission, skipping",
                control.work_name()
            );
            self.release(id);
            return;
        }

        let slot = SlotGuard {
            pool: self.clone(),
            id,
        };
        let spawned = thread::Builder::new()
            .name(self.config.task_thread_name(id))
            .spawn(move || {
                let _slot = slot;
                body();
            });
        // On failure the closure, and the slot guard with it, is already dropped.
        if let Err(e) = spawned {
            log::error!("failed to start task {id}: {e}");
            control.abandon(Error::unsupported_environment(format!(
                "cannot spawn task thread: {e}"
            )));
        }
    }

    fn release(&self, id: TaskId) {
        let mut state = self.lock();
        state.active.remove(&id);
        let idle = state.active.is_empty();
        drop(state);
        self.dispatch.notify_all();
        if idle {
            self.idle.notify_all();
        }
    }
}

/// Frees the task's slot when its thread finishes.
struct SlotGuard {
    pool: Arc<PoolShared>,
    id: TaskId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
