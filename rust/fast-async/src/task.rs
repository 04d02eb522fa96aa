//! Tasks and the handles used to observe them.
//!
//! A [`Task`] pairs a unit of work with the state that tracks its execution. Constructing
//! a task never runs it: the task is handed to a [`WorkerPool`], which admits it once a
//! concurrency slot is free. A [`TaskHandle`] is the caller's view of the task and can
//! be cloned freely; every clone observes the same outcome.
//!
//! Failures raised by the work (including panics) are captured on the task and surface
//! only when the task is observed through [`TaskHandle::wait`], [`TaskHandle::subscribe`]
//! or one of the combinators in [`crate::combinators`]. A task that is never observed
//! drops its failure silently.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use fast_async_common::{Error, Result, StdErrorBoxed};
use thiserror::Error;

use crate::{
    completion::{Completion, Signal},
    pool::WorkerPool,
};

/// Execution state of a task.
///
/// Transitions follow `Pending -> Running -> {Succeeded, Failed}` and never reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting in the admission queue.
    Pending,
    /// Admitted by the pool; the work is executing.
    Running,
    /// The work returned a value.
    Succeeded,
    /// The work returned an error or panicked.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Process-unique task identifier, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> TaskId {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The cause recorded when a unit of work panics instead of returning.
#[derive(Debug, Error)]
#[error("work panicked: {message}")]
pub struct WorkPanicked {
    pub message: String,
}

impl WorkPanicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> WorkPanicked {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        WorkPanicked { message }
    }
}

/// Callback invoked with the result of a task that succeeded.
pub type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send + 'static>;

/// Callback invoked with the wrapped failure of a task that failed.
pub type ErrorCallback = Box<dyn FnOnce(&Error) + Send + 'static>;

/// Where subscribed callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// The callback runs on the task's own thread, right after the work finishes and
    /// before waiters are released. If the task already finished when the subscription
    /// is made, the callback runs immediately on the subscribing thread.
    #[default]
    Inline,
    /// The subscribing thread blocks until the task finishes and runs the callback itself.
    Deferred,
}

struct Subscription<T> {
    on_success: SuccessCallback<T>,
    on_error: ErrorCallback,
}

impl<T> Subscription<T> {
    fn dispatch(self, outcome: &Result<T>) {
        let Subscription {
            on_success,
            on_error,
        } = self;
        let res = panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            Ok(value) => on_success(value),
            Err(err) => on_error(err),
        }));
        if res.is_err() {
            log::error!("task completion callback panicked");
        }
    }
}

/// Inline subscription slot. `closed` is set once the task has taken the
/// subscription for dispatch; later subscribers run their callbacks themselves.
struct Subscriptions<T> {
    pending: Option<Subscription<T>>,
    closed: bool,
}

pub(crate) struct TaskShared<T> {
    id: TaskId,
    work_name: String,
    completion: Completion<T>,
    subscriptions: Mutex<Subscriptions<T>>,
}

impl<T> TaskShared<T> {
    fn new(work_name: String) -> TaskShared<T> {
        TaskShared {
            id: TaskId::next(),
            work_name,
            completion: Completion::new(),
            subscriptions: Mutex::new(Subscriptions {
                pending: None,
                closed: false,
            }),
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Subscriptions<T>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes the outcome of a running task: inline callbacks run first, then
    /// waiters are released.
    fn complete(&self, outcome: Result<T>) {
        let subscription = {
            let mut subscriptions = self.lock_subscriptions();
            subscriptions.closed = true;
            subscriptions.pending.take()
        };
        if let Some(subscription) = subscription {
            subscription.dispatch(&outcome);
        }
        match &outcome {
            Ok(_) => log::trace!("task {} ('{}') succeeded", self.id, self.work_name),
            Err(e) => log::trace!("task {} ('{}') failed: {e}", self.id, self.work_name),
        }
        if self.completion.finish(outcome).is_err() {
            log::warn!("task {} completed outside of the running state", self.id);
        }
    }

    /// Fails a task whose work will never execute. No-op once the task is done.
    fn abandon(&self, error: Error) {
        self.completion.start();
        if self.completion.is_done() {
            return;
        }
        self.complete(Err(error));
    }
}

/// The pool's view of a queued task, independent of the result type.
pub(crate) trait TaskControl: Send + Sync {
    fn id(&self) -> TaskId;

    fn work_name(&self) -> &str;

    /// Marks the task as admitted.
    fn start(&self) -> bool;

    /// Fails a task that will never execute its work.
    fn abandon(&self, error: Error);
}

impl<T: Send + Sync + 'static> TaskControl for TaskShared<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn work_name(&self) -> &str {
        &self.work_name
    }

    fn start(&self) -> bool {
        self.completion.start()
    }

    fn abandon(&self, error: Error) {
        TaskShared::abandon(self, error);
    }
}

/// A type-erased task ready for admission by the pool.
pub(crate) struct Job {
    pub(crate) control: Arc<dyn TaskControl>,
    pub(crate) body: Box<dyn FnOnce() + Send + 'static>,
}

type WorkFn<T> = Box<dyn FnOnce() -> std::result::Result<T, StdErrorBoxed> + Send + 'static>;

/// A unit of work that has not been submitted yet.
///
/// The task is created in the [`TaskStatus::Pending`] state. It starts running only after
/// [`run`](Self::run) (or [`WorkerPool::submit`]) hands it to a pool and the pool admits it.
/// Dropping a task that was never submitted fails it with `InvalidOperation`, so handles
/// taken through [`handle`](Self::handle) never wait forever.
pub struct Task<T> {
    /// `None` once the task has been turned into a job.
    work: Option<WorkFn<T>>,
    shared: Arc<TaskShared<T>>,
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.work.take().is_some() {
            log::debug!(
                "task {} ('{}') dropped before submission",
                self.shared.id,
                self.shared.work_name
            );
            self.shared
                .abandon(Error::invalid_operation("task dropped before submission"));
        }
    }
}

impl<T: Send + Sync + 'static> Task<T> {
    /// Wraps `work` as a task named after the closure's type.
    pub fn new<F, E>(work: F) -> Task<T>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<StdErrorBoxed>,
    {
        Task::named(std::any::type_name::<F>(), work)
    }

    /// Wraps `work` as a task with an explicit name used in failure messages.
    pub fn named<F, E>(work_name: impl Into<String>, work: F) -> Task<T>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<StdErrorBoxed>,
    {
        Task {
            work: Some(Box::new(move || work().map_err(Into::into))),
            shared: Arc::new(TaskShared::new(work_name.into())),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn work_name(&self) -> &str {
        &self.shared.work_name
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.completion.status()
    }

    /// Returns a handle that observes this task once it is submitted.
    pub fn handle(&self) -> TaskHandle<T> {
        TaskHandle {
            shared: self.shared.clone(),
        }
    }

    /// Submits the task to `pool`. Equivalent to [`WorkerPool::submit`].
    pub fn run(self, pool: &WorkerPool) -> Result<TaskHandle<T>> {
        pool.submit(self)
    }

    pub(crate) fn into_job(mut self) -> Job {
        let shared = self.shared.clone();
        let control: Arc<dyn TaskControl> = shared.clone();
        let body: Box<dyn FnOnce() + Send + 'static> = match self.work.take() {
            Some(work) => Box::new(move || execute(&shared, work)),
            None => Box::new(|| {}),
        };
        Job { control, body }
    }
}

/// Runs the work of an admitted task and publishes its outcome.
fn execute<T>(shared: &TaskShared<T>, work: WorkFn<T>) {
    let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(Error::task_failed(shared.work_name.clone(), cause)),
        Err(payload) => Err(Error::task_failed(
            shared.work_name.clone(),
            WorkPanicked::from_payload(payload),
        )),
    };
    shared.complete(outcome);
}

/// A handle for observing a submitted task.
///
/// Handles are cheap to clone. Observation is idempotent: repeated calls to
/// [`wait`](Self::wait) return the same result or the same error.
pub struct TaskHandle<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        TaskHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("work_name", &self.shared.work_name)
            .field("status", &self.status())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn work_name(&self) -> &str {
        &self.shared.work_name
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.completion.status()
    }

    /// Returns `true` once the task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.shared.completion.is_done()
    }

    /// Blocks until the task reaches a terminal state.
    pub fn wait_finished(&self) {
        self.shared.completion.wait_done();
    }

    /// Registers the callback pair to run when the task finishes.
    ///
    /// Both callbacks are required. With [`DispatchMode::Deferred`] this call blocks
    /// until the task finishes and runs the matching callback on the calling thread.
    /// With [`DispatchMode::Inline`] it returns immediately and the callback runs on the
    /// task's thread. Only one subscription is kept: subscribing again before the task
    /// finishes replaces the previous pair.
    pub fn subscribe(
        &self,
        on_success: Option<SuccessCallback<T>>,
        on_error: Option<ErrorCallback>,
        mode: DispatchMode,
    ) -> Result<()> {
        let (Some(on_success), Some(on_error)) = (on_success, on_error) else {
            return Err(Error::invalid_arg(
                "subscribe",
                "both on_success and on_error callbacks are required",
            ));
        };
        let subscription = Subscription {
            on_success,
            on_error,
        };

        let late = {
            let mut subscriptions = self.shared.lock_subscriptions();
            if subscriptions.closed {
                Some(subscription)
            } else {
                match mode {
                    DispatchMode::Inline => {
                        if subscriptions.pending.replace(subscription).is_some() {
                            self.warn_resubscribe();
                        }
                        None
                    }
                    DispatchMode::Deferred => {
                        if subscriptions.pending.take().is_some() {
                            self.warn_resubscribe();
                        }
                        Some(subscription)
                    }
                }
            }
        };

        if let Some(subscription) = late {
            let outcome = self.shared.completion.wait_outcome();
            subscription.dispatch(&outcome);
        }
        Ok(())
    }

    /// Generic form of [`subscribe`](Self::subscribe) taking both callbacks by value.
    pub fn subscribe_with<S, E>(&self, on_success: S, on_error: E, mode: DispatchMode) -> Result<()>
    where
        S: FnOnce(&T) + Send + 'static,
        E: FnOnce(&Error) + Send + 'static,
    {
        self.subscribe(Some(Box::new(on_success)), Some(Box::new(on_error)), mode)
    }

    fn warn_resubscribe(&self) {
        log::warn!(
            "task {} ('{}') subscribed more than once, replacing previous callbacks",
            self.shared.id,
            self.shared.work_name
        );
    }

    /// Blocks until the task finishes and returns its shared outcome.
    ///
    /// Unlike [`wait`](Self::wait) this does not require a `Clone` result: every
    /// observer receives the same `Arc`.
    pub fn wait_shared(&self) -> Arc<Result<T>> {
        self.shared.completion.wait_outcome()
    }

    pub(crate) fn watch(&self, signal: Arc<Signal>) -> bool {
        self.shared.completion.watch(signal)
    }

    pub(crate) fn unwatch(&self, signal: &Arc<Signal>) {
        self.shared.completion.unwatch(signal);
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.shared.completion.watcher_count()
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Blocks until the task finishes and returns its result, or the wrapped failure of
    /// its work.
    pub fn wait(&self) -> Result<T> {
        self.shared.completion.wait()
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    ///
    /// Returns `None` if the task is still pending or running. The task is not cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        if self.shared.completion.wait_done_for(timeout) {
            self.shared.completion.try_outcome()
        } else {
            None
        }
    }

    /// Returns the outcome without blocking, or `None` if the task has not finished.
    pub fn try_result(&self) -> Option<Result<T>> {
        self.shared.completion.try_outcome()
    }
}
