//! Completion tracking for submitted tasks.
//!
//! A [`Completion`] records the lifecycle of a single task and lets any number of
//! threads block until it reaches a terminal state. Unlike a oneshot channel the
//! outcome is never consumed: every observer receives a clone of the same value.
//!
//! ## Lifecycle
//!
//! 1. Pending: the task is waiting in the admission queue
//! 2. Running: the pool admitted the task and its work is executing
//! 3. Done: the work returned (or failed) and the outcome is available
//!
//! Transitions only move forward. `Done` is reachable from `Running` alone.
//!
//! A [`Signal`] is a generation counter paired with a condition variable. Tasks
//! notify every registered signal exactly once when they finish, which allows a
//! caller to sleep until *any* of several tasks completes.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

use fast_async_common::Result;

use crate::task::TaskStatus;

/// Shared completion state of one task.
pub(crate) struct Completion<T> {
    inner: Mutex<Inner<T>>,
    condvar: Condvar,
}

struct Inner<T> {
    state: State<T>,
    watchers: Vec<Arc<Signal>>,
}

enum State<T> {
    Pending,
    Running,
    Done(Arc<Result<T>>),
}

impl<T> State<T> {
    fn is_done(&self) -> bool {
        matches!(self, State::Done(_))
    }

    fn status(&self) -> TaskStatus {
        match self {
            State::Pending => TaskStatus::Pending,
            State::Running => TaskStatus::Running,
            State::Done(outcome) if outcome.is_ok() => TaskStatus::Succeeded,
            State::Done(_) => TaskStatus::Failed,
        }
    }
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Completion<T> {
        Completion {
            inner: Mutex::new(Inner {
                state: State::Pending,
                watchers: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.lock().state.status()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.lock().state.is_done()
    }

    /// Moves a pending task into the running state.
    ///
    /// Returns `false` if the task already left the pending state.
    pub(crate) fn start(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.state, State::Pending) {
            inner.state = State::Running;
            true
        } else {
            false
        }
    }

    /// Stores the outcome of a running task and wakes every waiter.
    ///
    /// Returns the outcome back if the task is not running.
    pub(crate) fn finish(&self, outcome: Result<T>) -> std::result::Result<(), Result<T>> {
        let watchers = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Running) {
                return Err(outcome);
            }
            inner.state = State::Done(Arc::new(outcome));
            std::mem::take(&mut inner.watchers)
        };
        self.condvar.notify_all();
        for signal in watchers {
            signal.notify();
        }
        Ok(())
    }

    /// Registers a signal to be notified when the task finishes.
    ///
    /// Returns `false` without registering if the task is already done.
    pub(crate) fn watch(&self, signal: Arc<Signal>) -> bool {
        let mut inner = self.lock();
        if inner.state.is_done() {
            false
        } else {
            inner.watchers.push(signal);
            true
        }
    }

    /// Removes a signal registered through [`watch`](Self::watch).
    pub(crate) fn unwatch(&self, signal: &Arc<Signal>) {
        self.lock()
            .watchers
            .retain(|watcher| !Arc::ptr_eq(watcher, signal));
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Blocks until the task is done.
    pub(crate) fn wait_done(&self) {
        let guard = self.lock();
        if guard.state.is_done() {
            return;
        }
        let _guard = self
            .condvar
            .wait_while(guard, |inner| !inner.state.is_done())
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Blocks until the task is done or the timeout elapses.
    ///
    /// Returns `true` if the task is done.
    pub(crate) fn wait_done_for(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        if guard.state.is_done() {
            return true;
        }
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |inner| !inner.state.is_done())
            .unwrap_or_else(|e| e.into_inner());
        guard.state.is_done()
    }

    /// Returns the shared outcome if the task is done, without blocking.
    pub(crate) fn outcome(&self) -> Option<Arc<Result<T>>> {
        match &self.lock().state {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending | State::Running => None,
        }
    }

    /// Blocks until the task is done and returns the shared outcome.
    pub(crate) fn wait_outcome(&self) -> Arc<Result<T>> {
        let guard = self.lock();
        let guard = self
            .condvar
            .wait_while(guard, |inner| !inner.state.is_done())
            .unwrap_or_else(|e| e.into_inner());
        match &guard.state {
            State::Done(outcome) => outcome.clone(),
            State::Pending | State::Running => unreachable!("woken before completion"),
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Returns a clone of the outcome if the task is done.
    pub(crate) fn try_outcome(&self) -> Option<Result<T>> {
        self.outcome().map(|outcome| outcome.as_ref().clone())
    }

    /// Blocks until the task is done and returns a clone of its outcome.
    pub(crate) fn wait(&self) -> Result<T> {
        self.wait_outcome().as_ref().clone()
    }
}

/// A wake-up signal shared by several tasks.
pub(crate) struct Signal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Signal {
        Signal {
            generation: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The number of notifications received so far.
    pub(crate) fn generation(&self) -> u64 {
        *self.lock()
    }

    pub(crate) fn notify(&self) {
        *self.lock() += 1;
        self.condvar.notify_all();
    }

    /// Blocks until the signal has been notified past `seen`.
    pub(crate) fn wait_past(&self, seen: u64) {
        let guard = self.lock();
        let _guard = self
            .condvar
            .wait_while(guard, |generation| *generation == seen)
            .unwrap_or_else(|e| e.into_inner());
    }
}
