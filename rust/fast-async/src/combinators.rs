//! Combinators that synchronize on several tasks at once.
//!
//! Both combinators report at most one failure. Other failures in the batch are
//! discarded rather than aggregated.

use std::sync::Arc;

use fast_async_common::{Error, Result};

use crate::{completion::Signal, task::TaskHandle};

/// Waits for every task and returns their results in input order.
///
/// Blocks until all tasks reach a terminal state, even when an early one has already
/// failed. If any task failed, returns the failure of the first failed task *by
/// position* in `tasks`, regardless of which one failed first in time. An empty input
/// yields an empty vector.
pub fn await_all<T: Clone>(tasks: &[TaskHandle<T>]) -> Result<Vec<T>> {
    // Each task signals its own completion; joining in order ends when the slowest
    // task finishes, same as waiting on all of them at once.
    for task in tasks {
        task.wait_finished();
    }

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.try_result() {
            Some(Ok(value)) => results.push(value),
            Some(Err(err)) => return Err(err),
            None => unreachable!("task {} not finished after wait", task.id()),
        }
    }
    Ok(results)
}

/// Races the tasks and returns the first success observed.
///
/// The remaining tasks are scanned in input order each time one of them finishes.
/// A success returns immediately; a failure removes the task from the race. If every
/// task fails, returns the failure of the first task *observed* to fail, which follows
/// scan order rather than wall-clock order. The losing tasks keep running.
///
/// Fails with `InvalidArgument` when `tasks` is empty.
pub fn await_first<T: Clone>(tasks: &[TaskHandle<T>]) -> Result<T> {
    if tasks.is_empty() {
        return Err(Error::invalid_arg(
            "tasks",
            "await_first requires at least one task",
        ));
    }

    let watch = RaceWatch::new(tasks);
    let signal = &watch.signal;

    let mut remaining: Vec<&TaskHandle<T>> = tasks.iter().collect();
    let mut first_failed: Option<Error> = None;
    loop {
        let seen = signal.generation();
        let mut i = 0;
        while i < remaining.len() {
            match remaining[i].try_result() {
                Some(Ok(value)) => return Ok(value),
                Some(Err(err)) => {
                    log::trace!(
                        "await_first: task {} dropped out of the race",
                        remaining[i].id()
                    );
                    first_failed.get_or_insert(err);
                    remaining.remove(i);
                }
                None => i += 1,
            }
        }

        if remaining.is_empty() {
            return Err(first_failed
                .unwrap_or_else(|| Error::invalid_operation("await_first: no task finished")));
        }
        signal.wait_past(seen);
    }
}

/// Keeps one signal registered on every raced task and removes it again when the race
/// ends, so handles outliving the race do not accumulate stale watchers.
struct RaceWatch<'a, T> {
    tasks: &'a [TaskHandle<T>],
    signal: Arc<Signal>,
}

impl<'a, T> RaceWatch<'a, T> {
    fn new(tasks: &'a [TaskHandle<T>]) -> Self {
        let signal = Arc::new(Signal::new());
        for task in tasks {
            task.watch(signal.clone());
        }
        RaceWatch { tasks, signal }
    }
}

impl<T> Drop for RaceWatch<'_, T> {
    fn drop(&mut self) {
        for task in self.tasks {
            task.unwatch(&self.signal);
        }
    }
}
