use std::{
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use fast_async::{
    DispatchMode, Error, ErrorKind, PoolConfig, StdErrorBoxed, Task, TaskStatus, WorkerPool,
    await_all, await_first, set_concurrency_limit, submit_async, submit_async_named,
};

#[derive(Debug)]
struct ValueError(String);

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValueError {}

fn raise_value_error() -> Result<i32, ValueError> {
    Err(ValueError("x".to_string()))
}

struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn new() -> Arc<Gate> {
        Arc::new(Gate {
            open: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let _guard = self.condvar.wait_while(guard, |open| !*open).unwrap();
    }
}

#[test]
fn test_ten_tasks_with_limit_two() {
    run_capped_tasks(2, 10);
}

#[test]
fn test_tasks_never_exceed_limit() {
    for limit in [1, 3, 5] {
        run_capped_tasks(limit, limit * 2 + 3);
    }
}

fn run_capped_tasks(limit: usize, task_count: usize) {
    let pool = WorkerPool::new(PoolConfig::default().with_concurrency_limit(limit)).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..task_count)
        .map(|i| {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(fastrand::u64(1..15)));
                running.fetch_sub(1, Ordering::SeqCst);
                if i % 3 == 0 {
                    Err(format!("task {i} failed").into())
                } else {
                    Ok::<_, StdErrorBoxed>(i)
                }
            })
            .unwrap()
        })
        .collect();

    while !handles.iter().all(|h| h.status().is_terminal()) {
        assert!(running.load(Ordering::SeqCst) <= limit);
        assert!(pool.running_count() <= limit);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(peak.load(Ordering::SeqCst) <= limit);
    for (i, handle) in handles.iter().enumerate() {
        let expected = if i % 3 == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Succeeded
        };
        assert_eq!(handle.status(), expected);
    }
}

#[test]
fn test_non_blocking_subscribe_reports_failure_once() {
    let pool = WorkerPool::with_concurrency_limit(1).unwrap();
    let gate = Gate::new();
    let task = Task::named("raise_value_error", {
        let gate = gate.clone();
        move || {
            gate.wait();
            raise_value_error()
        }
    });
    let handle = task.run(&pool).unwrap();

    let errors = Arc::new(Mutex::new(Vec::<Error>::new()));
    handle
        .subscribe_with(
            |_: &i32| panic!("work must fail"),
            {
                let errors = errors.clone();
                move |err: &Error| errors.lock().unwrap().push(err.clone())
            },
            DispatchMode::Inline,
        )
        .unwrap();
    gate.open();

    let waited = handle.wait().unwrap_err();
    assert!(handle.wait().is_err());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    let err = &errors[0];
    assert_eq!(err.work_name(), Some("raise_value_error"));
    assert_eq!(err.cause().unwrap().to_string(), "x");
    assert!(err.cause().unwrap().downcast_ref::<ValueError>().is_some());
    assert_eq!(err.to_string(), waited.to_string());
}

#[test]
fn test_blocking_subscribe_runs_on_caller() {
    let pool = WorkerPool::with_concurrency_limit(1).unwrap();
    let handle = pool
        .spawn_named("slow_sum", || {
            std::thread::sleep(Duration::from_millis(20));
            Ok::<_, StdErrorBoxed>((1..=10).sum::<i32>())
        })
        .unwrap();
    let caller = std::thread::current().id();
    let seen = Arc::new(Mutex::new(None));
    handle
        .subscribe_with(
            {
                let seen = seen.clone();
                move |v: &i32| *seen.lock().unwrap() = Some((*v, std::thread::current().id()))
            },
            |_: &Error| panic!("work must succeed"),
            DispatchMode::Deferred,
        )
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), Some((55, caller)));
}

#[test]
fn test_wait_is_idempotent_without_repeating_callbacks() {
    let pool = WorkerPool::with_concurrency_limit(2).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = pool.spawn(|| Ok::<_, StdErrorBoxed>(vec![1, 2, 3])).unwrap();
    handle
        .subscribe_with(
            {
                let calls = calls.clone();
                move |_: &Vec<i32>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            },
            |_: &Error| {},
            DispatchMode::Inline,
        )
        .unwrap();
    let clone = handle.clone();
    assert_eq!(handle.wait().unwrap(), vec![1, 2, 3]);
    assert_eq!(handle.wait().unwrap(), vec![1, 2, 3]);
    assert_eq!(clone.wait().unwrap(), vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_await_all_first_failure_by_position() {
    let pool = WorkerPool::with_concurrency_limit(2).unwrap();
    let gate = Gate::new();
    let a = pool
        .spawn_named("a", {
            let gate = gate.clone();
            move || {
                gate.wait();
                Err::<i32, _>("a failed")
            }
        })
        .unwrap();
    let b = pool.spawn_named("b", || Ok::<_, StdErrorBoxed>(2)).unwrap();
    assert_eq!(b.wait().unwrap(), 2);
    gate.open();

    let err = await_all(&[a, b]).unwrap_err();
    assert_eq!(err.work_name(), Some("a"));
    assert_eq!(err.to_string(), "an error occurred in 'a': a failed");
}

#[test]
fn test_await_first_prefers_observed_success() {
    let pool = WorkerPool::with_concurrency_limit(2).unwrap();
    let gate = Gate::new();
    let a = pool
        .spawn_named("a", {
            let gate = gate.clone();
            move || {
                gate.wait();
                Err::<i32, _>("a failed")
            }
        })
        .unwrap();
    let b = pool.spawn_named("b", || Ok::<_, StdErrorBoxed>(20)).unwrap();

    assert_eq!(await_first(&[a.clone(), b.clone()]).unwrap(), 20);
    gate.open();
    assert!(a.wait().is_err());
    // a's later failure does not change the outcome
    assert_eq!(await_first(&[a, b]).unwrap(), 20);
}

#[test]
fn test_await_first_all_fail() {
    let pool = WorkerPool::with_concurrency_limit(2).unwrap();
    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|name| pool.spawn_named(name, move || Err::<i32, _>(format!("{name} failed"))))
        .collect::<Result<_, _>>()
        .unwrap();
    for handle in &handles {
        handle.wait_finished();
    }
    let err = await_first(&handles).unwrap_err();
    assert!(err.is_task_failure());
    assert!(matches!(err.kind(), ErrorKind::TaskFailed { .. }));
    assert_eq!(err.work_name(), Some("first"));
    assert_eq!(err.to_string(), "an error occurred in 'first': first failed");
}

#[test]
fn test_global_pool_surface() {
    set_concurrency_limit(3).unwrap();
    assert_eq!(WorkerPool::global().unwrap().concurrency_limit(), 3);

    let handles: Vec<_> = (0..6)
        .map(|i| submit_async(move || Ok::<_, StdErrorBoxed>(i * i)).unwrap())
        .collect();
    assert_eq!(await_all(&handles).unwrap(), vec![0, 1, 4, 9, 16, 25]);

    let failing = submit_async_named("global_failure", || Err::<(), _>("nope")).unwrap();
    assert_eq!(
        failing.wait().unwrap_err().to_string(),
        "an error occurred in 'global_failure': nope"
    );

    let err = set_concurrency_limit(0).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
}
