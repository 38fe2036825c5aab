//! Counting worker pool.
//!
//! Workers pull one task at a time from a shared queue; the pool tracks
//! queued plus in-flight work so that quiescence (queue empty and nothing
//! running) can be awaited on a condition variable rather than by polling.
//! Tasks may enqueue further tasks, including after an earlier quiescence
//! point: the tabulation phase and both value phases reuse one pool.
//!
//! A panicking task poisons the run: the first panic message is recorded,
//! outstanding work is dropped, and `await_completion` returns the failure.
//! Workers never wait on other workers; they only enqueue.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::errors::{Result, SolverError};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorState {
    queue: VecDeque<Job>,
    in_flight: usize,
    shutdown: bool,
    failure: Option<String>,
}

impl ExecutorState {
    fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }
}

struct Shared {
    state: Mutex<ExecutorState>,
    work_ready: Condvar,
    quiescent: Condvar,
}

pub(crate) struct CountingExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CountingExecutor {
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ExecutorState {
                queue: VecDeque::new(),
                in_flight: 0,
                shutdown: false,
                failure: None,
            }),
            work_ready: Condvar::new(),
            quiescent: Condvar::new(),
        });

        let workers = (0..num_threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a task. Submissions after shutdown (or after a failure) are
    /// dropped; at those points the run is already over.
    pub fn execute(&self, job: Job) {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.failure.is_some() {
            warn!("task submitted to a terminated executor, dropping");
            return;
        }
        state.queue.push_back(job);
        self.shared.work_ready.notify_one();
    }

    /// Block until the pool is quiescent, re-surfacing the first captured
    /// task panic. The pool stays usable for further submissions.
    pub fn await_completion(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(message) = &state.failure {
                return Err(SolverError::WorkerPanicked(message.clone()));
            }
            if state.is_quiescent() {
                return Ok(());
            }
            self.shared.quiescent.wait(&mut state);
        }
    }

    /// Stop accepting work and join all workers. Outstanding queued tasks
    /// are still drained first.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for CountingExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.in_flight += 1;
                    break job;
                }
                if state.shutdown || state.failure.is_some() {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(job));

        let mut state = shared.state.lock();
        state.in_flight -= 1;
        if let Err(payload) = outcome {
            if state.failure.is_none() {
                state.failure = Some(panic_message(payload.as_ref()));
            }
            // abandon the run: outstanding work is meaningless now
            state.queue.clear();
            shared.work_ready.notify_all();
        }
        if state.is_quiescent() || state.failure.is_some() {
            shared.quiescent.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_runs_all_tasks_to_quiescence() {
        let executor = CountingExecutor::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            executor.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }

        executor.await_completion().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        executor.shutdown();
    }

    #[test]
    fn test_tasks_may_enqueue_tasks() {
        let executor = Arc::new(CountingExecutor::new(2));
        let counter = Arc::new(AtomicUsize::new(0));

        let exec = Arc::clone(&executor);
        let inner_counter = Arc::clone(&counter);
        executor.execute(Box::new(move || {
            for _ in 0..10 {
                let counter = Arc::clone(&inner_counter);
                exec.execute(Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                }));
            }
        }));

        executor.await_completion().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_reusable_across_phases() {
        let executor = CountingExecutor::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        executor.await_completion().unwrap();

        let c = Arc::clone(&counter);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        executor.await_completion().unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_panic_surfaces_at_await() {
        let executor = CountingExecutor::new(2);
        executor.execute(Box::new(|| panic!("client flow function fault")));

        let err = executor.await_completion().unwrap_err();
        assert!(err.to_string().contains("client flow function fault"));
    }

    #[test]
    fn test_no_work_after_shutdown() {
        let executor = CountingExecutor::new(1);
        executor.shutdown();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_await_on_idle_pool_returns_immediately() {
        let executor = CountingExecutor::new(2);
        executor.await_completion().unwrap();
    }
}
