//! Retry queue for requests that failed because connectivity was lost.
//!
//! Tasks are opaque replay actions. A drain takes the whole queue in one
//! step and attempts every captured task once, in enqueue order. Tasks
//! enqueued while a drain is running wait for the next drain. A task that
//! fails during replay is not re-enqueued here; the replayed request goes
//! back through the pipeline, which decides whether to queue it again.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::time::Instant;

/// Future produced by a replay action.
pub type ReplayFuture = BoxFuture<'static, Result<(), String>>;

type ReplayFn = Box<dyn FnOnce() -> ReplayFuture + Send>;

/// A deferred, zero-argument replay action.
pub struct RetryTask {
    /// Short description for diagnostics, e.g. `GET /vault`.
    pub label: String,
    /// When this task was queued.
    pub enqueued_at: Instant,
    replay: ReplayFn,
}

impl RetryTask {
    pub fn new<F, Fut>(label: impl Into<String>, replay: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            label: label.into(),
            enqueued_at: Instant::now(),
            replay: Box::new(move || replay().boxed()),
        }
    }

    /// Consume the task and start its replay.
    pub fn run(self) -> ReplayFuture {
        (self.replay)()
    }
}

impl std::fmt::Debug for RetryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTask")
            .field("label", &self.label)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

/// Outcome counts of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// FIFO queue of replay actions.
#[derive(Default)]
pub struct RetryQueue {
    tasks: Mutex<VecDeque<RetryTask>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, VecDeque<RetryTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task to the back of the queue. No deduplication.
    pub fn enqueue(&self, task: RetryTask) {
        log::debug!("Queued for retry: {}", task.label);
        self.tasks().push_back(task);
    }

    /// Swap the queue for an empty one and return what it held.
    pub fn take_all(&self) -> VecDeque<RetryTask> {
        std::mem::take(&mut *self.tasks())
    }

    /// Attempt every task captured at the start of the call, front to back.
    ///
    /// Failed or panicking tasks are logged and do not stop later tasks.
    pub async fn drain(&self) -> DrainReport {
        let tasks = self.take_all();
        let mut report = DrainReport::default();
        if tasks.is_empty() {
            return report;
        }

        log::info!("Replaying {} queued requests", tasks.len());

        for task in tasks {
            report.attempted += 1;
            let label = task.label.clone();
            let waited = task.enqueued_at.elapsed();

            // The replay closure runs inside the future so a panic while
            // building it is caught too.
            let outcome = AssertUnwindSafe(async move { task.run().await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    log::debug!("Replayed {} (queued {}ms)", label, waited.as_millis());
                    report.succeeded += 1;
                }
                Ok(Err(e)) => {
                    log::warn!("Replay of {} failed: {}", label, e);
                    report.failed += 1;
                }
                Err(_) => {
                    log::error!("Replay of {} panicked", label);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Number of tasks currently queued.
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recording_task(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> RetryTask {
        RetryTask::new(name, move || async move {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_len() {
        let queue = RetryQueue::new();
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        queue.enqueue(RetryTask::new("a", || async { Ok(()) }));
        queue.enqueue(RetryTask::new("b", || async { Ok(()) }));
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_runs_in_fifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = RetryQueue::new();
        queue.enqueue(recording_task("first", order.clone()));
        queue.enqueue(recording_task("second", order.clone()));
        queue.enqueue(recording_task("third", order.clone()));

        let report = queue.drain().await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_empty_returns_zero() {
        let queue = RetryQueue::new();
        assert_eq!(queue.drain().await, DrainReport::default());
    }

    #[tokio::test]
    async fn test_failures_do_not_block_or_requeue() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = RetryQueue::new();
        queue.enqueue(RetryTask::new("fails", || async {
            Err("network unreachable".to_string())
        }));
        queue.enqueue(RetryTask::new("panics", || async {
            if true {
                panic!("replay exploded");
            }
            Ok(())
        }));
        queue.enqueue(recording_task("after", order.clone()));

        let report = queue.drain().await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(*order.lock().unwrap(), vec!["after"]);
        // Failed tasks are not re-enqueued
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_tasks_enqueued_during_drain_wait_for_next_pass() {
        let queue = Arc::new(RetryQueue::new());
        let runs = Arc::new(AtomicU32::new(0));

        let q = queue.clone();
        let r = runs.clone();
        queue.enqueue(RetryTask::new("requeues", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            let r2 = r.clone();
            q.enqueue(RetryTask::new("late", move || async move {
                r2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
            Ok(())
        }));

        let first = queue.drain().await;
        assert_eq!(first.attempted, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        let second = queue.drain().await;
        assert_eq!(second.attempted, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }
}
