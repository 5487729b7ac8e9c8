//! Bounded task dispatcher with a completion barrier.
//!
//! Tasks are queued on a bounded channel and executed by a fixed set of
//! worker tasks. `wait_for_all` observes every submitted task in submission
//! order and reports the first failure.

use std::{any::Any, future::Future, pin::Pin, sync::Arc};

use anyhow::anyhow;
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, Mutex},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

/// Outcome of a single task.
pub type TaskResult = anyhow::Result<()>;

type BoxedTask = Pin<Box<dyn Future<Output = TaskResult> + Send + 'static>>;

/// Submission sequence number of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
    /// Queue is at capacity; only returned by `try_add_task`.
    #[error("task queue is full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    Closed,
    /// First failing task in submission order, with the task's own error as
    /// the source. Later failures are only counted.
    #[error("{task} failed: {source:#} ({suppressed} later failures)")]
    TaskFailed {
        task: TaskId,
        #[source]
        source: anyhow::Error,
        suppressed: usize,
    },
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of tasks allowed to run at once.
    pub worker_count: usize,
    /// Maximum queued tasks before submission applies backpressure.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 64,
        }
    }
}

struct Job {
    id: TaskId,
    task: BoxedTask,
    done: oneshot::Sender<TaskResult>,
}

/// Fixed-size worker pool fed by a bounded queue.
///
/// Dropping the dispatcher closes the queue; workers finish what is already
/// queued and exit. Call `wait_for_all` first to observe outcomes.
pub struct TaskDispatcher {
    queue: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Vec<(TaskId, oneshot::Receiver<TaskResult>)>,
    next_id: u64,
}

impl TaskDispatcher {
    /// Start the worker pool on the current tokio runtime.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        if config.worker_count == 0 {
            return Err(DispatchError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if config.queue_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        let runtime = Handle::try_current().map_err(|e| DispatchError::NoRuntime(e.to_string()))?;

        let (queue, rx) = mpsc::channel::<Job>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.worker_count)
            .map(|worker_id| runtime.spawn(worker_loop(worker_id, Arc::clone(&rx))))
            .collect();

        info!(
            workers = config.worker_count,
            capacity = config.queue_capacity,
            "task dispatcher started"
        );
        Ok(Self {
            queue: Some(queue),
            workers,
            pending: Vec::new(),
            next_id: 0,
        })
    }

    /// Queue an async task, waiting for queue capacity if the pool is saturated.
    pub async fn add_task<F>(&mut self, task: F) -> Result<TaskId, DispatchError>
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let queue = self.queue.clone().ok_or(DispatchError::Closed)?;
        let (job, done) = self.job(Box::pin(task));
        let id = job.id;
        queue.send(job).await.map_err(|_| DispatchError::Closed)?;
        self.track(id, done);
        Ok(id)
    }

    /// Queue an async task without waiting; fails with `QueueFull` when saturated.
    pub fn try_add_task<F>(&mut self, task: F) -> Result<TaskId, DispatchError>
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let queue = self.queue.clone().ok_or(DispatchError::Closed)?;
        let (job, done) = self.job(Box::pin(task));
        let id = job.id;
        queue.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })?;
        self.track(id, done);
        Ok(id)
    }

    /// Queue a synchronous closure; it runs on tokio's blocking thread pool.
    pub async fn add_blocking_task<F>(&mut self, work: F) -> Result<TaskId, DispatchError>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.add_task(async move { join_outcome(tokio::task::spawn_blocking(work).await) })
            .await
    }

    /// Block until every recorded task has completed.
    ///
    /// Tasks are observed in submission order. Every handle is observed even
    /// after a failure, and the recorded set is always cleared. Returns the
    /// number of tasks observed, or the first failure.
    pub async fn wait_for_all(&mut self) -> Result<usize, DispatchError> {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        let mut first: Option<(TaskId, anyhow::Error)> = None;
        let mut suppressed = 0;

        for (id, done) in pending {
            let outcome = done
                .await
                .unwrap_or_else(|_| Err(anyhow!("task dropped before completion")));
            let Err(err) = outcome else { continue };
            if first.is_none() {
                error!(%id, reason = %format!("{err:#}"), "task failed");
                first = Some((id, err));
            } else {
                warn!(%id, reason = %format!("{err:#}"), "additional task failure");
                suppressed += 1;
            }
        }

        match first {
            None => {
                debug!(total, "all tasks completed");
                Ok(total)
            }
            Some((task, source)) => Err(DispatchError::TaskFailed {
                task,
                source,
                suppressed,
            }),
        }
    }

    /// Number of recorded tasks not yet observed by `wait_for_all`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(mut self) {
        if !self.pending.is_empty() {
            warn!(
                pending = self.pending.len(),
                "shutting down with unobserved tasks"
            );
        }
        self.queue.take();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                warn!(%err, "worker exited abnormally");
            }
        }
        debug!("task dispatcher stopped");
    }

    fn job(&mut self, task: BoxedTask) -> (Job, oneshot::Receiver<TaskResult>) {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job {
            id,
            task,
            done: done_tx,
        };
        (job, done_rx)
    }

    fn track(&mut self, id: TaskId, done: oneshot::Receiver<TaskResult>) {
        debug!(%id, "task queued");
        self.pending.push((id, done));
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>) {
    debug!(worker_id, "worker started");
    loop {
        let job = {
            let mut rx = queue.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => break,
            }
        };

        let Job { id, task, done } = job;
        debug!(worker_id, %id, "running task");
        // Own spawn per task so a panic is reported instead of killing the worker.
        let outcome = join_outcome(tokio::spawn(task).await);
        if done.send(outcome).is_err() {
            debug!(worker_id, %id, "completion handle dropped");
        }
    }
    debug!(worker_id, "worker stopped (queue closed)");
}

fn join_outcome(joined: Result<TaskResult, JoinError>) -> TaskResult {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(anyhow!(
            "task panicked: {}",
            panic_message(err.into_panic())
        )),
        Err(err) => Err(anyhow!("task aborted: {err}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    fn config(worker_count: usize, queue_capacity: usize) -> DispatcherConfig {
        DispatcherConfig {
            worker_count,
            queue_capacity,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn barrier_waits_for_every_task() {
        let mut dispatcher = TaskDispatcher::new(config(4, 8)).expect("dispatcher");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            dispatcher
                .add_task(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .expect("add task");
        }

        let observed = dispatcher.wait_for_all().await.expect("all tasks succeed");
        assert_eq!(observed, 100);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_closures_run_once_each() {
        let mut dispatcher = TaskDispatcher::new(DispatcherConfig::default()).expect("dispatcher");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            dispatcher
                .add_blocking_task(move || {
                    std::thread::sleep(Duration::from_millis(2));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .expect("add task");
        }

        assert_eq!(dispatcher.wait_for_all().await.expect("wait"), 16);
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn first_failure_in_submission_order_is_reported() {
        let mut dispatcher = TaskDispatcher::new(config(4, 16)).expect("dispatcher");
        let ran = Arc::new(AtomicUsize::new(0));

        for i in 0..10u64 {
            let ran = Arc::clone(&ran);
            dispatcher
                .add_task(async move {
                    // task 3 finishes last, so completion order differs from submission order
                    if i == 3 {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    ran.fetch_add(1, Ordering::SeqCst);
                    match i {
                        3 | 7 => Err(anyhow!("boom {i}")),
                        _ => Ok(()),
                    }
                })
                .await
                .expect("add task");
        }

        let err = dispatcher.wait_for_all().await.expect_err("should fail");
        match &err {
            DispatchError::TaskFailed {
                task,
                source,
                suppressed,
            } => {
                assert_eq!(*task, TaskId(3));
                assert_eq!(source.to_string(), "boom 3");
                assert_eq!(*suppressed, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "task-3 failed: boom 3 (1 later failures)");
        assert_eq!(ran.load(Ordering::SeqCst), 10);

        // handles are cleared even on the failure path
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(dispatcher.wait_for_all().await.expect("empty wait"), 0);
    }

    #[tokio::test]
    async fn panicking_task_is_reported_as_failure() {
        let mut dispatcher = TaskDispatcher::new(config(1, 4)).expect("dispatcher");
        dispatcher
            .add_task(async {
                let explode = true;
                if explode {
                    panic!("kaboom");
                }
                Ok(())
            })
            .await
            .expect("add panicking task");
        dispatcher
            .add_blocking_task(|| Ok(()))
            .await
            .expect("add follow-up task");

        let err = dispatcher.wait_for_all().await.expect_err("should fail");
        match err {
            DispatchError::TaskFailed {
                task,
                source,
                suppressed,
            } => {
                let reason = source.to_string();
                assert_eq!(task, TaskId(0));
                assert!(reason.contains("panicked"), "reason: {reason}");
                assert!(reason.contains("kaboom"), "reason: {reason}");
                assert_eq!(suppressed, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("shipment {0} rejected by publisher")]
    struct Rejected(u32);

    #[tokio::test]
    async fn task_error_stays_reachable_through_the_source_chain() {
        let mut dispatcher = TaskDispatcher::new(config(2, 4)).expect("dispatcher");
        dispatcher
            .add_task(async {
                Err(anyhow::Error::new(Rejected(42)).context("publishing record"))
            })
            .await
            .expect("add task");

        let err = dispatcher.wait_for_all().await.expect_err("should fail");
        let rendered = err.to_string();
        assert!(rendered.contains("publishing record"), "{rendered}");
        assert!(rendered.contains("shipment 42 rejected"), "{rendered}");

        let source = std::error::Error::source(&err).expect("task error is the source");
        assert_eq!(source.to_string(), "publishing record");
        let DispatchError::TaskFailed { source, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(matches!(source.downcast_ref::<Rejected>(), Some(Rejected(42))));
    }

    #[tokio::test]
    async fn try_add_task_rejects_when_queue_is_full() {
        let mut dispatcher = TaskDispatcher::new(config(1, 1)).expect("dispatcher");
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        dispatcher
            .try_add_task(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            })
            .expect("first task fits");
        started_rx.await.expect("first task started");

        // the single worker is busy; one slot left in the queue
        dispatcher
            .try_add_task(async { Ok(()) })
            .expect("second task queued");
        let err = dispatcher
            .try_add_task(async { Ok(()) })
            .expect_err("queue should be full");
        assert!(matches!(err, DispatchError::QueueFull), "{err:?}");

        release_tx.send(()).expect("release first task");
        assert_eq!(dispatcher.wait_for_all().await.expect("wait"), 2);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let mut dispatcher = TaskDispatcher::new(config(2, 8)).expect("dispatcher");
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let counter = Arc::clone(&counter);
            dispatcher
                .add_task(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .expect("add task");
        }

        dispatcher.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn rejects_empty_pool() {
        let err = TaskDispatcher::new(config(0, 4)).err().expect("no workers");
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
        let err = TaskDispatcher::new(config(2, 0)).err().expect("no queue");
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn requires_a_runtime() {
        let err = TaskDispatcher::new(DispatcherConfig::default())
            .err()
            .expect("no runtime");
        assert!(matches!(err, DispatchError::NoRuntime(_)));
    }
}
