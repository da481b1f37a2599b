//! The asynchronous learning queue.
//!
//! Interactive hooks must return to the host agent in tens of milliseconds;
//! classification plus a write can exceed that under load. `enqueue` hands
//! the task to a bounded channel and returns a task id immediately; a fixed
//! worker set drains the channel in FIFO order and runs the learn pipeline.
//!
//! Tasks with identical fingerprints coalesce while one is pending: the
//! caller gets the in-flight task's id and the store-level deduplication
//! bumps the existing memory instead of creating a duplicate row.

mod breaker;

pub use breaker::{BreakerConfig, CircuitBreaker};

use crate::config::MemoryConfig;
use crate::learner::Learner;
use crate::models::{LearnOutcome, LearnRequest};
use crate::recall::learn_fingerprint;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Default synchronous-wait budget for `await_task`.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Hard cap on the synchronous wait a caller may request.
pub const MAX_WAIT: Duration = Duration::from_secs(30);

/// Grace period for draining on shutdown.
pub const DRAIN_GRACE: Duration = Duration::from_secs(3);

/// Poll slice while waiting on a task; bounds the notify race window.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Status of a queued learn task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Queued or in flight.
    Pending,
    /// Pipeline finished.
    Done(LearnOutcome),
    /// Pipeline failed; carries the error text.
    Failed(String),
    /// Abandoned during shutdown.
    Cancelled,
}

impl TaskStatus {
    /// True once the task will never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A queued unit of work.
struct LearnTask {
    task_id: String,
    fingerprint: String,
    request: LearnRequest,
}

/// Shared queue state between handle and workers.
struct QueueShared {
    statuses: Mutex<HashMap<String, TaskStatus>>,
    /// fingerprint → in-flight task id, for coalescing.
    pending: Mutex<HashMap<String, String>>,
    completed: Notify,
    breaker: Mutex<CircuitBreaker>,
    shutting_down: AtomicBool,
}

/// Bounded MPSC learn queue with a fixed worker set.
pub struct LearnQueue {
    /// Taken on shutdown so workers see the channel close.
    sender: Mutex<Option<mpsc::Sender<LearnTask>>>,
    shared: Arc<QueueShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl LearnQueue {
    /// Starts the queue and its workers on the current tokio runtime.
    #[must_use]
    pub fn start(learner: Arc<Learner>, config: &MemoryConfig) -> Self {
        let capacity = config.performance.queue_capacity.max(1);
        let worker_count = config.performance.queue_workers.max(1);
        let (sender, receiver) = mpsc::channel::<LearnTask>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let shared = Arc::new(QueueShared {
            statuses: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            completed: Notify::new(),
            breaker: Mutex::new(CircuitBreaker::new(BreakerConfig::default())),
            shutting_down: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&shared);
            let learner = Arc::clone(&learner);
            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, shared, learner).await;
            }));
        }

        Self {
            sender: Mutex::new(Some(sender)),
            shared,
            workers: Mutex::new(workers),
            capacity,
        }
    }

    /// Enqueues a learn task, returning its id immediately.
    ///
    /// A pending task with the same fingerprint is returned instead of
    /// queueing twice (queue coalescing).
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] when the channel is at capacity, the
    /// circuit breaker is open, or the queue is shutting down. Callers may
    /// then run the pipeline synchronously.
    pub fn enqueue(&self, request: LearnRequest) -> Result<String> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        if !lock(&self.shared.breaker).allow() {
            metrics::counter!("learn_queue_rejected_total", "reason" => "breaker").increment(1);
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }

        let fingerprint = learn_fingerprint(&request.content, request.user_id.as_deref());
        let coalesced = lock(&self.shared.pending).get(&fingerprint).cloned();
        if let Some(existing) = coalesced {
            metrics::counter!("learn_queue_coalesced_total").increment(1);
            return Ok(existing);
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        lock(&self.shared.statuses).insert(task_id.clone(), TaskStatus::Pending);
        lock(&self.shared.pending).insert(fingerprint.clone(), task_id.clone());

        let task = LearnTask {
            task_id: task_id.clone(),
            fingerprint: fingerprint.clone(),
            request,
        };
        let sent = lock(&self.sender)
            .as_ref()
            .map_or(Err(()), |sender| sender.try_send(task).map_err(|_| ()));
        match sent {
            Ok(()) => {
                metrics::counter!("learn_queue_enqueued_total").increment(1);
                Ok(task_id)
            },
            Err(()) => {
                lock(&self.shared.statuses).remove(&task_id);
                lock(&self.shared.pending).remove(&fingerprint);
                metrics::counter!("learn_queue_rejected_total", "reason" => "full").increment(1);
                Err(Error::QueueFull {
                    capacity: self.capacity,
                })
            },
        }
    }

    /// Current status of a task. Unknown ids read as `Cancelled`.
    #[must_use]
    pub fn status(&self, task_id: &str) -> TaskStatus {
        lock(&self.shared.statuses)
            .get(task_id)
            .cloned()
            .unwrap_or(TaskStatus::Cancelled)
    }

    /// Waits up to `timeout` for a task to reach a terminal status.
    ///
    /// Returns `Pending` when the budget expires while the task is still in
    /// flight; the caller may poll again later.
    pub async fn await_task(&self, task_id: &str, timeout: Duration) -> TaskStatus {
        let deadline = tokio::time::Instant::now() + timeout.min(MAX_WAIT);
        loop {
            let status = self.status(task_id);
            if status.is_terminal() {
                return status;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return TaskStatus::Pending;
            }
            let slice = WAIT_SLICE.min(deadline - now);
            let _ = tokio::time::timeout(slice, self.shared.completed.notified()).await;
        }
    }

    /// Stops accepting tasks, drains within the grace period, and abandons
    /// the rest as `Cancelled`.
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        // Closing the channel lets workers drain the backlog and exit.
        drop(lock(&self.sender).take());

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.workers));
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("learn queue drain exceeded grace, abandoning remaining tasks");
        }

        for status in lock(&self.shared.statuses).values_mut() {
            if *status == TaskStatus::Pending {
                *status = TaskStatus::Cancelled;
            }
        }
        self.shared.completed.notify_waiters();
    }

    /// Worker: pull tasks FIFO and run the pipeline.
    ///
    /// The pipeline runs on the blocking pool; a panic there surfaces as a
    /// join error, the task is reported failed, and the worker keeps going.
    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<LearnTask>>>,
        shared: Arc<QueueShared>,
        learner: Arc<Learner>,
    ) {
        loop {
            let task = {
                let mut rx = receiver.lock().await;
                rx.recv().await
            };
            let Some(task) = task else { break };

            let learner = Arc::clone(&learner);
            let request = task.request;
            let joined =
                tokio::task::spawn_blocking(move || learner.learn(&request)).await;

            let status = match joined {
                Ok(Ok(outcome)) => {
                    lock(&shared.breaker).on_success();
                    TaskStatus::Done(outcome)
                },
                Ok(Err(e)) => {
                    tracing::warn!(worker_id, task_id = %task.task_id, error = %e, "learn task failed");
                    metrics::counter!("learn_queue_failed_total").increment(1);
                    lock(&shared.breaker).on_failure();
                    TaskStatus::Failed(e.to_string())
                },
                Err(join_error) => {
                    tracing::error!(worker_id, task_id = %task.task_id, error = %join_error, "learn worker panicked, restarting");
                    metrics::counter!("learn_queue_failed_total").increment(1);
                    lock(&shared.breaker).on_failure();
                    TaskStatus::Failed("worker panicked".to_string())
                },
            };

            lock(&shared.pending).remove(&task.fingerprint);
            lock(&shared.statuses).insert(task.task_id, status);
            shared.completed.notify_waiters();
        }
        tracing::debug!(worker_id, "learn worker drained and stopped");
    }
}

/// Mutex lock with poison recovery; queue state stays usable after a panic.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("learn queue mutex was poisoned, recovering");
            poisoned.into_inner()
        },
    }
}
