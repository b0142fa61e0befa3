use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use klaxon_model::JobId;

use crate::config::QueueConfig;
use crate::metrics::MetricsSink;
use crate::storage::{DeadLetterEntry, DeadLetterStore};

use super::job::{JobState, PublishJob};
use super::priority_queue::PriorityQueue;
use super::retry::{RetryScheduler, retry_delay};
use super::tracker::JobTracker;

/// Outcome of executing one leased job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Success,
    Retry { error: String },
    DeadLetter { error: String },
}

/// Executes a job against its target; implemented by the publish dispatcher.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &PublishJob) -> DispatchStatus;
}

/// Job lifecycle events for external subscribers (WebSocket layer etc.).
#[derive(Debug, Clone)]
pub enum JobEvent {
    Succeeded {
        job_id: JobId,
        target_name: String,
    },
    Retried {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
    },
    DeadLettered {
        job_id: JobId,
        reason: String,
    },
}

/// Fixed pool draining the priority queue with strict priority.
pub struct WorkerPool {
    queue: Arc<PriorityQueue>,
    executor: Arc<dyn JobExecutor>,
    retry: RetryScheduler,
    dead_letters: Arc<dyn DeadLetterStore>,
    tracker: Arc<JobTracker>,
    config: QueueConfig,
    metrics: Arc<dyn MetricsSink>,
    events: broadcast::Sender<JobEvent>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.workers)
            .field("queue", &self.queue)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<PriorityQueue>,
        executor: Arc<dyn JobExecutor>,
        retry: RetryScheduler,
        dead_letters: Arc<dyn DeadLetterStore>,
        tracker: Arc<JobTracker>,
        config: QueueConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            queue,
            executor,
            retry,
            dead_letters,
            tracker,
            config,
            metrics,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Spawn the configured number of workers; each stops on cancellation.
    pub fn spawn(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|index| {
                let pool = Arc::clone(self);
                let token = shutdown.clone();
                tokio::spawn(async move {
                    debug!(worker = index, "queue worker started");
                    while let Some(job) = pool.queue.dequeue(&token).await {
                        pool.run_job(job).await;
                    }
                    info!(worker = index, "queue worker shutting down");
                })
            })
            .collect()
    }

    async fn run_job(&self, mut job: PublishJob) {
        if job.first_attempt_at.is_none() {
            job.first_attempt_at = Some(Utc::now());
        }
        self.tracker.transition(&job, JobState::InFlight, None);

        let status = self.executor.execute(&job).await;
        match status {
            DispatchStatus::Success => {
                self.metrics.incr(
                    "jobs_succeeded_total",
                    &[("priority", job.priority.as_str())],
                );
                self.tracker.transition(&job, JobState::Succeeded, None);
                let _ = self.events.send(JobEvent::Succeeded {
                    job_id: job.id,
                    target_name: job.target_name.clone(),
                });
            }
            DispatchStatus::Retry { error } => {
                if job.attempt + 1 <= self.config.max_retries {
                    let delay = retry_delay(
                        &self.config,
                        job.attempt,
                        &mut rand::rng(),
                    );
                    job.attempt += 1;
                    job.next_attempt_at = Some(
                        Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(1)),
                    );
                    self.tracker
                        .transition(&job, JobState::Failed, Some(error.as_str()));
                    let _ = self.events.send(JobEvent::Retried {
                        job_id: job.id,
                        attempt: job.attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    self.retry.schedule(job, delay).await;
                } else {
                    self.dead_letter(job, "max_retries_exceeded", error).await;
                }
            }
            DispatchStatus::DeadLetter { error } => {
                self.dead_letter(job, "permanent_failure", error).await;
            }
        }
    }

    async fn dead_letter(&self, job: PublishJob, reason: &str, last_error: String) {
        error!(
            job_id = %job.id,
            target = %job.target_name,
            attempts = job.attempt + 1,
            reason,
            error = %last_error,
            "job dead-lettered"
        );
        self.metrics
            .incr("jobs_dead_lettered_total", &[("reason", reason)]);

        let now = Utc::now();
        let entry = DeadLetterEntry {
            job_id: job.id,
            group_key: job.group_key.clone(),
            target_name: job.target_name.clone(),
            priority: job.priority,
            attempts: job.attempt + 1,
            reason: reason.to_string(),
            last_error: last_error.clone(),
            first_attempt_at: job.first_attempt_at.unwrap_or(job.created_at),
            last_attempt_at: now,
            payload: job.payload.clone(),
        };
        if let Err(err) = self.dead_letters.push(&entry).await {
            error!(job_id = %job.id, error = %err, "failed to persist dead letter");
        }
        self.tracker
            .transition(&job, JobState::Dead, Some(last_error.as_str()));
        let _ = self.events.send(JobEvent::DeadLettered {
            job_id: job.id,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::job;
    use crate::storage::memory::InMemoryDeadLetterStore;
    use klaxon_model::Priority;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedExecutor {
        calls: AtomicU32,
        /// Number of failures before succeeding; `u32::MAX` fails forever.
        failures: u32,
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn execute(&self, _job: &PublishJob) -> DispatchStatus {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                DispatchStatus::Retry {
                    error: "503 service unavailable".into(),
                }
            } else {
                DispatchStatus::Success
            }
        }
    }

    struct Harness {
        queue: Arc<PriorityQueue>,
        pool: Arc<WorkerPool>,
        executor: Arc<ScriptedExecutor>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        tracker: Arc<JobTracker>,
        token: CancellationToken,
    }

    fn harness(failures: u32) -> Harness {
        let config = QueueConfig {
            workers: 1,
            max_retries: 3,
            retry_interval_base_ms: 1_000,
            min_retry_ms: 100,
            ..QueueConfig::default()
        };
        let queue = Arc::new(PriorityQueue::new(
            [16, 16, 16],
            Duration::from_millis(100),
            crate::metrics::noop(),
        ));
        let token = CancellationToken::new();
        let (retry, _retry_handle) = RetryScheduler::spawn(
            Arc::clone(&queue),
            token.clone(),
            crate::metrics::noop(),
        );
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicU32::new(0),
            failures,
        });
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let tracker = Arc::new(JobTracker::default());
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            executor.clone(),
            retry,
            dead_letters.clone(),
            tracker.clone(),
            config,
            crate::metrics::noop(),
        ));
        Harness {
            queue,
            pool,
            executor,
            dead_letters,
            tracker,
            token,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn job_succeeds_first_try() {
        let h = harness(0);
        let _workers = h.pool.spawn(h.token.clone());
        let job = job(Priority::High);
        let job_id = job.id;
        h.queue.enqueue(job).await.expect("enqueue");

        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(10)).await;
            tokio::task::yield_now().await;
        }

        let tracked = h.tracker.get(job_id).expect("tracked");
        assert_eq!(tracked.state, JobState::Succeeded);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let h = harness(2);
        let _workers = h.pool.spawn(h.token.clone());
        let job = job(Priority::High);
        let job_id = job.id;
        h.queue.enqueue(job).await.expect("enqueue");

        // Two failed attempts at ~1s and ~2s backoff, then success.
        for _ in 0..40 {
            tokio::time::advance(Duration::from_millis(200)).await;
            tokio::task::yield_now().await;
        }

        let tracked = h.tracker.get(job_id).expect("tracked");
        assert_eq!(tracked.state, JobState::Succeeded);
        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 3);
        assert!(h.dead_letters.list(0, 10).await.expect("list").entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_dead_letters() {
        let h = harness(u32::MAX);
        let _workers = h.pool.spawn(h.token.clone());
        let job = job(Priority::Medium);
        let job_id = job.id;
        h.queue.enqueue(job).await.expect("enqueue");

        // 1 initial + 3 retries at ~1s/2s/4s, then the budget is gone.
        for _ in 0..120 {
            tokio::time::advance(Duration::from_millis(200)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(h.executor.calls.load(Ordering::SeqCst), 4);
        let tracked = h.tracker.get(job_id).expect("tracked");
        assert_eq!(tracked.state, JobState::Dead);

        let page = h.dead_letters.list(0, 10).await.expect("list");
        assert_eq!(page.total, 1);
        let entry = &page.entries[0];
        assert_eq!(entry.reason, "max_retries_exceeded");
        assert_eq!(entry.attempts, 4);
        assert_eq!(entry.last_error, "503 service unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_dead_letters_without_retry() {
        struct PermanentFail;
        #[async_trait]
        impl JobExecutor for PermanentFail {
            async fn execute(&self, _job: &PublishJob) -> DispatchStatus {
                DispatchStatus::DeadLetter {
                    error: "404 not found".into(),
                }
            }
        }

        let h = harness(0);
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&h.queue),
            Arc::new(PermanentFail),
            {
                let (retry, _handle) = RetryScheduler::spawn(
                    Arc::clone(&h.queue),
                    h.token.clone(),
                    crate::metrics::noop(),
                );
                retry
            },
            h.dead_letters.clone(),
            h.tracker.clone(),
            QueueConfig {
                workers: 1,
                ..QueueConfig::default()
            },
            crate::metrics::noop(),
        ));
        let _workers = pool.spawn(h.token.clone());

        let job = job(Priority::Low);
        h.queue.enqueue(job).await.expect("enqueue");
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(10)).await;
            tokio::task::yield_now().await;
        }

        let page = h.dead_letters.list(0, 10).await.expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].reason, "permanent_failure");
        assert_eq!(page.entries[0].attempts, 1);
    }
}
