use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::metrics::MetricsSink;

use super::job::PublishJob;
use super::priority_queue::PriorityQueue;

/// Exponential backoff with jitter, clamped to `[min_retry, max_retry]`.
///
/// `attempt` is the number of deliveries already failed, so the first retry
/// waits `base`, the second `base·backoff`, and so on.
pub fn retry_delay<R: Rng>(config: &QueueConfig, attempt: u32, rng: &mut R) -> Duration {
    let base = config.retry_interval_base_ms as f64
        * config.retry_backoff.powi(attempt as i32);
    let jitter_factor = 1.0 + config.jitter * rng.random_range(-1.0..=1.0);
    let ms = (base * jitter_factor)
        .round()
        .clamp(config.min_retry_ms as f64, config.max_retry_ms as f64);
    Duration::from_millis(ms as u64)
}

/// Handle for parking failed jobs until their `next_attempt_at`.
#[derive(Clone)]
pub struct RetryScheduler {
    tx: mpsc::Sender<(PublishJob, Duration)>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler").finish()
    }
}

impl RetryScheduler {
    /// Spawn the delay-wheel task. Expired jobs re-enter the priority queue
    /// at their original priority.
    pub fn spawn(
        queue: Arc<PriorityQueue>,
        shutdown: CancellationToken,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(PublishJob, Duration)>(1_024);

        let handle = tokio::spawn(async move {
            let mut wheel: DelayQueue<PublishJob> = DelayQueue::new();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!(parked = wheel.len(), "retry scheduler shutting down");
                        break;
                    }
                    command = rx.recv() => match command {
                        Some((job, delay)) => {
                            debug!(
                                job_id = %job.id,
                                delay_ms = delay.as_millis() as u64,
                                attempt = job.attempt,
                                "parked job for retry"
                            );
                            wheel.insert(job, delay);
                        }
                        None => break,
                    },
                    Some(expired) = wheel.next(), if !wheel.is_empty() => {
                        let job = expired.into_inner();
                        metrics.incr(
                            "jobs_retried_total",
                            &[("priority", job.priority.as_str())],
                        );
                        if let Err(err) = queue.enqueue(job).await {
                            // The lane stayed full for the whole enqueue
                            // timeout; the retry is lost to backpressure.
                            warn!(error = %err, "retry re-enqueue failed");
                        }
                    }
                }
            }
        });

        (Self { tx }, handle)
    }

    pub async fn schedule(&self, job: PublishJob, delay: Duration) {
        if self.tx.send((job, delay)).await.is_err() {
            warn!("retry scheduler is gone, dropping retry");
        }
    }
}
