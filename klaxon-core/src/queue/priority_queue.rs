use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use klaxon_model::Priority;

use crate::error::{AlertError, Result};
use crate::metrics::MetricsSink;

use super::job::PublishJob;

/// Requeue seam the dead-letter queue depends on, so the DLQ never needs a
/// direct handle on the queue that needs the DLQ.
#[async_trait]
pub trait Replayer: Send + Sync {
    /// Requeue at the job's original priority.
    async fn replay(&self, job: PublishJob) -> Result<()>;
}

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<PublishJob>,
    medium: VecDeque<PublishJob>,
    low: VecDeque<PublishJob>,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<PublishJob> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    /// Strict priority pop: high, then medium, then low.
    fn pop(&mut self) -> Option<PublishJob> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

/// Three bounded in-memory queues drained with strict priority. Fairness is
/// handled by capacity, not by scheduling; a full lane blocks producers with
/// a timeout and the overflow is counted as `queue_full`.
pub struct PriorityQueue {
    lanes: Mutex<Lanes>,
    caps: [usize; 3],
    enqueue_timeout: Duration,
    items: Notify,
    space: Notify,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depths = self.depths();
        f.debug_struct("PriorityQueue")
            .field("high", &depths[0])
            .field("medium", &depths[1])
            .field("low", &depths[2])
            .finish()
    }
}

impl PriorityQueue {
    pub fn new(
        caps: [usize; 3],
        enqueue_timeout: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            caps,
            enqueue_timeout,
            items: Notify::new(),
            space: Notify::new(),
            metrics,
        }
    }

    fn cap(&self, priority: Priority) -> usize {
        self.caps[priority as usize]
    }

    fn try_push(&self, job: PublishJob) -> std::result::Result<(), PublishJob> {
        let mut lanes = self.lanes.lock().expect("queue mutex");
        let cap = self.cap(job.priority);
        let lane = lanes.lane_mut(job.priority);
        if lane.len() >= cap {
            return Err(job);
        }
        lane.push_back(job);
        drop(lanes);
        self.items.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<PublishJob> {
        let job = self.lanes.lock().expect("queue mutex").pop();
        if job.is_some() {
            self.space.notify_one();
        }
        job
    }

    /// Block (with timeout) when the lane is full; overflow is `queue_full`.
    pub async fn enqueue(&self, job: PublishJob) -> Result<()> {
        let deadline = Instant::now() + self.enqueue_timeout;
        let mut pending = job;
        loop {
            match self.try_push(pending) {
                Ok(()) => return Ok(()),
                Err(job) => pending = job,
            }

            let notified = self.space.notified();
            // Close the race with a consumer that freed space before we
            // registered interest.
            match self.try_push(pending) {
                Ok(()) => return Ok(()),
                Err(job) => pending = job,
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || tokio::time::timeout(remaining, notified).await.is_err()
            {
                self.metrics.incr(
                    "queue_full_total",
                    &[("priority", pending.priority.as_str())],
                );
                warn!(
                    priority = %pending.priority,
                    job_id = %pending.id,
                    "queue full, rejecting job"
                );
                return Err(AlertError::QueueFull(format!(
                    "{} lane at capacity",
                    pending.priority
                )));
            }
        }
    }

    /// Wait for the next job in strict priority order; `None` on shutdown.
    pub async fn dequeue(&self, shutdown: &CancellationToken) -> Option<PublishJob> {
        loop {
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            let notified = self.items.notified();
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// Current depths as `[high, medium, low]`.
    pub fn depths(&self) -> [usize; 3] {
        let lanes = self.lanes.lock().expect("queue mutex");
        [lanes.high.len(), lanes.medium.len(), lanes.low.len()]
    }
}

#[async_trait]
impl Replayer for PriorityQueue {
    async fn replay(&self, mut job: PublishJob) -> Result<()> {
        job.attempt = 0;
        job.next_attempt_at = None;
        self.enqueue(job).await
    }
}
