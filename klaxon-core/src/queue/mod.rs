//! Asynchronous dispatch substrate: bounded priority queues, a fixed worker
//! pool, delay-wheel retries, dead-lettering, and job state tracking.

mod dlq;
mod job;
mod priority_queue;
mod retry;
mod tracker;
mod workers;

pub use dlq::DeadLetterQueue;
pub use job::{JobState, PublishJob};
pub use priority_queue::{PriorityQueue, Replayer};
pub use retry::{RetryScheduler, retry_delay};
pub use tracker::{JobTracker, TrackedJob};
pub use workers::{DispatchStatus, JobEvent, JobExecutor, WorkerPool};
