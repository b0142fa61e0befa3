use std::sync::Arc;

use tracing::info;

use klaxon_model::JobId;

use crate::error::{AlertError, Result};
use crate::storage::{DeadLetterPage, DeadLetterStore};

use super::job::PublishJob;
use super::priority_queue::Replayer;

/// Operational surface over the dead-letter store: paginated inspection,
/// replay, and purge. Replay goes through the [`Replayer`] seam so this type
/// never holds the queue directly.
pub struct DeadLetterQueue {
    store: Arc<dyn DeadLetterStore>,
    replayer: Arc<dyn Replayer>,
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue").finish()
    }
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DeadLetterStore>, replayer: Arc<dyn Replayer>) -> Self {
        Self { store, replayer }
    }

    pub async fn list(&self, offset: u64, limit: u32) -> Result<DeadLetterPage> {
        self.store.list(offset, limit).await
    }

    /// Requeue a dead job at its original priority with a fresh attempt
    /// budget, then drop it from the store.
    pub async fn replay(&self, job_id: JobId) -> Result<()> {
        let entry = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| AlertError::NotFound(format!("dead letter {job_id}")))?;

        let job = PublishJob {
            id: entry.job_id,
            group_key: entry.group_key.clone(),
            target_name: entry.target_name.clone(),
            priority: entry.priority,
            payload: entry.payload.clone(),
            attempt: 0,
            next_attempt_at: None,
            created_at: entry.first_attempt_at,
            first_attempt_at: None,
        };
        self.replayer.replay(job).await?;
        self.store.remove(job_id).await?;
        info!(job_id = %job_id, target = %entry.target_name, "dead letter replayed");
        Ok(())
    }

    pub async fn purge(&self) -> Result<u64> {
        let purged = self.store.purge().await?;
        info!(purged, "dead letter queue purged");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PriorityQueue;
    use crate::queue::testing::job;
    use crate::storage::DeadLetterEntry;
    use crate::storage::memory::InMemoryDeadLetterStore;
    use chrono::Utc;
    use klaxon_model::Priority;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn entry(job: &PublishJob) -> DeadLetterEntry {
        DeadLetterEntry {
            job_id: job.id,
            group_key: job.group_key.clone(),
            target_name: job.target_name.clone(),
            priority: job.priority,
            attempts: 4,
            reason: "max_retries_exceeded".into(),
            last_error: "503".into(),
            first_attempt_at: Utc::now(),
            last_attempt_at: Utc::now(),
            payload: job.payload.clone(),
        }
    }

    #[tokio::test]
    async fn replay_requeues_with_reset_attempt() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = Arc::new(PriorityQueue::new(
            [4, 4, 4],
            Duration::from_millis(100),
            crate::metrics::noop(),
        ));
        let dlq = DeadLetterQueue::new(store.clone(), queue.clone());

        let dead_job = job(Priority::Medium);
        store.push(&entry(&dead_job)).await.expect("push");

        dlq.replay(dead_job.id).await.expect("replay");

        let token = CancellationToken::new();
        let replayed = queue.dequeue(&token).await.expect("requeued");
        assert_eq!(replayed.id, dead_job.id);
        assert_eq!(replayed.attempt, 0);
        assert_eq!(replayed.priority, Priority::Medium);

        // Entry left the store.
        assert_eq!(store.list(0, 10).await.expect("list").total, 0);
    }

    #[tokio::test]
    async fn replay_of_unknown_job_is_not_found() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = Arc::new(PriorityQueue::new(
            [4, 4, 4],
            Duration::from_millis(100),
            crate::metrics::noop(),
        ));
        let dlq = DeadLetterQueue::new(store, queue);
        let missing = dlq.replay(klaxon_model::JobId::new()).await;
        assert!(matches!(missing, Err(AlertError::NotFound(_))));
    }

    #[tokio::test]
    async fn purge_empties_the_store() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let queue = Arc::new(PriorityQueue::new(
            [4, 4, 4],
            Duration::from_millis(100),
            crate::metrics::noop(),
        ));
        let dlq = DeadLetterQueue::new(store.clone(), queue);

        for _ in 0..3 {
            store.push(&entry(&job(Priority::Low))).await.expect("push");
        }
        assert_eq!(dlq.purge().await.expect("purge"), 3);
        assert_eq!(store.list(0, 10).await.expect("list").total, 0);
    }
}
