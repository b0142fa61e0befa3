use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use klaxon_model::{GroupKey, JobId, Priority};

use super::job::{JobState, PublishJob};

const TRACKER_CAPACITY: usize = 10_000;

/// Inspection view of one job's latest state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job_id: JobId,
    pub group_key: GroupKey,
    pub target_name: String,
    pub priority: Priority,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// LRU-bounded job state map exposed for HTTP inspection. Old terminal jobs
/// age out by eviction; no cleanup pass needed.
pub struct JobTracker {
    jobs: Mutex<LruCache<JobId, TrackedJob>>,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field(
                "tracked",
                &self.jobs.lock().map(|jobs| jobs.len()).unwrap_or_default(),
            )
            .finish()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new(TRACKER_CAPACITY)
    }
}

impl JobTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero"),
            )),
        }
    }

    pub fn transition(
        &self,
        job: &PublishJob,
        state: JobState,
        last_error: Option<&str>,
    ) {
        let mut jobs = self.jobs.lock().expect("tracker mutex");
        jobs.put(
            job.id,
            TrackedJob {
                job_id: job.id,
                group_key: job.group_key.clone(),
                target_name: job.target_name.clone(),
                priority: job.priority,
                state,
                attempts: job.attempt,
                last_error: last_error.map(str::to_owned),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, job_id: JobId) -> Option<TrackedJob> {
        self.jobs
            .lock()
            .expect("tracker mutex")
            .peek(&job_id)
            .cloned()
    }

    /// Most-recently-touched jobs first.
    pub fn snapshot(&self, limit: usize) -> Vec<TrackedJob> {
        self.jobs
            .lock()
            .expect("tracker mutex")
            .iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::job;

    #[test]
    fn transitions_overwrite_latest_state() {
        let tracker = JobTracker::new(16);
        let job = job(Priority::High);

        tracker.transition(&job, JobState::Queued, None);
        tracker.transition(&job, JobState::InFlight, None);
        tracker.transition(&job, JobState::Dead, Some("503"));

        let tracked = tracker.get(job.id).expect("tracked");
        assert_eq!(tracked.state, JobState::Dead);
        assert_eq!(tracked.last_error.as_deref(), Some("503"));
    }

    #[test]
    fn capacity_evicts_oldest_entries() {
        let tracker = JobTracker::new(2);
        let first = job(Priority::High);
        let second = job(Priority::High);
        let third = job(Priority::High);

        tracker.transition(&first, JobState::Queued, None);
        tracker.transition(&second, JobState::Queued, None);
        tracker.transition(&third, JobState::Queued, None);

        assert!(tracker.get(first.id).is_none());
        assert!(tracker.get(third.id).is_some());
        assert_eq!(tracker.snapshot(10).len(), 2);
    }
}
