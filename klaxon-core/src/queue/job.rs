use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use klaxon_contracts::notification::RenderedNotification;
use klaxon_model::{GroupKey, JobId, Priority};

/// Scheduler-visible job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    InFlight,
    Succeeded,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::InFlight => "in_flight",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Dead)
    }
}

/// One notification delivery to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: JobId,
    pub group_key: GroupKey,
    pub target_name: String,
    /// Derived from the max severity among flushed members.
    pub priority: Priority,
    pub payload: RenderedNotification,
    /// Completed delivery attempts so far; bounded by `max_retries`.
    pub attempt: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub first_attempt_at: Option<DateTime<Utc>>,
}

impl PublishJob {
    pub fn new(
        group_key: GroupKey,
        target_name: impl Into<String>,
        priority: Priority,
        payload: RenderedNotification,
    ) -> Self {
        Self {
            id: JobId::new(),
            group_key,
            target_name: target_name.into(),
            priority,
            payload,
            attempt: 0,
            next_attempt_at: None,
            created_at: Utc::now(),
            first_attempt_at: None,
        }
    }
}
