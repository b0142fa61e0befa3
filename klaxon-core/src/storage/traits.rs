use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use klaxon_contracts::notification::RenderedNotification;
use klaxon_model::{
    Alert, Fingerprint, GroupKey, HistoryEntry, JobId, Priority, Severity,
    Silence, SilenceId, SilenceStatus, StoredAlert,
};

use crate::error::Result;

/// Outcome of the atomic dedup upsert.
#[derive(Debug, Clone)]
pub struct AlertUpsert {
    /// True when this ingest created the row.
    pub inserted: bool,
    pub stored: StoredAlert,
}

/// One row per fingerprint plus the append-only history log.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert the alert or, when the fingerprint exists, bump its occurrence
    /// counter and refresh `last_seen` in a single atomic statement.
    async fn upsert_firing(&self, alert: &Alert) -> Result<AlertUpsert>;

    /// Transition the stored row to resolved with the given `ends_at`,
    /// regardless of prior state. Returns the updated row if it exists.
    async fn resolve(
        &self,
        fingerprint: Fingerprint,
        ends_at: DateTime<Utc>,
    ) -> Result<Option<StoredAlert>>;

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredAlert>>;

    /// Record the classified severity on the stored row.
    async fn set_severity(
        &self,
        fingerprint: Fingerprint,
        severity: Severity,
    ) -> Result<()>;

    /// Fingerprints of all currently-firing alerts (inhibition source scan).
    async fn firing_fingerprints(&self) -> Result<Vec<Fingerprint>>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;

    async fn history(
        &self,
        fingerprint: Fingerprint,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>>;
}

/// Silence CRUD with optimistic concurrency on `updated_at`.
#[async_trait]
pub trait SilenceStore: Send + Sync {
    async fn create(&self, silence: &Silence) -> Result<Silence>;

    async fn get(&self, id: SilenceId) -> Result<Option<Silence>>;

    async fn list(&self, status: Option<SilenceStatus>) -> Result<Vec<Silence>>;

    /// Apply the update iff the stored `updated_at` equals
    /// `expected_updated_at`; mismatch fails with `Conflict`.
    async fn update(
        &self,
        silence: &Silence,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Silence>;

    async fn delete(&self, id: SilenceId) -> Result<()>;

    /// Derive and persist status from the clock for every row. Returns the
    /// number of rows whose status changed.
    async fn bulk_update_status(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Force-expire a silence immediately.
    async fn expire(&self, id: SilenceId, now: DateTime<Utc>) -> Result<Silence>;

    async fn expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: Duration,
    ) -> Result<Vec<Silence>>;

    async fn stats(&self) -> Result<SilenceStats>;

    /// Silences active at `now`; feeds the in-memory matcher cache.
    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Silence>>;
}

/// Counts by lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceStats {
    pub pending: u64,
    pub active: u64,
    pub expired: u64,
}

impl SilenceStats {
    pub fn total(&self) -> u64 {
        self.pending + self.active + self.expired
    }
}

/// Which group timer a persisted record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireType {
    GroupWait,
    GroupInterval,
}

impl FireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireType::GroupWait => "group_wait",
            FireType::GroupInterval => "group_interval",
        }
    }
}

impl fmt::Display for FireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FireType {
    type Err = crate::error::AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "group_wait" => Ok(FireType::GroupWait),
            "group_interval" => Ok(FireType::GroupInterval),
            other => Err(crate::error::AlertError::DataCorruption(format!(
                "unrecognized fire type {other:?}"
            ))),
        }
    }
}

/// Persisted group timer, unique on `(group_key, fire_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub group_key: GroupKey,
    pub fire_type: FireType,
    pub fire_at: DateTime<Utc>,
    pub owner_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable timer coordination across process restarts and replicas.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Atomic insert; returns false when a record already exists for the
    /// `(group_key, fire_type)` pair (another owner holds it).
    async fn put_if_absent(&self, record: &TimerRecord) -> Result<bool>;

    /// Upsert that also takes ownership.
    async fn reschedule(&self, record: &TimerRecord) -> Result<()>;

    async fn remove(&self, group_key: &GroupKey, fire_type: FireType) -> Result<()>;

    async fn all(&self) -> Result<Vec<TimerRecord>>;

    /// Take ownership of an existing record; false when the record is gone.
    async fn claim(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool>;

    /// Whether the record still names `owner_id`; a fire is skipped otherwise.
    async fn is_owner(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool>;
}

/// A job whose retry budget is exhausted, parked for inspection or replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: JobId,
    pub group_key: GroupKey,
    pub target_name: String,
    pub priority: Priority,
    pub attempts: u32,
    pub reason: String,
    pub last_error: String,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub payload: RenderedNotification,
}

/// One page of dead letters, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterPage {
    pub entries: Vec<DeadLetterEntry>,
    pub total: u64,
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()>;

    async fn list(&self, offset: u64, limit: u32) -> Result<DeadLetterPage>;

    async fn get(&self, job_id: JobId) -> Result<Option<DeadLetterEntry>>;

    async fn remove(&self, job_id: JobId) -> Result<()>;

    /// Drop everything; returns the number of purged entries.
    async fn purge(&self) -> Result<u64>;
}
