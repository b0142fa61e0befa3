//! In-memory store implementations.
//!
//! Used by the test suite and by degraded boots where Postgres is not yet
//! reachable. Semantics mirror the Postgres implementations exactly; the
//! write lock stands in for row-level locking.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use klaxon_model::{
    Alert, AlertStatus, Fingerprint, GroupKey, HistoryEntry, JobId, Severity,
    Silence, SilenceId, SilenceStatus, StoredAlert,
};

use crate::error::{AlertError, Result};

use super::traits::{
    AlertStore, AlertUpsert, DeadLetterEntry, DeadLetterPage, DeadLetterStore,
    FireType, SilenceStats, SilenceStore, TimerRecord, TimerStore,
};

#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<HashMap<Fingerprint, StoredAlert>>,
    history: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn upsert_firing(&self, alert: &Alert) -> Result<AlertUpsert> {
        let now = Utc::now();
        let mut alerts = self.alerts.write().await;
        match alerts.get_mut(&alert.fingerprint) {
            Some(existing) => {
                existing.occurrence_count += 1;
                existing.last_seen = now;
                existing.alert.status = AlertStatus::Firing;
                existing.alert.ends_at = None;
                existing.alert.labels = alert.labels.clone();
                existing.alert.annotations = alert.annotations.clone();
                Ok(AlertUpsert {
                    inserted: false,
                    stored: existing.clone(),
                })
            }
            None => {
                let stored = StoredAlert {
                    alert: alert.clone(),
                    occurrence_count: 1,
                    first_seen: now,
                    last_seen: now,
                };
                alerts.insert(alert.fingerprint, stored.clone());
                Ok(AlertUpsert {
                    inserted: true,
                    stored,
                })
            }
        }
    }

    async fn resolve(
        &self,
        fingerprint: Fingerprint,
        ends_at: DateTime<Utc>,
    ) -> Result<Option<StoredAlert>> {
        let mut alerts = self.alerts.write().await;
        Ok(alerts.get_mut(&fingerprint).map(|stored| {
            stored.alert.status = AlertStatus::Resolved;
            stored.alert.ends_at = Some(ends_at);
            stored.last_seen = stored.last_seen.max(ends_at);
            stored.clone()
        }))
    }

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredAlert>> {
        Ok(self.alerts.read().await.get(&fingerprint).cloned())
    }

    async fn set_severity(
        &self,
        fingerprint: Fingerprint,
        severity: Severity,
    ) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        if let Some(stored) = alerts.get_mut(&fingerprint) {
            stored.alert.severity = Some(severity);
        }
        Ok(())
    }

    async fn firing_fingerprints(&self) -> Result<Vec<Fingerprint>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|stored| stored.alert.status == AlertStatus::Firing)
            .map(|stored| stored.alert.fingerprint)
            .collect())
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn history(
        &self,
        fingerprint: Fingerprint,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .rev()
            .filter(|entry| entry.fingerprint == fingerprint)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySilenceStore {
    silences: RwLock<HashMap<SilenceId, Silence>>,
}

impl InMemorySilenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SilenceStore for InMemorySilenceStore {
    async fn create(&self, silence: &Silence) -> Result<Silence> {
        silence.validate()?;
        let mut silences = self.silences.write().await;
        if silences.contains_key(&silence.id) {
            return Err(AlertError::Conflict(format!(
                "silence {} already exists",
                silence.id
            )));
        }
        let now = Utc::now();
        let mut stored = silence.clone();
        stored.created_at = now;
        stored.updated_at = now;
        stored.status = stored.status_at(now);
        silences.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: SilenceId) -> Result<Option<Silence>> {
        Ok(self.silences.read().await.get(&id).cloned())
    }

    async fn list(&self, status: Option<SilenceStatus>) -> Result<Vec<Silence>> {
        let silences = self.silences.read().await;
        let mut out: Vec<Silence> = silences
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn update(
        &self,
        silence: &Silence,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Silence> {
        silence.validate()?;
        let mut silences = self.silences.write().await;
        let existing = silences.get_mut(&silence.id).ok_or_else(|| {
            AlertError::NotFound(format!("silence {}", silence.id))
        })?;
        if existing.updated_at != expected_updated_at {
            return Err(AlertError::Conflict(format!(
                "silence {} was modified at {}, caller expected {}",
                silence.id, existing.updated_at, expected_updated_at
            )));
        }
        let now = Utc::now();
        let mut updated = silence.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = now;
        updated.status = updated.status_at(now);
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: SilenceId) -> Result<()> {
        let mut silences = self.silences.write().await;
        silences
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AlertError::NotFound(format!("silence {id}")))
    }

    async fn bulk_update_status(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut silences = self.silences.write().await;
        let mut changed = 0;
        for silence in silences.values_mut() {
            let derived = silence.status_at(now);
            if silence.status != derived {
                silence.status = derived;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn expire(&self, id: SilenceId, now: DateTime<Utc>) -> Result<Silence> {
        let mut silences = self.silences.write().await;
        let silence = silences
            .get_mut(&id)
            .ok_or_else(|| AlertError::NotFound(format!("silence {id}")))?;
        silence.ends_at = now;
        silence.status = SilenceStatus::Expired;
        silence.updated_at = now;
        Ok(silence.clone())
    }

    async fn expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: Duration,
    ) -> Result<Vec<Silence>> {
        let cutoff = now + within;
        let silences = self.silences.read().await;
        Ok(silences
            .values()
            .filter(|s| {
                s.status == SilenceStatus::Active
                    && s.ends_at > now
                    && s.ends_at <= cutoff
            })
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<SilenceStats> {
        let silences = self.silences.read().await;
        let mut stats = SilenceStats::default();
        for silence in silences.values() {
            match silence.status {
                SilenceStatus::Pending => stats.pending += 1,
                SilenceStatus::Active => stats.active += 1,
                SilenceStatus::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Silence>> {
        let silences = self.silences.read().await;
        Ok(silences
            .values()
            .filter(|s| s.status_at(now) == SilenceStatus::Active)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTimerStore {
    timers: RwLock<HashMap<(GroupKey, FireType), TimerRecord>>,
}

impl InMemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimerStore for InMemoryTimerStore {
    async fn put_if_absent(&self, record: &TimerRecord) -> Result<bool> {
        let mut timers = self.timers.write().await;
        let key = (record.group_key.clone(), record.fire_type);
        if timers.contains_key(&key) {
            return Ok(false);
        }
        timers.insert(key, record.clone());
        Ok(true)
    }

    async fn reschedule(&self, record: &TimerRecord) -> Result<()> {
        let mut timers = self.timers.write().await;
        timers.insert(
            (record.group_key.clone(), record.fire_type),
            record.clone(),
        );
        Ok(())
    }

    async fn remove(&self, group_key: &GroupKey, fire_type: FireType) -> Result<()> {
        self.timers
            .write()
            .await
            .remove(&(group_key.clone(), fire_type));
        Ok(())
    }

    async fn all(&self) -> Result<Vec<TimerRecord>> {
        Ok(self.timers.read().await.values().cloned().collect())
    }

    async fn claim(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool> {
        let mut timers = self.timers.write().await;
        match timers.get_mut(&(group_key.clone(), fire_type)) {
            Some(record) => {
                record.owner_id = owner_id.to_string();
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_owner(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool> {
        let timers = self.timers.read().await;
        Ok(timers
            .get(&(group_key.clone(), fire_type))
            .is_some_and(|record| record.owner_id == owner_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list(&self, offset: u64, limit: u32) -> Result<DeadLetterPage> {
        let entries = self.entries.read().await;
        let total = entries.len() as u64;
        let page = entries
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(DeadLetterPage {
            entries: page,
            total,
        })
    }

    async fn get(&self, job_id: JobId) -> Result<Option<DeadLetterEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.job_id == job_id).cloned())
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|e| e.job_id != job_id);
        Ok(())
    }

    async fn purge(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let purged = entries.len() as u64;
        entries.clear();
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaxon_model::{LabelSet, Matcher};

    fn firing_alert(name: &str) -> Alert {
        let labels: LabelSet = [("alertname", name)].into_iter().collect();
        Alert {
            fingerprint: crate::fingerprint::fingerprint(&labels),
            alert_name: name.to_string(),
            labels,
            annotations: LabelSet::new(),
            status: AlertStatus::Firing,
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            severity: None,
        }
    }

    #[tokio::test]
    async fn repeated_upserts_keep_one_row() {
        let store = InMemoryAlertStore::new();
        let alert = firing_alert("HighCPU");
        for _ in 0..5 {
            store.upsert_firing(&alert).await.expect("upsert");
        }
        let stored = store
            .get(alert.fingerprint)
            .await
            .expect("get")
            .expect("row exists");
        assert_eq!(stored.occurrence_count, 5);
        assert_eq!(
            store.firing_fingerprints().await.expect("firing").len(),
            1
        );
    }

    #[tokio::test]
    async fn resolve_transitions_regardless_of_prior_state() {
        let store = InMemoryAlertStore::new();
        let alert = firing_alert("HighCPU");
        store.upsert_firing(&alert).await.expect("upsert");
        let ends_at = Utc::now();
        let stored = store
            .resolve(alert.fingerprint, ends_at)
            .await
            .expect("resolve")
            .expect("row exists");
        assert_eq!(stored.alert.status, AlertStatus::Resolved);
        assert_eq!(stored.alert.ends_at, Some(ends_at));
        assert!(store.firing_fingerprints().await.expect("firing").is_empty());
    }

    #[tokio::test]
    async fn silence_update_enforces_optimistic_lock() {
        let store = InMemorySilenceStore::new();
        let now = Utc::now();
        let silence = Silence {
            id: SilenceId::new(),
            created_by: "ops".into(),
            comment: "maintenance".into(),
            starts_at: now - Duration::minutes(5),
            ends_at: now + Duration::hours(1),
            matchers: vec![Matcher::equal("alertname", "HighCPU")],
            status: SilenceStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let created = store.create(&silence).await.expect("create");

        let mut edit = created.clone();
        edit.comment = "extended".into();
        let updated = store
            .update(&edit, created.updated_at)
            .await
            .expect("first update");

        // Second writer still holds the original token.
        let err = store
            .update(&edit, created.updated_at)
            .await
            .expect_err("stale token");
        assert!(matches!(err, AlertError::Conflict(_)));
        assert_ne!(updated.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn timer_put_if_absent_is_exclusive() {
        let store = InMemoryTimerStore::new();
        let record = TimerRecord {
            group_key: GroupKey::from("g1"),
            fire_type: FireType::GroupWait,
            fire_at: Utc::now(),
            owner_id: "proc-a".into(),
            updated_at: Utc::now(),
        };
        assert!(store.put_if_absent(&record).await.expect("first"));
        assert!(!store.put_if_absent(&record).await.expect("second"));
        assert!(
            store
                .claim(&record.group_key, FireType::GroupWait, "proc-b")
                .await
                .expect("claim")
        );
        assert!(
            store
                .is_owner(&record.group_key, FireType::GroupWait, "proc-b")
                .await
                .expect("is_owner")
        );
    }
}
