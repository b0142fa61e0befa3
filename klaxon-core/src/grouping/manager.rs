use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use klaxon_model::{Alert, Fingerprint, GroupKey};

use crate::config::GroupingConfig;
use crate::error::Result;
use crate::fingerprint::fnv1a;
use crate::metrics::MetricsSink;
use crate::storage::{AlertStore, FireType};

use super::key;
use super::timer::{TimerFire, TimerManager};

/// Lifecycle of one group bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Gathering,
    Flushing,
}

#[derive(Debug)]
struct GroupEntry {
    members: Vec<Fingerprint>,
    resolved: HashSet<Fingerprint>,
    state: GroupState,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_flush_at: Option<DateTime<Utc>>,
    changed_since_flush: bool,
}

impl GroupEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            members: Vec::new(),
            resolved: HashSet::new(),
            state: GroupState::Gathering,
            first_seen: now,
            last_seen: now,
            last_flush_at: None,
            changed_since_flush: false,
        }
    }
}

/// Result of inserting an alert into its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInsert {
    pub key: GroupKey,
    /// True when this insert created the group (and armed group_wait).
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    GroupWait,
    GroupInterval,
    /// Past-due timer recovered at restart.
    Missed,
}

/// Snapshot emitted when a timer fire decides the group should notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFlush {
    pub key: GroupKey,
    /// Member fingerprints at fire time, resolved members included once.
    pub members: Vec<Fingerprint>,
    pub reason: FlushReason,
    pub first_seen: DateTime<Utc>,
}

/// Sharded group table; insertion, timer fire, and eviction for one key all
/// serialize on the key's shard lock.
pub struct GroupManager {
    shards: Vec<Mutex<HashMap<GroupKey, GroupEntry>>>,
    timers: Arc<TimerManager>,
    /// Source of truth for rebuilding membership after a restart.
    alerts: Arc<dyn AlertStore>,
    config: GroupingConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for GroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupManager")
            .field("shards", &self.shards.len())
            .field("timers", &self.timers)
            .finish()
    }
}

impl GroupManager {
    pub fn new(
        config: GroupingConfig,
        timers: Arc<TimerManager>,
        alerts: Arc<dyn AlertStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let shard_count = config.shards.next_power_of_two().max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            timers,
            alerts,
            config,
            metrics,
        }
    }

    fn shard(&self, key: &GroupKey) -> &Mutex<HashMap<GroupKey, GroupEntry>> {
        let index = fnv1a(key.as_str().as_bytes()) as usize & (self.shards.len() - 1);
        &self.shards[index]
    }

    pub fn key_for(&self, alert: &Alert) -> GroupKey {
        key::compute(
            &self.config.group_by,
            &alert.labels,
            alert.fingerprint,
            self.config.max_key_length,
        )
    }

    /// Insert the alert into its group; a first insert creates the group and
    /// arms the group_wait timer. Re-inserts refresh `last_seen` only and do
    /// NOT reschedule group_wait.
    pub async fn insert(&self, alert: &Alert) -> Result<GroupInsert> {
        let key = self.key_for(alert);
        let now = Utc::now();
        let fingerprint = alert.fingerprint;

        let created = {
            let mut shard = self.shard(&key).lock().await;
            let created = !shard.contains_key(&key);
            let entry = shard
                .entry(key.clone())
                .or_insert_with(|| GroupEntry::new(now));
            if created {
                self.metrics.incr("groups_created_total", &[]);
            }

            entry.last_seen = now;
            if !entry.members.contains(&fingerprint) {
                entry.members.push(fingerprint);
                entry.changed_since_flush = true;
            }
            if alert.status.is_resolved() {
                // Ride along in the next flush, then leave the group.
                if entry.resolved.insert(fingerprint) {
                    entry.changed_since_flush = true;
                }
            } else if entry.resolved.remove(&fingerprint) {
                entry.changed_since_flush = true;
            }
            created
        };

        if created {
            self.timers
                .schedule(key.clone(), FireType::GroupWait, self.config.group_wait())
                .await?;
            debug!(group_key = %key, "group created, group_wait armed");
        }

        Ok(GroupInsert { key, created })
    }

    /// React to a timer fire. Holding the shard lock from snapshot to state
    /// update keeps concurrent inserts out of the flushed snapshot.
    pub async fn handle_fire(&self, fire: TimerFire) -> Result<Option<GroupFlush>> {
        let key = fire.group_key.clone();
        let now = Utc::now();

        enum Next {
            Interval,
            Delete,
        }

        // A timer record without an in-memory group means we inherited it
        // from a previous process; rebuild membership from the store.
        let rebuilt = if self.contains(&key).await {
            None
        } else {
            Some(self.rebuild_members(&key).await?)
        };

        let (flush, next) = {
            let mut shard = self.shard(&key).lock().await;
            if let Some(members) = rebuilt {
                if members.is_empty() {
                    self.timers.cancel(&key, fire.fire_type, true).await?;
                    return Ok(None);
                }
                let mut entry = GroupEntry::new(now);
                entry.members = members;
                entry.changed_since_flush = true;
                shard.entry(key.clone()).or_insert(entry);
            }
            let Some(entry) = shard.get_mut(&key) else {
                // Group evicted while the timer was in flight; drop the record.
                self.timers.cancel(&key, fire.fire_type, true).await?;
                return Ok(None);
            };

            let repeat_elapsed = entry.last_flush_at.is_none_or(|last| {
                (now - last).to_std().unwrap_or_default()
                    >= self.config.repeat_interval()
            });
            let should_flush = match fire.fire_type {
                FireType::GroupWait => !entry.members.is_empty(),
                FireType::GroupInterval => {
                    !entry.members.is_empty()
                        && (entry.changed_since_flush || repeat_elapsed)
                }
            };

            let flush = if should_flush {
                entry.state = GroupState::Flushing;
                let flush = GroupFlush {
                    key: key.clone(),
                    members: entry.members.clone(),
                    reason: if fire.missed {
                        FlushReason::Missed
                    } else {
                        match fire.fire_type {
                            FireType::GroupWait => FlushReason::GroupWait,
                            FireType::GroupInterval => FlushReason::GroupInterval,
                        }
                    },
                    first_seen: entry.first_seen,
                };
                entry.last_flush_at = Some(now);
                entry.changed_since_flush = false;

                // Resolved members were included once; evict them now.
                let resolved = std::mem::take(&mut entry.resolved);
                entry.members.retain(|m| !resolved.contains(m));
                entry.state = GroupState::Gathering;
                Some(flush)
            } else {
                None
            };

            let next = if entry.members.is_empty() {
                shard.remove(&key);
                Next::Delete
            } else {
                Next::Interval
            };
            (flush, next)
        };

        match next {
            Next::Delete => {
                info!(group_key = %key, "group emptied, cancelling timers");
                self.timers.cancel(&key, FireType::GroupWait, true).await?;
                self.timers
                    .cancel(&key, FireType::GroupInterval, true)
                    .await?;
            }
            Next::Interval => {
                if fire.fire_type == FireType::GroupWait {
                    self.timers.cancel(&key, FireType::GroupWait, true).await?;
                }
                self.timers
                    .reschedule(
                        key.clone(),
                        FireType::GroupInterval,
                        self.config.group_interval(),
                    )
                    .await?;
            }
        }

        if let Some(flush) = &flush {
            self.metrics.incr(
                "group_flushes_total",
                &[("reason", match flush.reason {
                    FlushReason::GroupWait => "group_wait",
                    FlushReason::GroupInterval => "group_interval",
                    FlushReason::Missed => "missed",
                })],
            );
        }
        Ok(flush)
    }

    async fn contains(&self, key: &GroupKey) -> bool {
        self.shard(key).lock().await.contains_key(key)
    }

    /// Firing alerts whose derived key matches; the restart-recovery path.
    async fn rebuild_members(&self, key: &GroupKey) -> Result<Vec<Fingerprint>> {
        let mut members = Vec::new();
        for fingerprint in self.alerts.firing_fingerprints().await? {
            if let Some(stored) = self.alerts.get(fingerprint).await? {
                if self.key_for(&stored.alert) == *key {
                    members.push(fingerprint);
                }
            }
        }
        if !members.is_empty() {
            info!(group_key = %key, members = members.len(), "rebuilt group from store");
        }
        Ok(members)
    }

    /// Number of live groups, across all shards.
    pub async fn group_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard.lock().await.len();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::storage::memory::{InMemoryAlertStore, InMemoryTimerStore};
    use crate::storage::TimerStore;
    use klaxon_model::{AlertStatus, LabelSet};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn alert(name: &str, instance: &str, status: AlertStatus) -> Alert {
        let labels: LabelSet =
            [("alertname", name), ("instance", instance)].into_iter().collect();
        Alert {
            fingerprint: fingerprint(&labels),
            alert_name: name.into(),
            labels,
            annotations: LabelSet::new(),
            status,
            starts_at: Utc::now(),
            ends_at: status.is_resolved().then(Utc::now),
            generator_url: None,
            severity: None,
        }
    }

    fn config() -> GroupingConfig {
        GroupingConfig {
            group_by: vec!["alertname".into(), "instance".into()],
            group_wait_secs: 30,
            group_interval_secs: 300,
            repeat_interval_secs: 14_400,
            max_key_length: 256,
            shards: 4,
        }
    }

    fn manager() -> (GroupManager, mpsc::Receiver<TimerFire>, Arc<InMemoryTimerStore>) {
        let store = Arc::new(InMemoryTimerStore::new());
        let (timers, fires) =
            TimerManager::new(store.clone(), "proc-test", CancellationToken::new());
        (
            GroupManager::new(
                config(),
                timers,
                Arc::new(InMemoryAlertStore::new()),
                crate::metrics::noop(),
            ),
            fires,
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_inserts_do_not_rearm_group_wait() {
        let (manager, mut fires, _) = manager();
        let alert = alert("HighCPU", "h1", AlertStatus::Firing);

        let first = manager.insert(&alert).await.expect("insert");
        assert!(first.created);
        for _ in 0..4 {
            let again = manager.insert(&alert).await.expect("insert");
            assert!(!again.created);
            assert_eq!(again.key, first.key);
        }
        assert_eq!(manager.group_count().await, 1);

        // Exactly one group_wait fire despite five inserts.
        tokio::time::advance(Duration::from_secs(31)).await;
        let fire = fires.recv().await.expect("fire");
        assert_eq!(fire.fire_type, FireType::GroupWait);
        assert!(
            tokio::time::timeout(Duration::from_secs(1), fires.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn group_wait_fire_flushes_and_arms_interval() {
        let (manager, mut fires, store) = manager();
        let alert = alert("HighCPU", "h1", AlertStatus::Firing);
        manager.insert(&alert).await.expect("insert");

        tokio::time::advance(Duration::from_secs(31)).await;
        let fire = fires.recv().await.expect("fire");
        let flush = manager
            .handle_fire(fire)
            .await
            .expect("handle")
            .expect("flush");
        assert_eq!(flush.members, vec![alert.fingerprint]);
        assert_eq!(flush.reason, FlushReason::GroupWait);

        // group_wait record replaced by group_interval.
        let records = store.all().await.expect("all");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fire_type, FireType::GroupInterval);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_without_change_respects_repeat_bound() {
        let (manager, mut fires, _) = manager();
        let alert = alert("HighCPU", "h1", AlertStatus::Firing);
        manager.insert(&alert).await.expect("insert");

        tokio::time::advance(Duration::from_secs(31)).await;
        let wait_fire = fires.recv().await.expect("fire");
        manager.handle_fire(wait_fire).await.expect("handle");

        // Interval fires with unchanged membership and repeat not elapsed.
        let silent = manager
            .handle_fire(TimerFire {
                group_key: manager.key_for(&alert),
                fire_type: FireType::GroupInterval,
                missed: false,
            })
            .await
            .expect("handle");
        assert!(silent.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn membership_change_resets_repeat_bound() {
        let (manager, mut fires, _) = manager();
        let first = alert("HighCPU", "h1", AlertStatus::Firing);
        manager.insert(&first).await.expect("insert");

        tokio::time::advance(Duration::from_secs(31)).await;
        let wait_fire = fires.recv().await.expect("fire");
        manager.handle_fire(wait_fire).await.expect("handle");

        // Same group, new member: next interval must flush.
        let second = alert("HighCPU", "h1", AlertStatus::Resolved);
        assert_eq!(manager.key_for(&second), manager.key_for(&first));
        manager.insert(&second).await.expect("insert");

        let flush = manager
            .handle_fire(TimerFire {
                group_key: manager.key_for(&first),
                fire_type: FireType::GroupInterval,
                missed: false,
            })
            .await
            .expect("handle")
            .expect("flush");
        assert_eq!(flush.reason, FlushReason::GroupInterval);
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_members_ride_one_flush_then_leave() {
        let (manager, mut fires, store) = manager();
        let firing = alert("HighCPU", "h1", AlertStatus::Firing);
        let resolved = alert("HighCPU", "h1", AlertStatus::Resolved);

        manager.insert(&firing).await.expect("insert firing");
        manager.insert(&resolved).await.expect("insert resolved");

        tokio::time::advance(Duration::from_secs(31)).await;
        let fire = fires.recv().await.expect("fire");
        let flush = manager
            .handle_fire(fire)
            .await
            .expect("handle")
            .expect("flush");
        // Included once...
        assert_eq!(flush.members, vec![firing.fingerprint]);
        // ...then the group is empty, deleted, and timers are gone.
        assert_eq!(manager.group_count().await, 0);
        assert!(store.all().await.expect("all").is_empty());
    }
}
