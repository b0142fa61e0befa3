use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use klaxon_model::GroupKey;

use crate::error::Result;
use crate::storage::{FireType, TimerRecord, TimerStore};

/// A due timer delivered to the flush loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub group_key: GroupKey,
    pub fire_type: FireType,
    /// True when the persisted deadline had already passed at restore time.
    pub missed: bool,
}

/// Counts reported by [`TimerManager::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Timers rescheduled for their remaining interval.
    pub restored: usize,
    /// Past-due timers fired immediately.
    pub missed: usize,
}

/// Schedules group timers as tokio tasks and persists each one so a future
/// process can pick pending flushes back up.
///
/// Every fire re-checks ownership in the store before it is delivered; in a
/// multi-replica deployment only the owner of the current record fires.
pub struct TimerManager {
    store: Arc<dyn TimerStore>,
    owner_id: String,
    fire_tx: mpsc::Sender<TimerFire>,
    tasks: Mutex<HashMap<(GroupKey, FireType), tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("owner_id", &self.owner_id)
            .field(
                "scheduled",
                &self.tasks.lock().map(|t| t.len()).unwrap_or_default(),
            )
            .finish()
    }
}

impl TimerManager {
    /// Returns the manager plus the receiving end of the fire channel; the
    /// flush loop owns the receiver.
    pub fn new(
        store: Arc<dyn TimerStore>,
        owner_id: impl Into<String>,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<TimerFire>) {
        let (fire_tx, fire_rx) = mpsc::channel(1_024);
        (
            Arc::new(Self {
                store,
                owner_id: owner_id.into(),
                fire_tx,
                tasks: Mutex::new(HashMap::new()),
                shutdown,
            }),
            fire_rx,
        )
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Schedule a timer iff no record exists yet for `(group_key, fire_type)`.
    /// Returns false when another owner already holds it.
    pub async fn schedule(
        self: &Arc<Self>,
        group_key: GroupKey,
        fire_type: FireType,
        delay: Duration,
    ) -> Result<bool> {
        let record = TimerRecord {
            group_key: group_key.clone(),
            fire_type,
            fire_at: Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0)),
            owner_id: self.owner_id.clone(),
            updated_at: Utc::now(),
        };
        if !self.store.put_if_absent(&record).await? {
            debug!(group_key = %group_key, fire_type = %fire_type, "timer already owned elsewhere");
            return Ok(false);
        }
        self.spawn_task(group_key, fire_type, delay, false);
        Ok(true)
    }

    /// Replace any existing record and local task for the pair.
    pub async fn reschedule(
        self: &Arc<Self>,
        group_key: GroupKey,
        fire_type: FireType,
        delay: Duration,
    ) -> Result<()> {
        let record = TimerRecord {
            group_key: group_key.clone(),
            fire_type,
            fire_at: Utc::now()
                + chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0)),
            owner_id: self.owner_id.clone(),
            updated_at: Utc::now(),
        };
        self.store.reschedule(&record).await?;
        self.spawn_task(group_key, fire_type, delay, false);
        Ok(())
    }

    /// Stop the local task; optionally delete the persistent record too.
    pub async fn cancel(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        remove_record: bool,
    ) -> Result<()> {
        if let Some(handle) = self
            .tasks
            .lock()
            .expect("timer task mutex")
            .remove(&(group_key.clone(), fire_type))
        {
            handle.abort();
        }
        if remove_record {
            self.store.remove(group_key, fire_type).await?;
        }
        Ok(())
    }

    /// Read every persisted timer and re-arm it: past-due records fire
    /// immediately (marked missed), future records wait out the remainder.
    /// Ownership is claimed so fires pass the `is_owner` check.
    pub async fn restore(self: &Arc<Self>) -> Result<RestoreReport> {
        let records = self.store.all().await?;
        let now = Utc::now();
        let mut report = RestoreReport::default();

        for record in records {
            if !self
                .store
                .claim(&record.group_key, record.fire_type, &self.owner_id)
                .await?
            {
                continue;
            }
            if record.fire_at <= now {
                report.missed += 1;
                self.spawn_task(
                    record.group_key,
                    record.fire_type,
                    Duration::ZERO,
                    true,
                );
            } else {
                report.restored += 1;
                let remaining = (record.fire_at - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.spawn_task(
                    record.group_key,
                    record.fire_type,
                    remaining,
                    false,
                );
            }
        }

        info!(
            restored = report.restored,
            missed = report.missed,
            "restored persisted group timers"
        );
        Ok(report)
    }

    /// Abort every local task, leaving persistent records for the next
    /// process. Called on shutdown.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().expect("timer task mutex");
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    fn spawn_task(
        self: &Arc<Self>,
        group_key: GroupKey,
        fire_type: FireType,
        delay: Duration,
        missed: bool,
    ) {
        let manager = Arc::clone(self);
        let key_for_map = (group_key.clone(), fire_type);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            // Another replica may have taken the record while we slept.
            match manager
                .store
                .is_owner(&group_key, fire_type, &manager.owner_id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(group_key = %group_key, fire_type = %fire_type, "timer fired but ownership moved");
                    return;
                }
                Err(err) => {
                    warn!(group_key = %group_key, fire_type = %fire_type, error = %err, "ownership check failed, firing anyway");
                }
            }

            let fire = TimerFire {
                group_key: group_key.clone(),
                fire_type,
                missed,
            };
            if manager.fire_tx.send(fire).await.is_err() {
                debug!(group_key = %group_key, "fire channel closed, dropping timer fire");
            }
            manager
                .tasks
                .lock()
                .expect("timer task mutex")
                .remove(&(group_key, fire_type));
        });

        if let Some(previous) = self
            .tasks
            .lock()
            .expect("timer task mutex")
            .insert(key_for_map, handle)
        {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryTimerStore;

    fn manager(
        store: Arc<InMemoryTimerStore>,
        owner: &str,
    ) -> (Arc<TimerManager>, mpsc::Receiver<TimerFire>) {
        TimerManager::new(store, owner, CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_timer_fires_after_delay() {
        let store = Arc::new(InMemoryTimerStore::new());
        let (timers, mut fires) = manager(store, "proc-a");

        let scheduled = timers
            .schedule(GroupKey::from("g1"), FireType::GroupWait, Duration::from_secs(30))
            .await
            .expect("schedule");
        assert!(scheduled);

        tokio::time::advance(Duration::from_secs(31)).await;
        let fire = fires.recv().await.expect("fire");
        assert_eq!(fire.group_key, GroupKey::from("g1"));
        assert_eq!(fire.fire_type, FireType::GroupWait);
        assert!(!fire.missed);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_schedule_is_refused() {
        let store = Arc::new(InMemoryTimerStore::new());
        let (timers, _fires) = manager(store, "proc-a");
        let key = GroupKey::from("g1");

        assert!(
            timers
                .schedule(key.clone(), FireType::GroupWait, Duration::from_secs(30))
                .await
                .expect("first")
        );
        assert!(
            !timers
                .schedule(key, FireType::GroupWait, Duration::from_secs(30))
                .await
                .expect("second")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restore_fires_past_due_and_reschedules_future() {
        let store = Arc::new(InMemoryTimerStore::new());

        // A prior process persisted two timers and died.
        store
            .put_if_absent(&TimerRecord {
                group_key: GroupKey::from("overdue"),
                fire_type: FireType::GroupWait,
                fire_at: Utc::now() - chrono::Duration::seconds(10),
                owner_id: "proc-dead".into(),
                updated_at: Utc::now(),
            })
            .await
            .expect("seed overdue");
        store
            .put_if_absent(&TimerRecord {
                group_key: GroupKey::from("pending"),
                fire_type: FireType::GroupWait,
                fire_at: Utc::now() + chrono::Duration::seconds(15),
                owner_id: "proc-dead".into(),
                updated_at: Utc::now(),
            })
            .await
            .expect("seed pending");

        let (timers, mut fires) = manager(store.clone(), "proc-b");
        let report = timers.restore().await.expect("restore");
        assert_eq!(report, RestoreReport { restored: 1, missed: 1 });

        // The overdue timer fires immediately, marked missed.
        tokio::time::advance(Duration::from_millis(1)).await;
        let first = fires.recv().await.expect("missed fire");
        assert_eq!(first.group_key, GroupKey::from("overdue"));
        assert!(first.missed);

        // The pending timer fires once its remaining interval elapses.
        tokio::time::advance(Duration::from_secs(16)).await;
        let second = fires.recv().await.expect("restored fire");
        assert_eq!(second.group_key, GroupKey::from("pending"));
        assert!(!second.missed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_tasks_but_keeps_records() {
        let store = Arc::new(InMemoryTimerStore::new());
        let (timers, mut fires) = manager(store.clone(), "proc-a");

        timers
            .schedule(GroupKey::from("g1"), FireType::GroupWait, Duration::from_secs(30))
            .await
            .expect("schedule");
        timers.cancel_all();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(fires.try_recv().is_err());
        assert_eq!(store.all().await.expect("all").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_skipped_when_ownership_moved() {
        let store = Arc::new(InMemoryTimerStore::new());
        let (timers, mut fires) = manager(store.clone(), "proc-a");
        let key = GroupKey::from("g1");

        timers
            .schedule(key.clone(), FireType::GroupWait, Duration::from_secs(30))
            .await
            .expect("schedule");

        // Another replica claims the record before the deadline.
        store
            .claim(&key, FireType::GroupWait, "proc-b")
            .await
            .expect("claim");

        tokio::time::advance(Duration::from_secs(31)).await;
        let fired =
            tokio::time::timeout(Duration::from_secs(5), fires.recv()).await;
        assert!(fired.is_err(), "fire must be suppressed after ownership moved");
    }
}
