use std::sync::Arc;

use tracing::{debug, info, warn};

use klaxon_model::TargetHealthState;

use crate::error::{AlertError, Result};
use crate::grouping::GroupFlush;
use crate::metrics::MetricsSink;
use crate::mode::{ModeManager, PublishMode};
use crate::queue::{PriorityQueue, PublishJob};
use crate::storage::AlertStore;

use super::registry::TargetRegistry;
use super::render;

/// Fans a group flush out into one publish job per reachable target.
///
/// Runs on the flush loop, downstream of the timer manager. Mode gating
/// happens here so a metrics-only proxy never enqueues at all.
pub struct FlushFanout {
    store: Arc<dyn AlertStore>,
    registry: Arc<TargetRegistry>,
    mode: Arc<ModeManager>,
    queue: Arc<PriorityQueue>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for FlushFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushFanout")
            .field("registry", &self.registry)
            .finish()
    }
}

impl FlushFanout {
    pub fn new(
        store: Arc<dyn AlertStore>,
        registry: Arc<TargetRegistry>,
        mode: Arc<ModeManager>,
        queue: Arc<PriorityQueue>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            registry,
            mode,
            queue,
            metrics,
        }
    }

    /// Returns the names of targets a job was enqueued for.
    pub async fn handle_flush(&self, flush: GroupFlush) -> Result<Vec<String>> {
        let mut alerts = Vec::with_capacity(flush.members.len());
        for fingerprint in &flush.members {
            match self.store.get(*fingerprint).await? {
                Some(stored) => alerts.push(stored),
                None => {
                    warn!(fingerprint = %fingerprint, "flushed member missing from store");
                }
            }
        }
        if alerts.is_empty() {
            debug!(group_key = %flush.key, "flush had no resolvable members");
            return Ok(Vec::new());
        }

        let mode = self.mode.current().await;
        if mode == PublishMode::MetricsOnly {
            self.metrics.incr(
                "jobs_dropped_total",
                &[("reason", "metrics-only")],
            );
            info!(
                group_key = %flush.key,
                alerts = alerts.len(),
                "flush dropped: metrics-only mode"
            );
            return Ok(Vec::new());
        }

        let snapshot = self.registry.snapshot().await;
        let mut published_to = Vec::new();
        for entry in snapshot {
            if entry.health.state == TargetHealthState::Unhealthy {
                // Degraded mode: skip without enqueueing.
                self.metrics.incr(
                    "jobs_skipped_total",
                    &[("reason", "target-unhealthy"), ("target", &entry.target.name)],
                );
                continue;
            }

            let notification = render::render(&flush.key, &alerts, &entry.target);
            let job = PublishJob::new(
                flush.key.clone(),
                entry.target.name.clone(),
                notification.priority,
                notification,
            );

            match self.queue.enqueue(job).await {
                Ok(()) => published_to.push(entry.target.name),
                Err(AlertError::QueueFull(_)) => {
                    // Already counted by the queue; nothing else to do.
                    warn!(
                        group_key = %flush.key,
                        target = %entry.target.name,
                        "flush job rejected by full queue"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        debug!(
            group_key = %flush.key,
            targets = published_to.len(),
            "flush fanned out"
        );
        Ok(published_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, ModeConfig};
    use crate::fingerprint::fingerprint;
    use crate::grouping::FlushReason;
    use crate::storage::memory::InMemoryAlertStore;
    use chrono::Utc;
    use klaxon_model::{
        Alert, AlertStatus, Credentials, GroupKey, LabelSet, Severity, Target,
        TargetType,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use url::Url;

    fn target(name: &str) -> Target {
        Target {
            name: name.into(),
            target_type: TargetType::Webhook,
            endpoint: Url::parse("https://hooks.example/x").expect("url"),
            credentials: Credentials::new(""),
            labels: LabelSet::new(),
        }
    }

    struct Setup {
        fanout: FlushFanout,
        store: Arc<InMemoryAlertStore>,
        registry: Arc<TargetRegistry>,
        mode: Arc<ModeManager>,
        queue: Arc<PriorityQueue>,
    }

    async fn setup(targets: &[&str]) -> Setup {
        let store = Arc::new(InMemoryAlertStore::new());
        let registry = Arc::new(TargetRegistry::new(
            HealthConfig::default(),
            crate::metrics::noop(),
        ));
        registry
            .apply(targets.iter().map(|n| target(n)).collect())
            .await;
        let mode = Arc::new(ModeManager::new(
            Arc::clone(&registry),
            ModeConfig::default(),
            crate::metrics::noop(),
        ));
        mode.evaluate().await;
        let queue = Arc::new(PriorityQueue::new(
            [16, 16, 16],
            Duration::from_millis(100),
            crate::metrics::noop(),
        ));
        Setup {
            fanout: FlushFanout::new(
                store.clone(),
                Arc::clone(&registry),
                Arc::clone(&mode),
                Arc::clone(&queue),
                crate::metrics::noop(),
            ),
            store,
            registry,
            mode,
            queue,
        }
    }

    async fn seed_alert(store: &InMemoryAlertStore, severity: Severity) -> klaxon_model::Fingerprint {
        let labels: LabelSet = [("alertname", "HighCPU"), ("instance", "h1")]
            .into_iter()
            .collect();
        let alert = Alert {
            fingerprint: fingerprint(&labels),
            alert_name: "HighCPU".into(),
            labels,
            annotations: LabelSet::new(),
            status: AlertStatus::Firing,
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            severity: Some(severity),
        };
        store.upsert_firing(&alert).await.expect("seed");
        alert.fingerprint
    }

    fn flush(members: Vec<klaxon_model::Fingerprint>) -> GroupFlush {
        GroupFlush {
            key: GroupKey::from("HighCPU|h1"),
            members,
            reason: FlushReason::GroupWait,
            first_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_job_per_reachable_target() {
        let s = setup(&["slack", "pager"]).await;
        let fp = seed_alert(&s.store, Severity::Critical).await;

        let published = s.fanout.handle_flush(flush(vec![fp])).await.expect("fanout");
        assert_eq!(published.len(), 2);
        assert_eq!(s.queue.depths(), [2, 0, 0]);
    }

    #[tokio::test]
    async fn unhealthy_targets_are_skipped() {
        let s = setup(&["slack", "pager"]).await;
        let fp = seed_alert(&s.store, Severity::Critical).await;
        for _ in 0..3 {
            s.registry.record_check("pager", false).await;
        }

        let published = s.fanout.handle_flush(flush(vec![fp])).await.expect("fanout");
        assert_eq!(published, vec!["slack".to_string()]);
        assert_eq!(s.queue.depths(), [1, 0, 0]);
    }

    #[tokio::test]
    async fn metrics_only_mode_drops_without_enqueue() {
        let s = setup(&["slack"]).await;
        let fp = seed_alert(&s.store, Severity::Warning).await;
        for _ in 0..3 {
            s.registry.record_check("slack", false).await;
        }
        s.mode.evaluate().await;

        let published = s.fanout.handle_flush(flush(vec![fp])).await.expect("fanout");
        assert!(published.is_empty());
        assert_eq!(s.queue.depths(), [0, 0, 0]);
    }

    #[tokio::test]
    async fn job_priority_tracks_member_severity() {
        let s = setup(&["slack"]).await;
        let fp = seed_alert(&s.store, Severity::Info).await;

        s.fanout.handle_flush(flush(vec![fp])).await.expect("fanout");
        let token = CancellationToken::new();
        let job = s.queue.dequeue(&token).await.expect("job");
        assert_eq!(job.priority, klaxon_model::Priority::Low);
        assert_eq!(job.group_key, GroupKey::from("HighCPU|h1"));
    }
}
