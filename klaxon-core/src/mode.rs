//! Publishing-mode fallback driven by target health.
//!
//! A background probe polls the registry; with zero healthy targets the
//! dispatcher stops enqueueing entirely (metrics-only) instead of piling
//! jobs onto dead sinks.

use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ModeConfig;
use crate::metrics::MetricsSink;
use crate::publish::TargetRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Every target healthy.
    Publishing,
    /// At least one healthy target; unhealthy ones are skipped.
    Degraded,
    /// No healthy target; jobs are dropped and counted.
    MetricsOnly,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Publishing => "publishing",
            PublishMode::Degraded => "degraded",
            PublishMode::MetricsOnly => "metrics_only",
        }
    }

    pub fn allows_publishing(&self) -> bool {
        !matches!(self, PublishMode::MetricsOnly)
    }
}

/// Mode transition event for subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: PublishMode,
    pub to: PublishMode,
}

pub struct ModeManager {
    registry: Arc<TargetRegistry>,
    mode: RwLock<PublishMode>,
    events: broadcast::Sender<ModeChange>,
    config: ModeConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ModeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeManager")
            .field(
                "mode",
                &self.mode.try_read().map(|m| *m).unwrap_or(PublishMode::Publishing),
            )
            .finish()
    }
}

impl ModeManager {
    pub fn new(
        registry: Arc<TargetRegistry>,
        config: ModeConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            mode: RwLock::new(PublishMode::Publishing),
            events,
            config,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModeChange> {
        self.events.subscribe()
    }

    pub async fn current(&self) -> PublishMode {
        *self.mode.read().await
    }

    /// One probe: derive the mode from registry health counts and publish a
    /// transition event when it moved.
    pub async fn evaluate(&self) -> PublishMode {
        let (healthy, total) = self.registry.health_counts().await;
        let next = if total == 0 || healthy == 0 {
            PublishMode::MetricsOnly
        } else if healthy < total {
            PublishMode::Degraded
        } else {
            PublishMode::Publishing
        };

        let mut mode = self.mode.write().await;
        if *mode != next {
            let change = ModeChange { from: *mode, to: next };
            if next == PublishMode::MetricsOnly {
                warn!(healthy, total, "entering metrics-only mode, publishing disabled");
            } else {
                info!(
                    healthy,
                    total,
                    from = change.from.as_str(),
                    to = next.as_str(),
                    "publish mode changed"
                );
            }
            self.metrics.incr(
                "mode_transitions_total",
                &[("from", change.from.as_str()), ("to", next.as_str())],
            );
            *mode = next;
            let _ = self.events.send(change);
        }
        next
    }

    pub fn spawn_probe(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.probe_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("mode probe shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.evaluate().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use klaxon_model::{Credentials, LabelSet, Target, TargetType};
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

    async fn manager_with_targets(names: &[&str]) -> (Arc<ModeManager>, Arc<TargetRegistry>) {
        let registry = Arc::new(TargetRegistry::new(
            HealthConfig::default(),
            crate::metrics::noop(),
        ));
        registry
            .apply(names.iter().map(|n| target(n)).collect())
            .await;
        let manager = Arc::new(ModeManager::new(
            Arc::clone(&registry),
            ModeConfig::default(),
            crate::metrics::noop(),
        ));
        (manager, registry)
    }

    #[tokio::test]
    async fn all_healthy_is_publishing() {
        let (manager, _) = manager_with_targets(&["a", "b"]).await;
        assert_eq!(manager.evaluate().await, PublishMode::Publishing);
    }

    #[tokio::test]
    async fn partial_health_is_degraded() {
        let (manager, registry) = manager_with_targets(&["a", "b"]).await;
        for _ in 0..3 {
            registry.record_check("b", false).await;
        }
        assert_eq!(manager.evaluate().await, PublishMode::Degraded);
        assert!(manager.current().await.allows_publishing());
    }

    #[tokio::test]
    async fn zero_healthy_is_metrics_only() {
        let (manager, registry) = manager_with_targets(&["a"]).await;
        for _ in 0..3 {
            registry.record_check("a", false).await;
        }
        assert_eq!(manager.evaluate().await, PublishMode::MetricsOnly);
        assert!(!manager.current().await.allows_publishing());
    }

    #[tokio::test]
    async fn empty_registry_is_metrics_only() {
        let (manager, _) = manager_with_targets(&[]).await;
        assert_eq!(manager.evaluate().await, PublishMode::MetricsOnly);
    }

    #[tokio::test]
    async fn transitions_emit_typed_events() {
        let (manager, registry) = manager_with_targets(&["a"]).await;
        let mut events = manager.subscribe();

        for _ in 0..3 {
            registry.record_check("a", false).await;
        }
        manager.evaluate().await;
        let change = events.recv().await.expect("event");
        assert_eq!(change.from, PublishMode::Publishing);
        assert_eq!(change.to, PublishMode::MetricsOnly);

        registry.record_check("a", true).await;
        manager.evaluate().await;
        let change = events.recv().await.expect("event");
        assert_eq!(change.to, PublishMode::Publishing);
    }
}
