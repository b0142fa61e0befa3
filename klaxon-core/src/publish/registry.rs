use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use klaxon_model::{Target, TargetHealth, TargetHealthState};

use crate::config::HealthConfig;
use crate::metrics::MetricsSink;

/// Registry change notifications for subscribers (mode manager, transport).
#[derive(Debug, Clone)]
pub enum TargetEvent {
    Added { name: String },
    Updated { name: String },
    Removed { name: String },
    HealthChanged { name: String, state: TargetHealthState },
}

/// Counts produced by applying a refreshed target set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetDiff {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// One registry entry as seen by observers.
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub target: Target,
    pub health: TargetHealth,
}

#[derive(Debug)]
struct TargetEntry {
    target: Target,
    health: TargetHealth,
}

/// The discovered target set plus per-target health bookkeeping.
///
/// Discovery mechanics live outside the core; the refresh loop feeds
/// [`TargetRegistry::apply`] and the health monitor feeds
/// [`TargetRegistry::record_check`].
pub struct TargetRegistry {
    entries: RwLock<HashMap<String, TargetEntry>>,
    events: broadcast::Sender<TargetEvent>,
    health_config: HealthConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field(
                "targets",
                &self.entries.try_read().map(|e| e.len()).unwrap_or_default(),
            )
            .finish()
    }
}

impl TargetRegistry {
    pub fn new(health_config: HealthConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
            health_config,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.events.subscribe()
    }

    /// Replace the target set with a freshly discovered one, diffing against
    /// the current entries. Health bookkeeping survives updates.
    pub async fn apply(&self, targets: Vec<Target>) -> TargetDiff {
        let mut entries = self.entries.write().await;
        let mut diff = TargetDiff::default();

        let incoming: HashMap<String, Target> = targets
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();

        entries.retain(|name, _| {
            let keep = incoming.contains_key(name);
            if !keep {
                diff.removed += 1;
                let _ = self.events.send(TargetEvent::Removed { name: name.clone() });
            }
            keep
        });

        for (name, target) in incoming {
            match entries.get_mut(&name) {
                Some(entry) => {
                    if entry.target != target {
                        entry.target = target;
                        diff.updated += 1;
                        let _ = self
                            .events
                            .send(TargetEvent::Updated { name: name.clone() });
                    }
                }
                None => {
                    entries.insert(
                        name.clone(),
                        TargetEntry {
                            target,
                            health: TargetHealth::default(),
                        },
                    );
                    diff.added += 1;
                    let _ = self.events.send(TargetEvent::Added { name });
                }
            }
        }

        self.metrics
            .gauge("targets_registered", entries.len() as f64, &[]);
        if diff != TargetDiff::default() {
            info!(
                added = diff.added,
                updated = diff.updated,
                removed = diff.removed,
                "target registry updated"
            );
        }
        diff
    }

    /// Record a health probe result, driving the threshold state machine.
    /// Returns the state after the check when the target exists.
    pub async fn record_check(&self, name: &str, ok: bool) -> Option<TargetHealthState> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name)?;
        let health = &mut entry.health;
        health.last_check_at = Some(Utc::now());

        if ok {
            health.consecutive_failures = 0;
            health.consecutive_successes += 1;
            if health.state != TargetHealthState::Healthy
                && health.consecutive_successes >= self.health_config.success_threshold
            {
                self.transition(name, health, TargetHealthState::Healthy);
            }
        } else {
            health.consecutive_successes = 0;
            health.consecutive_failures += 1;
            let next = if health.consecutive_failures >= self.health_config.failure_threshold
            {
                TargetHealthState::Unhealthy
            } else {
                TargetHealthState::Degraded
            };
            if health.state != next {
                self.transition(name, health, next);
            }
        }

        Some(health.state)
    }

    fn transition(&self, name: &str, health: &mut TargetHealth, to: TargetHealthState) {
        let from = health.state;
        health.state = to;
        if to == TargetHealthState::Unhealthy {
            warn!(target = name, from = %from, to = %to, "target health transition");
        } else {
            debug!(target = name, from = %from, to = %to, "target health transition");
        }
        self.metrics.incr(
            "target_health_transitions_total",
            &[("target", name), ("to", to.as_str())],
        );
        let _ = self.events.send(TargetEvent::HealthChanged {
            name: name.to_string(),
            state: to,
        });
    }

    pub async fn get(&self, name: &str) -> Option<TargetSnapshot> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| TargetSnapshot {
            target: entry.target.clone(),
            health: entry.health.clone(),
        })
    }

    pub async fn snapshot(&self) -> Vec<TargetSnapshot> {
        let entries = self.entries.read().await;
        entries
            .values()
            .map(|entry| TargetSnapshot {
                target: entry.target.clone(),
                health: entry.health.clone(),
            })
            .collect()
    }

    /// Targets worth enqueueing for: healthy or merely degraded.
    pub async fn publishable(&self) -> Vec<Target> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| entry.health.state != TargetHealthState::Unhealthy)
            .map(|entry| entry.target.clone())
            .collect()
    }

    /// `(reachable, total)` counts for the mode probe. Degraded targets are
    /// still reachable; only unhealthy ones count against the mode.
    pub async fn health_counts(&self) -> (usize, usize) {
        let entries = self.entries.read().await;
        let reachable = entries
            .values()
            .filter(|entry| entry.health.state != TargetHealthState::Unhealthy)
            .count();
        (reachable, entries.len())
    }
}
