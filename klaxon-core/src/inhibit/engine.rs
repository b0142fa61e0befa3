use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use klaxon_model::{Alert, Fingerprint, InhibitionRule, StoredAlert};

use crate::cache::{CacheKeys, SharedCache, get_json, set_json};
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::silence::matcher;
use crate::storage::AlertStore;

const ACTIVE_ALERT_L1_CAPACITY: usize = 4_096;
const ACTIVE_ALERT_L2_TTL: Duration = Duration::from_secs(600);
const STATE_GC_TTL: Duration = Duration::from_secs(1_800);
const STATE_GC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct InhibitState {
    inhibited_by: Option<Fingerprint>,
    updated_at: Instant,
}

/// Evaluates inhibition rules against the currently-firing alert set.
///
/// Firing alerts resolve through a two-tier cache (in-process LRU plus the
/// shared cache); LRU eviction stands in for an explicit cleanup worker.
pub struct InhibitionEngine {
    rules: Vec<InhibitionRule>,
    store: Arc<dyn AlertStore>,
    l1: Mutex<LruCache<Fingerprint, StoredAlert>>,
    l2: Option<Arc<dyn SharedCache>>,
    /// Last inhibition verdict per target fingerprint, GC'd when stale.
    states: Mutex<HashMap<Fingerprint, InhibitState>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for InhibitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InhibitionEngine")
            .field("rules", &self.rules.len())
            .field("l2_enabled", &self.l2.is_some())
            .finish()
    }
}

impl InhibitionEngine {
    pub fn new(
        rules: Vec<InhibitionRule>,
        store: Arc<dyn AlertStore>,
        l2: Option<Arc<dyn SharedCache>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            rules,
            store,
            l1: Mutex::new(LruCache::new(
                NonZeroUsize::new(ACTIVE_ALERT_L1_CAPACITY).expect("non-zero"),
            )),
            l2,
            states: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Returns the fingerprint of a firing source alert that inhibits the
    /// candidate, if any rule applies.
    pub async fn check(&self, target: &Alert) -> Result<Option<Fingerprint>> {
        let applicable: Vec<&InhibitionRule> = self
            .rules
            .iter()
            .filter(|rule| matcher::all_match(&rule.target_matchers, &target.labels))
            .collect();
        if applicable.is_empty() {
            self.record(target.fingerprint, None);
            return Ok(None);
        }

        let firing = self.store.firing_fingerprints().await?;
        for fingerprint in firing {
            if fingerprint == target.fingerprint {
                continue;
            }
            let Some(source) = self.lookup(fingerprint).await? else {
                continue;
            };
            for rule in &applicable {
                if !matcher::all_match(&rule.source_matchers, &source.alert.labels) {
                    continue;
                }
                let equal_holds = rule.equal.iter().all(|name| {
                    source.alert.labels.get(name).unwrap_or("")
                        == target.labels.get(name).unwrap_or("")
                });
                if equal_holds {
                    self.metrics.incr("alerts_inhibited_total", &[]);
                    self.record(target.fingerprint, Some(fingerprint));
                    return Ok(Some(fingerprint));
                }
            }
        }

        self.record(target.fingerprint, None);
        Ok(None)
    }

    /// Populate both cache tiers after an ingest stored a firing alert.
    pub async fn cache_alert(&self, stored: &StoredAlert) {
        let fingerprint = stored.alert.fingerprint;
        self.l1
            .lock()
            .expect("inhibit l1 mutex")
            .put(fingerprint, stored.clone());
        if let Some(cache) = &self.l2 {
            if let Err(err) = set_json(
                cache.as_ref(),
                &CacheKeys::firing_alert(fingerprint),
                stored,
                Some(ACTIVE_ALERT_L2_TTL),
            )
            .await
            {
                warn!(fingerprint = %fingerprint, error = %err, "failed to cache firing alert");
            }
        }
    }

    /// Drop a resolved alert from both tiers.
    pub async fn evict_alert(&self, fingerprint: Fingerprint) {
        self.l1
            .lock()
            .expect("inhibit l1 mutex")
            .pop(&fingerprint);
        if let Some(cache) = &self.l2 {
            if let Err(err) =
                cache.delete(&CacheKeys::firing_alert(fingerprint)).await
            {
                warn!(fingerprint = %fingerprint, error = %err, "failed to evict firing alert");
            }
        }
    }

    async fn lookup(&self, fingerprint: Fingerprint) -> Result<Option<StoredAlert>> {
        if let Some(stored) = self
            .l1
            .lock()
            .expect("inhibit l1 mutex")
            .get(&fingerprint)
            .cloned()
        {
            return Ok(Some(stored));
        }

        if let Some(cache) = &self.l2 {
            match get_json::<StoredAlert>(
                cache.as_ref(),
                &CacheKeys::firing_alert(fingerprint),
            )
            .await
            {
                Ok(Some(stored)) => {
                    self.l1
                        .lock()
                        .expect("inhibit l1 mutex")
                        .put(fingerprint, stored.clone());
                    return Ok(Some(stored));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(fingerprint = %fingerprint, error = %err, "L2 firing-alert lookup failed");
                }
            }
        }

        let stored = self.store.get(fingerprint).await?;
        if let Some(stored) = &stored {
            self.l1
                .lock()
                .expect("inhibit l1 mutex")
                .put(fingerprint, stored.clone());
        }
        Ok(stored)
    }

    fn record(&self, target: Fingerprint, inhibited_by: Option<Fingerprint>) {
        let mut states = self.states.lock().expect("inhibit state mutex");
        let prior = states.get(&target).and_then(|s| s.inhibited_by);
        if prior != inhibited_by {
            debug!(
                target = %target,
                from = ?prior,
                to = ?inhibited_by,
                "inhibition state transition"
            );
        }
        states.insert(
            target,
            InhibitState {
                inhibited_by,
                updated_at: Instant::now(),
            },
        );
    }

    /// Drop state entries untouched for longer than the GC TTL.
    pub fn gc_states(&self) -> usize {
        let mut states = self.states.lock().expect("inhibit state mutex");
        let before = states.len();
        states.retain(|_, state| state.updated_at.elapsed() < STATE_GC_TTL);
        before - states.len()
    }

    pub fn spawn_gc(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATE_GC_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("inhibition GC loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = engine.gc_states();
                        if removed > 0 {
                            debug!(removed, "inhibition state GC");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::storage::memory::InMemoryAlertStore;
    use klaxon_model::{AlertStatus, LabelSet, Matcher};

    fn alert(pairs: &[(&str, &str)]) -> Alert {
        let labels: LabelSet = pairs.iter().copied().collect();
        Alert {
            fingerprint: fingerprint(&labels),
            alert_name: labels.get("alertname").unwrap_or("x").to_string(),
            labels,
            annotations: LabelSet::new(),
            status: AlertStatus::Firing,
            starts_at: chrono::Utc::now(),
            ends_at: None,
            generator_url: None,
            severity: None,
        }
    }

    fn cluster_rule() -> InhibitionRule {
        InhibitionRule::new(
            vec![Matcher::equal("severity", "critical")],
            vec![Matcher::equal("severity", "warning")],
            vec!["cluster".into()],
        )
    }

    async fn engine_with_firing(
        rules: Vec<InhibitionRule>,
        firing: &[Alert],
    ) -> InhibitionEngine {
        let store = Arc::new(InMemoryAlertStore::new());
        for alert in firing {
            store.upsert_firing(alert).await.expect("seed");
        }
        InhibitionEngine::new(rules, store, None, crate::metrics::noop())
    }

    #[tokio::test]
    async fn critical_source_inhibits_warning_in_same_cluster() {
        let source = alert(&[
            ("alertname", "NodeDown"),
            ("severity", "critical"),
            ("cluster", "X"),
        ]);
        let engine =
            engine_with_firing(vec![cluster_rule()], &[source.clone()]).await;

        let target = alert(&[
            ("alertname", "HighLatency"),
            ("severity", "warning"),
            ("cluster", "X"),
        ]);
        let inhibited_by = engine.check(&target).await.expect("check");
        assert_eq!(inhibited_by, Some(source.fingerprint));

        let other_cluster = alert(&[
            ("alertname", "HighLatency"),
            ("severity", "warning"),
            ("cluster", "Y"),
        ]);
        assert_eq!(engine.check(&other_cluster).await.expect("check"), None);
    }

    #[tokio::test]
    async fn alert_does_not_inhibit_itself() {
        // An alert matching both source and target matchers must not be
        // suppressed by its own fingerprint.
        let rule = InhibitionRule::new(
            vec![Matcher::equal("cluster", "X")],
            vec![Matcher::equal("cluster", "X")],
            vec![],
        );
        let candidate = alert(&[("alertname", "NodeDown"), ("cluster", "X")]);
        let engine = engine_with_firing(vec![rule], &[candidate.clone()]).await;
        assert_eq!(engine.check(&candidate).await.expect("check"), None);
    }

    #[tokio::test]
    async fn no_applicable_rule_means_not_inhibited() {
        let source = alert(&[("severity", "critical"), ("cluster", "X")]);
        let engine =
            engine_with_firing(vec![cluster_rule()], &[source]).await;
        let target = alert(&[("severity", "critical"), ("cluster", "X"), ("alertname", "Other")]);
        assert_eq!(engine.check(&target).await.expect("check"), None);
    }

    #[tokio::test]
    async fn state_gc_drops_stale_entries() {
        tokio::time::pause();
        let engine = engine_with_firing(vec![], &[]).await;
        let target = alert(&[("alertname", "X")]);
        engine.check(&target).await.expect("check");
        assert_eq!(engine.gc_states(), 0);
        tokio::time::advance(STATE_GC_TTL + Duration::from_secs(1)).await;
        assert_eq!(engine.gc_states(), 1);
    }
}
