use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tokio::time::Instant;
use tracing::{debug, warn};

use klaxon_model::{Alert, Category, ClassificationResult, Fingerprint, Severity};

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheKeys, SharedCache, get_json, set_json};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics::MetricsSink;

use super::client::ClassifierClient;

/// Synthesize a classification from label hints when the classifier is
/// unreachable or the breaker is open. Looks at `severity`, then `priority`;
/// defaults to warning with low confidence.
pub fn fallback_result(alert: &Alert) -> ClassificationResult {
    let hinted = alert
        .labels
        .get("severity")
        .and_then(Severity::from_hint)
        .or_else(|| alert.labels.get("priority").and_then(Severity::from_hint));

    let (severity, confidence, reasoning) = match hinted {
        Some(severity) => (
            severity,
            0.3,
            format!("fallback from label hint ({severity})"),
        ),
        None => (
            Severity::Warning,
            0.3,
            "fallback default: no usable label hint".to_string(),
        ),
    };

    ClassificationResult {
        severity,
        confidence,
        reasoning,
        recommendations: vec![],
        category: Category::unknown(),
        processing_time_s: 0.0,
        fallback: true,
    }
}

struct L1Entry {
    result: ClassificationResult,
    stored_at: Instant,
}

/// `classify(alert)` with the L1 → L2 → remote → fallback ladder.
pub struct ClassificationService {
    l1: Mutex<LruCache<Fingerprint, L1Entry>>,
    cache_config: CacheConfig,
    l2: Option<Arc<dyn SharedCache>>,
    client: Arc<dyn ClassifierClient>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ClassificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationService")
            .field("l1_capacity", &self.cache_config.l1_capacity)
            .field("l2_enabled", &self.l2.is_some())
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl ClassificationService {
    pub fn new(
        cache_config: CacheConfig,
        l2: Option<Arc<dyn SharedCache>>,
        client: Arc<dyn ClassifierClient>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_config.l1_capacity.max(1))
            .expect("max(1) is non-zero");
        Self {
            l1: Mutex::new(LruCache::new(capacity)),
            cache_config,
            l2,
            client,
            breaker,
            metrics,
        }
    }

    /// Never errors: every failure path degrades to the label-hint fallback.
    pub async fn classify(&self, alert: &Alert) -> ClassificationResult {
        let fingerprint = alert.fingerprint;

        if let Some(result) = self.l1_get(fingerprint) {
            self.metrics
                .incr("classification_cache_hits_total", &[("tier", "l1")]);
            return result;
        }

        match self.l2_get(fingerprint).await {
            Ok(Some(result)) => {
                self.metrics
                    .incr("classification_cache_hits_total", &[("tier", "l2")]);
                self.l1_put(fingerprint, result.clone());
                return result;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %err,
                    "L2 classification lookup failed, continuing to classifier"
                );
            }
        }

        let outcome = self
            .breaker
            .call(|| async { self.client.classify(alert).await })
            .await;

        match outcome {
            Ok(result) => {
                if let Err(err) = self.l2_put(fingerprint, &result).await {
                    warn!(
                        fingerprint = %fingerprint,
                        error = %err,
                        "failed to populate L2 classification cache"
                    );
                }
                self.l1_put(fingerprint, result.clone());
                result
            }
            Err(err) => {
                debug!(
                    fingerprint = %fingerprint,
                    error = %err,
                    "classification degraded to fallback"
                );
                self.metrics.incr(
                    "classification_fallback_total",
                    &[("reason", if err.is_cancelled() { "cancelled" } else { "error" })],
                );
                fallback_result(alert)
            }
        }
    }

    fn l1_get(&self, fingerprint: Fingerprint) -> Option<ClassificationResult> {
        let mut l1 = self.l1.lock().expect("l1 mutex");
        match l1.get(&fingerprint) {
            Some(entry) if entry.stored_at.elapsed() < self.cache_config.l1_ttl() => {
                Some(entry.result.clone())
            }
            Some(_) => {
                l1.pop(&fingerprint);
                None
            }
            None => None,
        }
    }

    fn l1_put(&self, fingerprint: Fingerprint, result: ClassificationResult) {
        self.l1.lock().expect("l1 mutex").put(
            fingerprint,
            L1Entry {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    async fn l2_get(
        &self,
        fingerprint: Fingerprint,
    ) -> Result<Option<ClassificationResult>> {
        match &self.l2 {
            Some(cache) => {
                get_json(cache.as_ref(), &CacheKeys::classification(fingerprint))
                    .await
            }
            None => Ok(None),
        }
    }

    async fn l2_put(
        &self,
        fingerprint: Fingerprint,
        result: &ClassificationResult,
    ) -> Result<()> {
        match &self.l2 {
            Some(cache) => {
                set_json(
                    cache.as_ref(),
                    &CacheKeys::classification(fingerprint),
                    result,
                    Some(self.cache_config.l2_ttl()),
                )
                .await
            }
            None => Ok(()),
        }
    }
}
