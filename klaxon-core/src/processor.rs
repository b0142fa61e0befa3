//! The orchestrator: fixed stage order per ingest, per-stage deadlines,
//! local recovery in the optional stages.
//!
//! Stage order: fingerprint → dedup (storage, surfaces errors) → classify →
//! inhibit → silence → filter → group. Classification, inhibition, and
//! silence degrade to their fallbacks on error or deadline; storage failures
//! are the only thing the caller sees as a request-level error.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use klaxon_contracts::ingest::{IngestAlert, IngestBatch};
use klaxon_contracts::outcome::{AlertOutcome, BatchOutcome};
use klaxon_model::{Alert, AlertTransition, HistoryEntry};

use crate::classify::{ClassificationService, fallback_result};
use crate::config::StageTimeouts;
use crate::dedup::DedupEngine;
use crate::error::{AlertError, Result};
use crate::filter::{FilterDecision, FilterEngine};
use crate::fingerprint::fingerprint;
use crate::grouping::GroupManager;
use crate::inhibit::InhibitionEngine;
use crate::metrics::MetricsSink;
use crate::silence::SilenceEngine;
use crate::storage::AlertStore;

pub struct AlertProcessor {
    store: Arc<dyn AlertStore>,
    dedup: DedupEngine,
    classifier: Arc<ClassificationService>,
    silences: Arc<SilenceEngine>,
    inhibitions: Arc<InhibitionEngine>,
    filter: FilterEngine,
    groups: Arc<GroupManager>,
    stages: StageTimeouts,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for AlertProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertProcessor")
            .field("groups", &self.groups)
            .finish()
    }
}

impl AlertProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AlertStore>,
        classifier: Arc<ClassificationService>,
        silences: Arc<SilenceEngine>,
        inhibitions: Arc<InhibitionEngine>,
        filter: FilterEngine,
        groups: Arc<GroupManager>,
        stages: StageTimeouts,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            dedup: DedupEngine::new(Arc::clone(&store)),
            store,
            classifier,
            silences,
            inhibitions,
            filter,
            groups,
            stages,
            metrics,
        }
    }

    /// Process a normalized batch, producing one outcome per alert in order.
    pub async fn process_batch(
        &self,
        batch: IngestBatch,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(batch.alerts.len());
        for ingest in batch.alerts {
            if cancel.is_cancelled() {
                outcomes.push(AlertOutcome {
                    cancelled: true,
                    ..AlertOutcome::default()
                });
                continue;
            }
            outcomes.push(self.process_alert(ingest, cancel).await?);
        }
        Ok(BatchOutcome { outcomes })
    }

    async fn process_alert(
        &self,
        ingest: IngestAlert,
        cancel: &CancellationToken,
    ) -> Result<AlertOutcome> {
        let started = tokio::time::Instant::now();
        let mut outcome = AlertOutcome::default();

        let mut alert = Alert {
            fingerprint: fingerprint(&ingest.labels),
            alert_name: ingest.alert_name,
            labels: ingest.labels,
            annotations: ingest.annotations,
            status: ingest.status,
            starts_at: ingest.starts_at,
            ends_at: ingest.ends_at,
            generator_url: ingest.generator_url,
            severity: None,
        };
        alert
            .validate()
            .map_err(|err| AlertError::Validation(err.to_string()))?;
        outcome.fingerprint = Some(alert.fingerprint);

        // Dedup is the durable write; its failure fails the request.
        let dedup = timeout(self.stages.dedup(), self.dedup.process(&alert))
            .await
            .map_err(|_| {
                AlertError::Transient("dedup stage deadline exceeded".into())
            })??;
        outcome.stored = true;
        outcome.deduplicated = dedup.is_duplicate;
        outcome.occurrence_count = dedup.occurrence_count;

        // Keep the inhibition source cache in step with firing state.
        if alert.status.is_resolved() {
            self.inhibitions.evict_alert(alert.fingerprint).await;
        } else {
            self.inhibitions.cache_alert(&dedup.stored).await;
        }

        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        // Classification: firing alerts only; never fails the pipeline.
        if !alert.status.is_resolved() {
            let classification =
                match timeout(self.stages.classify(), self.classifier.classify(&alert))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            fingerprint = %alert.fingerprint,
                            "classification stage deadline exceeded, using fallback"
                        );
                        fallback_result(&alert)
                    }
                };
            alert.severity = Some(classification.severity);
            outcome.classified = Some(classification.severity);
            if let Err(err) = self
                .store
                .set_severity(alert.fingerprint, classification.severity)
                .await
            {
                warn!(fingerprint = %alert.fingerprint, error = %err, "failed to persist severity");
            }
            if let Err(err) = self
                .store
                .append_history(&HistoryEntry {
                    fingerprint: alert.fingerprint,
                    transition: AlertTransition::Classified,
                    recorded_at: Utc::now(),
                    detail: Some(classification.severity.as_str().to_string()),
                })
                .await
            {
                warn!(fingerprint = %alert.fingerprint, error = %err, "failed to record classification history");
            }
        } else {
            alert.severity = dedup.stored.alert.severity;
            outcome.classified = dedup.stored.alert.severity;
        }

        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return Ok(outcome);
        }

        // Inhibition: firing alerts only; degrades to not-inhibited.
        if !alert.status.is_resolved() {
            match timeout(self.stages.inhibit(), self.inhibitions.check(&alert)).await {
                Ok(Ok(Some(source))) => {
                    outcome.inhibited_by = Some(source);
                    debug!(
                        fingerprint = %alert.fingerprint,
                        source = %source,
                        "alert inhibited"
                    );
                    self.observe(started);
                    return Ok(outcome);
                }
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    warn!(fingerprint = %alert.fingerprint, error = %err, "inhibition check degraded");
                }
                Err(_) => {
                    warn!(fingerprint = %alert.fingerprint, "inhibition stage deadline exceeded");
                }
            }
        }

        // Silence: degrades to not-silenced.
        match timeout(self.stages.silence(), self.silences.is_silenced(&alert.labels))
            .await
        {
            Ok(Some(silence_id)) => {
                outcome.silenced_by = Some(silence_id);
                debug!(
                    fingerprint = %alert.fingerprint,
                    silence = %silence_id,
                    "alert silenced"
                );
                self.metrics.incr("alerts_silenced_total", &[]);
                self.observe(started);
                return Ok(outcome);
            }
            Ok(None) => {}
            Err(_) => {
                warn!(fingerprint = %alert.fingerprint, "silence stage deadline exceeded");
            }
        }

        // Static pre-publish filter.
        if let FilterDecision::Drop { rule } = self.filter.evaluate(&alert.labels) {
            outcome.dropped = Some(rule);
            self.observe(started);
            return Ok(outcome);
        }

        // Grouping persists timer state; failure surfaces like storage.
        let insert = timeout(self.stages.group(), self.groups.insert(&alert))
            .await
            .map_err(|_| {
                AlertError::Transient("group stage deadline exceeded".into())
            })??;
        outcome.grouped_into = Some(insert.key);

        self.observe(started);
        Ok(outcome)
    }

    fn observe(&self, started: tokio::time::Instant) {
        self.metrics.observe(
            "alert_processing_seconds",
            started.elapsed().as_secs_f64(),
            &[],
        );
    }
}
