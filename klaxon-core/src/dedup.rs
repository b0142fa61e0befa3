//! Deduplication: collapse repeat firings into one stateful row.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use klaxon_model::{Alert, AlertTransition, HistoryEntry, StoredAlert};

use crate::error::Result;
use crate::storage::AlertStore;

/// What `process` observed about the ingest.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    pub stored: StoredAlert,
    pub occurrence_count: u64,
}

/// Collapses repeats and keeps the history log current.
#[derive(Clone)]
pub struct DedupEngine {
    store: Arc<dyn AlertStore>,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine").finish()
    }
}

impl DedupEngine {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Persist the alert, serializing concurrent ingests of one fingerprint
    /// on the store's atomic upsert. Resolved ingests transition the stored
    /// row whatever its prior state.
    pub async fn process(&self, alert: &Alert) -> Result<DedupOutcome> {
        if alert.status.is_resolved() {
            return self.process_resolved(alert).await;
        }

        let upsert = self.store.upsert_firing(alert).await?;
        let transition = if upsert.inserted {
            AlertTransition::Created
        } else {
            AlertTransition::Refired
        };
        self.store
            .append_history(&HistoryEntry {
                fingerprint: alert.fingerprint,
                transition,
                recorded_at: Utc::now(),
                detail: None,
            })
            .await?;

        debug!(
            fingerprint = %alert.fingerprint,
            duplicate = !upsert.inserted,
            occurrences = upsert.stored.occurrence_count,
            "deduplicated alert"
        );

        Ok(DedupOutcome {
            is_duplicate: !upsert.inserted,
            occurrence_count: upsert.stored.occurrence_count,
            stored: upsert.stored,
        })
    }

    async fn process_resolved(&self, alert: &Alert) -> Result<DedupOutcome> {
        let ends_at = alert.ends_at.unwrap_or_else(Utc::now);
        let stored = match self.store.resolve(alert.fingerprint, ends_at).await? {
            Some(stored) => {
                self.store
                    .append_history(&HistoryEntry {
                        fingerprint: alert.fingerprint,
                        transition: AlertTransition::Resolved,
                        recorded_at: Utc::now(),
                        detail: None,
                    })
                    .await?;
                stored
            }
            // A resolve for an alert we never saw firing: store it so the
            // resolution still reaches the group flush.
            None => {
                let upsert = self.store.upsert_firing(alert).await?;
                let stored = self
                    .store
                    .resolve(alert.fingerprint, ends_at)
                    .await?
                    .unwrap_or(upsert.stored);
                self.store
                    .append_history(&HistoryEntry {
                        fingerprint: alert.fingerprint,
                        transition: AlertTransition::Resolved,
                        recorded_at: Utc::now(),
                        detail: Some("resolved on first sight".to_string()),
                    })
                    .await?;
                stored
            }
        };

        Ok(DedupOutcome {
            is_duplicate: false,
            occurrence_count: stored.occurrence_count,
            stored,
        })
    }
}
