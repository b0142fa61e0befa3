use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use klaxon_model::{LabelSet, Silence, SilenceId, SilenceStatus};

use crate::config::SilenceConfig;
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::storage::{SilenceStats, SilenceStore};

use super::matcher;

/// Silence decisions served from an in-memory view of active silences.
///
/// The view refreshes on the sync interval and after every write; the GC
/// loop derives statuses from the clock so expired silences stop matching
/// even if no write ever touches them again.
pub struct SilenceEngine {
    store: Arc<dyn SilenceStore>,
    active: RwLock<Vec<Silence>>,
    config: SilenceConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for SilenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SilenceEngine")
            .field(
                "active_cached",
                &self.active.try_read().map(|a| a.len()).unwrap_or_default(),
            )
            .finish()
    }
}

impl SilenceEngine {
    pub fn new(
        store: Arc<dyn SilenceStore>,
        config: SilenceConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            active: RwLock::new(Vec::new()),
            config,
            metrics,
        }
    }

    /// Whether any currently-active silence matches; returns the silencer.
    pub async fn is_silenced(&self, labels: &LabelSet) -> Option<SilenceId> {
        let now = Utc::now();
        let active = self.active.read().await;
        active
            .iter()
            .filter(|silence| silence.is_active_at(now))
            .find(|silence| matcher::all_match(&silence.matchers, labels))
            .map(|silence| silence.id)
    }

    /// Reload the active view from the store.
    pub async fn sync(&self) -> Result<usize> {
        let fresh = self.store.active(Utc::now()).await?;
        let count = fresh.len();
        *self.active.write().await = fresh;
        self.metrics
            .gauge("silences_active", count as f64, &[]);
        debug!(active = count, "synced silence cache");
        Ok(count)
    }

    pub async fn create(&self, silence: &Silence) -> Result<Silence> {
        matcher::validate_matchers(&silence.matchers)?;
        let created = self.store.create(silence).await?;
        self.sync().await?;
        Ok(created)
    }

    /// Optimistic update; `expected_updated_at` is the token the caller read.
    pub async fn update(
        &self,
        silence: &Silence,
        expected_updated_at: chrono::DateTime<Utc>,
    ) -> Result<Silence> {
        matcher::validate_matchers(&silence.matchers)?;
        let updated = self.store.update(silence, expected_updated_at).await?;
        self.sync().await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: SilenceId) -> Result<()> {
        self.store.delete(id).await?;
        self.sync().await?;
        Ok(())
    }

    pub async fn expire(&self, id: SilenceId) -> Result<Silence> {
        let expired = self.store.expire(id, Utc::now()).await?;
        self.sync().await?;
        Ok(expired)
    }

    pub async fn get(&self, id: SilenceId) -> Result<Option<Silence>> {
        self.store.get(id).await
    }

    pub async fn list(&self, status: Option<SilenceStatus>) -> Result<Vec<Silence>> {
        self.store.list(status).await
    }

    pub async fn expiring_soon(&self) -> Result<Vec<Silence>> {
        self.store
            .expiring_soon(
                Utc::now(),
                chrono::Duration::from_std(self.config.expiring_soon())
                    .unwrap_or_else(|_| chrono::Duration::hours(1)),
            )
            .await
    }

    pub async fn stats(&self) -> Result<SilenceStats> {
        self.store.stats().await
    }

    /// Derive statuses from the clock and evict what no longer matters.
    pub async fn gc(&self) -> Result<u64> {
        let changed = self.store.bulk_update_status(Utc::now()).await?;
        if changed > 0 {
            info!(changed, "silence GC updated statuses");
        }
        self.sync().await?;
        Ok(changed)
    }

    /// Background sync + GC loops; both stop on token cancellation.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let sync_engine = Arc::clone(self);
        let sync_token = shutdown.clone();
        let sync_interval = self.config.sync_interval();
        let sync_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sync_token.cancelled() => {
                        info!("silence sync loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = sync_engine.sync().await {
                            warn!(error = %err, "silence sync failed");
                        }
                    }
                }
            }
        });

        let gc_engine = Arc::clone(self);
        let gc_token = shutdown;
        let gc_interval = self.config.gc_interval();
        let gc_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = gc_token.cancelled() => {
                        info!("silence GC loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = gc_engine.gc().await {
                            warn!(error = %err, "silence GC failed");
                        }
                    }
                }
            }
        });

        vec![sync_handle, gc_handle]
    }
}
