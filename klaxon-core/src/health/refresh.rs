use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use klaxon_model::Target;

use crate::config::RefreshConfig;
use crate::error::Result;
use crate::publish::TargetRegistry;

/// Contract to whatever discovers targets (cluster secret store, file,
/// static config). Discovery mechanics are outside the core.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Target>>;
}

/// Fixed target set; used at boot and in tests.
#[derive(Debug, Default)]
pub struct StaticTargetSource {
    targets: RwLock<Vec<Target>>,
}

impl StaticTargetSource {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: RwLock::new(targets),
        }
    }

    pub async fn replace(&self, targets: Vec<Target>) {
        *self.targets.write().await = targets;
    }
}

#[async_trait]
impl TargetSource for StaticTargetSource {
    async fn load(&self) -> Result<Vec<Target>> {
        Ok(self.targets.read().await.clone())
    }
}

/// Re-reads the target set on an interval and applies the diff to the
/// registry. A failed read retries with backoff inside the tick and leaves
/// the current registry untouched.
pub struct RefreshLoop {
    source: Arc<dyn TargetSource>,
    registry: Arc<TargetRegistry>,
    config: RefreshConfig,
}

impl std::fmt::Debug for RefreshLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLoop")
            .field("registry", &self.registry)
            .finish()
    }
}

impl RefreshLoop {
    pub fn new(
        source: Arc<dyn TargetSource>,
        registry: Arc<TargetRegistry>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            source,
            registry,
            config,
        }
    }

    /// One refresh attempt with in-tick retries.
    pub async fn refresh_once(&self) -> Result<()> {
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 0u32;
        loop {
            match self.source.load().await {
                Ok(targets) => {
                    self.registry.apply(targets).await;
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < self.config.max_read_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        error = %err,
                        "target refresh read failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    warn!(error = %err, "target refresh failed, keeping current registry");
                    return Err(err);
                }
            }
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.config.refresh_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("target refresh loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = self.refresh_once().await;
                    }
                }
            }
        })
    }
}
