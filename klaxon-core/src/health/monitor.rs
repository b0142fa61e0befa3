use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use klaxon_model::Target;

use crate::config::HealthConfig;
use crate::error::{AlertError, Result};
use crate::publish::TargetRegistry;

/// How a single target is probed; HTTP in production, scripted in tests.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &Target) -> Result<()>;
}

/// HEAD against the target's declared health endpoint, or a synthetic probe
/// (HEAD on the sink endpoint itself) when none is declared via the
/// `health_url` target label.
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl std::fmt::Debug for HttpHealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHealthProbe").finish()
    }
}

impl HttpHealthProbe {
    pub fn new(config: &HealthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, target: &Target) -> Result<()> {
        let url = match target.labels.get("health_url") {
            Some(declared) => declared.to_string(),
            None => target.endpoint.to_string(),
        };
        let response = self.http.head(&url).send().await?;
        let status = response.status();
        // Synthetic probes hit sink ingestion endpoints, which commonly
        // reject HEAD with 4xx while being perfectly reachable. Only server
        // errors count against health.
        if status.is_server_error() {
            return Err(AlertError::from_status(status, url));
        }
        Ok(())
    }
}

/// Periodically probes every registered target and feeds the results into
/// the registry's health state machine.
pub struct HealthMonitor {
    registry: Arc<TargetRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthConfig,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("registry", &self.registry)
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<TargetRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    pub fn with_http(registry: Arc<TargetRegistry>, config: HealthConfig) -> Result<Self> {
        let probe = Arc::new(HttpHealthProbe::new(&config)?);
        Ok(Self::new(registry, probe, config))
    }

    /// Probe every target once, concurrently.
    pub async fn check_all(&self) {
        let snapshot = self.registry.snapshot().await;
        let checks = snapshot.into_iter().map(|entry| {
            let registry = Arc::clone(&self.registry);
            let probe = Arc::clone(&self.probe);
            async move {
                let name = entry.target.name.clone();
                let result = probe.probe(&entry.target).await;
                let ok = result.is_ok();
                if let Err(err) = &result {
                    debug!(target = %name, error = %err, "health probe failed");
                }
                registry.record_check(&name, ok).await;
            }
        });
        join_all(checks).await;
    }

    pub fn spawn(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.config.check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("health monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.check_all().await;
                    }
                }
            }
        })
    }
}
