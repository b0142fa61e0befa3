use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::config::PublishConfig;
use crate::error::AlertError;
use crate::metrics::MetricsSink;
use crate::queue::{DispatchStatus, JobExecutor, PublishJob};

use super::registry::TargetRegistry;
use super::sink::PublisherFactory;

/// Executes publish jobs: per-target circuit breaker, per-target in-flight
/// cap, shared connection pool. Fan-out parallelism comes from the worker
/// pool; this type only bounds what a single target endures.
pub struct PublishDispatcher {
    registry: Arc<TargetRegistry>,
    factory: PublisherFactory,
    config: PublishConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for PublishDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishDispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

impl PublishDispatcher {
    pub fn new(
        registry: Arc<TargetRegistry>,
        factory: PublisherFactory,
        config: PublishConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            factory,
            config,
            breakers: Mutex::new(HashMap::new()),
            limits: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn breaker_for(&self, target_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map mutex");
        Arc::clone(breakers.entry(target_name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                format!("target:{target_name}"),
                self.config.breaker.clone(),
                Arc::clone(&self.metrics),
            ))
        }))
    }

    fn limit_for(&self, target_name: &str) -> Arc<Semaphore> {
        let mut limits = self.limits.lock().expect("limit map mutex");
        Arc::clone(limits.entry(target_name.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(self.config.per_target_concurrency.max(1)))
        }))
    }
}

#[async_trait]
impl JobExecutor for PublishDispatcher {
    async fn execute(&self, job: &PublishJob) -> DispatchStatus {
        let Some(snapshot) = self.registry.get(&job.target_name).await else {
            // Target left the registry while the job was queued.
            return DispatchStatus::DeadLetter {
                error: format!("target {} no longer registered", job.target_name),
            };
        };

        let publisher = match self.factory.make(&snapshot.target) {
            Ok(publisher) => publisher,
            Err(err) => {
                return DispatchStatus::DeadLetter {
                    error: err.to_string(),
                };
            }
        };

        let limit = self.limit_for(&job.target_name);
        let permit = match limit.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return DispatchStatus::Retry {
                    error: "per-target limiter closed".into(),
                };
            }
        };

        let breaker = self.breaker_for(&job.target_name);
        let result = breaker
            .call(|| async { publisher.publish(&job.payload).await })
            .await;
        drop(permit);

        match result {
            Ok(()) => DispatchStatus::Success,
            Err(err @ AlertError::CircuitOpen(_)) => {
                // Fail fast now; the retry lands after the reset timeout.
                DispatchStatus::Retry {
                    error: err.to_string(),
                }
            }
            Err(err) if err.is_transient() => DispatchStatus::Retry {
                error: err.to_string(),
            },
            Err(err) => {
                warn!(
                    target = %job.target_name,
                    job_id = %job.id,
                    error = %err,
                    "permanent publish failure"
                );
                DispatchStatus::DeadLetter {
                    error: err.to_string(),
                }
            }
        }
    }
}
