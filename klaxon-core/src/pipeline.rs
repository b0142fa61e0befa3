//! Composition root: builds the pipeline from injected stores/clients,
//! restores persisted timers, spawns every background loop, and owns the
//! shutdown token. The embedding process (HTTP transport, config loader)
//! constructs a [`PipelineBuilder`], hands over its infrastructure, and gets
//! back a running [`Pipeline`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::cache::SharedCache;
use crate::classify::{ClassificationService, ClassifierClient, HttpClassifierClient};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::filter::{FilterEngine, FilterRule};
use crate::grouping::{GroupManager, RestoreReport, TimerFire, TimerManager};
use crate::health::{HealthMonitor, HealthProbe, RefreshLoop, TargetSource};
use crate::inhibit::InhibitionEngine;
use crate::metrics::{self, MetricsSink};
use crate::mode::ModeManager;
use crate::processor::AlertProcessor;
use crate::publish::{
    FlushFanout, PublishDispatcher, PublisherFactory, TargetRegistry,
};
use crate::queue::{
    DeadLetterQueue, JobExecutor, JobTracker, PriorityQueue, RetryScheduler,
    WorkerPool,
};
use crate::silence::SilenceEngine;
use crate::storage::{
    AlertStore, DeadLetterStore, SilenceStore, TimerStore,
};

use klaxon_model::InhibitionRule;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything the pipeline needs injected; construction stays explicit so
/// tests can swap any seam for an in-memory fake.
pub struct PipelineBuilder {
    config: ProxyConfig,
    alerts: Arc<dyn AlertStore>,
    silences: Arc<dyn SilenceStore>,
    timers: Arc<dyn TimerStore>,
    dead_letters: Arc<dyn DeadLetterStore>,
    target_source: Arc<dyn TargetSource>,
    shared_cache: Option<Arc<dyn SharedCache>>,
    classifier_client: Option<Arc<dyn ClassifierClient>>,
    inhibition_rules: Vec<InhibitionRule>,
    filter_rules: Vec<FilterRule>,
    metrics: Arc<dyn MetricsSink>,
    owner_id: Option<String>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    job_executor: Option<Arc<dyn JobExecutor>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("l2_enabled", &self.shared_cache.is_some())
            .field("inhibition_rules", &self.inhibition_rules.len())
            .field("filter_rules", &self.filter_rules.len())
            .finish()
    }
}

impl PipelineBuilder {
    pub fn new(
        config: ProxyConfig,
        alerts: Arc<dyn AlertStore>,
        silences: Arc<dyn SilenceStore>,
        timers: Arc<dyn TimerStore>,
        dead_letters: Arc<dyn DeadLetterStore>,
        target_source: Arc<dyn TargetSource>,
    ) -> Self {
        Self {
            config,
            alerts,
            silences,
            timers,
            dead_letters,
            target_source,
            shared_cache: None,
            classifier_client: None,
            inhibition_rules: Vec::new(),
            filter_rules: Vec::new(),
            metrics: metrics::noop(),
            owner_id: None,
            health_probe: None,
            job_executor: None,
        }
    }

    /// Optional L2; running without one degrades caching, never correctness.
    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    pub fn classifier_client(mut self, client: Arc<dyn ClassifierClient>) -> Self {
        self.classifier_client = Some(client);
        self
    }

    pub fn inhibition_rules(mut self, rules: Vec<InhibitionRule>) -> Self {
        self.inhibition_rules = rules;
        self
    }

    pub fn filter_rules(mut self, rules: Vec<FilterRule>) -> Self {
        self.filter_rules = rules;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Identity used for timer ownership; defaults to a fresh UUID.
    pub fn owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Override the target health probe (tests; non-HTTP sinks).
    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    /// Override job execution (tests; alternative dispatchers).
    pub fn job_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.job_executor = Some(executor);
        self
    }

    /// Build and start: restore persisted timers, then spawn every
    /// background loop.
    pub async fn start(self) -> Result<Pipeline> {
        let shutdown = CancellationToken::new();
        let metrics = Arc::clone(&self.metrics);
        let owner_id = self
            .owner_id
            .unwrap_or_else(|| format!("klaxon-{}", Uuid::now_v7()));

        // Classification ladder.
        let classifier_client: Arc<dyn ClassifierClient> =
            match self.classifier_client {
                Some(client) => client,
                None => Arc::new(HttpClassifierClient::new(
                    self.config.classifier.clone(),
                )?),
            };
        let classifier_breaker = Arc::new(CircuitBreaker::new(
            "classifier",
            self.config.classifier.breaker.clone(),
            Arc::clone(&metrics),
        ));
        let classifier = Arc::new(ClassificationService::new(
            self.config.cache.clone(),
            self.shared_cache.clone(),
            classifier_client,
            classifier_breaker,
            Arc::clone(&metrics),
        ));

        // Suppression engines.
        let silences = Arc::new(SilenceEngine::new(
            Arc::clone(&self.silences),
            self.config.silence.clone(),
            Arc::clone(&metrics),
        ));
        if let Err(err) = silences.sync().await {
            warn!(error = %err, "initial silence sync failed, cache starts empty");
        }
        let inhibitions = Arc::new(InhibitionEngine::new(
            self.inhibition_rules,
            Arc::clone(&self.alerts),
            self.shared_cache.clone(),
            Arc::clone(&metrics),
        ));

        // Grouping + timers.
        let (timers, fire_rx) = TimerManager::new(
            Arc::clone(&self.timers),
            owner_id,
            shutdown.clone(),
        );
        let groups = Arc::new(GroupManager::new(
            self.config.grouping.clone(),
            Arc::clone(&timers),
            Arc::clone(&self.alerts),
            Arc::clone(&metrics),
        ));
        let restore_report = timers.restore().await?;

        // Dispatch substrate.
        let registry = Arc::new(TargetRegistry::new(
            self.config.health.clone(),
            Arc::clone(&metrics),
        ));
        let refresh = Arc::new(RefreshLoop::new(
            Arc::clone(&self.target_source),
            Arc::clone(&registry),
            self.config.refresh.clone(),
        ));
        if let Err(err) = refresh.refresh_once().await {
            warn!(error = %err, "initial target discovery failed, starting with empty registry");
        }
        let mode = Arc::new(ModeManager::new(
            Arc::clone(&registry),
            self.config.mode.clone(),
            Arc::clone(&metrics),
        ));
        mode.evaluate().await;

        let queue = Arc::new(PriorityQueue::new(
            [
                self.config.queue.high_capacity,
                self.config.queue.medium_capacity,
                self.config.queue.low_capacity,
            ],
            self.config.queue.enqueue_timeout(),
            Arc::clone(&metrics),
        ));
        let (retry, retry_handle) = RetryScheduler::spawn(
            Arc::clone(&queue),
            shutdown.clone(),
            Arc::clone(&metrics),
        );
        let tracker = Arc::new(JobTracker::default());
        let executor: Arc<dyn JobExecutor> = match self.job_executor {
            Some(executor) => executor,
            None => Arc::new(PublishDispatcher::new(
                Arc::clone(&registry),
                PublisherFactory::new(&self.config.publish)?,
                self.config.publish.clone(),
                Arc::clone(&metrics),
            )),
        };
        let workers = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            executor,
            retry,
            Arc::clone(&self.dead_letters),
            Arc::clone(&tracker),
            self.config.queue.clone(),
            Arc::clone(&metrics),
        ));
        let dlq = Arc::new(DeadLetterQueue::new(
            Arc::clone(&self.dead_letters),
            Arc::clone(&queue) as Arc<dyn crate::queue::Replayer>,
        ));

        let fanout = Arc::new(FlushFanout::new(
            Arc::clone(&self.alerts),
            Arc::clone(&registry),
            Arc::clone(&mode),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        ));

        let processor = Arc::new(AlertProcessor::new(
            Arc::clone(&self.alerts),
            classifier,
            Arc::clone(&silences),
            Arc::clone(&inhibitions),
            FilterEngine::new(self.filter_rules, Arc::clone(&metrics)),
            Arc::clone(&groups),
            self.config.stages.clone(),
            Arc::clone(&metrics),
        ));

        // Background loops.
        let mut tasks = Vec::new();
        tasks.push(retry_handle);
        tasks.extend(workers.spawn(shutdown.clone()));
        tasks.extend(silences.spawn_maintenance(shutdown.clone()));
        tasks.push(inhibitions.spawn_gc(shutdown.clone()));
        tasks.push(mode.spawn_probe(shutdown.clone()));
        let health_monitor = Arc::new(match self.health_probe {
            Some(probe) => HealthMonitor::new(
                Arc::clone(&registry),
                probe,
                self.config.health.clone(),
            ),
            None => HealthMonitor::with_http(
                Arc::clone(&registry),
                self.config.health.clone(),
            )?,
        });
        tasks.push(health_monitor.spawn(shutdown.clone()));
        tasks.push(Arc::clone(&refresh).spawn(shutdown.clone()));
        tasks.push(spawn_flush_loop(
            Arc::clone(&groups),
            Arc::clone(&fanout),
            fire_rx,
            shutdown.clone(),
        ));

        info!(
            restored = restore_report.restored,
            missed = restore_report.missed,
            "pipeline started"
        );

        Ok(Pipeline {
            processor,
            silences,
            groups,
            timers,
            registry,
            mode,
            queue,
            tracker,
            dlq,
            workers,
            restore_report,
            shutdown,
            tasks,
        })
    }
}

/// Consumes timer fires, resolves them to flush snapshots, and fans out.
fn spawn_flush_loop(
    groups: Arc<GroupManager>,
    fanout: Arc<FlushFanout>,
    mut fire_rx: mpsc::Receiver<TimerFire>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("flush loop shutting down");
                    break;
                }
                fire = fire_rx.recv() => {
                    let Some(fire) = fire else { break };
                    match groups.handle_fire(fire).await {
                        Ok(Some(flush)) => {
                            if let Err(err) = fanout.handle_flush(flush).await {
                                warn!(error = %err, "flush fanout failed");
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, "timer fire handling failed");
                        }
                    }
                }
            }
        }
    })
}

/// A running pipeline: the processor for the ingress layer plus handles to
/// the operational surfaces (silences, DLQ, tracker, mode).
pub struct Pipeline {
    pub processor: Arc<AlertProcessor>,
    pub silences: Arc<SilenceEngine>,
    pub groups: Arc<GroupManager>,
    pub timers: Arc<TimerManager>,
    pub registry: Arc<TargetRegistry>,
    pub mode: Arc<ModeManager>,
    pub queue: Arc<PriorityQueue>,
    pub tracker: Arc<JobTracker>,
    pub dlq: Arc<DeadLetterQueue>,
    pub workers: Arc<WorkerPool>,
    pub restore_report: RestoreReport,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("tasks", &self.tasks.len())
            .field("restore_report", &self.restore_report)
            .finish()
    }
}

impl Pipeline {
    /// Cancel every background task and wait (bounded) for them to drain.
    /// Local timer tasks die here; their persistent records survive for the
    /// next process.
    pub async fn shutdown(mut self) {
        info!("pipeline shutting down");
        self.shutdown.cancel();
        self.timers.cancel_all();

        let drain = async {
            for task in self.tasks.drain(..) {
                if let Err(err) = task.await {
                    if !err.is_cancelled() {
                        warn!(error = %err, "background task ended abnormally");
                    }
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "shutdown grace expired with tasks still running"
            );
        }
        info!("pipeline stopped");
    }
}
