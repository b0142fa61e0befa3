//! End-to-end scenarios over the assembled pipeline with in-memory
//! infrastructure and a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;

use klaxon_contracts::ingest::{IngestAlert, IngestBatch};
use klaxon_core::cache::InMemoryCache;
use klaxon_core::classify::ClassifierClient;
use klaxon_core::config::ProxyConfig;
use klaxon_core::error::Result;
use klaxon_core::health::{HealthProbe, StaticTargetSource};
use klaxon_core::pipeline::{Pipeline, PipelineBuilder};
use klaxon_core::queue::{DispatchStatus, JobExecutor, PublishJob};
use klaxon_core::storage::memory::{
    InMemoryAlertStore, InMemoryDeadLetterStore, InMemorySilenceStore,
    InMemoryTimerStore,
};
use klaxon_core::storage::{AlertStore, FireType, TimerRecord, TimerStore};
use klaxon_model::{
    Alert, AlertStatus, Category, ClassificationResult, Credentials, GroupKey,
    LabelSet, Matcher, Severity, Silence, SilenceId, SilenceStatus, Target,
    TargetType,
};

struct OkProbe;

#[async_trait]
impl HealthProbe for OkProbe {
    async fn probe(&self, _target: &Target) -> Result<()> {
        Ok(())
    }
}

/// Records every executed job and succeeds.
#[derive(Default)]
struct RecordingExecutor {
    jobs: Mutex<Vec<PublishJob>>,
}

impl RecordingExecutor {
    fn jobs(&self) -> Vec<PublishJob> {
        self.jobs.lock().expect("jobs mutex").clone()
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn execute(&self, job: &PublishJob) -> DispatchStatus {
        self.jobs.lock().expect("jobs mutex").push(job.clone());
        DispatchStatus::Success
    }
}

struct StaticClassifier(Severity);

#[async_trait]
impl ClassifierClient for StaticClassifier {
    async fn classify(&self, _alert: &Alert) -> Result<ClassificationResult> {
        Ok(ClassificationResult {
            severity: self.0,
            confidence: 0.95,
            reasoning: "scripted".into(),
            recommendations: vec![],
            category: Category::unknown(),
            processing_time_s: 0.01,
            fallback: false,
        })
    }
}

fn target(name: &str) -> Target {
    Target {
        name: name.into(),
        target_type: TargetType::Webhook,
        endpoint: Url::parse("https://hooks.example/x").expect("url"),
        credentials: Credentials::new(""),
        labels: LabelSet::new(),
    }
}

struct Harness {
    pipeline: Pipeline,
    executor: Arc<RecordingExecutor>,
    alerts: Arc<InMemoryAlertStore>,
}

async fn start(targets: Vec<Target>, timers: Arc<InMemoryTimerStore>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env(),
        )
        .with_test_writer()
        .try_init();

    let alerts = Arc::new(InMemoryAlertStore::new());
    let executor = Arc::new(RecordingExecutor::default());

    let pipeline = PipelineBuilder::new(
        ProxyConfig::default(),
        alerts.clone(),
        Arc::new(InMemorySilenceStore::new()),
        timers.clone(),
        Arc::new(InMemoryDeadLetterStore::new()),
        Arc::new(StaticTargetSource::new(targets)),
    )
    .shared_cache(Arc::new(InMemoryCache::new()))
    .classifier_client(Arc::new(StaticClassifier(Severity::Critical)))
    .health_probe(Arc::new(OkProbe))
    .job_executor(executor.clone())
    .owner_id("itest")
    .start()
    .await
    .expect("pipeline starts");

    Harness {
        pipeline,
        executor,
        alerts,
    }
}

fn firing(pairs: &[(&str, &str)]) -> IngestAlert {
    let labels: LabelSet = pairs.iter().copied().collect();
    IngestAlert {
        alert_name: labels.get("alertname").expect("alertname").to_string(),
        labels,
        annotations: LabelSet::new(),
        status: AlertStatus::Firing,
        starts_at: Utc::now(),
        ends_at: None,
        generator_url: None,
    }
}

fn batch(alerts: Vec<IngestAlert>) -> IngestBatch {
    IngestBatch {
        receiver: "klaxon".into(),
        group_key_hint: String::new(),
        common_labels: LabelSet::new(),
        common_annotations: LabelSet::new(),
        alerts,
    }
}

/// Advance virtual time in small steps until `predicate` holds.
async fn eventually<F: Fn() -> bool>(predicate: F, virtual_secs: u64, what: &str) {
    for _ in 0..(virtual_secs * 10) {
        if predicate() {
            return;
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
    }
    assert!(predicate(), "timed out waiting for {what}");
}

#[tokio::test(start_paused = true)]
async fn repeated_ingest_dedups_groups_and_publishes_once_per_target() {
    let h = start(
        vec![target("slack-prod"), target("pagerduty")],
        Arc::new(InMemoryTimerStore::new()),
    )
    .await;
    let cancel = CancellationToken::new();

    let alert = firing(&[
        ("alertname", "HighCPU"),
        ("instance", "h1"),
        ("severity", "critical"),
    ]);
    for _ in 0..5 {
        let outcome = h
            .pipeline
            .processor
            .process_batch(batch(vec![alert.clone()]), &cancel)
            .await
            .expect("ingest");
        assert!(outcome.outcomes[0].stored);
    }

    // One row, counter = 5.
    let fingerprint =
        klaxon_core::fingerprint::fingerprint(&alert.labels);
    let stored = h
        .alerts
        .get(fingerprint)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(stored.occurrence_count, 5);

    // One group; group_wait (30s) drives exactly one flush.
    assert_eq!(h.pipeline.groups.group_count().await, 1);
    tokio::time::advance(Duration::from_secs(31)).await;
    eventually(
        || h.executor.jobs().len() >= 2,
        30,
        "one job per target after group_wait",
    )
    .await;

    let jobs = h.executor.jobs();
    assert_eq!(jobs.len(), 2, "exactly one job per target");
    let mut targets: Vec<&str> =
        jobs.iter().map(|j| j.target_name.as_str()).collect();
    targets.sort();
    assert_eq!(targets, ["pagerduty", "slack-prod"]);
    for job in &jobs {
        assert_eq!(job.group_key, GroupKey::from("HighCPU|h1"));
        assert_eq!(job.priority, klaxon_model::Priority::High);
        assert!(job.payload.body.contains("×5"));
    }

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silenced_alert_never_reaches_a_target() {
    let h = start(
        vec![target("slack-prod")],
        Arc::new(InMemoryTimerStore::new()),
    )
    .await;
    let cancel = CancellationToken::new();

    let now = Utc::now();
    let active = Silence {
        id: SilenceId::new(),
        created_by: "ops".into(),
        comment: "maintenance window".into(),
        starts_at: now - chrono::Duration::minutes(10),
        ends_at: now + chrono::Duration::hours(2),
        matchers: vec![Matcher::equal("alertname", "HighCPU")],
        status: SilenceStatus::Active,
        created_at: now,
        updated_at: now,
    };
    let created = h
        .pipeline
        .silences
        .create(&active)
        .await
        .expect("create silence");

    // An expired silence with tighter matchers must not be the reason.
    let expired = Silence {
        id: SilenceId::new(),
        starts_at: now - chrono::Duration::hours(3),
        ends_at: now - chrono::Duration::hours(1),
        matchers: vec![
            Matcher::equal("alertname", "HighCPU"),
            Matcher::equal("env", "staging"),
        ],
        status: SilenceStatus::Expired,
        ..active.clone()
    };
    h.pipeline
        .silences
        .create(&expired)
        .await
        .expect("create expired silence");

    let outcome = h
        .pipeline
        .processor
        .process_batch(
            batch(vec![firing(&[("alertname", "HighCPU"), ("env", "prod")])]),
            &cancel,
        )
        .await
        .expect("ingest");

    assert_eq!(outcome.outcomes[0].silenced_by, Some(created.id));
    assert!(outcome.outcomes[0].grouped_into.is_none());

    // Even after every timer horizon, nothing was published.
    tokio::time::advance(Duration::from_secs(400)).await;
    tokio::task::yield_now().await;
    assert!(h.executor.jobs().is_empty());

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restored_timer_fires_after_remaining_interval() {
    // A previous process stored an alert, armed group_wait, and died with
    // 15 seconds left on the clock.
    let timers = Arc::new(InMemoryTimerStore::new());
    let _alerts_seed = InMemoryAlertStore::new();
    let labels: LabelSet = [("alertname", "HighCPU"), ("instance", "h1")]
        .into_iter()
        .collect();
    let alert = Alert {
        fingerprint: klaxon_core::fingerprint::fingerprint(&labels),
        alert_name: "HighCPU".into(),
        labels,
        annotations: LabelSet::new(),
        status: AlertStatus::Firing,
        starts_at: Utc::now(),
        ends_at: None,
        generator_url: None,
        severity: Some(Severity::Critical),
    };
    timers
        .put_if_absent(&TimerRecord {
            group_key: GroupKey::from("HighCPU|h1"),
            fire_type: FireType::GroupWait,
            fire_at: Utc::now() + chrono::Duration::seconds(15),
            owner_id: "proc-dead".into(),
            updated_at: Utc::now(),
        })
        .await
        .expect("seed timer");

    let h = start(vec![target("slack-prod")], timers).await;
    // The new process sees the stored alert.
    h.alerts.upsert_firing(&alert).await.expect("seed alert");
    // Severity was already classified by the previous process.
    h.alerts
        .set_severity(alert.fingerprint, Severity::Critical)
        .await
        .expect("seed severity");

    assert_eq!(h.pipeline.restore_report.restored, 1);
    assert_eq!(h.pipeline.restore_report.missed, 0);

    tokio::time::advance(Duration::from_secs(16)).await;
    eventually(
        || !h.executor.jobs().is_empty(),
        30,
        "flush after restored timer",
    )
    .await;

    let jobs = h.executor.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].group_key, GroupKey::from("HighCPU|h1"));

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn past_due_timer_fires_once_as_missed() {
    let timers = Arc::new(InMemoryTimerStore::new());
    timers
        .put_if_absent(&TimerRecord {
            group_key: GroupKey::from("HighCPU|h1"),
            fire_type: FireType::GroupWait,
            fire_at: Utc::now() - chrono::Duration::seconds(45),
            owner_id: "proc-dead".into(),
            updated_at: Utc::now(),
        })
        .await
        .expect("seed timer");

    let h = start(vec![target("slack-prod")], timers.clone()).await;
    assert_eq!(h.pipeline.restore_report.missed, 1);
    assert_eq!(h.pipeline.restore_report.restored, 0);

    // With no matching firing alerts the rebuild finds nothing: the stale
    // record is dropped and no flush is published.
    for _ in 0..100 {
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        if timers.all().await.expect("all").is_empty() {
            break;
        }
    }
    assert!(timers.all().await.expect("all").is_empty());
    assert!(h.executor.jobs().is_empty());

    h.pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn degraded_mode_skips_unhealthy_targets() {
    let h = start(
        vec![target("slack-prod"), target("pagerduty")],
        Arc::new(InMemoryTimerStore::new()),
    )
    .await;
    let cancel = CancellationToken::new();

    // Fail pagerduty past the threshold.
    for _ in 0..3 {
        h.pipeline.registry.record_check("pagerduty", false).await;
    }
    h.pipeline.mode.evaluate().await;
    assert_eq!(
        h.pipeline.mode.current().await,
        klaxon_core::mode::PublishMode::Degraded
    );

    h.pipeline
        .processor
        .process_batch(
            batch(vec![firing(&[("alertname", "DiskFull"), ("instance", "db1")])]),
            &cancel,
        )
        .await
        .expect("ingest");

    tokio::time::advance(Duration::from_secs(31)).await;
    eventually(
        || !h.executor.jobs().is_empty(),
        30,
        "flush in degraded mode",
    )
    .await;

    let jobs = h.executor.jobs();
    assert_eq!(jobs.len(), 1, "unhealthy target skipped without enqueue");
    assert_eq!(jobs[0].target_name, "slack-prod");

    h.pipeline.shutdown().await;
}
