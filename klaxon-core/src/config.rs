use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global knobs that tune proxy behaviour.
///
/// All fields carry defaults so existing deployments can progressively adopt
/// new options without supplying a full configuration payload. Loading and
/// hot-reload live outside the core; these structs are the contract.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    /// Remote classifier endpoint, retries, and breaker tuning.
    pub classifier: ClassifierConfig,
    /// Grouping labels and the three flush timers.
    pub grouping: GroupingConfig,
    /// Priority queue sizing and retry/backoff policy.
    pub queue: QueueConfig,
    /// Per-target publish tuning.
    pub publish: PublishConfig,
    /// Target health checking cadence and thresholds.
    pub health: HealthConfig,
    /// Target set refresh cadence.
    pub refresh: RefreshConfig,
    /// Publishing-mode probe cadence.
    pub mode: ModeConfig,
    /// Silence cache sync and GC cadence.
    pub silence: SilenceConfig,
    /// Classification cache sizing and TTLs.
    pub cache: CacheConfig,
    /// Per-stage deadlines enforced by the orchestrator.
    pub stages: StageTimeouts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub breaker: BreakerConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8089".to_string(),
            api_key: String::new(),
            model: "alert-classifier-v1".to_string(),
            timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 500,
            breaker: BreakerConfig::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker outright.
    pub max_failures: u32,
    /// Time spent Open before a probe is admitted (seconds).
    pub reset_timeout_secs: u64,
    /// Failure-rate threshold over the sliding window, in `[0, 1]`.
    pub failure_threshold: f64,
    /// Sliding window length (seconds).
    pub time_window_secs: u64,
    /// Calls at least this slow count as failures (milliseconds).
    pub slow_call_duration_ms: u64,
    /// Concurrent probes admitted while HalfOpen.
    pub half_open_max_calls: u32,
    pub enabled: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout_secs: 30,
            failure_threshold: 0.5,
            time_window_secs: 60,
            slow_call_duration_ms: 3_000,
            half_open_max_calls: 1,
            enabled: true,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    pub fn slow_call_duration(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Labels whose values form the group key; `...` groups by fingerprint.
    pub group_by: Vec<String>,
    pub group_wait_secs: u64,
    pub group_interval_secs: u64,
    pub repeat_interval_secs: u64,
    /// Keys longer than this are hash-truncated.
    pub max_key_length: usize,
    /// Shard count for the group table. Power of two.
    pub shards: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            group_by: vec!["alertname".to_string(), "instance".to_string()],
            group_wait_secs: 30,
            group_interval_secs: 300,
            repeat_interval_secs: 14_400,
            max_key_length: 256,
            shards: 16,
        }
    }
}

impl GroupingConfig {
    pub fn group_wait(&self) -> Duration {
        Duration::from_secs(self.group_wait_secs)
    }

    pub fn group_interval(&self) -> Duration {
        Duration::from_secs(self.group_interval_secs)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_secs(self.repeat_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Fixed worker pool size draining all three priorities.
    pub workers: usize,
    pub high_capacity: usize,
    pub medium_capacity: usize,
    pub low_capacity: usize,
    pub max_retries: u32,
    pub retry_interval_base_ms: u64,
    /// Exponential backoff multiplier applied per attempt.
    pub retry_backoff: f64,
    /// Jitter fraction applied to each delay, in `[0, 1]`.
    pub jitter: f64,
    pub min_retry_ms: u64,
    pub max_retry_ms: u64,
    /// How long a producer blocks on a full queue before `queue_full`.
    pub enqueue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            high_capacity: 1_000,
            medium_capacity: 1_000,
            low_capacity: 1_000,
            max_retries: 3,
            retry_interval_base_ms: 1_000,
            retry_backoff: 2.0,
            jitter: 0.1,
            min_retry_ms: 1_000,
            max_retry_ms: 300_000,
            enqueue_timeout_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// In-flight cap per target.
    pub per_target_concurrency: usize,
    /// HTTP timeout for a single sink delivery (milliseconds).
    pub publish_timeout_ms: u64,
    pub breaker: BreakerConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            per_target_concurrency: 4,
            publish_timeout_ms: 10_000,
            breaker: BreakerConfig::default(),
        }
    }
}

impl PublishConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    pub http_timeout_ms: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            http_timeout_ms: 5_000,
            failure_threshold: 3,
            success_threshold: 1,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub refresh_interval_secs: u64,
    /// Backoff between retries of a failed read, within one tick.
    pub retry_backoff_ms: u64,
    pub max_read_retries: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            retry_backoff_ms: 2_000,
            max_read_retries: 3,
        }
    }
}

impl RefreshConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeConfig {
    pub probe_interval_secs: u64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 5,
        }
    }
}

impl ModeConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SilenceConfig {
    pub gc_interval_secs: u64,
    pub sync_interval_secs: u64,
    /// Window used by the expiring-soon query.
    pub expiring_soon_secs: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: 300,
            sync_interval_secs: 60,
            expiring_soon_secs: 3_600,
        }
    }
}

impl SilenceConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn expiring_soon(&self) -> Duration {
        Duration::from_secs(self.expiring_soon_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// In-process LRU capacity.
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    /// Shared-cache entry lifetime; outlives L1 so warm fingerprints survive
    /// process restarts.
    pub l2_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            l1_ttl_secs: 900,
            l2_ttl_secs: 3_600,
        }
    }
}

impl CacheConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }
}

/// Per-stage deadlines. Optional stages degrade to fallback on expiry;
/// storage stages surface the timeout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub dedup_ms: u64,
    pub classify_ms: u64,
    pub inhibit_ms: u64,
    pub silence_ms: u64,
    pub group_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            dedup_ms: 5_000,
            classify_ms: 15_000,
            inhibit_ms: 2_000,
            silence_ms: 2_000,
            group_ms: 5_000,
        }
    }
}

impl StageTimeouts {
    pub fn dedup(&self) -> Duration {
        Duration::from_millis(self.dedup_ms)
    }

    pub fn classify(&self) -> Duration {
        Duration::from_millis(self.classify_ms)
    }

    pub fn inhibit(&self) -> Duration {
        Duration::from_millis(self.inhibit_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn group(&self) -> Duration {
        Duration::from_millis(self.group_ms)
    }
}
