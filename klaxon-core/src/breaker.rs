//! Circuit breaker guarding remote calls (classifier, sink targets).
//!
//! Closed admits and samples; Open fails fast; HalfOpen admits a bounded
//! number of probes. All state checks and counter updates serialize on one
//! mutex per instance. Time is `tokio::time::Instant` so paused-clock tests
//! drive the reset timeout deterministically.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::error::{AlertError, Result};
use crate::metrics::MetricsSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    /// (sampled_at, was_failure) over the sliding window.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

enum Admission {
    Regular,
    Probe,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                window: VecDeque::new(),
                opened_at: None,
                half_open_in_flight: 0,
            }),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex").state
    }

    /// Run `op` under breaker policy. While Open the operation is never
    /// constructed; the caller gets `CircuitOpen` immediately.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return op().await;
        }

        let admission = self.admit()?;

        let started = Instant::now();
        let result = op().await;
        let elapsed = started.elapsed();

        let slow = elapsed >= self.config.slow_call_duration();
        let failed = result.is_err() || slow;
        if slow && result.is_ok() {
            warn!(
                breaker = %self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow call counted as failure"
            );
        }
        self.record(admission, failed, elapsed);

        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut inner = self.inner.lock().expect("breaker mutex");
        match inner.state {
            BreakerState::Closed => Ok(Admission::Regular),
            BreakerState::Open => {
                let elapsed_since_open = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed_since_open >= self.config.reset_timeout() {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    Ok(Admission::Probe)
                } else {
                    self.reject();
                    Err(AlertError::CircuitOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(Admission::Probe)
                } else {
                    self.reject();
                    Err(AlertError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    fn record(&self, admission: Admission, failed: bool, elapsed: Duration) {
        let outcome = if failed { "failure" } else { "success" };
        self.metrics.observe(
            "breaker_call_duration_seconds",
            elapsed.as_secs_f64(),
            &[("breaker", &self.name), ("outcome", outcome)],
        );

        let mut inner = self.inner.lock().expect("breaker mutex");
        match admission {
            Admission::Probe => {
                inner.half_open_in_flight =
                    inner.half_open_in_flight.saturating_sub(1);
                // A probe that raced a state change records as a plain sample.
                if inner.state != BreakerState::HalfOpen {
                    self.sample(&mut inner, failed);
                    return;
                }
                if failed {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_in_flight = 0;
                } else {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.consecutive_failures = 0;
                    inner.window.clear();
                    inner.opened_at = None;
                    inner.half_open_in_flight = 0;
                }
            }
            Admission::Regular => {
                if inner.state != BreakerState::Closed {
                    return;
                }
                self.sample(&mut inner, failed);
                if self.should_open(&inner) {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn sample(&self, inner: &mut BreakerInner, failed: bool) {
        let now = Instant::now();
        inner.window.push_back((now, failed));
        let horizon = self.config.time_window();
        while let Some((at, _)) = inner.window.front() {
            if now.duration_since(*at) > horizon {
                inner.window.pop_front();
            } else {
                break;
            }
        }
        if failed {
            inner.consecutive_failures += 1;
        } else {
            inner.consecutive_failures = 0;
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        if inner.consecutive_failures >= self.config.max_failures {
            return true;
        }
        let samples = inner.window.len();
        if samples < self.config.max_failures as usize {
            return false;
        }
        let failures = inner.window.iter().filter(|(_, failed)| *failed).count();
        (failures as f64 / samples as f64) >= self.config.failure_threshold
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(breaker = %self.name, from = from.as_str(), to = to.as_str(), "breaker transition");
        self.metrics.incr(
            "breaker_transitions_total",
            &[
                ("breaker", &self.name),
                ("from", from.as_str()),
                ("to", to.as_str()),
            ],
        );
        self.metrics.gauge(
            "breaker_state",
            to.gauge_value(),
            &[("breaker", &self.name)],
        );
    }

    fn reject(&self) {
        self.metrics
            .incr("breaker_blocked_total", &[("breaker", &self.name)]);
    }
}
