//! Narrow metrics capability injected into components.
//!
//! The core never talks to a metrics registry; it emits through this trait
//! and the embedding process decides where the numbers land.

use std::fmt;
use std::sync::Arc;

pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn incr(&self, name: &'static str, labels: &[(&'static str, &str)]);
    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);
    fn observe(&self, name: &'static str, seconds: f64, labels: &[(&'static str, &str)]);
}

/// Discards every emission. The default for tests and minimal deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &'static str, _labels: &[(&'static str, &str)]) {}
    fn gauge(&self, _name: &'static str, _value: f64, _labels: &[(&'static str, &str)]) {}
    fn observe(&self, _name: &'static str, _seconds: f64, _labels: &[(&'static str, &str)]) {}
}

pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}
