//! LLM-assisted severity/category inference with two-tier caching, circuit
//! breaking, and a label-hint fallback that never fails the pipeline.

mod client;
mod service;

pub use client::{ClassifierClient, HttpClassifierClient};
pub use service::{ClassificationService, fallback_result};
