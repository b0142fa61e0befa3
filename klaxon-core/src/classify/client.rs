use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use klaxon_model::{Alert, Category, ClassificationResult, Severity};

use crate::config::ClassifierConfig;
use crate::error::{AlertError, Result};

/// Remote classifier seam; production uses HTTP, tests use scripted fakes.
#[async_trait]
pub trait ClassifierClient: Send + Sync {
    async fn classify(&self, alert: &Alert) -> Result<ClassificationResult>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    model: &'a str,
    fingerprint: String,
    alert_name: &'a str,
    labels: BTreeMap<&'a str, &'a str>,
    annotations: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    severity: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    category: String,
}

/// HTTP client for the remote model endpoint.
///
/// Retries transient failures with exponential backoff before reporting an
/// error; the circuit breaker wrapping this client sees only the final
/// verdict of each `classify` call.
pub struct HttpClassifierClient {
    http: reqwest::Client,
    config: ClassifierConfig,
    endpoint: String,
}

impl std::fmt::Debug for HttpClassifierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClassifierClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

impl HttpClassifierClient {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        let endpoint = format!(
            "{}/v1/classify",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn with_http(config: ClassifierConfig, http: reqwest::Client) -> Self {
        let endpoint = format!(
            "{}/v1/classify",
            config.base_url.trim_end_matches('/')
        );
        Self {
            http,
            config,
            endpoint,
        }
    }

    async fn attempt(&self, alert: &Alert) -> Result<ClassifyResponse> {
        let request = ClassifyRequest {
            model: &self.config.model,
            fingerprint: alert.fingerprint.as_hex(),
            alert_name: &alert.alert_name,
            labels: alert.labels.iter().collect(),
            annotations: alert.annotations.iter().collect(),
        };

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::from_status(status, &self.endpoint));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ClassifierClient for HttpClassifierClient {
    async fn classify(&self, alert: &Alert) -> Result<ClassificationResult> {
        let started = Instant::now();
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 0u32;

        let response = loop {
            match self.attempt(alert).await {
                Ok(response) => break response,
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        fingerprint = %alert.fingerprint,
                        attempt,
                        error = %err,
                        "classifier attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        };

        let severity = Severity::from_str(&response.severity)
            .ok()
            .or_else(|| Severity::from_hint(&response.severity))
            .ok_or_else(|| {
                AlertError::Permanent(format!(
                    "classifier returned unusable severity {:?}",
                    response.severity
                ))
            })?;

        debug!(
            fingerprint = %alert.fingerprint,
            severity = %severity,
            confidence = response.confidence,
            "classifier verdict"
        );

        Ok(ClassificationResult {
            severity,
            confidence: response.confidence,
            reasoning: response.reasoning,
            recommendations: response.recommendations,
            category: Category::parse(response.category),
            processing_time_s: started.elapsed().as_secs_f64(),
            fallback: false,
        }
        .normalized())
    }
}
