//! Alertmanager-v4-compatible webhook ingestion payloads.
//!
//! The wire structs mirror the upstream JSON casing exactly; [`IngestBatch`]
//! is the normalized dialect-free form the core consumes. Dialect adapters
//! for other producers live outside the core and emit `IngestBatch` directly.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use klaxon_model::{AlertStatus, LabelSet};

use crate::error::{ContractError, Result};

/// The only webhook schema version this core accepts.
pub const SUPPORTED_VERSION: &str = "4";

/// Wire-format batch as sent by Alertmanager-compatible producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub version: String,
    pub group_key: String,
    pub status: String,
    pub receiver: String,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: Option<String>,
    pub alerts: Vec<WebhookAlert>,
}

/// Wire-format alert inside a webhook batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    pub status: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    /// Sender-provided fingerprint. Ignored: identity is recomputed from
    /// labels so a misbehaving producer cannot split or merge series.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Normalized batch the pipeline consumes, independent of inbound dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub receiver: String,
    pub group_key_hint: String,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    pub alerts: Vec<IngestAlert>,
}

/// One normalized alert, not yet fingerprinted or classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAlert {
    pub alert_name: String,
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub status: AlertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<Url>,
}

impl WebhookPayload {
    /// Validate and convert the wire payload into the normalized form.
    ///
    /// Malformed content maps to `ContractError::Payload` so the transport
    /// layer can answer 4xx without touching the pipeline.
    pub fn normalize(self) -> Result<IngestBatch> {
        if self.version != SUPPORTED_VERSION {
            return Err(ContractError::UnsupportedVersion(self.version));
        }
        if self.alerts.is_empty() {
            return Err(ContractError::Payload("empty alert batch".into()));
        }

        let mut alerts = Vec::with_capacity(self.alerts.len());
        for (index, alert) in self.alerts.into_iter().enumerate() {
            alerts.push(alert.normalize().map_err(|err| {
                ContractError::Payload(format!("alerts[{index}]: {err}"))
            })?);
        }

        Ok(IngestBatch {
            receiver: self.receiver,
            group_key_hint: self.group_key,
            common_labels: self.common_labels.into(),
            common_annotations: self.common_annotations.into(),
            alerts,
        })
    }
}

impl WebhookAlert {
    fn normalize(self) -> Result<IngestAlert> {
        let status: AlertStatus = self
            .status
            .parse()
            .map_err(|err| ContractError::Payload(format!("{err}")))?;

        let labels: LabelSet = self.labels.into();
        let alert_name = labels
            .get("alertname")
            .map(str::to_owned)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                ContractError::Payload("missing alertname label".into())
            })?;

        // Alertmanager encodes "not ended" as the zero timestamp.
        let ends_at = self
            .ends_at
            .filter(|ts| ts.year() > 1 && *ts >= self.starts_at);

        if status.is_resolved() && ends_at.is_none() {
            return Err(ContractError::Payload(format!(
                "resolved alert {alert_name:?} carries no usable endsAt"
            )));
        }

        let generator_url = match self.generator_url {
            Some(raw) if !raw.is_empty() => Some(Url::parse(&raw).map_err(
                |err| {
                    ContractError::Payload(format!(
                        "bad generatorURL {raw:?}: {err}"
                    ))
                },
            )?),
            _ => None,
        };

        Ok(IngestAlert {
            alert_name,
            annotations: self.annotations.into(),
            labels,
            status,
            starts_at: self.starts_at,
            ends_at,
            generator_url,
        })
    }
}
