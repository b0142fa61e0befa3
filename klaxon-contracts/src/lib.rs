//! Wire contracts at the edges of the Klaxon pipeline.
//!
//! Inbound: Alertmanager-v4-compatible webhook payloads and their normalized
//! [`ingest::IngestBatch`] form. Outbound: [`notification::RenderedNotification`]
//! handed to sink renderers, and the per-alert [`outcome::AlertOutcome`]
//! reported back to the ingress layer.

pub mod error;
pub mod ingest;
pub mod notification;
pub mod outcome;

pub mod prelude {
    pub use super::error::ContractError;
    pub use super::ingest::{IngestAlert, IngestBatch, WebhookAlert, WebhookPayload};
    pub use super::notification::RenderedNotification;
    pub use super::outcome::{AlertOutcome, BatchOutcome};
}
