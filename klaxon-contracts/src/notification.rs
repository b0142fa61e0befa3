//! Outbound notification contract handed to sink renderers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use klaxon_model::{Priority, TargetType};

use crate::error::{ContractError, Result};

/// Combined title+body ceiling for chat sinks, in characters.
pub const CHAT_MAX_CHARS: usize = 3_000;
/// Description ceiling for paging sinks, in characters.
pub const PAGING_MAX_DESCRIPTION: usize = 1_024;
/// Body ceiling for email sinks, in bytes.
pub const EMAIL_MAX_BYTES: usize = 100 * 1024;
/// Body ceiling for generic webhooks, in bytes.
pub const WEBHOOK_MAX_BYTES: usize = 100 * 1024;

/// Sink-agnostic notification produced by a group flush.
///
/// The external renderer serializes this into each sink's wire format; the
/// core only guarantees the ceilings below before a job is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedNotification {
    pub target_name: String,
    pub target_type: TargetType,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub structured_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl RenderedNotification {
    /// Enforce the per-sink size ceiling, erroring instead of truncating.
    pub fn check_ceiling(&self) -> Result<()> {
        match self.target_type {
            TargetType::Chat => {
                let combined = self.title.chars().count() + self.body.chars().count();
                if combined > CHAT_MAX_CHARS {
                    return Err(self.oversize(CHAT_MAX_CHARS, combined));
                }
            }
            TargetType::Paging => {
                let description = self.body.chars().count();
                if description > PAGING_MAX_DESCRIPTION {
                    return Err(self.oversize(PAGING_MAX_DESCRIPTION, description));
                }
            }
            TargetType::Email => {
                if self.body.len() > EMAIL_MAX_BYTES {
                    return Err(self.oversize(EMAIL_MAX_BYTES, self.body.len()));
                }
            }
            TargetType::Webhook => {
                if self.body.len() > WEBHOOK_MAX_BYTES {
                    return Err(self.oversize(WEBHOOK_MAX_BYTES, self.body.len()));
                }
            }
        }
        Ok(())
    }

    /// Truncating variant used on the flush path: clamps the body to fit,
    /// marking the cut with an ellipsis.
    pub fn clamped(mut self) -> Self {
        match self.target_type {
            TargetType::Chat => {
                let title_len = self.title.chars().count();
                let budget = CHAT_MAX_CHARS.saturating_sub(title_len);
                self.body = clamp_chars(&self.body, budget);
            }
            TargetType::Paging => {
                self.body = clamp_chars(&self.body, PAGING_MAX_DESCRIPTION);
            }
            TargetType::Email => {
                self.body = clamp_bytes(&self.body, EMAIL_MAX_BYTES);
            }
            TargetType::Webhook => {
                self.body = clamp_bytes(&self.body, WEBHOOK_MAX_BYTES);
            }
        }
        self
    }

    fn oversize(&self, limit: usize, actual: usize) -> ContractError {
        ContractError::Oversize {
            target_type: self.target_type.as_str().to_string(),
            limit,
            actual,
        }
    }
}

fn clamp_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(1);
    let mut clamped: String = text.chars().take(keep).collect();
    clamped.push('…');
    clamped
}

fn clamp_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit.saturating_sub('…'.len_utf8());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut clamped = text[..end].to_string();
    clamped.push('…');
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(target_type: TargetType, body: String) -> RenderedNotification {
        RenderedNotification {
            target_name: "slack-prod".into(),
            target_type,
            priority: Priority::High,
            title: "HighCPU".into(),
            body,
            structured_fields: BTreeMap::new(),
            links: vec![],
        }
    }

    #[test]
    fn chat_ceiling_counts_title_and_body() {
        let n = notification(TargetType::Chat, "x".repeat(CHAT_MAX_CHARS));
        assert!(n.check_ceiling().is_err());
        let n = notification(TargetType::Chat, "x".repeat(100));
        assert!(n.check_ceiling().is_ok());
    }

    #[test]
    fn clamped_chat_body_fits_ceiling() {
        let n = notification(TargetType::Chat, "x".repeat(CHAT_MAX_CHARS * 2)).clamped();
        assert!(n.check_ceiling().is_ok());
        assert!(n.body.ends_with('…'));
    }

    #[test]
    fn clamped_webhook_respects_char_boundaries() {
        let n = notification(TargetType::Webhook, "é".repeat(WEBHOOK_MAX_BYTES)).clamped();
        assert!(n.body.len() <= WEBHOOK_MAX_BYTES);
        assert!(n.check_ceiling().is_ok());
    }

    #[test]
    fn paging_ceiling_is_characters_not_bytes() {
        let n = notification(TargetType::Paging, "é".repeat(PAGING_MAX_DESCRIPTION));
        assert!(n.check_ceiling().is_ok());
    }
}
