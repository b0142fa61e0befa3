use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use klaxon_contracts::notification::RenderedNotification;
use klaxon_model::{Target, TargetType};

use crate::config::PublishConfig;
use crate::error::{AlertError, Result};

/// One materialized per-target client.
#[async_trait]
pub trait SinkPublisher: Send + Sync {
    fn target(&self) -> &Target;

    async fn publish(&self, notification: &RenderedNotification) -> Result<()>;
}

/// HTTP delivery for every sink family. The notification is shaped per sink
/// type here; serializing to each vendor's exact wire format is the external
/// renderer's job.
pub struct HttpSinkPublisher {
    http: reqwest::Client,
    target: Target,
}

impl std::fmt::Debug for HttpSinkPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSinkPublisher")
            .field("target", &self.target.name)
            .field("type", &self.target.target_type)
            .finish()
    }
}

impl HttpSinkPublisher {
    pub fn new(http: reqwest::Client, target: Target) -> Self {
        Self { http, target }
    }

    fn body(&self, notification: &RenderedNotification) -> serde_json::Value {
        match self.target.target_type {
            TargetType::Chat => json!({
                "text": format!("*{}*\n{}", notification.title, notification.body),
                "fields": notification.structured_fields,
                "links": notification.links,
            }),
            TargetType::Paging => json!({
                "routing_key": self.target.credentials.expose(),
                "event_action": "trigger",
                "payload": {
                    "summary": notification.title,
                    "severity": notification.priority.as_str(),
                    "custom_details": {
                        "description": notification.body,
                        "fields": notification.structured_fields,
                    },
                },
                "links": notification.links,
            }),
            TargetType::Email => json!({
                "subject": notification.title,
                "html_body": notification.body,
                "fields": notification.structured_fields,
            }),
            TargetType::Webhook => {
                serde_json::to_value(notification).unwrap_or_else(|_| json!({}))
            }
        }
    }
}

#[async_trait]
impl SinkPublisher for HttpSinkPublisher {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn publish(&self, notification: &RenderedNotification) -> Result<()> {
        notification
            .check_ceiling()
            .map_err(|err| AlertError::Permanent(err.to_string()))?;

        let mut request = self
            .http
            .post(self.target.endpoint.clone())
            .json(&self.body(notification));
        // Paging credentials ride in the body as the routing key.
        if self.target.target_type != TargetType::Paging
            && !self.target.credentials.is_empty()
        {
            request = request.bearer_auth(self.target.credentials.expose());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::from_status(
                status,
                self.target.endpoint.as_str(),
            ));
        }

        debug!(
            target = %self.target.name,
            status = status.as_u16(),
            "notification delivered"
        );
        Ok(())
    }
}

/// Materializes per-target clients over one shared connection pool.
pub struct PublisherFactory {
    http: reqwest::Client,
}

impl std::fmt::Debug for PublisherFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherFactory").finish()
    }
}

impl PublisherFactory {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.publish_timeout())
            .build()?;
        Ok(Self { http })
    }

    pub fn make(&self, target: &Target) -> Result<Arc<dyn SinkPublisher>> {
        match target.endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AlertError::Permanent(format!(
                    "unsupported sink endpoint scheme {other:?} for target {}",
                    target.name
                )));
            }
        }
        Ok(Arc::new(HttpSinkPublisher::new(
            self.http.clone(),
            target.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klaxon_model::{Credentials, LabelSet, Priority};
    use std::collections::BTreeMap;
    use url::Url;

    fn target(ty: TargetType, endpoint: &str) -> Target {
        Target {
            name: "t1".into(),
            target_type: ty,
            endpoint: Url::parse(endpoint).expect("url"),
            credentials: Credentials::new("secret"),
            labels: LabelSet::new(),
        }
    }

    fn notification(ty: TargetType) -> RenderedNotification {
        RenderedNotification {
            target_name: "t1".into(),
            target_type: ty,
            priority: Priority::High,
            title: "HighCPU".into(),
            body: "cpu is on fire".into(),
            structured_fields: BTreeMap::new(),
            links: vec![],
        }
    }

    #[test]
    fn factory_rejects_non_http_schemes() {
        let factory = PublisherFactory::new(&PublishConfig::default()).expect("factory");
        let bad = target(TargetType::Webhook, "ftp://example.com/drop");
        assert!(matches!(
            factory.make(&bad),
            Err(AlertError::Permanent(_))
        ));
        assert!(factory.make(&target(TargetType::Chat, "https://x.example")).is_ok());
    }

    #[test]
    fn paging_body_carries_routing_key_not_bearer() {
        let publisher = HttpSinkPublisher::new(
            reqwest::Client::new(),
            target(TargetType::Paging, "https://events.example/v2"),
        );
        let body = publisher.body(&notification(TargetType::Paging));
        assert_eq!(body["routing_key"], "secret");
        assert_eq!(body["event_action"], "trigger");
        assert_eq!(body["payload"]["severity"], "high");
    }

    #[test]
    fn webhook_body_is_the_full_notification() {
        let publisher = HttpSinkPublisher::new(
            reqwest::Client::new(),
            target(TargetType::Webhook, "https://hooks.example/x"),
        );
        let body = publisher.body(&notification(TargetType::Webhook));
        assert_eq!(body["title"], "HighCPU");
        assert_eq!(body["target_type"], "webhook");
    }
}
