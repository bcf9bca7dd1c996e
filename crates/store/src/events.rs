use super::{EventSink, Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Idempotency key.
    pub id: String,
    pub topic: String,
    pub timestamp: String,
    pub payload: Value,
}

impl EventMessage {
    pub fn new(topic: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// Outcome of a best-effort publish; independent of the primary operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyResult {
    Published { id: String },
    Failed { error: String },
}

/// Publishes `payload` on `topic`, logging and swallowing any failure.
pub async fn notify(sink: &dyn EventSink, topic: &str, payload: Value) -> NotifyResult {
    let message = EventMessage::new(topic, payload);
    match sink.publish(&message).await {
        Ok(()) => {
            tracing::debug!(%topic, id = %message.id, "Event published");
            NotifyResult::Published { id: message.id }
        }
        Err(e) => {
            tracing::warn!(%topic, id = %message.id, error = %e, "Event publish failed");
            NotifyResult::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Posts each message as JSON to `{base_url}/{topic}`.
pub struct HttpEventSink {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpEventSink {
    pub fn new(base_url: String, token: Option<String>) -> Result<Arc<Self>> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Arc::new(Self {
            base_url,
            token,
            http_client,
        }))
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, message: &EventMessage) -> Result<()> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), message.topic);
        let mut req = self
            .http_client
            .post(&url)
            .header("Idempotency-Key", message.id.as_str())
            .json(message);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Sink used when no publish endpoint is configured; events only reach the log.
#[derive(Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, message: &EventMessage) -> Result<()> {
        tracing::info!(
            topic = %message.topic,
            id = %message.id,
            timestamp = %message.timestamp,
            payload = %message.payload,
            "Event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn publishes_with_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/invoice.submitted"))
            .and(header_exists("Idempotency-Key"))
            .and(header("Authorization", "Bearer ev-token"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpEventSink::new(server.uri(), Some("ev-token".into())).unwrap();
        let result = notify(sink.as_ref(), "invoice.submitted", json!({"batch_id": "b"})).await;
        assert!(matches!(result, NotifyResult::Published { .. }));
    }

    #[tokio::test]
    async fn failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let sink = HttpEventSink::new(server.uri(), None).unwrap();
        let result = notify(sink.as_ref(), "invoice.extracted", json!({})).await;
        match result {
            NotifyResult::Failed { error } => assert!(error.contains("down")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn message_has_rfc3339_timestamp_and_uuid() {
        let m = EventMessage::new("t", json!(null));
        assert!(chrono::DateTime::parse_from_rfc3339(&m.timestamp).is_ok());
        assert!(uuid::Uuid::parse_str(&m.id).is_ok());
    }
}
