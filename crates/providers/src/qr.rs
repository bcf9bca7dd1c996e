use super::{HttpReply, ProviderError, QrDecoder};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct DecodeRequest<'a> {
    file_path: &'a str,
}

/// Client for the e-invoice QR decoding API.
///
/// No overall request timeout is set here; callers bound each call and drop
/// the future to abort it.
#[derive(Clone)]
pub struct QrApiClient {
    endpoint: String,
    api_token: String,
    http_client: reqwest::Client,
}

impl QrApiClient {
    pub fn new(endpoint: String, api_token: String) -> Result<Arc<Self>, ProviderError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Arc::new(Self {
            endpoint,
            api_token,
            http_client,
        }))
    }
}

#[async_trait]
impl QrDecoder for QrApiClient {
    async fn decode(&self, file_url: &str) -> Result<HttpReply, ProviderError> {
        let resp = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&DecodeRequest {
                file_path: file_url,
            })
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpReply { status, body })
    }
}
