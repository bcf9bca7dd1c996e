use super::{GstStatusApi, HttpReply, ProviderError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Client for the taxpayer GST status lookup.
#[derive(Clone)]
pub struct GstApiClient {
    base_url: String,
    api_key: String,
    api_key_header: String,
    http_client: reqwest::Client,
}

impl GstApiClient {
    pub fn new(
        base_url: String,
        api_key: String,
        api_key_header: Option<String>,
    ) -> Result<Arc<Self>, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Arc::new(Self {
            base_url,
            api_key,
            api_key_header: api_key_header.unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
            http_client,
        }))
    }
}

#[async_trait]
impl GstStatusApi for GstApiClient {
    async fn fetch_status(&self, gstin: &str) -> Result<HttpReply, ProviderError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), gstin);

        let resp = self
            .http_client
            .get(&url)
            .header(self.api_key_header.as_str(), self.api_key.as_str())
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(%gstin, status, "GST status fetched");
        Ok(HttpReply { status, body })
    }
}
