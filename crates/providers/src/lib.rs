use async_trait::async_trait;
use invproc_core::models::TokenPair;
use serde_json::Value;

pub mod error;
pub mod gst;
pub mod klearstack;
pub mod mock;
pub mod qr;

pub use error::{ProviderError, TokenStage};

/// Raw reply from a third-party API whose status handling belongs to the
/// caller.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// External OCR/data-extraction provider.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Issues a token pair from the configured account credentials.
    async fn issue_token(&self) -> Result<TokenPair, ProviderError>;

    /// Exchanges an issued pair for a fresh one.
    async fn refresh_token(&self, issued: &TokenPair) -> Result<TokenPair, ProviderError>;

    /// Uploads a document and returns the provider batch id.
    async fn process_document(
        &self,
        token: &TokenPair,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ProviderError>;

    /// Fetches the provider's status body for a batch.
    async fn batch_status(&self, token: &TokenPair, batch_id: &str)
        -> Result<Value, ProviderError>;
}

#[async_trait]
pub trait GstStatusApi: Send + Sync {
    async fn fetch_status(&self, gstin: &str) -> Result<HttpReply, ProviderError>;
}

#[async_trait]
pub trait QrDecoder: Send + Sync {
    async fn decode(&self, file_url: &str) -> Result<HttpReply, ProviderError>;
}
