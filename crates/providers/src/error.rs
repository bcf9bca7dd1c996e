use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStage {
    Issue,
    Refresh,
}

impl fmt::Display for TokenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStage::Issue => f.write_str("issue"),
            TokenStage::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("token {stage} failed: {message}")]
    TokenAcquisition {
        stage: TokenStage,
        status: Option<u16>,
        message: String,
    },

    #[error("provider rejected upload ({status}): {body}")]
    Upload { status: u16, body: String },

    /// The provider accepted the upload but named no batch. Not transient.
    #[error("provider response carried no batch id")]
    MissingBatchId { body: String },

    #[error("status check failed ({status}): {body}")]
    StatusCheck { status: u16, body: String },

    #[error("unreadable provider response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// HTTP status reported by the provider, when the failure carried one.
    pub fn provider_status(&self) -> Option<u16> {
        match self {
            ProviderError::TokenAcquisition { status, .. } => *status,
            ProviderError::Upload { status, .. } | ProviderError::StatusCheck { status, .. } => {
                Some(*status)
            }
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            ProviderError::MissingBatchId { .. } | ProviderError::InvalidResponse(_) => None,
        }
    }

    /// Raw provider body carried by the failure, for caller-side debugging.
    pub fn provider_body(&self) -> Option<&str> {
        match self {
            ProviderError::Upload { body, .. }
            | ProviderError::StatusCheck { body, .. }
            | ProviderError::MissingBatchId { body } => Some(body),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Http(e) if e.is_timeout())
    }
}
