use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("invalid public base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("row is not a JSON object")]
    InvalidRow,

    #[error("event sink rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
