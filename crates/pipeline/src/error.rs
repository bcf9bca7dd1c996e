use providers::ProviderError;
use serde_json::{json, Value};
use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no document data at {bucket}/{path}")]
    Download {
        bucket: String,
        path: String,
        #[source]
        source: Option<StoreError>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("submission {submission_id} already has batch {batch_id}")]
    AlreadySubmitted {
        submission_id: String,
        batch_id: String,
    },

    #[error("no batch recorded for submission {submission_id}")]
    UnknownSubmission { submission_id: String },

    #[error("batch {batch_id} does not belong to submission {submission_id}")]
    BatchMismatch {
        submission_id: String,
        batch_id: String,
    },

    #[error("could not sign {bucket}/{path}: {source}")]
    SignedUrl {
        bucket: String,
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("unusable document name {file_name:?}")]
    InvalidDocument { file_name: String },

    #[error("maximum QR retries exceeded ({retry_count} >= {max_retries})")]
    MaxRetriesExceeded { retry_count: u32, max_retries: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Machine-readable reason code for API responses.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::Download { .. } => "download_error",
            PipelineError::Provider(e) => match e {
                ProviderError::TokenAcquisition { .. } => "token_acquisition_error",
                ProviderError::Upload { .. } => "upload_error",
                ProviderError::MissingBatchId { .. } => "missing_batch_id",
                ProviderError::StatusCheck { .. } => "status_check_error",
                ProviderError::InvalidResponse(_) => "invalid_provider_response",
                ProviderError::Http(_) => "provider_unreachable",
            },
            PipelineError::AlreadySubmitted { .. } => "already_submitted",
            PipelineError::UnknownSubmission { .. } => "unknown_submission",
            PipelineError::BatchMismatch { .. } => "batch_mismatch",
            PipelineError::SignedUrl { .. } => "signed_url_error",
            PipelineError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            PipelineError::InvalidDocument { .. } => "invalid_document",
            PipelineError::Store(_) => "store_error",
        }
    }

    /// HTTP status to report. Provider upload failures pass the provider's
    /// own status through.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Download { .. } => 404,
            PipelineError::Provider(ProviderError::Upload { status, .. })
                if (400..600).contains(status) =>
            {
                *status
            }
            PipelineError::Provider(_) => 502,
            PipelineError::AlreadySubmitted { .. } | PipelineError::BatchMismatch { .. } => 409,
            PipelineError::UnknownSubmission { .. } => 404,
            PipelineError::MaxRetriesExceeded { .. } | PipelineError::InvalidDocument { .. } => 400,
            PipelineError::SignedUrl { .. } | PipelineError::Store(_) => 500,
        }
    }

    /// Debugging context carried in the error response body.
    pub fn context(&self) -> Value {
        match self {
            PipelineError::Download { bucket, path, .. }
            | PipelineError::SignedUrl { bucket, path, .. } => {
                json!({"bucket": bucket, "path": path})
            }
            PipelineError::Provider(e) => json!({
                "provider_status": e.provider_status(),
                "provider_body": e.provider_body(),
            }),
            PipelineError::AlreadySubmitted {
                submission_id,
                batch_id,
            }
            | PipelineError::BatchMismatch {
                submission_id,
                batch_id,
            } => json!({"submission_id": submission_id, "batch_id": batch_id}),
            PipelineError::UnknownSubmission { submission_id } => {
                json!({"submission_id": submission_id})
            }
            PipelineError::MaxRetriesExceeded {
                retry_count,
                max_retries,
            } => json!({"retry_count": retry_count, "max_retries": max_retries}),
            PipelineError::InvalidDocument { file_name } => json!({"file_name": file_name}),
            PipelineError::Store(_) => json!({}),
        }
    }
}
