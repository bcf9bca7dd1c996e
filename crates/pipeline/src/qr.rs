use crate::audit::{write_audit_event, AuditEvent};
use crate::error::PipelineError;
use invproc_core::models::{
    QrExtraction, QrOutcome, QR_SKIP_API_ERROR, QR_SKIP_PARSE_ERROR, QR_SKIP_TIMEOUT,
};
use invproc_core::validation::{classify_qr_response, storage_key};
use providers::QrDecoder;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use store::{ObjectStore, RecordStore};
use tokio::time::{sleep, timeout};

pub const MAX_QR_RETRIES: u32 = 2;
pub const QR_BACKOFF_MS: [u64; 3] = [500, 1_000, 2_000];
pub const DEFAULT_QR_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3_600);

/// Wait before retry attempt `retry_count`, clamped to the last table entry.
pub fn backoff_for(retry_count: u32) -> Duration {
    let index = usize::try_from(retry_count)
        .unwrap_or(usize::MAX)
        .min(QR_BACKOFF_MS.len() - 1);
    Duration::from_millis(QR_BACKOFF_MS[index])
}

fn skipped(reason: impl Into<String>, http_status: Option<u16>, raw: Option<Value>) -> QrOutcome {
    QrOutcome::Skipped {
        reason: reason.into(),
        http_status,
        raw_response: raw,
    }
}

fn outcome_label(outcome: &QrOutcome) -> &'static str {
    match outcome {
        QrOutcome::Found { .. } => "found",
        QrOutcome::NotFound { .. } => "not_found",
        QrOutcome::Skipped { .. } => "skipped",
    }
}

/// Decodes the e-invoice QR code on a stored document.
///
/// Only signing a storage path can fail hard; every decoder problem is
/// reported as a `skipped` outcome.
pub struct QrExtractor {
    objects: Arc<dyn ObjectStore>,
    decoder: Arc<dyn QrDecoder>,
    records: Arc<dyn RecordStore>,
    bucket: String,
    timeout: Duration,
    signed_url_ttl: Duration,
}

impl QrExtractor {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        decoder: Arc<dyn QrDecoder>,
        records: Arc<dyn RecordStore>,
        bucket: &str,
        timeout: Duration,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            objects,
            decoder,
            records,
            bucket: bucket.to_string(),
            timeout,
            signed_url_ttl,
        }
    }

    async fn resolve_url(&self, file_path: &str) -> Result<String, PipelineError> {
        let Some(key) = storage_key(file_path, &self.bucket) else {
            return Ok(file_path.to_string());
        };
        self.objects
            .create_signed_url(&self.bucket, key, self.signed_url_ttl)
            .await
            .map_err(|source| PipelineError::SignedUrl {
                bucket: self.bucket.clone(),
                path: key.to_string(),
                source,
            })
    }

    async fn decode(&self, file_url: &str) -> QrOutcome {
        // Elapsing drops the request future, which aborts the connection.
        let reply = match timeout(self.timeout, self.decoder.decode(file_url)).await {
            Err(_) => return skipped(QR_SKIP_TIMEOUT, None, None),
            Ok(Err(e)) if e.is_timeout() => return skipped(QR_SKIP_TIMEOUT, None, None),
            Ok(Err(e)) => return skipped(e.to_string(), None, None),
            Ok(Ok(reply)) => reply,
        };

        if !reply.is_success() {
            let raw = serde_json::from_str(&reply.body).unwrap_or(Value::String(reply.body));
            return skipped(QR_SKIP_API_ERROR, Some(reply.status), Some(raw));
        }

        match serde_json::from_str::<Value>(&reply.body) {
            Ok(body) => classify_qr_response(body),
            Err(_) => skipped(
                QR_SKIP_PARSE_ERROR,
                Some(reply.status),
                Some(Value::String(reply.body)),
            ),
        }
    }

    pub async fn extract_qr_from_document(
        &self,
        file_path: &str,
        submission_id: Option<&str>,
    ) -> Result<QrExtraction, PipelineError> {
        let file_url = self.resolve_url(file_path).await?;
        let outcome = self.decode(&file_url).await;

        tracing::info!(%file_path, ?submission_id, outcome = outcome_label(&outcome), "QR extraction finished");

        let mut event = AuditEvent::new("qr_extracted", outcome_label(&outcome))
            .with_detail(json!({"file_path": file_path}));
        if let Some(id) = submission_id {
            event = event.with_submission(id);
        }
        if let QrOutcome::Skipped { reason, .. } = &outcome {
            event = event.with_error(reason.clone());
        }
        write_audit_event(self.records.as_ref(), &event).await;

        Ok(QrExtraction::new(file_path, submission_id, outcome))
    }

    /// One caller-driven retry: waits out the backoff for `retry_count`, then
    /// makes a single extraction attempt.
    pub async fn retry_extraction(
        &self,
        file_path: &str,
        submission_id: &str,
        retry_count: u32,
    ) -> Result<QrExtraction, PipelineError> {
        if retry_count >= MAX_QR_RETRIES {
            return Err(PipelineError::MaxRetriesExceeded {
                retry_count,
                max_retries: MAX_QR_RETRIES,
            });
        }

        let wait = backoff_for(retry_count);
        tracing::debug!(%submission_id, retry_count, wait_ms = wait.as_millis() as u64, "Retrying QR extraction");
        sleep(wait).await;

        self.extract_qr_from_document(file_path, Some(submission_id))
            .await
    }
}
