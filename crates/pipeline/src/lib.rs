mod audit;
pub mod error;
pub mod gst;
pub mod poller;
pub mod qr;
pub mod submission;
pub mod token;

#[cfg(test)]
mod testing;

pub use audit::{AuditEvent, AUDIT_TABLE};
pub use error::PipelineError;
pub use gst::GstValidator;
pub use poller::{ExtractionPoller, PollOutcome, StatusCheck};
pub use qr::QrExtractor;
pub use submission::{DocumentSubmitter, SubmissionReceipt};

use invproc_core::models::{GstValidation, QrExtraction, SubmissionRef};
use invproc_core::parsing::compute_sha256_hex;
use invproc_core::validation::storage_key;
use providers::{GstStatusApi, OcrProvider, QrDecoder};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use store::{EventSink, KvStore, ObjectStore, RecordStore, StoreError};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub poll_interval: Duration,
    pub default_max_duration: Duration,
    pub qr_timeout: Duration,
    pub signed_url_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "invoices".to_string(),
            poll_interval: poller::DEFAULT_POLL_INTERVAL,
            default_max_duration: poller::DEFAULT_MAX_POLL_DURATION,
            qr_timeout: qr::DEFAULT_QR_TIMEOUT,
            signed_url_ttl: qr::DEFAULT_SIGNED_URL_TTL,
        }
    }
}

/// External services the pipeline coordinates.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn OcrProvider>,
    pub objects: Arc<dyn ObjectStore>,
    pub kv: Arc<dyn KvStore>,
    pub records: Arc<dyn RecordStore>,
    pub events: Arc<dyn EventSink>,
    /// `None` when no GST API key is configured.
    pub gst_api: Option<Arc<dyn GstStatusApi>>,
    pub qr_decoder: Arc<dyn QrDecoder>,
}

/// A document written to object storage, ready for submission.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub submission_id: String,
    pub file_name: String,
    /// Bucket-prefixed path, as accepted by submission and QR extraction.
    pub file_path: String,
    pub document_sha256: String,
    pub size: usize,
}

/// Entry point for every pipeline operation. Holds no per-request state, so
/// one instance is shared by all handlers.
pub struct Pipeline {
    submitter: DocumentSubmitter,
    poller: ExtractionPoller,
    gst: GstValidator,
    qr: QrExtractor,
    objects: Arc<dyn ObjectStore>,
    kv: Arc<dyn KvStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let Collaborators {
            provider,
            objects,
            kv,
            records,
            events,
            gst_api,
            qr_decoder,
        } = collaborators;

        Self {
            submitter: DocumentSubmitter::new(
                Arc::clone(&provider),
                Arc::clone(&objects),
                Arc::clone(&kv),
                Arc::clone(&records),
                Arc::clone(&events),
                &settings.bucket,
            ),
            poller: ExtractionPoller::new(
                provider,
                Arc::clone(&kv),
                Arc::clone(&records),
                events,
                settings.poll_interval,
            ),
            gst: GstValidator::new(Arc::clone(&records), gst_api),
            qr: QrExtractor::new(
                Arc::clone(&objects),
                qr_decoder,
                records,
                &settings.bucket,
                settings.qr_timeout,
                settings.signed_url_ttl,
            ),
            objects,
            kv,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn submit_document(
        &self,
        submission_id: &str,
        stored_file_path: &str,
        file_name: &str,
    ) -> Result<SubmissionReceipt, PipelineError> {
        self.submitter
            .submit_document(submission_id, stored_file_path, file_name)
            .await
    }

    pub async fn check_status_once(
        &self,
        submission_id: &str,
        batch_id: &str,
    ) -> Result<StatusCheck, PipelineError> {
        self.poller.check_status_once(submission_id, batch_id).await
    }

    /// Polls with the configured default budget when `max_duration` is `None`.
    pub async fn poll_until_complete(
        &self,
        submission_id: &str,
        batch_id: &str,
        max_duration: Option<Duration>,
    ) -> Result<PollOutcome, PipelineError> {
        let budget = max_duration.unwrap_or(self.settings.default_max_duration);
        self.poller
            .poll_until_complete(submission_id, batch_id, budget)
            .await
    }

    pub async fn validate_vendor_gst(
        &self,
        vendor_name: Option<&str>,
    ) -> Result<GstValidation, PipelineError> {
        self.gst.validate_vendor_gst(vendor_name).await
    }

    pub async fn extract_qr_from_document(
        &self,
        file_path: &str,
        submission_id: Option<&str>,
    ) -> Result<QrExtraction, PipelineError> {
        self.qr.extract_qr_from_document(file_path, submission_id).await
    }

    pub async fn retry_extraction(
        &self,
        file_path: &str,
        submission_id: &str,
        retry_count: u32,
    ) -> Result<QrExtraction, PipelineError> {
        self.qr
            .retry_extraction(file_path, submission_id, retry_count)
            .await
    }

    /// All recorded submissions, newest upload first.
    pub async fn list_submissions(&self) -> Result<Vec<SubmissionRef>, PipelineError> {
        let entries = self.kv.get_by_prefix(submission::BATCH_KEY_PREFIX).await?;
        let mut submissions: Vec<SubmissionRef> = entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "Skipping unreadable submission record");
                    None
                }
            })
            .collect();
        submissions.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(submissions)
    }

    /// Writes an uploaded document to `{bucket}/{submission_id}/{file_name}`.
    pub async fn store_document(
        &self,
        submission_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredDocument, PipelineError> {
        let invalid = || PipelineError::InvalidDocument {
            file_name: file_name.to_string(),
        };
        let base_name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| *n == file_name)
            .ok_or_else(invalid)?;
        if bytes.is_empty() {
            return Err(invalid());
        }

        let document_sha256 = compute_sha256_hex(&bytes);
        let size = bytes.len();
        let key = format!("{submission_id}/{base_name}");
        let stored = self
            .objects
            .upload(&self.settings.bucket, &key, bytes, content_type)
            .await
            .map_err(|e| match e {
                StoreError::InvalidPath(_) => invalid(),
                other => PipelineError::Store(other),
            })?;

        tracing::info!(%submission_id, file_name = %base_name, size, "Document stored");
        Ok(StoredDocument {
            submission_id: submission_id.to_string(),
            file_name: base_name.to_string(),
            file_path: format!("{}/{}", self.settings.bucket, stored),
            document_sha256,
            size,
        })
    }

    /// Removes stored documents. Paths may be bucket-prefixed or bare keys.
    pub async fn remove_documents(&self, paths: &[String]) -> Result<usize, PipelineError> {
        let bucket = &self.settings.bucket;
        let keys: Vec<String> = paths
            .iter()
            .map(|p| storage_key(p, bucket).unwrap_or(p).to_string())
            .collect();
        self.objects.remove(bucket, &keys).await?;
        tracing::info!(count = keys.len(), "Documents removed");
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use invproc_core::models::ExtractionState;

    #[tokio::test]
    async fn stored_document_is_submittable() {
        let h = Harness::new().await;
        let pipeline = h.pipeline();

        let stored = pipeline
            .store_document("sub-1", "inv.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();
        assert_eq!(stored.file_path, "invoices/sub-1/inv.pdf");
        assert_eq!(stored.document_sha256, compute_sha256_hex(b"%PDF-1.7"));

        let receipt = pipeline
            .submit_document("sub-1", &stored.file_path, &stored.file_name)
            .await
            .unwrap();
        assert_eq!(receipt.batch_id, "batch-1");
    }

    #[tokio::test]
    async fn nested_or_empty_names_are_rejected() {
        let h = Harness::new().await;
        let pipeline = h.pipeline();

        for name in ["../etc/passwd", "a/b.pdf", ""] {
            let err = pipeline
                .store_document("sub-1", name, b"x".to_vec(), "application/pdf")
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 400, "{name}");
        }
        let err = pipeline
            .store_document("sub-1", "a.pdf", Vec::new(), "application/pdf")
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_document");
    }

    #[tokio::test]
    async fn removal_accepts_prefixed_paths() {
        let h = Harness::new().await;
        let pipeline = h.pipeline();
        pipeline
            .store_document("sub-1", "a.pdf", b"x".to_vec(), "application/pdf")
            .await
            .unwrap();

        let removed = pipeline
            .remove_documents(&["invoices/sub-1/a.pdf".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(h.objects.download("invoices", "sub-1/a.pdf").await.is_err());
    }

    #[tokio::test]
    async fn submissions_list_newest_first() {
        let h = Harness::new().await;
        let pipeline = h.pipeline();

        let mut older = SubmissionRef::new("sub-old", "b-old", "a.pdf", "a.pdf", "h".into());
        older.uploaded_at = older.uploaded_at - chrono::Duration::minutes(5);
        let newer = SubmissionRef::new("sub-new", "b-new", "b.pdf", "b.pdf", "h".into());
        for record in [&older, &newer] {
            h.kv
                .set(
                    &submission::batch_key(&record.submission_id),
                    &serde_json::to_value(record).unwrap(),
                )
                .await
                .unwrap();
        }
        h.kv
            .set(&submission::result_key("sub-old"), &serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let listed = pipeline.list_submissions().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.submission_id.as_str()).collect();
        assert_eq!(ids, vec!["sub-new", "sub-old"]);
        assert!(listed.iter().all(|s| s.state == ExtractionState::Processing));
    }

    #[tokio::test]
    async fn default_budget_applies_when_unset() {
        let h = Harness::new().await;
        let pipeline = h.pipeline();
        assert_eq!(
            pipeline.settings().default_max_duration,
            Duration::from_millis(300_000)
        );
        let err = pipeline
            .poll_until_complete("missing", "batch-1", None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
