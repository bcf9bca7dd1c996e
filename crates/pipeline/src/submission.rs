use crate::audit::{write_audit_event, AuditEvent};
use crate::error::PipelineError;
use crate::token::TokenManager;
use invproc_core::models::SubmissionRef;
use invproc_core::parsing::compute_sha256_hex;
use invproc_core::validation::storage_key;
use providers::OcrProvider;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use store::{notify, EventSink, KvStore, NotifyResult, ObjectStore, RecordStore, StoreError};

pub const BATCH_KEY_PREFIX: &str = "klearstack:batch:";
pub const RESULT_KEY_PREFIX: &str = "klearstack:result:";

pub fn batch_key(submission_id: &str) -> String {
    format!("{BATCH_KEY_PREFIX}{submission_id}")
}

pub fn result_key(submission_id: &str) -> String {
    format!("{RESULT_KEY_PREFIX}{submission_id}")
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub submission_id: String,
    pub batch_id: String,
    pub notification: NotifyResult,
}

/// Sends a stored document to the OCR provider and records the batch.
///
/// Returns as soon as the provider names a batch; completion is polled
/// separately.
pub struct DocumentSubmitter {
    tokens: TokenManager,
    provider: Arc<dyn OcrProvider>,
    objects: Arc<dyn ObjectStore>,
    kv: Arc<dyn KvStore>,
    records: Arc<dyn RecordStore>,
    events: Arc<dyn EventSink>,
    bucket: String,
}

impl DocumentSubmitter {
    pub fn new(
        provider: Arc<dyn OcrProvider>,
        objects: Arc<dyn ObjectStore>,
        kv: Arc<dyn KvStore>,
        records: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
        bucket: &str,
    ) -> Self {
        Self {
            tokens: TokenManager::new(Arc::clone(&provider)),
            provider,
            objects,
            kv,
            records,
            events,
            bucket: bucket.to_string(),
        }
    }

    async fn download(&self, stored_file_path: &str) -> Result<Vec<u8>, PipelineError> {
        let path = storage_key(stored_file_path, &self.bucket).unwrap_or(stored_file_path);
        let download_error = |source: Option<StoreError>| PipelineError::Download {
            bucket: self.bucket.clone(),
            path: path.to_string(),
            source,
        };

        match self.objects.download(&self.bucket, path).await {
            Ok(bytes) if bytes.is_empty() => Err(download_error(None)),
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(download_error(Some(e))),
        }
    }

    pub async fn submit_document(
        &self,
        submission_id: &str,
        stored_file_path: &str,
        file_name: &str,
    ) -> Result<SubmissionReceipt, PipelineError> {
        if let Some(existing) = self.kv.get(&batch_key(submission_id)).await? {
            let existing: SubmissionRef = serde_json::from_value(existing).map_err(StoreError::from)?;
            return Err(PipelineError::AlreadySubmitted {
                submission_id: submission_id.to_string(),
                batch_id: existing.batch_id,
            });
        }

        let result = self
            .upload_to_provider(submission_id, stored_file_path, file_name)
            .await;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(%submission_id, reason = e.reason(), error = %e, "Document submission failed");
                write_audit_event(
                    self.records.as_ref(),
                    &AuditEvent::new("submission_failed", "failed")
                        .with_submission(submission_id)
                        .with_error(e.to_string())
                        .with_detail(e.context()),
                )
                .await;
                return Err(e);
            }
        };

        self.kv
            .set(
                &batch_key(submission_id),
                &serde_json::to_value(&record).map_err(StoreError::from)?,
            )
            .await?;

        write_audit_event(
            self.records.as_ref(),
            &AuditEvent::new("document_submitted", "processing")
                .with_submission(submission_id)
                .with_batch(&record.batch_id)
                .with_detail(json!({
                    "file_name": record.file_name,
                    "file_path": record.file_path,
                    "document_sha256": record.document_sha256,
                })),
        )
        .await;

        tracing::info!(%submission_id, batch_id = %record.batch_id, "Document submitted for extraction");

        let notification = notify(
            self.events.as_ref(),
            "invoice.submitted",
            json!({
                "submission_id": submission_id,
                "batch_id": record.batch_id,
                "file_name": record.file_name,
                "uploaded_at": record.uploaded_at,
            }),
        )
        .await;

        Ok(SubmissionReceipt {
            submission_id: submission_id.to_string(),
            batch_id: record.batch_id,
            notification,
        })
    }

    async fn upload_to_provider(
        &self,
        submission_id: &str,
        stored_file_path: &str,
        file_name: &str,
    ) -> Result<SubmissionRef, PipelineError> {
        let token = self.tokens.acquire_working_token().await?;
        let bytes = self.download(stored_file_path).await?;
        let sha256 = compute_sha256_hex(&bytes);

        let batch_id = self
            .provider
            .process_document(&token, file_name, bytes)
            .await?;

        Ok(SubmissionRef::new(
            submission_id,
            &batch_id,
            file_name,
            stored_file_path,
            sha256,
        ))
    }
}
