use crate::audit::{write_audit_event, AuditEvent};
use crate::error::PipelineError;
use crate::submission::{batch_key, result_key};
use crate::token::TokenManager;
use chrono::Utc;
use invproc_core::models::{ExtractionState, SubmissionRef};
use invproc_core::parsing::{classify_extraction_status, find_field};
use providers::{OcrProvider, ProviderError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use store::{notify, EventSink, KvStore, RecordStore, StoreError};
use tokio::time::{sleep, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_millis(300_000);

/// Result of one status round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCheck {
    pub status: ExtractionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Terminal result of a bounded poll. `Timeout` is an expected outcome for
/// long extractions, not a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Complete {
        data: Value,
        attempts: u32,
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    Failed {
        error: Value,
        attempts: u32,
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    Timeout {
        attempts: u32,
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
}

fn failure_detail(body: &Value) -> Value {
    find_field(body, &["error", "message", "reason"])
        .cloned()
        .unwrap_or_else(|| body.clone())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct ExtractionPoller {
    tokens: TokenManager,
    provider: Arc<dyn OcrProvider>,
    kv: Arc<dyn KvStore>,
    records: Arc<dyn RecordStore>,
    events: Arc<dyn EventSink>,
    poll_interval: Duration,
}

impl ExtractionPoller {
    pub fn new(
        provider: Arc<dyn OcrProvider>,
        kv: Arc<dyn KvStore>,
        records: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tokens: TokenManager::new(Arc::clone(&provider)),
            provider,
            kv,
            records,
            events,
            poll_interval,
        }
    }

    /// Loads the recorded batch for `submission_id` and checks it is `batch_id`.
    async fn owned_submission(
        &self,
        submission_id: &str,
        batch_id: &str,
    ) -> Result<SubmissionRef, PipelineError> {
        let stored = self
            .kv
            .get(&batch_key(submission_id))
            .await?
            .ok_or_else(|| PipelineError::UnknownSubmission {
                submission_id: submission_id.to_string(),
            })?;
        let record: SubmissionRef = serde_json::from_value(stored).map_err(StoreError::from)?;

        if !record.is_owned_by(submission_id, batch_id) {
            return Err(PipelineError::BatchMismatch {
                submission_id: submission_id.to_string(),
                batch_id: batch_id.to_string(),
            });
        }
        Ok(record)
    }

    async fn fetch_status(&self, batch_id: &str) -> Result<(ExtractionState, Value), ProviderError> {
        let token = self.tokens.acquire_working_token().await?;
        let body = self.provider.batch_status(&token, batch_id).await?;
        Ok((classify_extraction_status(&body), body))
    }

    /// Persists, audits and announces a terminal transition. A record that is
    /// already terminal was announced before and is left untouched.
    async fn record_terminal(&self, mut record: SubmissionRef, state: ExtractionState, body: &Value) {
        if record.state.is_terminal() {
            tracing::debug!(
                submission_id = %record.submission_id,
                batch_id = %record.batch_id,
                recorded = %record.state,
                "Terminal state already recorded"
            );
            return;
        }
        record.state = state;
        record.updated_at = Utc::now();
        let submission_id = record.submission_id.clone();
        let batch_id = record.batch_id.clone();

        let persisted = match serde_json::to_value(&record) {
            Ok(record_value) => {
                let mut entries = vec![(batch_key(&submission_id), record_value)];
                if state == ExtractionState::Complete {
                    entries.push((result_key(&submission_id), body.clone()));
                }
                self.kv.mset(&entries).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = &persisted {
            tracing::error!(%submission_id, %batch_id, error = %e, "Failed to persist extraction result");
        }

        let mut event = AuditEvent::new("extraction_finished", state.as_str())
            .with_submission(&submission_id)
            .with_batch(&batch_id);
        if state == ExtractionState::Failed {
            event = event.with_detail(failure_detail(body));
        }
        if let Err(e) = persisted {
            event = event.with_error(e);
        }
        write_audit_event(self.records.as_ref(), &event).await;

        let topic = match state {
            ExtractionState::Complete => "invoice.extracted",
            _ => "invoice.extraction_failed",
        };
        notify(
            self.events.as_ref(),
            topic,
            json!({"submission_id": submission_id, "batch_id": batch_id, "status": state}),
        )
        .await;
    }

    pub async fn check_status_once(
        &self,
        submission_id: &str,
        batch_id: &str,
    ) -> Result<StatusCheck, PipelineError> {
        let record = self.owned_submission(submission_id, batch_id).await?;
        let (state, body) = self.fetch_status(batch_id).await?;
        tracing::debug!(%submission_id, %batch_id, status = %state, "Status checked");

        match state {
            ExtractionState::Complete => {
                self.record_terminal(record, state, &body).await;
                Ok(StatusCheck {
                    status: state,
                    data: Some(body),
                    error: None,
                })
            }
            ExtractionState::Failed => {
                self.record_terminal(record, state, &body).await;
                Ok(StatusCheck {
                    status: state,
                    data: None,
                    error: Some(failure_detail(&body)),
                })
            }
            ExtractionState::Processing => Ok(StatusCheck {
                status: state,
                data: None,
                error: None,
            }),
        }
    }

    /// Polls until the batch reaches a terminal state or `max_duration`
    /// elapses.
    ///
    /// Token and transport failures are absorbed and retried on the next
    /// interval; they only ever surface as an eventual `Timeout`.
    pub async fn poll_until_complete(
        &self,
        submission_id: &str,
        batch_id: &str,
        max_duration: Duration,
    ) -> Result<PollOutcome, PipelineError> {
        let record = self.owned_submission(submission_id, batch_id).await?;

        let started = Instant::now();
        let interval_ms = self.poll_interval.as_millis().max(1);
        let max_attempts = u32::try_from(max_duration.as_millis() / interval_ms)
            .unwrap_or(u32::MAX)
            .max(1);
        let mut attempts = 0u32;

        while started.elapsed() < max_duration && attempts < max_attempts {
            attempts += 1;
            match self.fetch_status(batch_id).await {
                Ok((ExtractionState::Complete, body)) => {
                    self.record_terminal(record, ExtractionState::Complete, &body)
                        .await;
                    tracing::info!(%submission_id, %batch_id, attempts, "Extraction complete");
                    return Ok(PollOutcome::Complete {
                        data: body,
                        attempts,
                        duration_ms: elapsed_ms(started),
                    });
                }
                Ok((ExtractionState::Failed, body)) => {
                    self.record_terminal(record, ExtractionState::Failed, &body)
                        .await;
                    tracing::warn!(%submission_id, %batch_id, attempts, "Extraction failed");
                    return Ok(PollOutcome::Failed {
                        error: failure_detail(&body),
                        attempts,
                        duration_ms: elapsed_ms(started),
                    });
                }
                Ok((ExtractionState::Processing, _)) => {
                    tracing::debug!(%submission_id, %batch_id, attempt = attempts, "Still processing");
                }
                Err(e) => {
                    tracing::warn!(%submission_id, %batch_id, attempt = attempts, error = %e, "Status poll failed, retrying");
                }
            }

            let remaining = max_duration.saturating_sub(started.elapsed());
            if remaining.is_zero() || attempts >= max_attempts {
                break;
            }
            sleep(self.poll_interval.min(remaining)).await;
        }

        tracing::info!(%submission_id, %batch_id, attempts, "Polling budget exhausted");
        Ok(PollOutcome::Timeout {
            attempts,
            duration_ms: elapsed_ms(started),
        })
    }
}
