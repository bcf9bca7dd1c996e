use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::RecordStore;

pub const AUDIT_TABLE: &str = "pipeline_audit";

/// One row of the per-step audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub submission_id: Option<String>,
    pub batch_id: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub detail: Option<Value>,
}

impl AuditEvent {
    pub fn new(event_type: &str, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            submission_id: None,
            batch_id: None,
            state: state.to_string(),
            error: None,
            detail: None,
        }
    }

    pub fn with_submission(mut self, submission_id: &str) -> Self {
        self.submission_id = Some(submission_id.to_string());
        self
    }

    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Appends `event` to the audit table. Failures are logged, never returned.
pub async fn write_audit_event(records: &dyn RecordStore, event: &AuditEvent) {
    let row = match serde_json::to_value(event) {
        Ok(row) => row,
        Err(e) => {
            tracing::warn!(event_type = %event.event_type, error = %e, "Audit event not serialisable");
            return;
        }
    };

    match records.insert(AUDIT_TABLE, row).await {
        Ok(_) => tracing::debug!(
            event_type = %event.event_type,
            submission_id = ?event.submission_id,
            "Audit event written"
        ),
        Err(e) => tracing::warn!(
            event_type = %event.event_type,
            error = %e,
            "Audit event write failed"
        ),
    }
}
