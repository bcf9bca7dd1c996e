use crate::audit::{write_audit_event, AuditEvent};
use crate::error::PipelineError;
use invproc_core::models::{GstOutcome, GstSkipReason, GstValidation, VendorRecord};
use invproc_core::validation::{classify_gst_response, is_blank_vendor_name};
use providers::GstStatusApi;
use serde_json::{json, Value};
use std::sync::Arc;
use store::{Order, RecordStore, RowQuery, StoreError};

pub const VENDOR_TABLE: &str = "vendors";

/// Checks a vendor's GST registration.
///
/// Apart from store failures every path yields a structured result: missing
/// preconditions and API trouble are `skipped`, and only a malformed or
/// inactive GSTIN is `invalid`.
pub struct GstValidator {
    records: Arc<dyn RecordStore>,
    api: Option<Arc<dyn GstStatusApi>>,
}

impl GstValidator {
    /// `api` is `None` when no API key is configured.
    pub fn new(records: Arc<dyn RecordStore>, api: Option<Arc<dyn GstStatusApi>>) -> Self {
        Self { records, api }
    }

    /// First stored vendor whose name matches exactly. Row ids follow
    /// insertion order.
    async fn find_vendor(&self, name: &str) -> Result<Option<VendorRecord>, PipelineError> {
        let query = RowQuery::new()
            .eq("name", name)
            .order_by("id", Order::Asc)
            .limit(1);
        let rows = self.records.select(VENDOR_TABLE, &query).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(
                serde_json::from_value(row).map_err(StoreError::from)?,
            )),
            None => Ok(None),
        }
    }

    pub async fn validate_vendor_gst(
        &self,
        vendor_name: Option<&str>,
    ) -> Result<GstValidation, PipelineError> {
        let result = self.run_chain(vendor_name).await?;

        tracing::info!(
            vendor_name = ?result.vendor_name,
            outcome = ?result.outcome,
            should_extract_qr = result.should_extract_qr,
            "GST validation finished"
        );
        write_audit_event(
            self.records.as_ref(),
            &AuditEvent::new("gst_validated", outcome_label(&result.outcome)).with_detail(json!({
                "vendor_name": result.vendor_name,
                "vendor_id": result.vendor_id,
                "gstin": result.gstin,
                "outcome": result.outcome,
            })),
        )
        .await;
        Ok(result)
    }

    async fn run_chain(&self, vendor_name: Option<&str>) -> Result<GstValidation, PipelineError> {
        let name = match vendor_name {
            Some(name) if !is_blank_vendor_name(Some(name)) => name,
            _ => return Ok(GstValidation::skipped(GstSkipReason::NoVendorName)),
        };

        let Some(vendor) = self.find_vendor(name).await? else {
            return Ok(GstValidation::skipped(GstSkipReason::VendorNotFound).with_vendor_name(name));
        };

        let Some(gstin) = vendor.gstin() else {
            return Ok(GstValidation::skipped(GstSkipReason::MissingGstin).with_vendor(&vendor));
        };

        let Some(api) = &self.api else {
            return Ok(GstValidation::skipped(GstSkipReason::ApiKeyMissing).with_vendor(&vendor));
        };

        let reply = match api.fetch_status(gstin).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(%gstin, error = %e, "GST API unreachable");
                return Ok(GstValidation::skipped(GstSkipReason::NetworkError)
                    .with_vendor(&vendor)
                    .with_response(0, Value::String(e.to_string())));
            }
        };

        if !reply.is_success() {
            let raw = serde_json::from_str(&reply.body).unwrap_or(Value::String(reply.body));
            return Ok(GstValidation::skipped(GstSkipReason::GstApiError)
                .with_vendor(&vendor)
                .with_response(reply.status, raw));
        }

        let body: Value = match serde_json::from_str(&reply.body) {
            Ok(body) => body,
            Err(_) => {
                return Ok(GstValidation::skipped(GstSkipReason::NetworkError)
                    .with_vendor(&vendor)
                    .with_response(reply.status, Value::String(reply.body)))
            }
        };

        let outcome = classify_gst_response(&body);
        Ok(GstValidation::new(outcome)
            .with_vendor(&vendor)
            .with_response(reply.status, body))
    }
}

fn outcome_label(outcome: &GstOutcome) -> &'static str {
    match outcome {
        GstOutcome::Valid { .. } => "valid",
        GstOutcome::Invalid { .. } => "invalid",
        GstOutcome::Skipped { .. } => "skipped",
    }
}
