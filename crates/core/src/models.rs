use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Normalised provider extraction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    Processing,
    Complete,
    Failed,
}

impl ExtractionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionState::Processing => "processing",
            ExtractionState::Complete => "complete",
            ExtractionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExtractionState::Processing)
    }
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch reference recorded once the provider has accepted a document.
///
/// `batch_id` never changes after the record is first written; later writes
/// only move `state` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub submission_id: String,
    pub batch_id: String,
    pub file_name: String,
    pub file_path: String,
    pub document_sha256: String,
    pub state: ExtractionState,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionRef {
    pub fn new(
        submission_id: &str,
        batch_id: &str,
        file_name: &str,
        file_path: &str,
        document_sha256: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            submission_id: submission_id.to_string(),
            batch_id: batch_id.to_string(),
            file_name: file_name.to_string(),
            file_path: file_path.to_string(),
            document_sha256,
            state: ExtractionState::Processing,
            uploaded_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, submission_id: &str, batch_id: &str) -> bool {
        self.submission_id == submission_id && self.batch_id == batch_id
    }
}

/// Access/refresh token pair issued by the OCR provider.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens must never reach the logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Row of the vendor reference table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub gstin: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl VendorRecord {
    /// The vendor's GSTIN, if one is on file and not blank.
    pub fn gstin(&self) -> Option<&str> {
        self.gstin
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GstSkipReason {
    NoVendorName,
    VendorNotFound,
    MissingGstin,
    ApiKeyMissing,
    GstApiError,
    NetworkError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GstFailure {
    InvalidGstin,
    GstInactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GstOutcome {
    Valid { e_invoice_enabled: bool },
    Invalid { error: GstFailure },
    Skipped { reason: GstSkipReason },
}

/// Structured result of a vendor GST check.
///
/// Every branch carries the vendor identity and the provider body that led
/// to it, so callers can audit a decision without server logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GstValidation {
    #[serde(flatten)]
    pub outcome: GstOutcome,
    pub should_extract_qr: bool,
    pub vendor_name: Option<String>,
    pub vendor_id: Option<String>,
    pub gstin: Option<String>,
    pub http_status: Option<u16>,
    pub raw_response: Option<Value>,
}

impl GstValidation {
    pub fn new(outcome: GstOutcome) -> Self {
        let should_extract_qr = matches!(
            outcome,
            GstOutcome::Valid {
                e_invoice_enabled: true
            }
        );
        Self {
            outcome,
            should_extract_qr,
            vendor_name: None,
            vendor_id: None,
            gstin: None,
            http_status: None,
            raw_response: None,
        }
    }

    pub fn skipped(reason: GstSkipReason) -> Self {
        Self::new(GstOutcome::Skipped { reason })
    }

    pub fn with_vendor_name(mut self, name: &str) -> Self {
        self.vendor_name = Some(name.to_string());
        self
    }

    pub fn with_vendor(mut self, vendor: &VendorRecord) -> Self {
        self.vendor_name = Some(vendor.name.clone());
        self.vendor_id = Some(vendor.id.clone());
        self.gstin = vendor.gstin().map(str::to_string);
        self
    }

    pub fn with_response(mut self, http_status: u16, raw: Value) -> Self {
        self.http_status = Some(http_status);
        self.raw_response = Some(raw);
        self
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.outcome, GstOutcome::Invalid { .. })
    }
}

pub const QR_SKIP_TIMEOUT: &str = "timeout";
pub const QR_SKIP_API_ERROR: &str = "qr_api_error";
pub const QR_SKIP_PARSE_ERROR: &str = "parse_error";

/// QR decoding result. None of the variants is a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QrOutcome {
    Found {
        payload: Value,
    },
    NotFound {
        raw_response: Value,
    },
    Skipped {
        reason: String,
        http_status: Option<u16>,
        raw_response: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrExtraction {
    pub file_path: String,
    pub submission_id: Option<String>,
    #[serde(flatten)]
    pub outcome: QrOutcome,
}

impl QrExtraction {
    pub fn new(file_path: &str, submission_id: Option<&str>, outcome: QrOutcome) -> Self {
        Self {
            file_path: file_path.to_string(),
            submission_id: submission_id.map(str::to_string),
            outcome,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self.outcome, QrOutcome::Found { .. })
    }
}
