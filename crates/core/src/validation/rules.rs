use crate::models::{GstFailure, GstOutcome, QrOutcome};
use serde_json::Value;

fn status_code(body: &Value) -> Option<i64> {
    match body.get("status_code")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// The GST API reports a malformed GSTIN either as status_code 0 or by
// returning an error object in place of the taxpayer record.
fn is_invalid_gstin(body: &Value) -> bool {
    if status_code(body) == Some(0) {
        return true;
    }
    match body.get("error") {
        Some(Value::Object(_)) | Some(Value::Bool(true)) => true,
        Some(Value::String(s)) => !s.trim().is_empty(),
        _ => false,
    }
}

/// Classifies a parsed GST status body.
///
/// Active requires both `status_code == 1` and `status == "Active"`.
pub fn classify_gst_response(body: &Value) -> GstOutcome {
    if is_invalid_gstin(body) {
        return GstOutcome::Invalid {
            error: GstFailure::InvalidGstin,
        };
    }

    let active =
        status_code(body) == Some(1) && body.get("status").and_then(Value::as_str) == Some("Active");
    if !active {
        return GstOutcome::Invalid {
            error: GstFailure::GstInactive,
        };
    }

    GstOutcome::Valid {
        e_invoice_enabled: body.get("einvoiceStatus").and_then(Value::as_str) == Some("Yes"),
    }
}

pub fn classify_qr_response(body: Value) -> QrOutcome {
    if body.get("status").and_then(Value::as_bool) == Some(true) {
        QrOutcome::Found { payload: body }
    } else {
        QrOutcome::NotFound { raw_response: body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn active_with_einvoice() {
        let body = json!({"status_code": 1, "status": "Active", "einvoiceStatus": "Yes"});
        assert_eq!(
            classify_gst_response(&body),
            GstOutcome::Valid {
                e_invoice_enabled: true
            }
        );
    }

    #[test]
    fn active_without_einvoice() {
        let body = json!({"status_code": 1, "status": "Active", "einvoiceStatus": "No"});
        assert_eq!(
            classify_gst_response(&body),
            GstOutcome::Valid {
                e_invoice_enabled: false
            }
        );
    }

    #[test]
    fn cancelled_is_inactive() {
        let body = json!({"status_code": 1, "status": "Cancelled", "einvoiceStatus": "Yes"});
        assert_eq!(
            classify_gst_response(&body),
            GstOutcome::Invalid {
                error: GstFailure::GstInactive
            }
        );
    }

    #[test]
    fn status_code_string_is_accepted() {
        let body = json!({"status_code": "1", "status": "Active"});
        assert!(matches!(
            classify_gst_response(&body),
            GstOutcome::Valid { .. }
        ));
    }

    #[test]
    fn zero_sentinel_and_error_object_are_invalid_gstin() {
        for body in [
            json!({"status_code": 0}),
            json!({"status_code": "0", "message": "Invalid GSTIN"}),
            json!({"error": {"message": "Invalid GSTIN pattern"}}),
        ] {
            assert_eq!(
                classify_gst_response(&body),
                GstOutcome::Invalid {
                    error: GstFailure::InvalidGstin
                }
            );
        }
    }

    #[test]
    fn error_false_is_not_a_sentinel() {
        let body = json!({"error": false, "status_code": 1, "status": "Active"});
        assert!(matches!(
            classify_gst_response(&body),
            GstOutcome::Valid { .. }
        ));
    }

    #[test]
    fn qr_status_flag() {
        assert!(matches!(
            classify_qr_response(json!({"status": true, "irn": "abc"})),
            QrOutcome::Found { .. }
        ));
        assert!(matches!(
            classify_qr_response(json!({"status": false})),
            QrOutcome::NotFound { .. }
        ));
        assert!(matches!(
            classify_qr_response(json!({"irn": "abc"})),
            QrOutcome::NotFound { .. }
        ));
    }
}
