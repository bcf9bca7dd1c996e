use crate::models::ExtractionState;
use anyhow::{anyhow, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const BATCH_ID_FIELDS: [&str; 3] = ["batch_id", "OCR_ref_no", "batchId"];
pub const STATUS_FIELDS: [&str; 3] = ["extraction_status", "status", "extractionStatus"];

pub fn compute_sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Returns the first balanced `{..}` or `[..]` region of `text`.
///
/// Delimiters inside string literals are ignored, including escaped quotes.
/// Returns `None` if no opener exists, the region never closes, or a closer
/// does not match its opener.
pub fn extract_json_region(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(*byte) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a provider body that may carry log noise around the JSON payload.
pub fn parse_lenient_json(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }
    let region = extract_json_region(text)
        .ok_or_else(|| anyhow!("no balanced JSON region in response body"))?;
    Ok(serde_json::from_str(region)?)
}

fn as_object_root(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(value),
        _ => value,
    }
}

/// First of `names` present on `value` with a non-null value.
pub fn find_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let root = as_object_root(value);
    names
        .iter()
        .filter_map(|name| root.get(name))
        .find(|v| !v.is_null())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn extract_batch_id(value: &Value) -> Option<String> {
    let root = as_object_root(value);
    BATCH_ID_FIELDS
        .iter()
        .filter_map(|name| root.get(name))
        .find_map(scalar_to_string)
}

/// Maps a provider status body onto the tri-state outcome.
///
/// Unknown or absent values classify as `Processing` so the caller keeps
/// polling.
pub fn classify_extraction_status(value: &Value) -> ExtractionState {
    let root = as_object_root(value);
    let status = STATUS_FIELDS
        .iter()
        .filter_map(|name| root.get(name))
        .find_map(Value::as_str);

    match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("completed") | Some("complete") => ExtractionState::Complete,
        Some("failed") | Some("error") => ExtractionState::Failed,
        _ => ExtractionState::Processing,
    }
}
