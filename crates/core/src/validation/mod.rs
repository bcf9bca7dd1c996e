mod rules;

pub use rules::{classify_gst_response, classify_qr_response};

const VENDOR_NAME_SENTINELS: [&str; 2] = ["null", "undefined"];

/// True when the caller supplied no usable vendor name.
///
/// Route parameters arrive as text, so the literal strings `"null"` and
/// `"undefined"` count as absent.
pub fn is_blank_vendor_name(name: Option<&str>) -> bool {
    match name.map(str::trim) {
        None | Some("") => true,
        Some(n) => VENDOR_NAME_SENTINELS.contains(&n),
    }
}

/// Strips `"{bucket}/"` from a storage-relative path.
///
/// Returns `None` for anything outside the bucket namespace, such as an
/// already-public URL.
pub fn storage_key<'a>(file_path: &'a str, bucket: &str) -> Option<&'a str> {
    file_path
        .strip_prefix(bucket)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|key| !key.is_empty())
}
