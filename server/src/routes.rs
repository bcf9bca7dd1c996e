use crate::error::ApiError;
use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use store::{LocalObjectStore, ObjectStore, StoreError};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub objects: Arc<LocalObjectStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/klearstack/upload-invoice", post(upload_invoice))
        .route("/klearstack/poll-status", post(poll_status))
        .route("/klearstack/submissions", get(list_submissions))
        .route("/poll-completion", post(poll_completion))
        .route("/validate/gst/{vendor_name}", get(validate_gst))
        .route("/validate/qr-extract", post(qr_extract))
        .route("/validate/qr-retry", post(qr_retry))
        .route("/documents", post(store_document).delete(remove_documents))
        .route("/object/sign/{bucket}/{*path}", get(signed_object))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serialises `value` and marks it with a top-level `success` flag.
fn respond<T: Serialize>(value: &T, success: bool) -> Result<Json<Value>, ApiError> {
    let mut body = serde_json::to_value(value)
        .map_err(|e| ApiError::from(pipeline::PipelineError::Store(StoreError::from(e))))?;
    if let Value::Object(map) = &mut body {
        map.insert("success".to_string(), Value::Bool(success));
    }
    Ok(Json(body))
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{name} is required")));
    }
    Ok(value)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadInvoiceRequest {
    submission_id: String,
    file_path: String,
    file_name: String,
}

async fn upload_invoice(
    State(state): State<AppState>,
    payload: Result<Json<UploadInvoiceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let submission_id = required("submissionId", &req.submission_id)?;
    let file_path = required("filePath", &req.file_path)?;
    let file_name = required("fileName", &req.file_name)?;

    let receipt = state
        .pipeline
        .submit_document(submission_id, file_path, file_name)
        .await?;

    Ok(Json(json!({
        "success": true,
        "submissionId": receipt.submission_id,
        "batchId": receipt.batch_id,
        "status": "processing",
        "notification": receipt.notification,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollStatusRequest {
    submission_id: String,
    batch_id: String,
}

async fn poll_status(
    State(state): State<AppState>,
    payload: Result<Json<PollStatusRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let submission_id = required("submissionId", &req.submission_id)?;
    let batch_id = required("batchId", &req.batch_id)?;

    let check = state
        .pipeline
        .check_status_once(submission_id, batch_id)
        .await?;
    respond(&check, true)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollCompletionRequest {
    submission_id: String,
    batch_id: String,
    /// Milliseconds.
    max_duration: Option<u64>,
}

async fn poll_completion(
    State(state): State<AppState>,
    payload: Result<Json<PollCompletionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let submission_id = required("submissionId", &req.submission_id)?;
    let batch_id = required("batchId", &req.batch_id)?;

    let outcome = state
        .pipeline
        .poll_until_complete(
            submission_id,
            batch_id,
            req.max_duration.map(Duration::from_millis),
        )
        .await?;
    respond(&outcome, true)
}

async fn list_submissions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let submissions = state.pipeline.list_submissions().await?;
    Ok(Json(json!({
        "success": true,
        "count": submissions.len(),
        "submissions": submissions,
    })))
}

async fn validate_gst(
    State(state): State<AppState>,
    Path(vendor_name): Path<String>,
) -> Result<Response, ApiError> {
    let result = state
        .pipeline
        .validate_vendor_gst(Some(&vendor_name))
        .await?;
    let status = if result.is_invalid() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    let body = respond(&result, !result.is_invalid())?;
    Ok((status, body).into_response())
}

#[derive(Debug, Deserialize)]
struct QrExtractRequest {
    file_path: String,
    submission_id: Option<String>,
}

async fn qr_extract(
    State(state): State<AppState>,
    payload: Result<Json<QrExtractRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let file_path = required("file_path", &req.file_path)?;

    let result = state
        .pipeline
        .extract_qr_from_document(file_path, req.submission_id.as_deref())
        .await?;
    respond(&result, true)
}

#[derive(Debug, Deserialize)]
struct QrRetryRequest {
    file_path: String,
    submission_id: String,
    retry_count: u32,
}

async fn qr_retry(
    State(state): State<AppState>,
    payload: Result<Json<QrRetryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let file_path = required("file_path", &req.file_path)?;
    let submission_id = required("submission_id", &req.submission_id)?;

    let result = state
        .pipeline
        .retry_extraction(file_path, submission_id, req.retry_count)
        .await?;
    respond(&result, true)
}

async fn store_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut submission_id = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("submission_id") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    submission_id = Some(value.trim().to_string());
                }
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file part has no file name".into()))?;
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("multipart field `file` is required".into()))?;
    let submission_id = submission_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let stored = state
        .pipeline
        .store_document(&submission_id, &file_name, bytes, &content_type)
        .await?;
    respond(&stored, true)
}

#[derive(Debug, Deserialize)]
struct RemoveDocumentsRequest {
    paths: Vec<String>,
}

async fn remove_documents(
    State(state): State<AppState>,
    payload: Result<Json<RemoveDocumentsRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    if req.paths.is_empty() {
        return Err(ApiError::BadRequest("paths must not be empty".into()));
    }
    let removed = state.pipeline.remove_documents(&req.paths).await?;
    Ok(Json(json!({"success": true, "removed": removed})))
}

#[derive(Debug, Deserialize)]
struct SignedQuery {
    token: String,
    expires: i64,
}

/// Serves the target of a URL minted by the object store's signer.
async fn signed_object(
    State(state): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    if !state
        .objects
        .verify_signature(&bucket, &path, query.expires, &query.token)
    {
        return Err(ApiError::Forbidden("invalid or expired signature".into()));
    }

    let bytes = match state.objects.download(&bucket, &path).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound { bucket, path }) => {
            return Err(ApiError::NotFound(format!("{bucket}/{path}")))
        }
        Err(e) => return Err(pipeline::PipelineError::Store(e).into()),
    };
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}
