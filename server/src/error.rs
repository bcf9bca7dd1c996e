use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipeline::PipelineError;
use serde_json::{json, Value};
use thiserror::Error;

/// Every handler failure, rendered as `{success: false, error, reason, ..context}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::Pipeline(e) => e.reason(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
            "reason": self.reason(),
        });
        if let (ApiError::Pipeline(e), Some(map)) = (self, body.as_object_mut()) {
            if let Value::Object(context) = e.context() {
                map.extend(context);
            }
        }
        body
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(reason = self.reason(), error = %self, "Request failed");
        } else {
            tracing::warn!(reason = self.reason(), error = %self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::ProviderError;

    #[test]
    fn provider_context_is_flattened() {
        let err = ApiError::from(PipelineError::from(ProviderError::Upload {
            status: 415,
            body: "unsupported media".into(),
        }));
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = err.body();
        assert_eq!(body["success"], false);
        assert_eq!(body["reason"], "upload_error");
        assert_eq!(body["provider_status"], 415);
        assert_eq!(body["provider_body"], "unsupported media");
    }

    #[test]
    fn bad_request_has_message() {
        let body = ApiError::BadRequest("missing field `batchId`".into()).body();
        assert_eq!(body["reason"], "bad_request");
        assert_eq!(body["error"], "missing field `batchId`");
    }
}
