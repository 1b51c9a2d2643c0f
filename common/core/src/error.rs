use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Internal error kinds surfaced by the broker, blob store and runner
/// layers (§7). These never reach a client directly — the gateway maps
/// them onto [`ApiError`], the worker retries or terminates a job based on
/// them.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("model '{0}' not supported")]
    UnknownModel(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("failed to fetch input: {0}")]
    InputFetchFailed(String),
    #[error("inference failed: {0}")]
    InferenceError(String),
    #[error("failed to upload artifact: {0}")]
    BlobUploadError(String),
    #[error("soft time limit exceeded")]
    SoftTimeout,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// The gateway-facing error type (§7, §8). Every variant carries the
/// human-readable string clients see in `detail`; none carry a stack
/// trace or secret material.
#[derive(Debug)]
pub enum ApiError {
    MissingApiKey,
    InvalidApiKey,
    RateLimited { limit: u32 },
    UnknownModel { requested: String, available: Vec<String> },
    MalformedRequest(String),
    BrokerUnavailable(String),
    Internal(String),
    NotFound,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing_api_key"),
            ApiError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::UnknownModel { .. } => (StatusCode::BAD_REQUEST, "unknown_model"),
            ApiError::MalformedRequest(_) => (StatusCode::BAD_REQUEST, "malformed_request"),
            ApiError::BrokerUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "broker_unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::MissingApiKey => "Missing API key".to_string(),
            ApiError::InvalidApiKey => "Invalid API key".to_string(),
            ApiError::RateLimited { limit } => {
                format!("Rate limit exceeded. Maximum {limit} requests per minute.")
            }
            ApiError::UnknownModel { requested, available } => format!(
                "Model {requested} not supported. Available models: {available:?}"
            ),
            ApiError::MalformedRequest(msg) => msg.clone(),
            ApiError::BrokerUnavailable(msg) => msg.clone(),
            ApiError::Internal(msg) => msg.clone(),
            ApiError::NotFound => "Not found".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let detail = self.detail();
        let mut resp = (status, Json(ErrorBody { detail })).into_response();
        if let Ok(value) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", value);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
