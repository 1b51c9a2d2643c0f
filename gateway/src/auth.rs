use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use inference_core::ApiError;
use tracing::warn;

use crate::app_state::AppState;

/// The caller's validated API key, inserted into request extensions by
/// [`auth_middleware`] for downstream handlers that need it (e.g. for
/// rate-limiter bucketing).
#[derive(Clone)]
pub struct ApiKey(pub String);

pub fn redact(key: &str) -> String {
    format!("{}...", &key[..key.len().min(8)])
}

/// Validates `x-api-key` against the configured allowlist (§4.2). Missing
/// or unrecognized keys never reach the handler, so no rate-limit slot or
/// idempotency lookup happens for an unauthenticated request.
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let api_key = request.headers().get("x-api-key").and_then(|value| value.to_str().ok()).map(str::to_string);

    let Some(api_key) = api_key else {
        state.metrics.record_auth_failure("missing_api_key");
        return Err(ApiError::MissingApiKey);
    };

    if !state.config.api_keys.iter().any(|allowed| allowed == &api_key) {
        warn!(api_key = %redact(&api_key), "Rejected invalid API key");
        state.metrics.record_auth_failure("invalid_api_key");
        return Err(ApiError::InvalidApiKey);
    }

    request.extensions_mut().insert(ApiKey(api_key));
    Ok(next.run(request).await)
}
