use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use inference_broker::BrokerState;
use inference_core::{ApiError, ApiResult, JobEnvelope, Priority, Uuid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::auth::{redact, ApiKey};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub model: String,
    #[serde(default)]
    pub input: Map<String, Value>,
    pub priority: Option<String>,
    pub client_request_id: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<HashMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", environment: state.config.environment.clone() })
}

fn parse_priority(raw: Option<&str>) -> Result<Priority, ApiError> {
    match raw {
        None => Ok(Priority::Normal),
        Some("high") => Ok(Priority::High),
        Some("normal") => Ok(Priority::Normal),
        Some("low") => Ok(Priority::Low),
        Some(other) => Err(ApiError::MalformedRequest(format!("invalid priority '{other}'"))),
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

const MAX_CLIENT_REQUEST_ID_LEN: usize = 128;

fn validate_client_request_id(raw: Option<&str>) -> Result<(), ApiError> {
    match raw {
        Some(id) if id.len() > MAX_CLIENT_REQUEST_ID_LEN => {
            Err(ApiError::MalformedRequest(format!("client_request_id exceeds {MAX_CLIENT_REQUEST_ID_LEN} characters")))
        }
        _ => Ok(()),
    }
}

fn validate_callback_url(raw: Option<&str>) -> Result<(), ApiError> {
    let Some(url) = raw else { return Ok(()) };
    let parsed = url::Url::parse(url)
        .map_err(|_| ApiError::MalformedRequest(format!("callback_url '{url}' is not a valid URL")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ApiError::MalformedRequest(format!("callback_url '{url}' must be an absolute http or https URL")));
    }
    if parsed.host().is_none() {
        return Err(ApiError::MalformedRequest(format!("callback_url '{url}' must be an absolute http or https URL")));
    }
    Ok(())
}

/// POST /v1/tasks (§4.1). Checks run in the exact order the spec fixes:
/// auth (middleware, already passed), rate limit, idempotency lookup,
/// model validity, task-id assignment, enqueue, idempotency store.
pub async fn submit_task(
    State(state): State<AppState>,
    Extension(api_key): Extension<ApiKey>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Response> {
    if !state.rate_limiter.check(&api_key.0) {
        state.metrics.record_rate_limit_exceeded(&redact(&api_key.0));
        return Err(ApiError::RateLimited { limit: state.config.rate_limit_per_minute });
    }

    validate_client_request_id(request.client_request_id.as_deref())?;
    validate_callback_url(request.callback_url.as_deref())?;

    if let Some(client_request_id) = &request.client_request_id {
        if let Some(existing_task_id) = state.idempotency.get_task_id(client_request_id) {
            info!(task_id = %existing_task_id, "Idempotent resubmit, returning existing task");
            return Ok((
                axum::http::StatusCode::ACCEPTED,
                Json(SubmitResponse { task_id: existing_task_id, status: "PENDING" }),
            )
                .into_response());
        }
    }

    let available = state.registry.list().await;
    if !available.iter().any(|name| name == &request.model) {
        return Err(ApiError::UnknownModel { requested: request.model.clone(), available });
    }

    let priority = parse_priority(request.priority.as_deref())?;
    let task_id = Uuid::new_v4();

    let job = JobEnvelope {
        task_id,
        model_name: request.model.clone(),
        input: request.input,
        callback_url: request.callback_url,
        priority,
    };

    state.broker.publish(job).await.map_err(|err| {
        warn!(?err, "Broker publish failed");
        ApiError::BrokerUnavailable(err.to_string())
    })?;

    if let Some(client_request_id) = &request.client_request_id {
        state.idempotency.set_task_id(client_request_id.clone(), task_id);
    }

    state.metrics.record_task_submitted(&request.model, priority_label(priority));
    info!(%task_id, model = %request.model, priority = priority_label(priority), "Task submitted");

    Ok((axum::http::StatusCode::ACCEPTED, Json(SubmitResponse { task_id, status: "PENDING" })).into_response())
}

/// GET /v1/tasks/{task_id} (§4.1). A read-through of the broker's result
/// store; this endpoint never blocks waiting for completion.
pub async fn get_task_status(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> ApiResult<Json<StatusResponse>> {
    let broker_state = state.broker.get_result(task_id).await;

    let response = match broker_state {
        BrokerState::Pending => StatusResponse { task_id, status: "PENDING".into(), timing: None, result: None, error: None },
        BrokerState::Started => StatusResponse { task_id, status: "STARTED".into(), timing: None, result: None, error: None },
        BrokerState::Retry { error } => {
            StatusResponse { task_id, status: "RETRY".into(), timing: None, result: None, error: Some(error) }
        }
        BrokerState::Success(envelope) => StatusResponse {
            task_id,
            status: "SUCCESS".into(),
            timing: envelope.timing,
            result: envelope.result,
            error: None,
        },
        BrokerState::Failure { error } => {
            StatusResponse { task_id, status: "FAILURE".into(), timing: None, result: None, error: Some(error) }
        }
    };

    state.metrics.record_status_checked(&response.status);
    Ok(Json(response))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(?err, "Failed to render metrics");
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

