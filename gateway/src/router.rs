use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{get_task_status, health, metrics_endpoint, submit_task};

/// Builds the gateway's route table (§4.1). `/health` and `/metrics` are
/// unauthenticated; `/v1/tasks*` sits behind [`auth_middleware`].
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let protected = Router::new()
        .route("/v1/tasks", post(submit_task))
        .route("/v1/tasks/:task_id", get(get_task_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
}
