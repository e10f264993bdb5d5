use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    api::models::health::{HealthResponse, HealthStatus},
    db,
};

/// Liveness and database reachability
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service and database are up", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = db::ping(&state.db).await;
    if database {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: HealthStatus::Ok,
                database,
            }),
        )
    } else {
        tracing::warn!("Health check: database unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: HealthStatus::Degraded,
                database,
            }),
        )
    }
}
