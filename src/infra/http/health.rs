use axum::{Json, extract::State, response::IntoResponse};
use texpress_api_types::HealthResponse;

use super::api::{ApiState, models::format_timestamp};

pub(super) async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.service.health().await;
    Json(HealthResponse {
        queue_depth: report.queue_depth,
        mode: if report.fallback { "fallback" } else { "queued" }.to_owned(),
        backend: report.backend.to_owned(),
        timestamp: format_timestamp(report.timestamp),
    })
}
