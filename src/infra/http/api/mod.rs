pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};

pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/compile", post(handlers::submit_compile))
        .route("/api/v1/jobs/{id}", get(handlers::job_status))
        .route("/api/v1/jobs/{id}/logs", get(handlers::job_logs))
        .route("/api/v1/jobs/{id}/download", get(handlers::download_job))
        .route("/api/v1/preview/{filename}", get(handlers::preview_pdf))
        .with_state(state)
}
