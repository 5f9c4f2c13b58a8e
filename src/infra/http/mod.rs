pub mod api;
mod health;
mod middleware;

pub use api::{ApiState, build_api_router};

use axum::{Router, extract::DefaultBodyLimit, middleware as axum_middleware, routing::get};

use self::middleware::{log_responses, set_request_context};

/// Headroom for the JSON envelope and options.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Full HTTP surface: the versioned API plus the health probe.
pub fn build_router(state: ApiState) -> Router {
    // Source and bibliography may each reach the limit, and escaping can double them.
    let body_limit = state
        .service
        .limits()
        .max_source_bytes
        .saturating_mul(4)
        .saturating_add(BODY_OVERHEAD_BYTES);

    let health = Router::new()
        .route("/_health", get(health::health))
        .with_state(state.clone());

    build_api_router(state)
        .merge(health)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
