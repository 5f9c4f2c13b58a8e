use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use texpress_api_types::CompileRequest;

use crate::application::service::SubmitOutcome;
use crate::infra::http::api::{error::ApiError, models, state::ApiState};

pub async fn submit_compile(
    State(state): State<ApiState>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload
        .map_err(|rejection| ApiError::bad_request("Invalid request body", Some(rejection.body_text())))?;
    let request = models::compilation_request(body)?;

    let response = match state.service.submit(request).await? {
        SubmitOutcome::Queued { job_id } | SubmitOutcome::Joined { job_id } => {
            (StatusCode::ACCEPTED, Json(models::queued(job_id))).into_response()
        }
        SubmitOutcome::Cached { preview_url } => {
            (StatusCode::OK, Json(models::cached(preview_url))).into_response()
        }
        SubmitOutcome::Compiled { job, preview_url } => {
            (StatusCode::OK, Json(models::compiled(&job, preview_url))).into_response()
        }
    };
    Ok(response)
}
