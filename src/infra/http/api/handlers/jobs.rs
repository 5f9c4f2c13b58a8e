use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use texpress_api_types::JobLogsResponse;

use super::{parse_job_id, pdf_response};
use crate::infra::http::api::{error::ApiError, models, state::ApiState};

pub async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&id)?;
    let job = state.service.status(job_id).await?;
    Ok(Json(models::job_status(job)))
}

pub async fn job_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&id)?;
    let logs = state.service.logs(job_id).await?;
    Ok(Json(JobLogsResponse {
        id: job_id.to_string(),
        logs,
    }))
}

pub async fn download_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let payload = state.service.download(job_id).await?;
    Ok(pdf_response(
        payload,
        "attachment; filename=\"document.pdf\"",
        "no-store",
    ))
}
