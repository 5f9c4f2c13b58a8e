use axum::{
    extract::{Path, Query, State},
    response::Response,
};

use super::pdf_response;
use crate::infra::http::api::{error::ApiError, models::PreviewQuery, state::ApiState};

pub async fn preview_pdf(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, ApiError> {
    let payload = state
        .service
        .preview(&filename, query.token.as_deref())
        .await?;
    Ok(pdf_response(payload, "inline", "public, max-age=300"))
}
