//! API handlers grouped by resource.

mod compile;
mod jobs;
mod preview;

pub use compile::*;
pub use jobs::*;
pub use preview::*;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::application::service::PdfPayload;

use super::error::ApiError;

/// Unknown and malformed job ids are indistinguishable to callers.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found("Job not found"))
}

fn pdf_response(payload: PdfPayload, disposition: &'static str, cache_control: &'static str) -> Response {
    let mut response = (StatusCode::OK, Body::from(payload.bytes)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(disposition));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    response
}
