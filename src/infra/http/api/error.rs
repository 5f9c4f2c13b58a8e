use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use texpress_api_types::{ErrorBody, ErrorDetail};

use crate::application::error::ErrorReport;
use crate::application::service::ServiceError;

/// Lines of compiler output returned with a failed inline compilation.
const LOG_EXCERPT_LINES: usize = 40;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const VALIDATION: &str = "validation_error";
    pub const COMPILATION: &str = "compilation_failed";
    pub const NOT_READY: &str = "not_ready";
    pub const NOT_FOUND: &str = "not_found";
    pub const FORBIDDEN: &str = "forbidden";
    pub const UNAVAILABLE: &str = "service_unavailable";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    logs: Vec<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            logs: Vec::new(),
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn with_logs(mut self, logs: Vec<String>) -> Self {
        let skip = logs.len().saturating_sub(LOG_EXCERPT_LINES);
        self.logs = logs.into_iter().skip(skip).collect();
        self
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let hint = Some(err.to_string());
        match err {
            ServiceError::Validation(_) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::VALIDATION,
                "Invalid compilation request",
                hint,
            ),
            ServiceError::Compilation { logs, .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                codes::COMPILATION,
                "LaTeX compilation failed",
                hint,
            )
            .with_logs(logs),
            ServiceError::NotReady { .. } => Self::new(
                StatusCode::CONFLICT,
                codes::NOT_READY,
                "PDF is not available yet",
                hint,
            ),
            ServiceError::JobNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, "Job not found", hint)
            }
            ServiceError::ArtifactNotFound => {
                Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, "PDF not found", hint)
            }
            ServiceError::Forbidden => Self::new(
                StatusCode::FORBIDDEN,
                codes::FORBIDDEN,
                "A valid preview token is required",
                None,
            ),
            ServiceError::Infrastructure(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::UNAVAILABLE,
                "Compilation backend unavailable",
                hint,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
                logs: self.logs,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}
