//! Conversions between wire types and domain types.

use serde::Deserialize;
use texpress_api_types::{
    CompileRequest, CompletedResponse, JobStatusResponse, MarginsBody, QueuedResponse,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::{
    application::{links, service::ServiceError},
    domain::{
        entities::{CompilationRequest, CompileOptions, Job, Margins},
        types::{Engine, JobStatus},
    },
};

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub token: Option<String>,
}

impl From<MarginsBody> for Margins {
    fn from(body: MarginsBody) -> Self {
        Self {
            top: body.top,
            right: body.right,
            bottom: body.bottom,
            left: body.left,
        }
    }
}

/// Build a domain request; zero or missing option values fall back to configured defaults.
pub fn compilation_request(body: CompileRequest) -> Result<CompilationRequest, ServiceError> {
    let engine = match body.engine.as_deref() {
        None => Engine::default(),
        Some(raw) if raw.trim().is_empty() => Engine::default(),
        Some(raw) => raw
            .parse::<Engine>()
            .map_err(|err| ServiceError::Validation(err.to_string()))?,
    };

    let options = body.options.unwrap_or_default();
    Ok(CompilationRequest {
        source: body.source,
        engine,
        bibliography: body.bibliography,
        use_biber: body.use_biber,
        options: CompileOptions {
            timeout_ms: options.timeout_ms.unwrap_or(0),
            passes: options.passes.unwrap_or(0),
            paper_size: options.paper_size.filter(|paper| !paper.trim().is_empty()),
            margins: options.margins.map(Margins::from),
        },
    })
}

pub fn queued(job_id: Uuid) -> QueuedResponse {
    QueuedResponse {
        job_id: job_id.to_string(),
        status_url: links::status_url(job_id),
        status: JobStatus::Pending.as_str().to_owned(),
    }
}

pub fn cached(preview_url: String) -> CompletedResponse {
    let pdf_filename = links::filename_from_preview_url(&preview_url).map(str::to_owned);
    CompletedResponse {
        job_id: None,
        preview_url,
        pdf_filename,
        source: "cache".to_owned(),
    }
}

pub fn compiled(job: &Job, preview_url: String) -> CompletedResponse {
    let remote = job.artifact.as_ref().is_some_and(|artifact| artifact.remote);
    CompletedResponse {
        job_id: Some(job.id.to_string()),
        preview_url,
        pdf_filename: job.artifact.as_ref().map(|artifact| artifact.filename.clone()),
        source: if remote { "remote" } else { "fallback" }.to_owned(),
    }
}

pub fn job_status(job: Job) -> JobStatusResponse {
    let completed = job.status == JobStatus::Completed;
    let (pdf_filename, preview_url) = match job.artifact.as_ref().filter(|_| completed) {
        Some(artifact) => (
            Some(artifact.filename.clone()),
            Some(links::preview_url(&artifact.filename, &artifact.preview_token)),
        ),
        None => (None, None),
    };

    JobStatusResponse {
        id: job.id.to_string(),
        status: job.status.as_str().to_owned(),
        logs: job.logs,
        error: job.error,
        pdf_filename,
        preview_url,
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
    }
}

pub fn format_timestamp(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_default()
}
