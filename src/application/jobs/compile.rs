use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::{Data, Error as ApalisError};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    application::{
        cache::SourceKey,
        compile::{CompileError, CompileLog, Workspace},
        jobs::{CompileWorkerContext, job_failed},
        links,
        repos::{JobRepository, RepoError},
    },
    domain::{
        entities::{Artifact, CompilationRequest, Job},
        types::JobStatus,
    },
};

pub const COMPILE_JOB_TYPE: &str = "texpress::compile";

const METRIC_JOBS_COMPLETED: &str = "texpress_jobs_completed_total";
const METRIC_JOBS_FAILED: &str = "texpress_jobs_failed_total";
const METRIC_COMPILE_MS: &str = "texpress_compile_ms";

/// Queue payload. `request` already holds the sanitized, layout-adjusted document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileJobPayload {
    pub job_id: Uuid,
    pub cache_key: u64,
    pub request: CompilationRequest,
}

#[derive(Debug, Error)]
pub enum CompileJobError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// apalis entry point for queued compile jobs.
pub async fn process_compile_job(
    payload: CompileJobPayload,
    context: Data<CompileWorkerContext>,
) -> Result<(), ApalisError> {
    run_compile_job(&context, payload)
        .await
        .map(|_| ())
        .map_err(job_failed)
}

/// Run one job end to end and return its final record.
///
/// Waits for a worker slot first, so queued and inline jobs share one bound.
/// Compilation failures are recorded on the job; only repository failures
/// surface as errors. Jobs that already left `pending` are returned untouched.
pub async fn run_compile_job(
    context: &CompileWorkerContext,
    payload: CompileJobPayload,
) -> Result<Job, CompileJobError> {
    let CompileJobPayload {
        job_id,
        cache_key,
        request,
    } = payload;
    let key = SourceKey::from_raw(cache_key);
    let _claim = context.inflight.guard(key, job_id);
    let _slot = context
        .worker_permits
        .acquire()
        .await
        .map_err(|_| CompileJobError::PoolClosed)?;

    let current = context
        .jobs
        .get(job_id)
        .await?
        .ok_or(RepoError::NotFound(job_id))?;
    if current.status != JobStatus::Pending {
        return Ok(current);
    }

    context
        .jobs
        .update(job_id, &|job: &mut Job| job.start(OffsetDateTime::now_utc()))
        .await?;

    let started_at = Instant::now();
    let log = JobLog {
        jobs: Arc::clone(&context.jobs),
        job_id,
    };
    let outcome = compile_and_publish(context, job_id, &request, &log).await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    histogram!(METRIC_COMPILE_MS).record(elapsed_ms as f64);

    match outcome {
        Ok(artifact) => {
            let preview = links::preview_url(&artifact.filename, &artifact.preview_token);
            let job = context
                .jobs
                .update(job_id, &move |job: &mut Job| {
                    job.complete(artifact.clone(), OffsetDateTime::now_utc())
                })
                .await?;
            context.cache.set(key, preview);
            counter!(METRIC_JOBS_COMPLETED).increment(1);
            info!(
                target = "application::jobs::compile",
                op = "jobs::compile",
                result = "completed",
                job_id = %job_id,
                engine = request.engine.as_str(),
                elapsed_ms,
                "Compile job completed"
            );
            Ok(job)
        }
        Err(err) => {
            let message = err.to_string();
            log.append(vec![format!("error: {message}")]).await;
            let job = context
                .jobs
                .update(job_id, &|job: &mut Job| {
                    job.fail(message.clone(), OffsetDateTime::now_utc())
                })
                .await?;
            counter!(METRIC_JOBS_FAILED).increment(1);
            warn!(
                target = "application::jobs::compile",
                op = "jobs::compile",
                result = "failed",
                job_id = %job_id,
                engine = request.engine.as_str(),
                elapsed_ms,
                error = %err,
                "Compile job failed"
            );
            Ok(job)
        }
    }
}

async fn compile_and_publish(
    context: &CompileWorkerContext,
    job_id: Uuid,
    request: &CompilationRequest,
    log: &JobLog,
) -> Result<Artifact, CompileError> {
    let deadline = Instant::now() + Duration::from_millis(request.options.timeout_ms);
    let workspace = Workspace::create(
        &context.scratch_dir,
        job_id,
        &request.source,
        request.bibliography.as_deref(),
    )
    .await?;

    let result = produce_pdf(context, &workspace, job_id, request, deadline, log).await;
    workspace.remove().await;
    let (filename, path, remote) = result?;

    Ok(Artifact {
        filename,
        path,
        preview_token: generate_preview_token(),
        created_at: OffsetDateTime::now_utc(),
        remote,
    })
}

async fn produce_pdf(
    context: &CompileWorkerContext,
    workspace: &Workspace,
    job_id: Uuid,
    request: &CompilationRequest,
    deadline: Instant,
    log: &JobLog,
) -> Result<(String, std::path::PathBuf, bool), CompileError> {
    let local = context
        .engine
        .toolchain_available(request.engine, &context.scratch_dir)
        .await;

    if local {
        let pdf = context.engine.run(workspace, request, deadline, log).await?;
        let (filename, path) = context
            .artifacts
            .publish(job_id, &pdf)
            .await
            .map_err(publish_error)?;
        return Ok((filename, path, false));
    }

    let Some(remote) = context.remote.as_ref() else {
        return Err(CompileError::ToolchainMissing {
            program: request.engine.as_str().to_owned(),
        });
    };

    log.append(vec![format!(
        "{} is not installed locally; delegating to a remote compiler",
        request.engine
    )])
    .await;
    let bytes = remote.compile(&request.source, request.engine).await?;
    let (filename, path) = context
        .artifacts
        .publish_bytes(job_id, bytes)
        .await
        .map_err(publish_error)?;
    Ok((filename, path, true))
}

fn publish_error(err: crate::infra::artifacts::ArtifactStorageError) -> CompileError {
    use crate::infra::artifacts::ArtifactStorageError;

    match err {
        ArtifactStorageError::Io(err) => CompileError::Workspace(err),
        ArtifactStorageError::NotPdf => CompileError::InvalidPdf,
        ArtifactStorageError::NotFound => CompileError::MissingPdf,
        ArtifactStorageError::InvalidName => CompileError::Workspace(std::io::Error::other(
            "generated artifact name was rejected",
        )),
    }
}

fn generate_preview_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Appends pipeline output to the job record.
struct JobLog {
    jobs: Arc<dyn JobRepository>,
    job_id: Uuid,
}

#[async_trait]
impl CompileLog for JobLog {
    async fn append(&self, lines: Vec<String>) {
        if let Err(err) = self.jobs.append_logs(self.job_id, lines).await {
            warn!(
                target = "application::jobs::compile",
                op = "jobs::append_logs",
                job_id = %self.job_id,
                error = %err,
                "Failed to append job logs"
            );
        }
    }
}
