//! Request-facing compilation service: submission, status, logs and artifact access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    application::{
        cache::SourceKey,
        jobs::{
            Claim, CompileJobError, CompileJobPayload, CompileQueue, CompileWorkerContext,
            run_compile_job,
        },
        links, preamble,
        repos::RepoError,
        sanitize::sanitize,
    },
    domain::{
        entities::{Artifact, CompilationRequest, Job, RequestLimits},
        error::DomainError,
        types::{JobOrigin, JobStatus},
    },
    infra::artifacts::ArtifactStorageError,
};

const METRIC_FALLBACK_ACTIVATIONS: &str = "texpress_fallback_activations_total";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub limits: RequestLimits,
    pub artifact_retention: Duration,
    pub delete_after_download: bool,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("compilation failed: {message}")]
    Compilation {
        job_id: Uuid,
        message: String,
        logs: Vec<String>,
    },
    #[error("job `{0}` not found")]
    JobNotFound(Uuid),
    #[error("job `{job_id}` is {status}; its PDF is not available")]
    NotReady { job_id: Uuid, status: JobStatus },
    #[error("artifact not found or expired")]
    ArtifactNotFound,
    #[error("preview token is missing or invalid")]
    Forbidden,
    #[error("compilation backend unavailable: {0}")]
    Infrastructure(String),
}

impl From<RepoError> for ServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(id) => Self::JobNotFound(id),
            other => Self::Infrastructure(other.to_string()),
        }
    }
}

impl From<CompileJobError> for ServiceError {
    fn from(err: CompileJobError) -> Self {
        match err {
            CompileJobError::Repo(err) => err.into(),
            other @ CompileJobError::PoolClosed => Self::Infrastructure(other.to_string()),
        }
    }
}

impl From<ArtifactStorageError> for ServiceError {
    fn from(err: ArtifactStorageError) -> Self {
        match err {
            ArtifactStorageError::Io(err) => Self::Infrastructure(err.to_string()),
            _ => Self::ArtifactNotFound,
        }
    }
}

/// How a submission was resolved.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Accepted for asynchronous compilation.
    Queued { job_id: Uuid },
    /// An identical source is already compiling; the caller should follow that job.
    Joined { job_id: Uuid },
    /// A previous compilation of the same source is still available.
    Cached { preview_url: String },
    /// Compiled inline because the queue is unavailable.
    Compiled { job: Job, preview_url: String },
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub queue_depth: u64,
    pub fallback: bool,
    pub backend: &'static str,
    pub timestamp: OffsetDateTime,
}

/// A PDF ready to be written to the client.
#[derive(Debug, Clone)]
pub struct PdfPayload {
    pub filename: String,
    pub bytes: Bytes,
}

pub struct CompileService {
    context: CompileWorkerContext,
    queue: Arc<dyn CompileQueue>,
    settings: ServiceSettings,
    fallback: AtomicBool,
}

impl CompileService {
    pub fn new(
        context: CompileWorkerContext,
        queue: Arc<dyn CompileQueue>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            context,
            queue,
            settings,
            fallback: AtomicBool::new(false),
        }
    }

    pub fn limits(&self) -> &RequestLimits {
        &self.settings.limits
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.load(Ordering::Acquire)
    }

    /// Validate, sanitize and dispatch a request.
    pub async fn submit(&self, request: CompilationRequest) -> Result<SubmitOutcome, ServiceError> {
        let request = prepare(request, &self.settings.limits)?;
        let key = SourceKey::of(&request);

        if let Some(preview_url) = self.cached_preview(key).await {
            debug!(
                target = "application::service",
                op = "service::submit",
                result = "cache_hit",
                key = %key,
                "Serving compiled PDF from cache"
            );
            return Ok(SubmitOutcome::Cached { preview_url });
        }

        let job_id = Uuid::new_v4();
        if let Some(existing) = self.claim(key, job_id).await? {
            return Ok(SubmitOutcome::Joined { job_id: existing });
        }

        let origin = if self.is_fallback() {
            JobOrigin::Fallback
        } else {
            JobOrigin::Queue
        };
        let job = Job::new(job_id, key.raw(), origin, OffsetDateTime::now_utc());
        if let Err(err) = self.context.jobs.set(job).await {
            self.context.inflight.release(key, job_id);
            return Err(err.into());
        }

        let payload = CompileJobPayload {
            job_id,
            cache_key: key.raw(),
            request,
        };

        if origin == JobOrigin::Queue {
            match self.queue.enqueue(payload.clone()).await {
                Ok(()) => {
                    info!(
                        target = "application::service",
                        op = "service::submit",
                        result = "queued",
                        job_id = %job_id,
                        backend = self.queue.backend(),
                        "Compile job queued"
                    );
                    return Ok(SubmitOutcome::Queued { job_id });
                }
                Err(err) => {
                    self.activate_fallback(&err.to_string());
                    self.context
                        .jobs
                        .update(job_id, &|job: &mut Job| {
                            job.origin = JobOrigin::Fallback;
                            Ok(())
                        })
                        .await?;
                }
            }
        }

        self.compile_inline(payload).await
    }

    async fn compile_inline(&self, payload: CompileJobPayload) -> Result<SubmitOutcome, ServiceError> {
        let job_id = payload.job_id;
        let job = run_compile_job(&self.context, payload).await?;
        match (job.status, job.artifact.as_ref()) {
            (JobStatus::Completed, Some(artifact)) => {
                let preview_url = links::preview_url(&artifact.filename, &artifact.preview_token);
                Ok(SubmitOutcome::Compiled { job, preview_url })
            }
            _ => Err(ServiceError::Compilation {
                job_id,
                message: job
                    .error
                    .clone()
                    .unwrap_or_else(|| "compilation did not complete".to_owned()),
                logs: job.logs,
            }),
        }
    }

    /// Returns the id of an in-flight job for `key`, or claims it for `job_id`.
    async fn claim(&self, key: SourceKey, job_id: Uuid) -> Result<Option<Uuid>, ServiceError> {
        for _ in 0..2 {
            match self.context.inflight.claim(key, job_id) {
                Claim::Acquired => return Ok(None),
                Claim::Joined(existing) => {
                    let active = self
                        .context
                        .jobs
                        .get(existing)
                        .await?
                        .is_some_and(|job| !job.status.is_terminal());
                    if active {
                        return Ok(Some(existing));
                    }
                    self.context.inflight.release(key, existing);
                }
            }
        }
        Ok(None)
    }

    /// The cached preview URL for `key`, if its job still owns a live artifact.
    /// Anything else evicts the entry and counts as a miss.
    async fn cached_preview(&self, key: SourceKey) -> Option<String> {
        let url = self.context.cache.get(key)?;
        if self.preview_is_live(&url).await {
            return Some(url);
        }
        debug!(
            target = "application::service",
            op = "service::cached_preview",
            key = %key,
            "Cached artifact is gone or expired; recompiling"
        );
        self.context.cache.remove(key);
        None
    }

    async fn preview_is_live(&self, url: &str) -> bool {
        let Some(filename) = links::filename_from_preview_url(url) else {
            return false;
        };
        let Some(job_id) = Artifact::job_id_from_filename(filename) else {
            return false;
        };
        let job = match self.context.jobs.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(err) => {
                warn!(
                    target = "application::service",
                    op = "service::cached_preview",
                    job_id = %job_id,
                    error = %err,
                    "Failed to load job behind cached preview"
                );
                return false;
            }
        };
        match job.artifact.as_ref() {
            Some(artifact) if artifact.filename == filename && !self.is_expired(artifact) => {
                self.context.artifacts.exists(filename).await
            }
            _ => false,
        }
    }

    /// Switch to inline compilation for the rest of the process lifetime.
    pub fn activate_fallback(&self, reason: &str) {
        if !self.fallback.swap(true, Ordering::AcqRel) {
            counter!(METRIC_FALLBACK_ACTIVATIONS).increment(1);
            warn!(
                target = "application::service",
                op = "service::fallback",
                backend = self.queue.backend(),
                reason,
                "Job queue unavailable; compiling requests inline until restart"
            );
        }
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Job, ServiceError> {
        self.context
            .jobs
            .get(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))
    }

    pub async fn logs(&self, job_id: Uuid) -> Result<Vec<String>, ServiceError> {
        Ok(self.status(job_id).await?.logs)
    }

    /// Read the job's PDF; only completed jobs have one.
    pub async fn download(&self, job_id: Uuid) -> Result<PdfPayload, ServiceError> {
        let job = self.status(job_id).await?;
        let artifact = match (job.status, job.artifact.as_ref()) {
            (JobStatus::Completed, Some(artifact)) => artifact,
            (JobStatus::Completed, None) => return Err(ServiceError::ArtifactNotFound),
            (status, _) => return Err(ServiceError::NotReady { job_id, status }),
        };
        if self.is_expired(artifact) {
            return Err(ServiceError::ArtifactNotFound);
        }

        let bytes = self.context.artifacts.read(&artifact.filename).await?;
        if self.settings.delete_after_download {
            self.context.cache.remove(SourceKey::from_raw(job.cache_key));
            if let Err(err) = self.context.artifacts.delete(&artifact.filename).await {
                warn!(
                    target = "application::service",
                    op = "service::download",
                    job_id = %job_id,
                    error = %err,
                    "Failed to delete downloaded artifact"
                );
            }
        }

        Ok(PdfPayload {
            filename: artifact.filename.clone(),
            bytes,
        })
    }

    /// Serve an artifact by name to a holder of its preview token.
    pub async fn preview(&self, filename: &str, token: Option<&str>) -> Result<PdfPayload, ServiceError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ServiceError::Forbidden)?;
        let filename = crate::infra::artifacts::sanitize_basename(filename)
            .ok_or(ServiceError::ArtifactNotFound)?;
        let job_id = Artifact::job_id_from_filename(filename).ok_or(ServiceError::ArtifactNotFound)?;

        let job = self
            .context
            .jobs
            .get(job_id)
            .await?
            .ok_or(ServiceError::ArtifactNotFound)?;
        let artifact = job
            .artifact
            .as_ref()
            .filter(|artifact| artifact.filename == filename)
            .ok_or(ServiceError::ArtifactNotFound)?;

        if !token_matches(&artifact.preview_token, token) {
            return Err(ServiceError::Forbidden);
        }
        if self.is_expired(artifact) {
            return Err(ServiceError::ArtifactNotFound);
        }

        let bytes = self.context.artifacts.read(filename).await?;
        Ok(PdfPayload {
            filename: filename.to_owned(),
            bytes,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let queue_depth = match self.queue.depth().await {
            Ok(depth) => depth,
            Err(err) => {
                warn!(
                    target = "application::service",
                    op = "service::health",
                    error = %err,
                    "Failed to read queue depth"
                );
                0
            }
        };
        metrics::gauge!("texpress_queue_depth").set(queue_depth as f64);

        HealthReport {
            queue_depth,
            fallback: self.is_fallback(),
            backend: self.queue.backend(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    fn is_expired(&self, artifact: &Artifact) -> bool {
        let age = OffsetDateTime::now_utc() - artifact.created_at;
        age > self.settings.artifact_retention
    }
}

/// Validation, sanitization and layout, in that order.
pub fn prepare(
    request: CompilationRequest,
    limits: &RequestLimits,
) -> Result<CompilationRequest, ServiceError> {
    let mut request = request.validated(limits).map_err(|err| match err {
        DomainError::Validation { message } => ServiceError::Validation(message),
        other => ServiceError::Validation(other.to_string()),
    })?;

    let sanitized = sanitize(&request.source);
    request.source = preamble::apply_layout(&sanitized, &request.options);
    request.bibliography = request.bibliography.as_deref().map(sanitize);
    Ok(request)
}

fn token_matches(expected: &str, presented: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    expected.as_slice().ct_eq(presented.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(token_matches("abc123", "abc123"));
        assert!(!token_matches("abc123", "abc124"));
        assert!(!token_matches("abc123", "abc"));
        assert!(!token_matches("abc123", ""));
    }
}
