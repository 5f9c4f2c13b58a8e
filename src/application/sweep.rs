//! Periodic eviction of aged artifacts, job records and abandoned workspaces.

use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{fs, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    application::{
        jobs::InFlightCompilations,
        repos::{JobRepository, RepoError},
    },
    infra::artifacts::ArtifactStorage,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub artifacts_removed: usize,
    pub jobs_removed: usize,
    pub workspaces_removed: usize,
}

pub struct RetentionSweeper {
    pub jobs: Arc<dyn JobRepository>,
    pub artifacts: Arc<ArtifactStorage>,
    pub inflight: InFlightCompilations,
    pub scratch_dir: PathBuf,
    pub artifact_retention: Duration,
    pub job_max_age: Duration,
    /// Scratch directories older than this are leftovers from crashed jobs.
    pub workspace_max_age: Duration,
}

impl RetentionSweeper {
    pub async fn run_once(&self) -> Result<SweepReport, RepoError> {
        let artifacts_removed = match self.artifacts.sweep(self.artifact_retention).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    target = "application::sweep",
                    op = "sweep::artifacts",
                    error = %err,
                    "Artifact sweep failed"
                );
                0
            }
        };

        let cutoff = OffsetDateTime::now_utc() - self.job_max_age;
        let expired = self.jobs.list_expired(cutoff).await?;
        let mut jobs_removed = 0;
        for job in expired {
            if !job.status.is_terminal() {
                continue;
            }
            if let Some(artifact) = job.artifact.as_ref()
                && let Err(err) = self.artifacts.delete(&artifact.filename).await
            {
                warn!(
                    target = "application::sweep",
                    op = "sweep::jobs",
                    job_id = %job.id,
                    error = %err,
                    "Failed to delete artifact of expired job"
                );
            }
            if self.jobs.remove(job.id).await?.is_some() {
                jobs_removed += 1;
            }
        }

        for (key, job_id) in self.inflight.claims() {
            let stale = self
                .jobs
                .get(job_id)
                .await?
                .is_none_or(|job| job.status.is_terminal());
            if stale {
                self.inflight.release(key, job_id);
            }
        }

        let workspaces_removed = self.sweep_workspaces().await;

        let report = SweepReport {
            artifacts_removed,
            jobs_removed,
            workspaces_removed,
        };
        info!(
            target = "application::sweep",
            op = "sweep::run",
            artifacts_removed,
            jobs_removed,
            workspaces_removed,
            "Retention sweep finished"
        );
        Ok(report)
    }

    async fn sweep_workspaces(&self) -> usize {
        let mut entries = match fs::read_dir(&self.scratch_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(
                    target = "application::sweep",
                    op = "sweep::workspaces",
                    error = %err,
                    "Failed to list scratch directory"
                );
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with("job_"));
            if !is_workspace {
                continue;
            }
            let age = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            if age.is_some_and(|age| age >= self.workspace_max_age)
                && fs::remove_dir_all(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Run [`Self::run_once`] every `interval`, skipping the immediate first tick.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    warn!(
                        target = "application::sweep",
                        op = "sweep::run",
                        error = %err,
                        "Retention sweep failed"
                    );
                }
            }
        })
    }
}
