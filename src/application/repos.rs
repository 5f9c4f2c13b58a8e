//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{entities::Job, error::DomainError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("job `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Storage for job records. The default deployment keeps them in memory.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Job>, RepoError>;

    async fn set(&self, job: Job) -> Result<(), RepoError>;

    /// Apply `mutate` to the stored job atomically and return the updated record.
    async fn update(
        &self,
        id: Uuid,
        mutate: &(dyn for<'j> Fn(&'j mut Job) -> Result<(), DomainError> + Send + Sync),
    ) -> Result<Job, RepoError>;

    /// Jobs whose `updated_at` is older than `cutoff`.
    async fn list_expired(&self, cutoff: OffsetDateTime) -> Result<Vec<Job>, RepoError>;

    async fn remove(&self, id: Uuid) -> Result<Option<Job>, RepoError>;

    async fn append_logs(&self, id: Uuid, lines: Vec<String>) -> Result<(), RepoError> {
        if lines.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        self.update(id, &move |job: &mut Job| {
            job.append_logs(lines.iter().cloned(), now);
            Ok(())
        })
        .await
        .map(|_| ())
    }
}
