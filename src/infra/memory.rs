//! In-process job repository.

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{JobRepository, RepoError},
    domain::{entities::Job, error::DomainError},
};

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Job>, RepoError> {
        Ok(self.jobs.get(&id).map(|job| job.clone()))
    }

    async fn set(&self, job: Job) -> Result<(), RepoError> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn update(
        &self,
        id: Uuid,
        mutate: &(dyn for<'j> Fn(&'j mut Job) -> Result<(), DomainError> + Send + Sync),
    ) -> Result<Job, RepoError> {
        let mut entry = self.jobs.get_mut(&id).ok_or(RepoError::NotFound(id))?;
        let mut candidate = entry.clone();
        mutate(&mut candidate)?;
        *entry = candidate.clone();
        Ok(candidate)
    }

    async fn list_expired(&self, cutoff: OffsetDateTime) -> Result<Vec<Job>, RepoError> {
        Ok(self
            .jobs
            .iter()
            .filter(|job| job.updated_at < cutoff)
            .map(|job| job.clone())
            .collect())
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Job>, RepoError> {
        Ok(self.jobs.remove(&id).map(|(_, job)| job))
    }
}
