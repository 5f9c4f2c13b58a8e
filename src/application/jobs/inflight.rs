use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::application::cache::SourceKey;

/// Tracks which job is currently compiling each source key.
#[derive(Clone, Default)]
pub struct InFlightCompilations {
    jobs: Arc<DashMap<SourceKey, Uuid>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Acquired,
    /// Another job already compiles the same source.
    Joined(Uuid),
}

impl InFlightCompilations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: SourceKey, job_id: Uuid) -> Claim {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(job_id);
                Claim::Acquired
            }
            Entry::Occupied(occupied) => Claim::Joined(*occupied.get()),
        }
    }

    /// Release the claim on drop, but only while `job_id` still owns it.
    pub fn guard(&self, key: SourceKey, job_id: Uuid) -> InFlightGuard {
        InFlightGuard {
            key,
            job_id,
            jobs: Arc::clone(&self.jobs),
        }
    }

    pub fn release(&self, key: SourceKey, job_id: Uuid) {
        self.jobs.remove_if(&key, |_, owner| *owner == job_id);
    }

    pub fn claims(&self) -> Vec<(SourceKey, Uuid)> {
        self.jobs
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub struct InFlightGuard {
    key: SourceKey,
    job_id: Uuid,
    jobs: Arc<DashMap<SourceKey, Uuid>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let job_id = self.job_id;
        self.jobs.remove_if(&self.key, |_, owner| *owner == job_id);
    }
}
