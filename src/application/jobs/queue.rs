use async_trait::async_trait;
use thiserror::Error;

use crate::application::jobs::CompileJobPayload;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl QueueError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Dispatches compile jobs to a bounded pool of workers.
#[async_trait]
pub trait CompileQueue: Send + Sync {
    /// Short backend name reported by the health endpoint.
    fn backend(&self) -> &'static str;

    async fn enqueue(&self, payload: CompileJobPayload) -> Result<(), QueueError>;

    /// Jobs accepted but not yet picked up by a worker.
    async fn depth(&self) -> Result<u64, QueueError>;
}
