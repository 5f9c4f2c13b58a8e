use std::{path::PathBuf, sync::Arc};

use apalis::prelude::Error as ApalisError;
use tokio::sync::Semaphore;

use crate::{
    application::{
        cache::ResultCache, compile::CompileEngine, jobs::InFlightCompilations,
        remote::RemoteCompiler, repos::JobRepository,
    },
    infra::artifacts::ArtifactStorage,
};

/// Shared context passed to compile workers and to the inline fallback path.
#[derive(Clone)]
pub struct CompileWorkerContext {
    pub jobs: Arc<dyn JobRepository>,
    pub engine: Arc<CompileEngine>,
    pub artifacts: Arc<ArtifactStorage>,
    pub cache: Arc<ResultCache>,
    pub inflight: InFlightCompilations,
    pub remote: Option<Arc<dyn RemoteCompiler>>,
    pub scratch_dir: PathBuf,
    /// One permit per worker slot; every running job holds one, whichever path started it.
    pub worker_permits: Arc<Semaphore>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
