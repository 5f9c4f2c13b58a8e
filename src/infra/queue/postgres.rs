use std::num::NonZeroUsize;

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::jobs::{
    COMPILE_JOB_TYPE, CompileJobPayload, CompileQueue, CompileWorkerContext, QueueError,
    process_compile_job,
};

/// Failed compiles are recorded on the job itself, so the broker never retries.
const MAX_ATTEMPTS: i32 = 1;
const DEFAULT_PRIORITY: i32 = 0;

/// Enqueues compile jobs into the apalis tables of a Postgres database.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
}

impl PostgresQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the apalis schema.
    pub async fn setup(&self) -> Result<(), QueueError> {
        PostgresStorage::setup(&self.pool)
            .await
            .map_err(QueueError::unavailable)
    }
}

#[async_trait]
impl CompileQueue for PostgresQueue {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, payload: CompileJobPayload) -> Result<(), QueueError> {
        let job_id = payload.job_id;
        let body = serde_json::to_value(&payload)?;

        let apalis_id: String = sqlx::query_scalar(
            "SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id",
        )
        .bind(COMPILE_JOB_TYPE)
        .bind(body)
        .bind("Pending")
        .bind(OffsetDateTime::now_utc())
        .bind(MAX_ATTEMPTS)
        .bind(DEFAULT_PRIORITY)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::unavailable)?;

        info!(
            target = "infra::queue::postgres",
            op = "queue::enqueue",
            job_id = %job_id,
            apalis_id = %apalis_id,
            "Compile job enqueued"
        );
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM apalis.jobs WHERE job_type = $1 AND status = 'Pending'",
        )
        .bind(COMPILE_JOB_TYPE)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::unavailable)?;

        Ok(u64::try_from(pending).unwrap_or_default())
    }
}

/// Start the apalis worker pool that drains the compile job table.
pub fn spawn_compile_monitor(
    pool: PgPool,
    context: CompileWorkerContext,
    concurrency: NonZeroUsize,
) -> JoinHandle<()> {
    let storage: PostgresStorage<CompileJobPayload> =
        PostgresStorage::new_with_config(pool, ApalisSqlConfig::new(COMPILE_JOB_TYPE));

    let worker = WorkerBuilder::new("compile-worker")
        .concurrency(concurrency.get())
        .data(context)
        .backend(storage)
        .build_fn(process_compile_job);

    let monitor = Monitor::new().register(worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}
