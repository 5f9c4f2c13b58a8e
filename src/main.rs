use std::{
    future::IntoFuture,
    num::NonZeroUsize,
    path::Path,
    process,
    sync::Arc,
    time::Duration,
};

use sqlx::postgres::PgPoolOptions;
use texpress::{
    application::{
        cache::{ResultCache, SourceKey},
        compile::CompileEngine,
        error::AppError,
        jobs::{
            CompileJobPayload, CompileQueue, CompileWorkerContext, InFlightCompilations,
            run_compile_job,
        },
        remote::RemoteCompiler,
        repos::JobRepository,
        service::{CompileService, ServiceError, ServiceSettings, prepare},
        sweep::RetentionSweeper,
    },
    config,
    domain::{
        entities::{CompilationRequest, CompileOptions, Job},
        types::{Engine, JobOrigin, JobStatus},
    },
    infra::{
        artifacts::ArtifactStorage,
        error::InfraError,
        http::{self, ApiState},
        memory::InMemoryJobRepository,
        process::ProcessRunner,
        queue::{LocalQueue, PostgresQueue, spawn_compile_monitor},
        remote::HttpRemoteCompiler,
        telemetry,
    },
};
use time::OffsetDateTime;
use tokio::{
    sync::{Notify, Semaphore},
    task::JoinHandle,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Compile(args) => run_compile(settings, args).await,
    }
}

/// Pieces shared by the HTTP service and the one-shot compile command.
struct Runtime {
    context: CompileWorkerContext,
    artifacts: Arc<ArtifactStorage>,
}

fn build_runtime(settings: &config::Settings, artifact_dir: &Path) -> Result<Runtime, AppError> {
    std::fs::create_dir_all(&settings.compile.scratch_dir).map_err(InfraError::from)?;
    let artifacts =
        Arc::new(ArtifactStorage::new(artifact_dir.to_path_buf()).map_err(InfraError::from)?);

    let remote: Option<Arc<dyn RemoteCompiler>> = if settings.remote.enabled {
        let compiler =
            HttpRemoteCompiler::new(settings.remote.endpoints.clone(), settings.remote.timeout)?;
        Some(Arc::new(compiler))
    } else {
        None
    };

    let jobs: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let context = CompileWorkerContext {
        jobs,
        engine: Arc::new(CompileEngine::new(
            Arc::new(ProcessRunner::new()),
            settings.compile.bin_dir.clone(),
        )),
        artifacts: Arc::clone(&artifacts),
        cache: Arc::new(ResultCache::new(
            settings.cache.max_entries.get(),
            settings.cache.ttl,
        )),
        inflight: InFlightCompilations::new(),
        remote,
        scratch_dir: settings.compile.scratch_dir.clone(),
        worker_permits: Arc::new(Semaphore::new(worker_concurrency(settings).get())),
    };

    Ok(Runtime { context, artifacts })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings, &settings.artifacts.directory)?;
    let concurrency = worker_concurrency(&settings);

    let mut background: Vec<JoinHandle<()>> = Vec::new();
    let mut local_queue: Option<Arc<LocalQueue>> = None;
    let mut broker_down: Option<String> = None;
    let queue: Arc<dyn CompileQueue> = match settings.database.url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections.get())
                .acquire_timeout(DB_ACQUIRE_TIMEOUT)
                .connect_lazy(url)
                .map_err(|err| InfraError::broker(err.to_string()))?;
            let queue = PostgresQueue::new(pool.clone());
            match queue.setup().await {
                Ok(()) => {
                    background.push(spawn_compile_monitor(
                        pool,
                        runtime.context.clone(),
                        concurrency,
                    ));
                }
                Err(err) => {
                    warn!(
                        target = "texpress::serve",
                        error = %err,
                        "Job broker unreachable at startup; submissions will compile inline"
                    );
                    broker_down = Some(err.to_string());
                }
            }
            Arc::new(queue) as Arc<dyn CompileQueue>
        }
        None => {
            let queue = Arc::new(LocalQueue::start(runtime.context.clone(), concurrency));
            local_queue = Some(Arc::clone(&queue));
            queue as Arc<dyn CompileQueue>
        }
    };

    let service = Arc::new(CompileService::new(
        runtime.context.clone(),
        Arc::clone(&queue),
        ServiceSettings {
            limits: settings.compile.limits(),
            artifact_retention: settings.artifacts.retention,
            delete_after_download: settings.artifacts.delete_after_download,
        },
    ));
    // No monitor is running, so nothing would drain the broker if it came back.
    if let Some(reason) = broker_down {
        service.activate_fallback(&reason);
    }

    let sweeper = Arc::new(RetentionSweeper {
        jobs: Arc::clone(&runtime.context.jobs),
        artifacts: Arc::clone(&runtime.artifacts),
        inflight: runtime.context.inflight.clone(),
        scratch_dir: settings.compile.scratch_dir.clone(),
        artifact_retention: settings.artifacts.retention,
        job_max_age: settings.jobs.max_age,
        // Live workspaces are never older than the longest permitted compile.
        workspace_max_age: Duration::from_millis(settings.compile.max_timeout_ms) * 2,
    });
    background.push(sweeper.spawn(settings.artifacts.sweep_interval));

    let router = http::build_router(ApiState::new(service));
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "texpress::serve",
        addr = %settings.server.addr,
        backend = queue.backend(),
        workers = concurrency.get(),
        remote = settings.remote.enabled,
        "texpress listening"
    );

    let shutdown = Arc::new(Notify::new());
    let signal = {
        let shutdown = Arc::clone(&shutdown);
        async move {
            shutdown_signal().await;
            shutdown.notify_one();
        }
    };

    let mut server = tokio::spawn(
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(signal)
            .into_future(),
    );

    let outcome = tokio::select! {
        result = &mut server => result,
        _ = shutdown.notified() => {
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        target = "texpress::serve",
                        grace_seconds = settings.server.graceful_shutdown.as_secs(),
                        "Graceful shutdown timed out; dropping open connections"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    for handle in background {
        handle.abort();
    }
    if let Some(queue) = local_queue {
        queue.shutdown();
    }

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_compile(
    settings: config::Settings,
    args: config::CompileArgs,
) -> Result<(), AppError> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(InfraError::from)?;
    let bibliography = match args.bibliography.as_ref() {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .map_err(InfraError::from)?,
        ),
        None => None,
    };
    let engine = match args.engine.as_deref() {
        Some(raw) => raw.parse::<Engine>()?,
        None => Engine::default(),
    };

    // The PDF goes straight to --output; nothing is published.
    let staging = tempfile::TempDir::new().map_err(InfraError::from)?;
    let runtime = build_runtime(&settings, staging.path())?;

    let request = prepare(
        CompilationRequest {
            source,
            engine,
            bibliography,
            use_biber: args.biber,
            options: CompileOptions {
                timeout_ms: args.timeout_ms.unwrap_or(0),
                passes: args.passes.unwrap_or(0),
                paper_size: None,
                margins: None,
            },
        },
        &settings.compile.limits(),
    )?;

    let job_id = Uuid::new_v4();
    let key = SourceKey::of(&request);
    runtime
        .context
        .jobs
        .set(Job::new(
            job_id,
            key.raw(),
            JobOrigin::Fallback,
            OffsetDateTime::now_utc(),
        ))
        .await?;

    let job = run_compile_job(
        &runtime.context,
        CompileJobPayload {
            job_id,
            cache_key: key.raw(),
            request,
        },
    )
    .await
    .map_err(ServiceError::from)?;

    match (job.status, job.artifact.as_ref()) {
        (JobStatus::Completed, Some(artifact)) => {
            tokio::fs::copy(&artifact.path, &args.output)
                .await
                .map_err(InfraError::from)?;
            info!(
                target = "texpress::compile",
                input = %args.file.display(),
                output = %args.output.display(),
                engine = engine.as_str(),
                remote = artifact.remote,
                "PDF written"
            );
            Ok(())
        }
        _ => {
            for line in &job.logs {
                eprintln!("{line}");
            }
            Err(ServiceError::Compilation {
                job_id,
                message: job
                    .error
                    .unwrap_or_else(|| "compilation did not complete".to_owned()),
                logs: job.logs,
            }
            .into())
        }
    }
}

fn worker_concurrency(settings: &config::Settings) -> NonZeroUsize {
    usize::try_from(settings.jobs.worker_concurrency.get())
        .ok()
        .and_then(NonZeroUsize::new)
        .unwrap_or(NonZeroUsize::MIN)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "texpress::serve", "Shutdown signal received");
}
