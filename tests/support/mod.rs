//! Deterministic fakes for driving the compile service without a TeX installation.
#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use texpress::{
    application::{
        cache::ResultCache,
        compile::{CommandInvocation, CommandOutput, CommandRunner, CompileEngine, RunnerError},
        jobs::{
            CompileJobPayload, CompileQueue, CompileWorkerContext, InFlightCompilations,
            QueueError,
        },
        remote::{RemoteCompiler, RemoteError},
        repos::{JobRepository, RepoError},
        service::{CompileService, ServiceSettings},
    },
    domain::{
        entities::{CompilationRequest, CompileOptions, Job, RequestLimits},
        types::Engine,
    },
    infra::{artifacts::ArtifactStorage, memory::InMemoryJobRepository, queue::LocalQueue},
};

pub const PDF_BYTES: &[u8] = b"%PDF-1.5\n% fake output\n";
pub const RERUN_WARNING: &str =
    "LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right.";
/// Documents containing this marker make the fake engine exit non-zero.
pub const FAIL_MARKER: &str = "\\fakeerror";
/// Documents containing this marker finish successfully without writing a PDF.
pub const NO_PDF_MARKER: &str = "\\fakenopdf";

pub const ARTICLE: &str = "\\documentclass{article}\n\\begin{document}\nHello\n\\end{document}\n";
pub const CROSS_REF: &str = "\\documentclass{article}\n\\begin{document}\n\\section{A}\\label{a}\nSee \\ref{a}.\n\\end{document}\n";

/// Imitates pdflatex/xelatex/lualatex plus bibtex/biber inside the job workspace.
///
/// Engine passes write `document.pdf`; a document using `\ref` reports a rerun
/// warning until a previous pass has left `document.aux` behind.
#[derive(Default)]
pub struct FakeRunner {
    pub engine_runs: AtomicUsize,
    pub bibliography_runs: AtomicUsize,
    pub toolchain_missing: AtomicBool,
    pub bibliography_fails: AtomicBool,
    active_passes: AtomicUsize,
    max_active_passes: AtomicUsize,
    pass_delay: Mutex<Duration>,
    invocations: Mutex<Vec<CommandInvocation>>,
    sources: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_pass_delay(&self, delay: Duration) {
        *self.pass_delay.lock().expect("delay lock") = delay;
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    /// Document text as seen by each engine pass.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().expect("sources lock").clone()
    }

    pub fn engine_runs(&self) -> usize {
        self.engine_runs.load(Ordering::SeqCst)
    }

    /// Highest number of engine passes that were ever running at once.
    pub fn max_concurrent_passes(&self) -> usize {
        self.max_active_passes.load(Ordering::SeqCst)
    }

    fn output(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code: Some(exit_code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    async fn engine_pass(&self, invocation: &CommandInvocation) -> Result<CommandOutput, RunnerError> {
        self.engine_runs.fetch_add(1, Ordering::SeqCst);
        let active = self.active_passes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_passes.fetch_max(active, Ordering::SeqCst);
        let result = self.simulate_pass(invocation).await;
        self.active_passes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn simulate_pass(&self, invocation: &CommandInvocation) -> Result<CommandOutput, RunnerError> {

        let delay = *self.pass_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            if delay >= invocation.timeout {
                tokio::time::sleep(invocation.timeout).await;
                return Err(RunnerError::TimedOut {
                    program: invocation.display_name(),
                    timeout: invocation.timeout,
                });
            }
            tokio::time::sleep(delay).await;
        }

        let dir = invocation.working_dir.as_path();
        let source = tokio::fs::read_to_string(dir.join("document.tex"))
            .await
            .unwrap_or_default();
        self.sources
            .lock()
            .expect("sources lock")
            .push(source.clone());

        if source.contains(FAIL_MARKER) {
            return Ok(Self::output(
                1,
                "! Undefined control sequence.\nl.3 \\fakeerror",
                "",
            ));
        }
        if source.contains(NO_PDF_MARKER) {
            return Ok(Self::output(0, "No pages of output.", ""));
        }

        let aux = dir.join("document.aux");
        let settled = tokio::fs::try_exists(&aux).await.unwrap_or(false);
        tokio::fs::write(&aux, "\\relax\n").await.map_err(|source| RunnerError::Wait {
            program: invocation.display_name(),
            source,
        })?;
        tokio::fs::write(dir.join("document.log"), "log").await.ok();
        tokio::fs::write(dir.join("document.pdf"), PDF_BYTES)
            .await
            .map_err(|source| RunnerError::Wait {
                program: invocation.display_name(),
                source,
            })?;

        let stdout = if source.contains("\\ref") && !settled {
            format!("Output written on document.pdf (1 page).\n{RERUN_WARNING}")
        } else {
            "Output written on document.pdf (1 page).".to_owned()
        };
        Ok(Self::output(0, stdout, ""))
    }

    async fn bibliography_pass(&self, invocation: &CommandInvocation) -> CommandOutput {
        self.bibliography_runs.fetch_add(1, Ordering::SeqCst);
        if self.bibliography_fails.load(Ordering::SeqCst) {
            return Self::output(2, "", "I couldn't open database file references.bib");
        }
        tokio::fs::write(invocation.working_dir.join("document.bbl"), "bbl")
            .await
            .ok();
        Self::output(0, "Database file #1: references.bib", "")
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, RunnerError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.clone());

        let program = invocation.display_name();
        let engine = matches!(program.as_str(), "pdflatex" | "xelatex" | "lualatex");

        if invocation.args.iter().any(|arg| arg == "--version") {
            if engine && self.toolchain_missing.load(Ordering::SeqCst) {
                return Err(RunnerError::NotFound { program });
            }
            return Ok(Self::output(0, format!("{program} 3.141592653"), ""));
        }

        match program.as_str() {
            "pdflatex" | "xelatex" | "lualatex" => self.engine_pass(invocation).await,
            "bibtex" | "biber" => Ok(self.bibliography_pass(invocation).await),
            _ => Err(RunnerError::NotFound { program }),
        }
    }
}

/// Returns a fixed PDF for every request.
#[derive(Default)]
pub struct FakeRemote {
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemoteCompiler for FakeRemote {
    async fn compile(&self, _document: &str, _engine: Engine) -> Result<Bytes, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"%PDF-1.4\n% remote\n"))
    }
}

/// A broker that is never reachable.
pub struct FailingQueue;

#[async_trait]
impl CompileQueue for FailingQueue {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, _payload: CompileJobPayload) -> Result<(), QueueError> {
        Err(QueueError::unavailable("connection refused"))
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Err(QueueError::unavailable("connection refused"))
    }
}

/// A queue that accepts jobs but never runs them.
#[derive(Default)]
pub struct StalledQueue {
    pub accepted: Mutex<Vec<CompileJobPayload>>,
}

#[async_trait]
impl CompileQueue for StalledQueue {
    fn backend(&self) -> &'static str {
        "stalled"
    }

    async fn enqueue(&self, payload: CompileJobPayload) -> Result<(), QueueError> {
        self.accepted.lock().expect("accepted lock").push(payload);
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.accepted.lock().expect("accepted lock").len() as u64)
    }
}

/// Hands the first `capacity` jobs to local workers, then behaves like a dead broker.
pub struct FlakyQueue {
    inner: Arc<LocalQueue>,
    remaining: AtomicUsize,
}

#[async_trait]
impl CompileQueue for FlakyQueue {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, payload: CompileJobPayload) -> Result<(), QueueError> {
        let accepted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if accepted {
            self.inner.enqueue(payload).await
        } else {
            Err(QueueError::unavailable("connection reset"))
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.inner.depth().await
    }
}

pub enum QueueKind {
    Local,
    Failing,
    Stalled(Arc<StalledQueue>),
    /// Accepts this many jobs before failing.
    Flaky(usize),
}

pub struct Harness {
    pub service: Arc<CompileService>,
    pub context: CompileWorkerContext,
    pub runner: Arc<FakeRunner>,
    pub remote: Option<Arc<FakeRemote>>,
    pub repo: Arc<InMemoryJobRepository>,
    pub scratch: TempDir,
    pub public: TempDir,
    pub local_queue: Option<Arc<LocalQueue>>,
}

pub struct HarnessOptions {
    pub queue: QueueKind,
    pub workers: usize,
    pub remote: bool,
    pub delete_after_download: bool,
    pub retention: Duration,
    pub runner: Arc<FakeRunner>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            queue: QueueKind::Local,
            workers: 2,
            remote: false,
            delete_after_download: true,
            retention: Duration::from_secs(3600),
            runner: FakeRunner::new(),
        }
    }
}

pub fn limits() -> RequestLimits {
    RequestLimits {
        max_source_bytes: 64 * 1024,
        default_timeout_ms: 5_000,
        max_timeout_ms: 20_000,
        default_passes: 3,
    }
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        let scratch = TempDir::new().expect("scratch dir");
        let public = TempDir::new().expect("public dir");
        let repo = Arc::new(InMemoryJobRepository::new());
        let runner = options.runner;
        let remote = options.remote.then(|| Arc::new(FakeRemote::default()));

        let context = CompileWorkerContext {
            jobs: Arc::clone(&repo) as Arc<dyn JobRepository>,
            engine: Arc::new(CompileEngine::new(
                Arc::clone(&runner) as Arc<dyn CommandRunner>,
                None,
            )),
            artifacts: Arc::new(
                ArtifactStorage::new(public.path().to_path_buf()).expect("artifact storage"),
            ),
            cache: Arc::new(ResultCache::new(50, Duration::from_secs(1800))),
            inflight: InFlightCompilations::new(),
            remote: remote
                .clone()
                .map(|remote| remote as Arc<dyn RemoteCompiler>),
            scratch_dir: scratch.path().to_path_buf(),
            worker_permits: Arc::new(Semaphore::new(options.workers.max(1))),
        };

        let workers = std::num::NonZeroUsize::new(options.workers.max(1)).expect("non-zero workers");
        let mut local_queue = None;
        let queue: Arc<dyn CompileQueue> = match options.queue {
            QueueKind::Local => {
                let queue = Arc::new(LocalQueue::start(context.clone(), workers));
                local_queue = Some(Arc::clone(&queue));
                queue as Arc<dyn CompileQueue>
            }
            QueueKind::Flaky(capacity) => {
                let inner = Arc::new(LocalQueue::start(context.clone(), workers));
                local_queue = Some(Arc::clone(&inner));
                Arc::new(FlakyQueue {
                    inner,
                    remaining: AtomicUsize::new(capacity),
                }) as Arc<dyn CompileQueue>
            }
            QueueKind::Failing => Arc::new(FailingQueue) as Arc<dyn CompileQueue>,
            QueueKind::Stalled(queue) => queue as Arc<dyn CompileQueue>,
        };

        let service = Arc::new(CompileService::new(
            context.clone(),
            queue,
            ServiceSettings {
                limits: limits(),
                artifact_retention: options.retention,
                delete_after_download: options.delete_after_download,
            },
        ));

        Self {
            service,
            context,
            runner,
            remote,
            repo,
            scratch,
            public,
            local_queue,
        }
    }

    pub fn local() -> Self {
        Self::new(HarnessOptions::default())
    }

    pub fn fallback() -> Self {
        Self::new(HarnessOptions {
            queue: QueueKind::Failing,
            ..Default::default()
        })
    }

    /// Names of leftover entries in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<String> {
        dir_entries(self.scratch.path())
    }
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

pub fn request(source: &str) -> CompilationRequest {
    CompilationRequest {
        source: source.to_owned(),
        engine: Engine::Pdflatex,
        bibliography: None,
        use_biber: false,
        options: CompileOptions {
            timeout_ms: 0,
            passes: 0,
            paper_size: None,
            margins: None,
        },
    }
}

pub fn with_passes(mut request: CompilationRequest, passes: u8) -> CompilationRequest {
    request.options.passes = passes;
    request
}

/// Poll the repository until the job reaches a terminal state.
pub async fn wait_for_job(
    repo: &dyn JobRepository,
    job_id: uuid::Uuid,
    timeout: Duration,
) -> Result<Job, RepoError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = repo.get(job_id).await?.ok_or(RepoError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RepoError::from_persistence(format!(
                "job `{job_id}` timed out after {timeout:?}"
            )));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
