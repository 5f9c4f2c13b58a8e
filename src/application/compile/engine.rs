//! Multi-pass TeX pipeline: engine pass, optional bibliography, remaining passes.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::{io::AsyncReadExt, time::Instant};
use tracing::{info, warn};

use crate::application::compile::runner::{
    CommandInvocation, CommandOutput, CommandRunner, RunnerError,
};
use crate::application::compile::workspace::{JOB_NAME, TEX_FILE, Workspace};
use crate::application::remote::RemoteError;
use crate::domain::{
    entities::CompilationRequest,
    types::{BibliographyTool, Engine},
};

pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const RERUN_MARKERS: &[&str] = &[
    "Rerun to get cross-references right",
    "Label(s) may have changed. Rerun",
];

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("`{program}` is not installed on this host")]
    ToolchainMissing { program: String },
    #[error("compilation exceeded its {limit_ms} ms time limit")]
    Timeout { limit_ms: u64 },
    #[error("{program} failed on pass {pass} with exit status {status}")]
    EngineFailed {
        program: String,
        pass: u8,
        status: String,
    },
    #[error("the compiler finished without producing a PDF")]
    MissingPdf,
    #[error("the compiler output is not a valid PDF")]
    InvalidPdf,
    #[error("cross-references did not settle after {passes} pass(es)")]
    Unconverged { passes: u8 },
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("workspace I/O failed: {0}")]
    Workspace(#[from] std::io::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Receives the captured output of every command as the pipeline runs.
#[async_trait]
pub trait CompileLog: Send + Sync {
    async fn append(&self, lines: Vec<String>);
}

pub struct CompileEngine {
    runner: Arc<dyn CommandRunner>,
    bin_dir: Option<PathBuf>,
    toolchain: DashMap<Engine, bool>,
}

impl CompileEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, bin_dir: Option<PathBuf>) -> Self {
        Self {
            runner,
            bin_dir,
            toolchain: DashMap::new(),
        }
    }

    fn program(&self, name: &str) -> PathBuf {
        match self.bin_dir.as_ref() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Whether `<engine> --version` runs successfully.
    ///
    /// Completed probes and missing executables are cached per engine; other
    /// runner errors are retried on the next call.
    pub async fn toolchain_available(&self, engine: Engine, probe_dir: &Path) -> bool {
        if let Some(known) = self.toolchain.get(&engine) {
            return *known;
        }

        let invocation = CommandInvocation {
            program: self.program(engine.as_str()),
            args: vec!["--version".to_owned()],
            working_dir: probe_dir.to_path_buf(),
            timeout: PROBE_TIMEOUT,
        };
        let (available, definitive) = match self.runner.run(&invocation).await {
            Ok(output) => (output.success(), true),
            Err(err) => {
                warn!(
                    target = "application::compile::engine",
                    op = "engine::probe",
                    engine = engine.as_str(),
                    error = %err,
                    "TeX toolchain probe failed"
                );
                (false, matches!(err, RunnerError::NotFound { .. }))
            }
        };
        info!(
            target = "application::compile::engine",
            op = "engine::probe",
            engine = engine.as_str(),
            available,
            cached = definitive,
            "Probed TeX toolchain"
        );
        if definitive {
            self.toolchain.insert(engine, available);
        }
        available
    }

    /// Run the full pipeline inside `workspace` and return the path of the verified PDF.
    pub async fn run(
        &self,
        workspace: &Workspace,
        request: &CompilationRequest,
        deadline: Instant,
        log: &dyn CompileLog,
    ) -> Result<PathBuf, CompileError> {
        let started_at = Instant::now();
        let limit_ms = request.options.timeout_ms;
        let passes = request.options.passes.max(1);
        let engine = request.engine.as_str();

        let mut last = self
            .engine_pass(workspace, engine, 1, passes, deadline, limit_ms, log)
            .await?;

        if let Some(tool) = request.bibliography_tool() {
            self.bibliography_pass(workspace, tool, deadline, limit_ms, log)
                .await?;
        }

        for pass in 2..=passes {
            last = self
                .engine_pass(workspace, engine, pass, passes, deadline, limit_ms, log)
                .await?;
        }

        let pdf = workspace.pdf_path();
        verify_pdf(&pdf).await?;

        if RERUN_MARKERS
            .iter()
            .any(|marker| last.stdout.contains(marker))
        {
            return Err(CompileError::Unconverged { passes });
        }

        info!(
            target = "application::compile::engine",
            op = "engine::run",
            result = "ok",
            engine,
            passes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "LaTeX pipeline produced a PDF"
        );
        Ok(pdf)
    }

    #[allow(clippy::too_many_arguments)]
    async fn engine_pass(
        &self,
        workspace: &Workspace,
        engine: &str,
        pass: u8,
        passes: u8,
        deadline: Instant,
        limit_ms: u64,
        log: &dyn CompileLog,
    ) -> Result<CommandOutput, CompileError> {
        log.append(vec![format!("== {engine} pass {pass}/{passes}")])
            .await;
        let args = vec![
            "-interaction=nonstopmode".to_owned(),
            "-halt-on-error".to_owned(),
            "-no-shell-escape".to_owned(),
            "-file-line-error".to_owned(),
            "-output-directory=.".to_owned(),
            TEX_FILE.to_owned(),
        ];
        let output = self
            .invoke(workspace, engine, args, deadline, limit_ms, log)
            .await?;
        if !output.success() {
            return Err(CompileError::EngineFailed {
                program: engine.to_owned(),
                pass,
                status: describe_status(output.exit_code),
            });
        }
        Ok(output)
    }

    async fn bibliography_pass(
        &self,
        workspace: &Workspace,
        tool: BibliographyTool,
        deadline: Instant,
        limit_ms: u64,
        log: &dyn CompileLog,
    ) -> Result<(), CompileError> {
        let name = tool.as_str();
        log.append(vec![format!("== {name}")]).await;
        let outcome = self
            .invoke(workspace, name, vec![JOB_NAME.to_owned()], deadline, limit_ms, log)
            .await;

        let warning = match outcome {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => format!(
                "warning: {name} exited with status {}; continuing without a resolved bibliography",
                describe_status(output.exit_code)
            ),
            Err(err @ CompileError::Timeout { .. }) => return Err(err),
            Err(err) => format!("warning: {name} could not run ({err}); continuing"),
        };
        warn!(
            target = "application::compile::engine",
            op = "engine::bibliography",
            tool = name,
            result = "soft_failure",
            "{warning}"
        );
        log.append(vec![warning]).await;
        Ok(())
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        program: &str,
        args: Vec<String>,
        deadline: Instant,
        limit_ms: u64,
        log: &dyn CompileLog,
    ) -> Result<CommandOutput, CompileError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CompileError::Timeout { limit_ms });
        }

        let invocation = CommandInvocation {
            program: self.program(program),
            args,
            working_dir: workspace.path().to_path_buf(),
            timeout: remaining,
        };

        match self.runner.run(&invocation).await {
            Ok(output) => {
                log.append(output.log_lines().collect()).await;
                Ok(output)
            }
            Err(RunnerError::TimedOut { .. }) => {
                log.append(vec![format!(
                    "{program} was killed after exceeding the {limit_ms} ms time limit"
                )])
                .await;
                Err(CompileError::Timeout { limit_ms })
            }
            Err(RunnerError::NotFound { .. }) => Err(CompileError::ToolchainMissing {
                program: program.to_owned(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

/// Fails unless `path` exists and starts with the PDF signature.
pub async fn verify_pdf(path: &Path) -> Result<(), CompileError> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(CompileError::MissingPdf),
        Err(err) => return Err(err.into()),
    };
    let mut header = [0_u8; 5];
    match file.read_exact(&mut header).await {
        Ok(_) if header == PDF_SIGNATURE => Ok(()),
        Ok(_) => Err(CompileError::InvalidPdf),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(CompileError::InvalidPdf),
        Err(err) => Err(err.into()),
    }
}

fn describe_status(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_owned(),
    }
}
