//! [`CommandRunner`] backed by real child processes.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::compile::{CommandInvocation, CommandOutput, CommandRunner, RunnerError};

/// Spawns each command in its own process group with TeX file access locked down.
///
/// On timeout the whole group is killed, so helpers started by the engine do not
/// outlive the job.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, RunnerError> {
        let program = invocation.display_name();
        let started_at = Instant::now();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .env("openin_any", "p")
            .env("openout_any", "p")
            .env("shell_escape", "f")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                RunnerError::NotFound {
                    program: program.clone(),
                }
            } else {
                RunnerError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;
        let pid = child.id();

        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                debug!(
                    target = "infra::process",
                    op = "process::run",
                    program = %program,
                    exit_code = output.status.code(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Command finished"
                );
                Ok(CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Ok(Err(source)) => Err(RunnerError::Wait { program, source }),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                warn!(
                    target = "infra::process",
                    op = "process::run",
                    program = %program,
                    result = "timeout",
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Command exceeded its time limit; killed process group"
                );
                Err(RunnerError::TimedOut {
                    program,
                    timeout: invocation.timeout,
                })
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(
                target = "infra::process",
                op = "process::kill",
                pgid,
                error = %err,
                "Failed to kill process group"
            );
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path, time::Duration};
    use tempfile::TempDir;

    fn make_executable(path: &Path) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn invocation(dir: &TempDir, program: &Path, timeout: Duration) -> CommandInvocation {
        CommandInvocation {
            program: program.to_path_buf(),
            args: vec!["document.tex".to_owned()],
            working_dir: dir.path().to_path_buf(),
            timeout,
        }
    }

    #[tokio::test]
    async fn captures_output_exit_code_and_environment() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fake-tex");
        fs::write(
            &script,
            "#!/bin/sh\necho \"arg=$1 openout=$openout_any shell=$shell_escape\"\necho oops >&2\nexit 3\n",
        )
        .expect("write script");
        make_executable(&script);

        let output = ProcessRunner::new()
            .run(&invocation(&dir, &script, Duration::from_secs(10)))
            .await
            .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "arg=document.tex openout=p shell=f");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn reports_missing_executable() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("no-such-engine");
        let err = ProcessRunner::new()
            .run(&invocation(&dir, &missing, Duration::from_secs(5)))
            .await
            .expect_err("missing binary");
        assert!(matches!(err, RunnerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let dir = TempDir::new().expect("temp dir");
        let marker = dir.path().join("survived");
        let script = dir.path().join("slow-tex");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\n(sleep 2; touch {}) &\nsleep 30\n",
                marker.display()
            ),
        )
        .expect("write script");
        make_executable(&script);

        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(&invocation(&dir, &script, Duration::from_millis(300)))
            .await
            .expect_err("timeout");
        assert!(matches!(err, RunnerError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background helper outlived the job");
    }
}
