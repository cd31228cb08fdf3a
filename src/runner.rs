//! Runs a resolved target's commands and captures the result

use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::{DeployError, Result};
use crate::resolver::{DeploymentTarget, TargetAction};

/// Shell used for both command lists and deploy scripts
pub const SHELL: &str = "/bin/sh";

/// Captured result of one run. A non-zero `return_code` is a normal outcome;
/// `error` is only set when the process could not be run to completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub command_line: String,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub return_code: Option<i32>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.return_code == Some(0)
    }
}

/// Join commands with `&&` so each one runs only if the previous succeeded.
///
/// Entries are expected to be simple commands; one containing `;` or `||`
/// keeps its own shell precedence inside the chain.
pub fn compose_commands(commands: &[String]) -> String {
    commands
        .iter()
        .map(|c| c.trim())
        .collect::<Vec<_>>()
        .join(" && ")
}

/// The command line recorded for a target, as the shell will see it
pub fn command_line(target: &DeploymentTarget) -> String {
    match &target.action {
        TargetAction::Commands(commands) => compose_commands(commands),
        TargetAction::Script(script) => format!("{} {}", SHELL, script.display()),
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .trim()
        .lines()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// `None` means a run may take as long as it likes
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Run `target` with exactly `env` as the child's environment.
    pub async fn run(
        &self,
        target: &DeploymentTarget,
        env: &BTreeMap<String, String>,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome {
            command_line: command_line(target),
            ..ExecutionOutcome::default()
        };

        info!(
            "Running (cwd = '{}'): {}",
            target.working_directory.display(),
            outcome.command_line
        );

        match self.execute(target, &outcome.command_line, env).await {
            Ok(output) => {
                outcome.stdout_lines = split_lines(&output.stdout);
                outcome.stderr_lines = split_lines(&output.stderr);
                outcome.return_code = output.status.code();
                if outcome.return_code.is_none() {
                    outcome.error = Some("Process terminated by signal".to_string());
                }
            }
            Err(e) => {
                error!("Deployment of '{}' could not run: {}", target.name, e);
                outcome.error = Some(e.to_string());
            }
        }

        outcome
    }

    async fn execute(
        &self,
        target: &DeploymentTarget,
        command_line: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Output> {
        if !target.working_directory.is_dir() {
            return Err(DeployError::ExecutionFailure(format!(
                "Working directory not found: {}",
                target.working_directory.display()
            )));
        }

        let mut command = Command::new(SHELL);
        match &target.action {
            TargetAction::Commands(_) => {
                command.arg("-c").arg(command_line);
            }
            TargetAction::Script(script) => {
                command.arg(checked_script(script)?);
            }
        }

        // Own process group, so a timeout can kill everything the shell started
        let mut child = command
            .current_dir(&target.working_directory)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeployError::ExecutionFailure(format!("Failed to start {}: {}", SHELL, e))
            })?;

        let Some(limit) = self.timeout else {
            return Ok(child.wait_with_output().await?);
        };

        let pid = child.id();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let collected = tokio::time::timeout(limit, async {
            let (status, out, err) = tokio::try_join!(
                child.wait(),
                read_pipe(stdout.as_mut()),
                read_pipe(stderr.as_mut()),
            )?;
            Ok::<_, io::Error>(Output {
                status,
                stdout: out,
                stderr: err,
            })
        })
        .await;

        match collected {
            Ok(output) => Ok(output?),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                child.wait().await?;
                Err(DeployError::ExecutionFailure(format!(
                    "Timed out after {}s",
                    limit.as_secs_f64()
                )))
            }
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// SIGKILL the process group led by `pid`
fn kill_process_group(pid: u32) {
    // SAFETY: killpg takes no pointers; `pid` leads a group created at spawn
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        warn!(
            "Failed to kill process group {}: {}",
            pid,
            io::Error::last_os_error()
        );
    }
}

/// Absolute path of an existing deploy script
fn checked_script(script: &Path) -> Result<std::path::PathBuf> {
    if !script.exists() {
        return Err(DeployError::ExecutionFailure(format!(
            "Deploy script not found at {}",
            script.display()
        )));
    }
    if !script.is_file() {
        return Err(DeployError::ExecutionFailure(format!(
            "Deploy script path is not a file: {}",
            script.display()
        )));
    }
    Ok(script.canonicalize()?)
}
