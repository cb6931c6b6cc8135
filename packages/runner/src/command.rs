// ABOUTME: Command execution helpers for environments and the host
// ABOUTME: Non-zero exits are returned as data; only transport failures and timeouts are errors

use crate::error::{Result, RunnerError};
use crate::providers::Environment;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit code and combined output of a command run inside an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i64,
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a shell command in an environment
pub async fn run_command(
    env: &dyn Environment,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let result = env.exec(command, timeout).await?;
    Ok(CommandResult {
        exit_code: result.exit_code,
        output: result.combined_output(),
    })
}

/// Run a command in a throwaway shell session, deleting the session afterwards
///
/// Needed for commands that depend on shell features such as `cd` chains,
/// pipes or redirects.
pub async fn run_in_session(
    env: &dyn Environment,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let session_id = format!("runner-{}", uuid::Uuid::new_v4().simple());
    env.create_session(&session_id).await?;

    let result = env.exec_in_session(&session_id, command, timeout).await;

    if let Err(e) = env.delete_session(&session_id).await {
        debug!("Ignoring failure to delete shell session {}: {}", session_id, e);
    }

    let result = result?;
    Ok(CommandResult {
        exit_code: result.exit_code,
        output: result.combined_output(),
    })
}

/// Quote a single argument for POSIX `sh`
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Output of a program run by a [`CommandRunner`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if present, otherwise stdout; used in error messages
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs a program with arguments; the seam mount operations execute through
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput>;
}

/// Runs programs directly on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCommandRunner;

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        debug!("Running on host: {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| RunnerError::Timeout {
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }
}

/// Runs programs inside an environment, quoting each argument
#[derive(Clone)]
pub struct EnvironmentCommandRunner {
    env: Arc<dyn Environment>,
}

impl EnvironmentCommandRunner {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CommandRunner for EnvironmentCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        let mut command = shell_quote(program);
        for arg in args {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }

        let result = self.env.exec(&command, timeout).await?;
        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            exit_code: result.exit_code,
        })
    }
}
