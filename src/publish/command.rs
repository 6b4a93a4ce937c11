//! External command execution with timeouts.
//!
//! Used for the docker invocations of the publish step. Secrets are fed
//! through stdin, never through argv, so they cannot leak into process
//! listings or logs.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::credentials::Secret;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command {name} has empty program")]
    Empty { name: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command {name} timed out after {seconds} seconds")]
    Timeout { name: String, seconds: u64 },

    #[error("I/O error while running {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A single external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Name used in logs and errors
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then stdin is closed
    pub stdin: Option<Secret>,
    /// Zero disables the timeout
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            stdin: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_stdin(mut self, input: Secret) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub name: String,
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandOutput {
    /// Last non-empty stderr line, for concise error messages.
    pub fn error_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| format!("{} exited with code {}", self.name, self.exit_code))
    }
}

/// Run a command to completion, capturing its output.
///
/// A non-zero exit is not an error here; callers inspect `success`.
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    if spec.program.is_empty() {
        return Err(CommandError::Empty {
            name: spec.name.clone(),
        });
    }

    let start = Instant::now();
    tracing::debug!(
        command = %spec.name,
        program = %spec.program,
        args = ?spec.args,
        "Running command"
    );

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| CommandError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
        stdin
            .write_all(input.expose().as_bytes())
            .await
            .map_err(|source| CommandError::Io {
                name: spec.name.clone(),
                source,
            })?;
        // Dropping closes the pipe so the child sees EOF
        drop(stdin);
    }

    let waited = if spec.timeout.is_zero() {
        child.wait_with_output().await
    } else {
        tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::Timeout {
                name: spec.name.clone(),
                seconds: spec.timeout.as_secs(),
            })?
    };
    let output = waited.map_err(|source| CommandError::Io {
        name: spec.name.clone(),
        source,
    })?;

    let result = CommandOutput {
        name: spec.name.clone(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    };

    tracing::debug!(
        command = %result.name,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        "Command finished"
    );

    Ok(result)
}
