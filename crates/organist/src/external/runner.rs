use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// How many trailing stderr lines end up in a failure message.
const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} exited with {}{}", exit_label(.exit_code), tail_suffix(.stderr))]
    Failed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("could not start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {}s", .after.as_secs())]
    TimedOut { tool: String, after: Duration },

    #[error("expected output {} was not produced", .path.display())]
    MissingOutput { path: PathBuf },

    #[error("could not move output to {}: {source}", .path.display())]
    MoveOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn tail_suffix(stderr: &str) -> String {
    let tail = stderr_tail(stderr);
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

/// Last few non-empty lines of captured stderr, joined on one line.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// One external command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`ToolError::Failed`].
    pub fn check(self, tool: &str) -> Result<Self, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                tool: tool.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands to completion.
///
/// The only seam between the pipeline and the operating system; tests swap
/// in recording fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        tracing::debug!(tool = %spec.program, args = ?spec.args, "Running external tool");

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .kill_on_drop(true)
            .output();

        let output = match spec.timeout {
            // Dropping the future on expiry kills the child
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| ToolError::TimedOut {
                    tool: spec.program.clone(),
                    after: limit,
                })?,
            None => output.await,
        }
        .map_err(|source| ToolError::Spawn {
            tool: spec.program.clone(),
            source,
        })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(
            tool = %spec.program,
            exit_code = ?result.exit_code,
            "External tool finished"
        );

        Ok(result)
    }
}
