//! External tool runner
//!
//! Every ffmpeg/ffprobe invocation goes through a [`ToolRunner`], so timeouts
//! and outcome classification are the same for all of them.

use async_trait::async_trait;
use std::fmt;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// A program, its ordered arguments and the time it is allowed to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Check whether `flag` is immediately followed by `value`
    pub fn has_flag_with_value(&self, flag: &str, value: &str) -> bool {
        self.args
            .windows(2)
            .any(|w| w[0] == flag && w[1] == value)
    }

    /// Value following the first occurrence of `flag`
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .windows(2)
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == ';') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Classified result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Exit status zero
    Success { stdout: String, stderr: String },
    /// The program could not be found
    ToolNotFound,
    /// The timeout elapsed and the process was killed
    TimedOut,
    /// Non-zero exit, killed by a signal, or failed to spawn
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    /// Standard output of a successful run, or the failure as an error
    pub fn into_stdout(self) -> Result<String, ToolError> {
        match self {
            ToolOutcome::Success { stdout, .. } => Ok(stdout),
            ToolOutcome::ToolNotFound => Err(ToolError::NotFound),
            ToolOutcome::TimedOut => Err(ToolError::TimedOut),
            ToolOutcome::Failed { exit_code, stderr } => Err(ToolError::Failed { exit_code, stderr }),
        }
    }
}

/// Error form of a non-successful [`ToolOutcome`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool not found")]
    NotFound,

    #[error("tool timed out")]
    TimedOut,

    #[error("tool failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Seam between the pipeline and the operating system
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> ToolOutcome;
}

/// Runs tools as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, command: &ToolCommand) -> ToolOutcome {
        debug!(command = %command, timeout_secs = command.timeout.as_secs(), "Running tool");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => return ToolOutcome::ToolNotFound,
            Err(e) => {
                return ToolOutcome::Failed {
                    exit_code: None,
                    stderr: format!("failed to spawn {}: {}", command.program, e),
                }
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ToolOutcome::Failed {
                    exit_code: None,
                    stderr: format!("failed to wait for {}: {}", command.program, e),
                }
            }
            Err(_) => {
                debug!(program = %command.program, "Tool timed out, killed");
                return ToolOutcome::TimedOut;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            ToolOutcome::Success { stdout, stderr }
        } else {
            ToolOutcome::Failed {
                exit_code: output.status.code(),
                stderr,
            }
        }
    }
}
