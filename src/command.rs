//! Subprocess execution for pipeline stages and batch jobs.
//!
//! Commands are always an explicit program plus an argument vector. Nothing is
//! passed through a shell, so URLs and titles can never be interpreted as
//! shell syntax.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_dir: Option<PathBuf>,
    /// Wall-clock ceiling; the runner's default applies when unset.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

impl fmt::Display for CommandSpec {
    /// Human-readable rendering for logs. Not meant to be fed to a shell.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into a [`CommandError::Failed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self, CommandError> {
        if self.success {
            Ok(self)
        } else {
            Err(CommandError::Failed {
                program: spec.program.clone(),
                exit_code: self.exit_code,
                stderr: tail(&self.stderr, 10),
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}ms", .after.as_millis())]
    TimedOut { program: String, after: Duration },

    #[error("{program} exited with {}{}", exit_label(.exit_code), stderr_suffix(.stderr))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Last `lines` non-empty lines of `text`, joined with ` | `.
fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join(" | ")
}

/// Runs external programs.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> impl Future<Output = Result<CommandOutput, CommandError>>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let limit = spec.timeout.unwrap_or(self.default_timeout);
        debug!(command = %spec, timeout_secs = limit.as_secs(), "spawning");

        let spawn_error = |source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        };
        let output = match timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(spawn_error)?,
            Err(_) => {
                return Err(CommandError::TimedOut {
                    program: spec.program.clone(),
                    after: limit,
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            program = %spec.program,
            exit_code = ?result.exit_code,
            stdout_bytes = result.stdout.len(),
            "command finished"
        );
        Ok(result)
    }
}
