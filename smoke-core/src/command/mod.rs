//! External process execution.
//!
//! Every program the harness drives (`git`, `docker login`, `docker buildx`,
//! `docker compose`) is described by a [`CommandSpec`] and executed through
//! a [`CommandRunner`]. [`SystemRunner`] spawns real processes with
//! `tokio::process`; [`MockRunner`] records invocations for tests.

mod mock;

pub use mock::MockRunner;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors from running external commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be spawned (binary missing, permissions).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The process ran but exited non-zero.
    #[error("{program} failed: exit={exit_code}, stderr={stderr}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit code (-1 when killed by a signal).
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },
}

/// A single external command invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory (inherits the caller's when `None`).
    pub cwd: Option<PathBuf>,
    /// Bytes written to the child's stdin, then closed.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in the given directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Feed `input` to the child's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line as a single string, for logs.
    ///
    /// Stdin content is never included.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

// Stdin can carry registry tokens, so Debug only reports its length.
impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field(
                "stdin",
                &self.stdin.as_ref().map(|s| format!("<redacted {} bytes>", s.len())),
            )
            .finish()
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// Does NOT fail on non-zero exit. Use [`CommandRunner::run_ok`] for that.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run a command, failing on non-zero exit.
    async fn run_ok(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let output = self.run(spec).await?;
        if !output.success() {
            return Err(CommandError::Failed {
                program: spec.program.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %spec.display(), "exec");

        let spawn_err = |source| CommandError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let Some(input) = &spec.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await.map_err(spawn_err)?;
                // Dropping the pipe closes stdin so the child sees EOF.
                drop(pipe);
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_collects_args() {
        let spec = CommandSpec::new("docker")
            .arg("compose")
            .args(["-p", "proj", "up"])
            .current_dir("/tmp");

        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args, vec!["compose", "-p", "proj", "up"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.display(), "docker compose -p proj up");
    }

    #[test]
    fn debug_redacts_stdin() {
        let spec = CommandSpec::new("docker")
            .args(["login", "--password-stdin"])
            .stdin("hunter2-token");

        let debug = format!("{:?}", spec);
        assert!(!debug.contains("hunter2-token"));
        assert!(debug.contains("<redacted 13 bytes>"));
        assert!(!spec.display().contains("hunter2-token"));
    }

    #[test]
    fn output_success() {
        let ok = CommandOutput::default();
        assert!(ok.success());

        let failed = CommandOutput {
            exit_code: 2,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let out = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2"]))
            .await
            .unwrap();

        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_feeds_stdin() {
        let out = SystemRunner
            .run(&CommandSpec::new("cat").stdin("piped input"))
            .await
            .unwrap();

        assert_eq!(out.stdout, "piped input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_ok_fails_on_nonzero_exit() {
        let err = SystemRunner
            .run_ok(&CommandSpec::new("sh").args(["-c", "echo bad >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            CommandError::Failed {
                program,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn spawn_error_for_missing_binary() {
        let err = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
