//! Mock command runner for testing.
//!
//! Records every invocation and answers from a list of canned responses.

use super::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mock command runner.
///
/// Commands succeed with empty output unless a rule registered with
/// [`MockRunner::respond`] or [`MockRunner::fail`] matches. A rule matches
/// when the command line (see [`CommandSpec::display`]) contains its pattern.
/// The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    inner: Arc<Mutex<MockRunnerInner>>,
}

#[derive(Debug, Default)]
struct MockRunnerInner {
    calls: Vec<CommandSpec>,
    rules: Vec<(String, CommandOutput)>,
    unspawnable: Vec<String>,
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        let mut inner = self.inner.lock().unwrap();
        inner.rules.push((pattern.to_string(), output));
    }

    /// Answer commands containing `pattern` with stdout and exit 0.
    pub fn respond_stdout(&self, pattern: &str, stdout: &str) {
        self.respond(
            pattern,
            CommandOutput {
                stdout: stdout.to_string(),
                ..Default::default()
            },
        );
    }

    /// Make commands containing `pattern` exit non-zero.
    pub fn fail(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.respond(
            pattern,
            CommandOutput {
                stderr: stderr.to_string(),
                exit_code,
                ..Default::default()
            },
        );
    }

    /// Make `program` fail to spawn at all.
    pub fn unspawnable(&self, program: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unspawnable.push(program.to_string());
    }

    /// All recorded invocations, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// Recorded command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Number of recorded invocations whose command line contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    /// Index of the first invocation containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.command_lines()
            .iter()
            .position(|line| line.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(spec.clone());

        if inner.unspawnable.contains(&spec.program) {
            return Err(CommandError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: not found"),
            });
        }

        let line = spec.display();
        let output = inner
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let mock = MockRunner::new();
        mock.run(&CommandSpec::new("git").arg("status")).await.unwrap();
        mock.run(&CommandSpec::new("docker").arg("ps")).await.unwrap();

        assert_eq!(mock.command_lines(), vec!["git status", "docker ps"]);
        assert_eq!(mock.position("docker"), Some(1));
        assert_eq!(mock.count("git"), 1);
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let mock = MockRunner::new();
        mock.respond_stdout("rev-parse HEAD", "abc123\n");
        mock.fail("rev-parse", 128, "not a repo");

        let out = mock
            .run(&CommandSpec::new("git").args(["rev-parse", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(out.stdout, "abc123\n");

        let out = mock
            .run(&CommandSpec::new("git").args(["rev-parse", "--abbrev-ref", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 128);
    }

    #[tokio::test]
    async fn unspawnable_program_errors() {
        let mock = MockRunner::new();
        mock.unspawnable("docker");

        let result = mock.run(&CommandSpec::new("docker")).await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
        assert_eq!(mock.calls().len(), 1);
    }
}
