//! Docker Compose cluster lifecycle.
//!
//! Each run gets its own compose project name, so containers, networks and
//! volumes from concurrent or crashed runs never collide.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::ClusterConfig;

/// Errors from compose operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// `compose up` failed.
    #[error("cluster start failed: {0}")]
    Up(#[source] CommandError),

    /// `compose down` failed.
    #[error("cluster teardown failed: {0}")]
    Down(#[source] CommandError),
}

/// A compose cluster bound to one workspace and project.
#[derive(Debug, Clone)]
pub struct Cluster {
    compose: Vec<String>,
    descriptor: PathBuf,
    workdir: PathBuf,
    project: String,
}

impl Cluster {
    /// Describe the cluster for run `run_id` in `workdir`.
    ///
    /// `descriptor` is relative to `workdir`.
    pub fn new(config: &ClusterConfig, workdir: &Path, descriptor: &Path, run_id: &str) -> Self {
        Self {
            compose: config.compose.clone(),
            descriptor: descriptor.to_path_buf(),
            workdir: workdir.to_path_buf(),
            project: project_name(&config.project_prefix, run_id),
        }
    }

    /// Compose project name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Build a compose invocation with the project's file and name.
    ///
    /// Returns args for: `<compose...> -f <descriptor> -p <project> <args>`
    pub fn compose_command(&self, args: &[&str]) -> CommandSpec {
        let (program, prefix) = match self.compose.split_first() {
            Some((program, prefix)) => (program.as_str(), prefix),
            None => ("docker-compose", &[][..]),
        };

        CommandSpec::new(program)
            .args(prefix.iter().map(String::as_str))
            .arg("-f")
            .arg(self.descriptor.to_string_lossy())
            .args(["-p", self.project.as_str()])
            .args(args.iter().copied())
            .current_dir(&self.workdir)
    }

    /// Start every declared service in detached mode.
    pub async fn up<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<(), ClusterError> {
        tracing::info!(project = %self.project, workdir = %self.workdir.display(), "starting cluster");
        runner
            .run_ok(&self.compose_command(&["up", "-d"]))
            .await
            .map_err(ClusterError::Up)?;
        Ok(())
    }

    /// Stop and remove containers, networks and volumes of the project.
    pub async fn down<R: CommandRunner + ?Sized>(&self, runner: &R) -> Result<(), ClusterError> {
        tracing::info!(project = %self.project, "tearing down cluster");
        runner
            .run_ok(&self.compose_command(&["down", "-v", "--remove-orphans"]))
            .await
            .map_err(ClusterError::Down)?;
        Ok(())
    }
}

/// Compose project name for a run.
///
/// Compose only accepts lowercase alphanumerics, `-` and `_`.
pub fn project_name(prefix: &str, run_id: &str) -> String {
    format!("{}-{}", prefix, run_id)
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
