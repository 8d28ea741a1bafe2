//! Container status listing.
//!
//! After `compose up`, the harness lists the project's containers through
//! the Docker Engine API and logs their state. The listing is
//! informational: a container that is not running is reported as a
//! warning, and the liveness check decides the run.

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::ContainerSummary;
use bollard::Docker;
use std::collections::HashMap;
use thiserror::Error;

/// Compose label carrying the project name.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Compose label carrying the service name.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Errors from listing container status.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// State of one container in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    /// Container name (without the leading `/`).
    pub name: String,
    /// Compose service name.
    pub service: String,
    /// Machine-readable state (`running`, `exited`, ...).
    pub state: String,
    /// Human-readable status (`Up 3 seconds`, `Exited (1) ...`).
    pub status: String,
}

impl ContainerState {
    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

impl From<ContainerSummary> for ContainerState {
    fn from(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .or_else(|| summary.id.clone())
            .unwrap_or_default();
        let service = summary
            .labels
            .as_ref()
            .and_then(|labels| labels.get(SERVICE_LABEL))
            .cloned()
            .unwrap_or_default();

        Self {
            name,
            service,
            state: summary.state.unwrap_or_default(),
            status: summary.status.unwrap_or_default(),
        }
    }
}

/// Source of container status for a compose project.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// List every container (running or not) of `project`.
    async fn list(&self, project: &str) -> Result<Vec<ContainerState>, StatusError>;
}

/// Lists containers through the local Docker Engine API.
pub struct DockerStatus {
    docker: Docker,
}

impl DockerStatus {
    /// Create a client using the local defaults (`DOCKER_HOST` or the unix socket).
    ///
    /// No connection is made until the first listing.
    pub fn connect() -> Result<Self, StatusError> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }
}

#[async_trait]
impl StatusSource for DockerStatus {
    async fn list(&self, project: &str) -> Result<Vec<ContainerState>, StatusError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", PROJECT_LABEL, project)],
        );

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        let mut states: Vec<ContainerState> = containers.into_iter().map(Into::into).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }
}

/// Fixed container states, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticStatus {
    states: Vec<ContainerState>,
}

impl StaticStatus {
    /// Report `states` for every project.
    pub fn new(states: Vec<ContainerState>) -> Self {
        Self { states }
    }
}

#[async_trait]
impl StatusSource for StaticStatus {
    async fn list(&self, _project: &str) -> Result<Vec<ContainerState>, StatusError> {
        Ok(self.states.clone())
    }
}

/// Log the project's container states. Never fails the run.
///
/// Returns the number of containers not in `running` state, or `None` when
/// the listing itself failed.
pub async fn log_status(source: &dyn StatusSource, project: &str) -> Option<usize> {
    let states = match source.list(project).await {
        Ok(states) => states,
        Err(e) => {
            tracing::warn!(project, "could not list container status: {}", e);
            return None;
        }
    };

    if states.is_empty() {
        tracing::warn!(project, "no containers found for project");
    }

    let mut not_running = 0;
    for c in &states {
        if c.is_running() {
            tracing::info!(container = %c.name, service = %c.service, status = %c.status, "container up");
        } else {
            not_running += 1;
            tracing::warn!(
                container = %c.name,
                service = %c.service,
                state = %c.state,
                status = %c.status,
                "container not running"
            );
        }
    }
    Some(not_running)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, service: &str, state: &str) -> ContainerSummary {
        let mut labels = HashMap::new();
        labels.insert(PROJECT_LABEL.to_string(), "axon-smoke-1".to_string());
        labels.insert(SERVICE_LABEL.to_string(), service.to_string());
        ContainerSummary {
            id: Some("f00d".into()),
            names: Some(vec![format!("/{}", name)]),
            state: Some(state.into()),
            status: Some(format!("{} 5 seconds", state)),
            labels: Some(labels),
            ..Default::default()
        }
    }

    #[test]
    fn state_from_summary() {
        let state: ContainerState = summary("axon-smoke-1-axon1-1", "axon1", "running").into();
        assert_eq!(state.name, "axon-smoke-1-axon1-1");
        assert_eq!(state.service, "axon1");
        assert!(state.is_running());
    }

    #[test]
    fn state_falls_back_to_id() {
        let state: ContainerState = ContainerSummary {
            id: Some("f00d".into()),
            ..Default::default()
        }
        .into();
        assert_eq!(state.name, "f00d");
        assert!(!state.is_running());
    }

    #[tokio::test]
    async fn log_status_counts_stopped_containers() {
        let source = StaticStatus::new(vec![
            summary("a", "axon1", "running").into(),
            summary("b", "axon2", "exited").into(),
            summary("c", "axon3", "running").into(),
        ]);
        assert_eq!(log_status(&source, "p").await, Some(1));
    }

    #[tokio::test]
    async fn log_status_tolerates_empty_project() {
        let source = StaticStatus::default();
        assert_eq!(log_status(&source, "p").await, Some(0));
    }
}
