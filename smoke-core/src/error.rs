//! Error types for axon-smoke.
//!
//! Errors abort a run before a verdict exists. A cluster that starts but
//! never reaches the target height is not an error: it yields a failing
//! [`crate::LivenessReport`].

use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::image::ImageError;
use crate::registry::RegistryError;
use crate::source::SourceError;
use crate::workspace::WorkspaceError;

/// Main error type for smoke runs.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Source checkout error.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Registry authentication error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Image build or push error.
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// Workspace preparation error.
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// Compose cluster error.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Probe construction error.
    #[error("probe error: {0}")]
    Probe(#[from] reqwest::Error),
}

impl HarnessError {
    /// Step name for the error, used in the final log line.
    pub fn stage(&self) -> &'static str {
        match self {
            HarnessError::Config(_) => "config",
            HarnessError::Source(_) => "acquire source",
            HarnessError::Registry(_) => "registry login",
            HarnessError::Image(_) => "build image",
            HarnessError::Workspace(_) => "prepare workspace",
            HarnessError::Cluster(_) => "cluster",
            HarnessError::Probe(_) => "liveness probe",
        }
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
