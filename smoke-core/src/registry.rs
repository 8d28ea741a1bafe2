//! Container registry authentication.
//!
//! Credentials come from two environment variables (Docker Hub username and
//! access token by default). The token is handed to `docker login` on stdin
//! so it never shows up in a process listing or a log line.

use std::fmt;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::RegistryConfig;

/// Errors from registry authentication.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A credential environment variable is unset or empty.
    #[error("missing registry credential: ${0} is not set")]
    MissingCredential(String),

    /// `docker login` was rejected.
    #[error("registry login failed: {0}")]
    LoginFailed(#[from] CommandError),
}

/// Registry username and access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Registry username.
    pub username: String,
    token: String,
}

impl Credentials {
    /// Create credentials from explicit values.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Read credentials from the environment variables named in `config`.
    pub fn from_env(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let username = read_env(&config.username_env)?;
        let token = read_env(&config.token_env)?;
        Ok(Self { username, token })
    }

    /// The access token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn read_env(name: &str) -> Result<String, RegistryError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(RegistryError::MissingCredential(name.to_string())),
    }
}

/// Build the `docker login` invocation for `credentials`.
pub fn login_command(config: &RegistryConfig, credentials: &Credentials) -> CommandSpec {
    let mut spec = CommandSpec::new("docker").args([
        "login",
        "--username",
        credentials.username.as_str(),
        "--password-stdin",
    ]);
    if let Some(server) = &config.server {
        spec = spec.arg(server.as_str());
    }
    spec.stdin(credentials.token().as_bytes().to_vec())
}

/// Authenticate the local Docker daemon against the registry.
///
/// Failure is fatal for the run; there is no retry.
pub async fn login<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &RegistryConfig,
    credentials: &Credentials,
) -> Result<(), RegistryError> {
    let registry = config.server.as_deref().unwrap_or("docker.io");
    tracing::info!(registry, username = %credentials.username, "logging in to registry");

    runner.run_ok(&login_command(config, credentials)).await?;
    Ok(())
}
