//! Configuration loading for axon-smoke.
//!
//! Configuration is loaded from a TOML file (default: `axon-smoke.toml`).
//! Every field has a default matching the stock Axon smoke workflow, so an
//! empty file (or no file at all) describes the standard four-node run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::liveness::{height_marker, QuorumPolicy};

/// Root configuration for a smoke run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Source checkout configuration.
    #[serde(default)]
    pub source: SourceConfig,
    /// Registry authentication configuration.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Image build configuration.
    #[serde(default)]
    pub image: ImageConfig,
    /// Deployment workspace configuration.
    #[serde(default)]
    pub deploy: DeployConfig,
    /// Compose cluster configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Liveness check configuration.
    #[serde(default)]
    pub liveness: LivenessConfig,
    /// Settling strategy configuration.
    #[serde(default)]
    pub settle: SettleConfig,
    /// Cluster nodes, in order.
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeSpec>,
}

/// Source checkout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the Axon checkout (default: current directory).
    #[serde(default = "default_source_dir")]
    pub dir: PathBuf,
    /// Branch the smoke run is meant for (default: `main`).
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Refuse to run when the checkout is on another branch (default: false).
    #[serde(default)]
    pub require_branch: bool,
}

/// Registry authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host (default: Docker Hub).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Environment variable holding the username.
    #[serde(default = "default_username_env")]
    pub username_env: String,
    /// Environment variable holding the access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Skip `docker login` when the daemon is already authenticated.
    #[serde(default)]
    pub skip_login: bool,
}

/// Image build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Published image reference (default: `axonweb3/axon:start-test`).
    #[serde(default = "default_image_tag")]
    pub tag: String,
    /// Build file, relative to the source checkout.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,
    /// Build context, relative to the source checkout.
    #[serde(default = "default_context")]
    pub context: PathBuf,
    /// Target platform (default: `linux/amd64`).
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Push to the registry; when false the image is loaded locally.
    #[serde(default = "default_true")]
    pub push: bool,
}

/// One configuration file seeded into the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySpec {
    /// Source path, relative to the source checkout.
    pub from: PathBuf,
    /// Destination path, relative to the deployment workspace.
    pub to: PathBuf,
}

/// Deployment workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Deployment template directory (default: `../docker-deploy`).
    #[serde(default = "default_deploy_dir")]
    pub dir: PathBuf,
    /// Compose descriptor, relative to the workspace.
    #[serde(default = "default_descriptor")]
    pub descriptor: PathBuf,
    /// Services whose image is rewritten (empty = every service with an image).
    #[serde(default)]
    pub services: Vec<String>,
    /// Paths removed before each run. A trailing `*` matches by name prefix.
    #[serde(default = "default_clean")]
    pub clean: Vec<String>,
    /// Configuration files seeded from the source checkout.
    #[serde(default = "default_seed")]
    pub seed: Vec<CopySpec>,
    /// Copy the template into a fresh per-run directory (default: true).
    #[serde(default = "default_true")]
    pub isolate: bool,
    /// Parent of per-run directories (default: system temp dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_dir: Option<PathBuf>,
    /// Keep the per-run directory after teardown (default: false).
    #[serde(default)]
    pub keep_workspace: bool,
}

/// Compose cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Compose invocation (default: `docker compose`).
    #[serde(default = "default_compose")]
    pub compose: Vec<String>,
    /// Prefix of the per-run compose project name.
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
}

/// How node liveness is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Search each node's log tail for the marker.
    #[default]
    Log,
    /// Ask each node's JSON-RPC endpoint for its block number.
    Rpc,
}

/// Liveness check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Block height the cluster must reach (default: 200).
    #[serde(default = "default_target_height")]
    pub target_height: u64,
    /// Literal marker override (default: `state goto new height <target>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    /// Number of trailing log lines inspected (default: 100).
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Healthy nodes required (default: any).
    #[serde(default)]
    pub quorum: QuorumPolicy,
    /// Probe used for each node (default: log).
    #[serde(default)]
    pub probe: ProbeKind,
    /// Per-request timeout for RPC probes in seconds (default: 5).
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

impl LivenessConfig {
    /// The literal marker searched for in node logs.
    pub fn marker(&self) -> String {
        self.marker
            .clone()
            .unwrap_or_else(|| height_marker(self.target_height))
    }
}

/// Settling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleMode {
    /// Poll probes until the quorum holds or the timeout passes.
    #[default]
    Poll,
    /// Sleep the full timeout unconditionally.
    Fixed,
}

/// Settling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Strategy (default: poll).
    #[serde(default)]
    pub mode: SettleMode,
    /// Upper bound (poll) or exact duration (fixed) in seconds (default: 700).
    #[serde(default = "default_settle_timeout")]
    pub timeout_secs: u64,
    /// Delay between poll rounds in seconds (default: 10).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

/// One cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name used in reports.
    pub name: String,
    /// Log file, relative to the deployment workspace.
    pub log: PathBuf,
    /// JSON-RPC endpoint, used by the RPC probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
}

/// Number of nodes in the stock cluster.
pub const DEFAULT_NODE_COUNT: usize = 4;

// Default value functions
fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_username_env() -> String {
    "DOCKER_HUB_USERNAME".to_string()
}

fn default_token_env() -> String {
    "DOCKER_HUB_ACCESS_TOKEN".to_string()
}

fn default_image_tag() -> String {
    "axonweb3/axon:start-test".to_string()
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("./Dockerfile")
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_platform() -> String {
    "linux/amd64".to_string()
}

fn default_true() -> bool {
    true
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from("../docker-deploy")
}

fn default_descriptor() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_clean() -> Vec<String> {
    vec!["logs*".to_string(), "devtools/chain/data*".to_string()]
}

fn default_seed() -> Vec<CopySpec> {
    let mut seed = vec![CopySpec {
        from: PathBuf::from("devtools/chain/geneses/genesis_multi_nodes_short_epoch_len.json"),
        to: PathBuf::from("devtools/chain/genesis_multi_nodes.json"),
    }];
    seed.extend((1..=DEFAULT_NODE_COUNT).map(|i| CopySpec {
        from: PathBuf::from(format!("devtools/chain/k8s/node_{}.toml", i)),
        to: PathBuf::from(format!("devtools/chain/node_{}.toml", i)),
    }));
    seed
}

fn default_compose() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}

fn default_project_prefix() -> String {
    "axon-smoke".to_string()
}

fn default_target_height() -> u64 {
    200
}

fn default_tail_lines() -> usize {
    100
}

fn default_rpc_timeout() -> u64 {
    5
}

fn default_settle_timeout() -> u64 {
    700
}

fn default_poll_interval() -> u64 {
    10
}

fn default_nodes() -> Vec<NodeSpec> {
    (1..=DEFAULT_NODE_COUNT)
        .map(|i| NodeSpec {
            name: format!("node{}", i),
            log: PathBuf::from(format!("logs{}/axon.log", i)),
            rpc_url: None,
        })
        .collect()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            registry: RegistryConfig::default(),
            image: ImageConfig::default(),
            deploy: DeployConfig::default(),
            cluster: ClusterConfig::default(),
            liveness: LivenessConfig::default(),
            settle: SettleConfig::default(),
            nodes: default_nodes(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: default_source_dir(),
            branch: default_branch(),
            require_branch: false,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server: None,
            username_env: default_username_env(),
            token_env: default_token_env(),
            skip_login: false,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            tag: default_image_tag(),
            dockerfile: default_dockerfile(),
            context: default_context(),
            platform: default_platform(),
            push: true,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            dir: default_deploy_dir(),
            descriptor: default_descriptor(),
            services: Vec::new(),
            clean: default_clean(),
            seed: default_seed(),
            isolate: true,
            runs_dir: None,
            keep_workspace: false,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            compose: default_compose(),
            project_prefix: default_project_prefix(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            target_height: default_target_height(),
            marker: None,
            tail_lines: default_tail_lines(),
            quorum: QuorumPolicy::default(),
            probe: ProbeKind::default(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            mode: SettleMode::default(),
            timeout_secs: default_settle_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node is required".into()));
        }
        if self.cluster.compose.is_empty() {
            return Err(ConfigError::Invalid("cluster.compose must name a program".into()));
        }
        self.liveness
            .quorum
            .check_nodes(self.nodes.len())
            .map_err(ConfigError::Invalid)?;
        if self.liveness.tail_lines == 0 {
            return Err(ConfigError::Invalid("liveness.tail_lines must be positive".into()));
        }
        if self.settle.mode == SettleMode::Poll && self.settle.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "settle.poll_interval_secs must be positive".into(),
            ));
        }
        if self.liveness.probe == ProbeKind::Rpc {
            if let Some(node) = self.nodes.iter().find(|n| n.rpc_url.is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "rpc probe selected but node {} has no rpc_url",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Deployment template directory, resolved against the source checkout
    /// when relative.
    pub fn deploy_dir(&self) -> PathBuf {
        resolve(&self.source.dir, &self.deploy.dir)
    }

    /// Serialize the effective configuration back to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Join `path` onto `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
