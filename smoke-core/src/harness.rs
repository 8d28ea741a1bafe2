//! Smoke harness: the end-to-end run.
//!
//! Orchestrates the linear sequence: acquire source, registry login, image
//! build/push, workspace preparation, cluster start, settle, liveness
//! check, teardown. Nothing is retried.
//!
//! Teardown runs exactly once for every run that reached `compose up`,
//! after the liveness check and before the verdict, including when the
//! start itself failed.

use std::path::PathBuf;

use crate::cluster::Cluster;
use crate::command::CommandRunner;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::image;
use crate::liveness::LivenessReport;
use crate::probe::{self, build_probe};
use crate::registry::{self, Credentials};
use crate::settle::{settle, Settle, SettleOutcome};
use crate::source::{self, SourceTree};
use crate::status::{log_status, DockerStatus, StatusSource};
use crate::workspace::Workspace;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Commit under test.
    pub commit: String,
    /// Compose project name.
    pub project: String,
    /// Workspace the cluster ran from.
    pub workspace: PathBuf,
    /// Settling result.
    pub settle: SettleOutcome,
    /// Liveness verdict.
    pub report: LivenessReport,
}

impl RunSummary {
    /// Whether the run passed.
    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

/// High-level smoke test orchestrator.
///
/// Owns the configuration, the command runner and an optional container
/// status source. Each harness gets a unique run id; it names the compose
/// project and the isolated workspace.
pub struct SmokeHarness<R: CommandRunner> {
    config: HarnessConfig,
    runner: R,
    status: Option<Box<dyn StatusSource>>,
    credentials: Option<Credentials>,
    run_id: String,
    settle_override: Option<Settle>,
}

impl<R: CommandRunner> SmokeHarness<R> {
    /// Create a harness with a fresh run id.
    ///
    /// Container status comes from the local Docker Engine when a client
    /// can be created; otherwise status listing is skipped.
    pub fn new(config: HarnessConfig, runner: R) -> Self {
        let status = match DockerStatus::connect() {
            Ok(docker) => Some(Box::new(docker) as Box<dyn StatusSource>),
            Err(e) => {
                tracing::warn!("docker status listing unavailable: {}", e);
                None
            }
        };
        let run_id = uuid::Uuid::new_v4().as_simple().to_string()[..12].to_string();

        Self {
            config,
            runner,
            status,
            credentials: None,
            run_id,
            settle_override: None,
        }
    }

    /// Replace the container status source.
    pub fn with_status(mut self, status: Box<dyn StatusSource>) -> Self {
        self.status = Some(status);
        self
    }

    /// Use explicit registry credentials instead of the environment.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Use a fixed run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Override the configured settling strategy.
    pub fn with_settle(mut self, strategy: Settle) -> Self {
        self.settle_override = Some(strategy);
        self
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Effective configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    // ========================================================================
    // Steps 1-3: source, registry, image
    // ========================================================================

    /// Acquire the source, log in to the registry, build and push the image.
    pub async fn build(&self) -> Result<SourceTree> {
        let tree = source::acquire(&self.runner, &self.config.source).await?;

        if self.config.registry.skip_login {
            tracing::info!("registry login skipped");
        } else {
            let credentials = match &self.credentials {
                Some(c) => c.clone(),
                None => Credentials::from_env(&self.config.registry)?,
            };
            registry::login(&self.runner, &self.config.registry, &credentials).await?;
        }

        image::build_and_push(&self.runner, &self.config.image, &tree).await?;
        Ok(tree)
    }

    // ========================================================================
    // Step 4: workspace
    // ========================================================================

    /// Open and prepare the deployment workspace for this run.
    pub fn prepare(&self, tree: &SourceTree) -> Result<Workspace> {
        let deploy = &self.config.deploy;
        let workspace = Workspace::open(&self.config.deploy_dir(), deploy, &self.run_id)?;

        if let Err(e) = workspace.prepare(deploy, &tree.dir, &self.config.image.tag) {
            if let Err(cleanup) = workspace.dispose() {
                tracing::warn!("failed to dispose workspace: {}", cleanup);
            }
            return Err(e.into());
        }
        Ok(workspace)
    }

    // ========================================================================
    // Steps 5-8: cluster, settle, check, teardown
    // ========================================================================

    /// Start the cluster, settle, check liveness and tear down.
    ///
    /// Teardown happens whether or not the start or the check succeeded;
    /// a teardown failure is logged and never replaces the verdict.
    pub async fn deploy_and_check(&self, workspace: &Workspace) -> Result<(SettleOutcome, LivenessReport)> {
        let cluster = Cluster::new(
            &self.config.cluster,
            workspace.root(),
            &self.config.deploy.descriptor,
            &self.run_id,
        );

        let result = self.start_and_check(&cluster, workspace).await;

        if let Err(e) = cluster.down(&self.runner).await {
            tracing::warn!(project = %cluster.project(), "{}", e);
        }

        result
    }

    async fn start_and_check(
        &self,
        cluster: &Cluster,
        workspace: &Workspace,
    ) -> Result<(SettleOutcome, LivenessReport)> {
        cluster.up(&self.runner).await?;

        if let Some(status) = &self.status {
            log_status(status.as_ref(), cluster.project()).await;
        }

        let liveness = &self.config.liveness;
        let probe = build_probe(liveness, workspace.root())?;
        let strategy = self
            .settle_override
            .unwrap_or_else(|| Settle::from_config(&self.config.settle));

        let settled = settle(strategy, probe.as_ref(), &self.config.nodes, liveness.quorum).await;
        let report = probe::check(probe.as_ref(), &self.config.nodes, liveness.quorum).await;
        Ok((settled, report))
    }

    // ========================================================================
    // Full run
    // ========================================================================

    /// Run every step and return the verdict.
    ///
    /// `Err` means the run aborted before a verdict; a cluster that did not
    /// reach the target height is an `Ok` summary whose report failed.
    pub async fn run(&self) -> Result<RunSummary> {
        tracing::info!(run_id = %self.run_id, "smoke run started");

        let tree = self.build().await?;
        let workspace = self.prepare(&tree)?;
        let workspace_root = workspace.root().to_path_buf();

        let outcome = self.deploy_and_check(&workspace).await;

        if let Err(e) = workspace.dispose() {
            tracing::warn!("failed to dispose workspace: {}", e);
        }

        let (settle, report) = outcome?;
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            commit: tree.commit,
            project: crate::cluster::project_name(&self.config.cluster.project_prefix, &self.run_id),
            workspace: workspace_root,
            settle,
            report,
        };

        tracing::info!(
            run_id = %summary.run_id,
            passed = summary.passed(),
            elapsed_secs = summary.settle.elapsed.as_secs(),
            "smoke run finished"
        );
        Ok(summary)
    }
}
