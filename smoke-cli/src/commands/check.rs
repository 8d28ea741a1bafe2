//! Evaluate node logs in an existing workspace.

use anyhow::{Context, Result};
use smoke_core::config::HarnessConfig;
use smoke_core::probe;
use std::path::Path;
use std::process::ExitCode;

/// Run the check command.
///
/// Without `--workspace` the deployment template is inspected, which is
/// where a shared-mode run leaves its logs.
pub async fn run(config: &HarnessConfig, workspace: Option<&Path>) -> Result<ExitCode> {
    let root = match workspace {
        Some(dir) => dir.to_path_buf(),
        None => config.deploy_dir(),
    };
    if !root.is_dir() {
        anyhow::bail!("Workspace not found: {}", root.display());
    }

    let probe = probe::build_probe(&config.liveness, &root).context("Failed to create probe")?;
    let report = probe::check(probe.as_ref(), &config.nodes, config.liveness.quorum).await;

    println!("=== axon-smoke check ===");
    println!("Workspace: {}", root.display());
    Ok(super::report(&report))
}
