//! Prepare a deployment workspace without starting the cluster.

use anyhow::Result;
use smoke_core::command::SystemRunner;
use smoke_core::source;
use smoke_core::{HarnessConfig, SmokeHarness};
use std::process::ExitCode;

use super::run::abort;

/// Run the prepare command.
///
/// The workspace is left in place; its path is printed so it can be
/// started by hand or passed to `check --workspace`.
pub async fn run(config: HarnessConfig) -> Result<ExitCode> {
    let harness = SmokeHarness::new(config, SystemRunner);
    let tree = source::acquire(harness.runner(), &harness.config().source)
        .await
        .map_err(|e| abort(e.into()))?;

    let workspace = harness.prepare(&tree).map_err(abort)?;

    println!("Run:       {}", harness.run_id());
    println!("Commit:    {}", tree.short_commit());
    println!("Workspace: {}", workspace.root().display());
    Ok(ExitCode::SUCCESS)
}
