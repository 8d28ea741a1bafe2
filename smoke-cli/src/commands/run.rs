//! Run the full smoke test.

use anyhow::Result;
use smoke_core::command::SystemRunner;
use smoke_core::{HarnessConfig, HarnessError, SmokeHarness};
use std::process::ExitCode;

/// Run the run command.
pub async fn run(config: HarnessConfig) -> Result<ExitCode> {
    let harness = SmokeHarness::new(config, SystemRunner);
    let summary = harness.run().await.map_err(abort)?;

    println!("=== axon-smoke run ===");
    println!("Run:       {}", summary.run_id);
    println!("Commit:    {}", summary.commit);
    println!("Project:   {}", summary.project);
    println!("Workspace: {}", summary.workspace.display());
    println!(
        "Settled:   {}s ({})",
        summary.settle.elapsed.as_secs(),
        if summary.settle.ready {
            "ready"
        } else {
            "not ready"
        }
    );
    Ok(super::report(&summary.report))
}

/// Wrap a harness error with the step it aborted.
pub(crate) fn abort(e: HarnessError) -> anyhow::Error {
    let stage = e.stage();
    anyhow::Error::new(e).context(format!("Smoke run aborted during {}", stage))
}
