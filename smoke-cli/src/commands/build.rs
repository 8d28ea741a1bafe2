//! Acquire the source, log in and build the image.

use anyhow::Result;
use smoke_core::command::SystemRunner;
use smoke_core::{HarnessConfig, SmokeHarness};
use std::process::ExitCode;

use super::run::abort;

/// Run the build command.
pub async fn run(config: HarnessConfig) -> Result<ExitCode> {
    let tag = config.image.tag.clone();
    let push = config.image.push;
    let harness = SmokeHarness::new(config, SystemRunner);

    let tree = harness.build().await.map_err(abort)?;

    println!("Commit: {}", tree.commit);
    println!("Branch: {}", tree.branch);
    println!("Image:  {} ({})", tag, if push { "pushed" } else { "loaded" });
    Ok(ExitCode::SUCCESS)
}
