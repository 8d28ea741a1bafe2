//! Print the effective configuration.

use anyhow::{Context, Result};
use smoke_core::HarnessConfig;
use std::process::ExitCode;

/// Run the config command.
pub fn run(config: &HarnessConfig) -> Result<ExitCode> {
    let toml = config
        .to_toml()
        .context("Failed to serialize configuration")?;
    print!("{}", toml);
    Ok(ExitCode::SUCCESS)
}
