//! # axon-smoke
//!
//! Builds an Axon image, deploys a four-node cluster with Docker Compose and
//! checks that the chain makes progress.
//!
//! ## Commands
//!
//! - `run`: Full pipeline (build, deploy, settle, check, teardown)
//! - `build`: Acquire the source, log in, build and push the image
//! - `prepare`: Prepare a deployment workspace and print its path
//! - `check`: Evaluate existing node logs
//! - `config`: Print the effective configuration
//!
//! ## Exit codes
//!
//! - `0`: the quorum of nodes reached the target height
//! - `1`: the quorum was not met
//! - `2`: the run aborted before a verdict
//!
//! ## Example
//!
//! ```bash
//! # CI run from the checkout root
//! axon-smoke run
//!
//! # Re-check logs of a kept workspace, requiring every node
//! axon-smoke check --workspace /tmp/axon-smoke/run-1a2b3c --quorum all
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use smoke_core::QuorumPolicy;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{build, check, prepare, run, show_config};
use config::Overrides;

/// Exit code for runs that abort before a verdict.
const EXIT_ERROR: u8 = 2;

/// Build, deploy and smoke-test an Axon cluster.
#[derive(Parser, Debug)]
#[command(name = "axon-smoke")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: axon-smoke.toml if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Source checkout directory
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Deployment template directory
    #[arg(long, global = true)]
    deploy_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full smoke test
    Run {
        /// Healthy nodes required: any, all or a count
        #[arg(long)]
        quorum: Option<QuorumPolicy>,

        /// Fail unless the checkout is on the configured branch
        #[arg(long)]
        require_branch: bool,

        /// Keep the per-run workspace after teardown
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Build and push the node image only
    Build {
        /// Fail unless the checkout is on the configured branch
        #[arg(long)]
        require_branch: bool,
    },

    /// Prepare a deployment workspace and print its path
    Prepare,

    /// Check node logs in an existing workspace
    Check {
        /// Workspace to inspect (default: the deployment template)
        #[arg(long, short)]
        workspace: Option<PathBuf>,

        /// Healthy nodes required: any, all or a count
        #[arg(long)]
        quorum: Option<QuorumPolicy>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut overrides = Overrides {
        source: cli.source,
        deploy_dir: cli.deploy_dir,
        ..Default::default()
    };

    match cli.command {
        Commands::Run {
            quorum,
            require_branch,
            keep_workspace,
        } => {
            overrides.quorum = quorum;
            overrides.require_branch = require_branch;
            overrides.keep_workspace = keep_workspace;
            let config = config::load(cli.config.as_deref(), &overrides)?;
            run::run(config).await
        }
        Commands::Build { require_branch } => {
            overrides.require_branch = require_branch;
            let config = config::load(cli.config.as_deref(), &overrides)?;
            build::run(config).await
        }
        Commands::Prepare => {
            let config = config::load(cli.config.as_deref(), &overrides)?;
            prepare::run(config).await
        }
        Commands::Check { workspace, quorum } => {
            overrides.quorum = quorum;
            let config = config::load(cli.config.as_deref(), &overrides)?;
            check::run(&config, workspace.as_deref()).await
        }
        Commands::Config => {
            let config = config::load(cli.config.as_deref(), &overrides)?;
            show_config::run(&config)
        }
    }
}

/// Install the log subscriber. `RUST_LOG` wins over `-v`.
///
/// Logs go to stderr so stdout carries only the verdict.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "axon_smoke=debug"
    } else {
        "axon_smoke=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_quorum_flag() {
        let cli = Cli::parse_from(["axon-smoke", "check", "--quorum", "3"]);
        match cli.command {
            Commands::Check { quorum, .. } => assert_eq!(quorum, Some(QuorumPolicy::AtLeast(3))),
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["axon-smoke", "run", "--quorum", "0"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["axon-smoke", "run", "--deploy-dir", "/srv/deploy", "-v"]);
        assert_eq!(cli.deploy_dir, Some(PathBuf::from("/srv/deploy")));
        assert!(cli.verbose);
    }
}
