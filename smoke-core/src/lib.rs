//! # axon-smoke-core
//!
//! Build, deploy and liveness-check harness for Axon test clusters.
//!
//! One smoke run walks a fixed, linear sequence:
//! - Acquire the source checkout and resolve its commit
//! - Authenticate to the container registry
//! - Build and push the node image
//! - Prepare a deployment workspace (cleanup, descriptor rewrite, config seeding)
//! - Start the compose cluster and list its status
//! - Settle until the cluster shows progress (or a timeout passes)
//! - Check each node's log tail for the target-height marker
//! - Tear the cluster down, unconditionally
//! - Report pass/fail against the configured quorum
//!
//! ## Architecture
//!
//! ```text
//!   source ──► registry ──► image ──► workspace ──► cluster ──► settle
//!                                        │            │           │
//!                                   descriptor      status      probe
//!                                                                 │
//!            report ◄── teardown ◄──────────────────────────── liveness
//! ```
//!
//! Every external program goes through [`command::CommandRunner`], so the
//! whole sequence can run against [`command::MockRunner`] in tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod harness;
pub mod image;
pub mod liveness;
pub mod probe;
pub mod registry;
pub mod settle;
pub mod source;
pub mod status;
pub mod workspace;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use harness::{RunSummary, SmokeHarness};
pub use liveness::{LivenessReport, NodeOutcome, NodeReport, QuorumPolicy};

/// Message printed when the quorum of nodes reached the target height.
pub const PASS_MESSAGE: &str = "axon chain works well";

/// Message printed when the quorum was not met.
pub const FAIL_MESSAGE: &str = "axon chain has some issues, please have a check";
