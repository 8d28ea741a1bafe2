//! CLI command implementations.

use smoke_core::LivenessReport;
use std::process::ExitCode;

pub mod build;
pub mod check;
pub mod prepare;
pub mod run;
pub mod show_config;

/// Print per-node outcomes and the verdict, and map it to an exit code.
pub fn report(report: &LivenessReport) -> ExitCode {
    for r in &report.reports {
        println!("  {:<8} {}", r.node, r.outcome);
    }
    println!(
        "healthy: {}/{} (quorum: {})",
        report.healthy(),
        report.total(),
        report.policy
    );
    println!("{}", report.message());

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
