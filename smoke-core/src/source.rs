//! Source checkout acquisition.
//!
//! The smoke run starts from an existing git checkout. This module checks
//! that the checkout is there and resolves the commit being tested.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::SourceConfig;

/// Errors from acquiring the source checkout.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The checkout directory does not exist.
    #[error("source directory not found: {0}")]
    NotFound(PathBuf),

    /// The directory is not a git work tree.
    #[error("not a git checkout: {path}: {reason}")]
    NotARepository {
        /// Checkout path.
        path: PathBuf,
        /// git's explanation.
        reason: String,
    },

    /// The checkout is on a different branch than configured.
    #[error("checkout is on branch {actual}, expected {expected}")]
    WrongBranch {
        /// Branch required by configuration.
        expected: String,
        /// Branch actually checked out.
        actual: String,
    },

    /// git could not be run.
    #[error("git error: {0}")]
    Git(#[from] CommandError),
}

/// A verified source checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    /// Checkout root.
    pub dir: PathBuf,
    /// Full commit hash of `HEAD`.
    pub commit: String,
    /// Checked-out branch (`HEAD` when detached).
    pub branch: String,
}

impl SourceTree {
    /// Abbreviated commit hash for log lines.
    pub fn short_commit(&self) -> &str {
        let end = self.commit.len().min(12);
        &self.commit[..end]
    }
}

/// Verify the checkout and resolve its commit and branch.
pub async fn acquire<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &SourceConfig,
) -> Result<SourceTree, SourceError> {
    let dir = config.dir.clone();
    if !dir.is_dir() {
        return Err(SourceError::NotFound(dir));
    }

    let commit = rev_parse(runner, &dir, &["rev-parse", "HEAD"]).await?;
    let branch = rev_parse(runner, &dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;

    if config.require_branch && branch != config.branch {
        return Err(SourceError::WrongBranch {
            expected: config.branch.clone(),
            actual: branch,
        });
    }

    let tree = SourceTree {
        dir,
        commit,
        branch,
    };
    tracing::info!(
        commit = %tree.short_commit(),
        branch = %tree.branch,
        dir = %tree.dir.display(),
        "source acquired"
    );
    Ok(tree)
}

async fn rev_parse<R: CommandRunner + ?Sized>(
    runner: &R,
    dir: &Path,
    args: &[&str],
) -> Result<String, SourceError> {
    let spec = CommandSpec::new("git")
        .arg("-C")
        .arg(dir.to_string_lossy())
        .args(args.iter().copied());
    let output = runner.run(&spec).await?;
    if !output.success() {
        return Err(SourceError::NotARepository {
            path: dir.to_path_buf(),
            reason: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout.trim().to_string())
}
