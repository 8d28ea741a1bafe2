//! Configuration loading for axon-smoke.
//!
//! The config file is optional: when the default path does not exist the
//! built-in defaults apply. Command-line flags are layered on top.

use anyhow::{Context, Result};
use smoke_core::{HarnessConfig, QuorumPolicy};
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "axon-smoke.toml";

/// Values from the command line that override the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Source checkout directory.
    pub source: Option<PathBuf>,
    /// Deployment template directory.
    pub deploy_dir: Option<PathBuf>,
    /// Quorum policy for the liveness check.
    pub quorum: Option<QuorumPolicy>,
    /// Require the checkout to be on the configured branch.
    pub require_branch: bool,
    /// Keep the per-run workspace after teardown.
    pub keep_workspace: bool,
}

/// Load the effective configuration.
///
/// An explicitly named file must exist; the default path is optional.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                HarnessConfig::from_file(default)
                    .with_context(|| format!("Failed to load config from {}", default.display()))?
            } else {
                HarnessConfig::default()
            }
        }
    };

    apply(&mut config, overrides);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Layer command-line overrides onto `config`.
pub fn apply(config: &mut HarnessConfig, overrides: &Overrides) {
    if let Some(source) = &overrides.source {
        config.source.dir = source.clone();
    }
    if let Some(dir) = &overrides.deploy_dir {
        config.deploy.dir = dir.clone();
    }
    if let Some(quorum) = overrides.quorum {
        config.liveness.quorum = quorum;
    }
    if overrides.require_branch {
        config.source.require_branch = true;
    }
    if overrides.keep_workspace {
        config.deploy.keep_workspace = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.toml");

        let err = load(Some(&path), &Overrides::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("nope.toml"));
    }

    #[test]
    fn overrides_win_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("axon-smoke.toml");
        std::fs::write(
            &path,
            r#"
[deploy]
dir = "/srv/deploy"

[liveness]
quorum = "all"
"#,
        )
        .unwrap();

        let config = load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.deploy.dir, PathBuf::from("/srv/deploy"));
        assert_eq!(config.liveness.quorum, QuorumPolicy::All);

        let overrides = Overrides {
            deploy_dir: Some(PathBuf::from("/tmp/other")),
            quorum: Some(QuorumPolicy::AtLeast(2)),
            require_branch: true,
            ..Default::default()
        };
        let config = load(Some(&path), &overrides).unwrap();
        assert_eq!(config.deploy.dir, PathBuf::from("/tmp/other"));
        assert_eq!(config.liveness.quorum, QuorumPolicy::AtLeast(2));
        assert!(config.source.require_branch);
    }

    #[test]
    fn apply_leaves_unset_fields() {
        let mut config = HarnessConfig::default();
        apply(&mut config, &Overrides::default());
        assert_eq!(config.liveness.quorum, QuorumPolicy::Any);
        assert_eq!(config.source.dir, PathBuf::from("."));
        assert!(!config.deploy.keep_workspace);
    }
}
