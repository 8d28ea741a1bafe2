//! Deployment workspace preparation.
//!
//! A workspace is the directory the compose cluster runs from. Preparing it
//! means: removing leftovers from earlier runs (logs and chain data),
//! pointing the descriptor at the freshly built image, and seeding the
//! genesis and per-node configuration files from the source checkout.
//!
//! Isolated workspaces are fresh copies of the deployment template under a
//! per-run directory, so concurrent runs never touch the same paths. Shared
//! workspaces mutate the template in place and hold a lock file for the
//! duration of the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::config::{CopySpec, DeployConfig};
use crate::descriptor::{self, DescriptorError};

/// Lock file name used by shared workspaces.
pub const LOCK_FILE: &str = ".axon-smoke.lock";

/// Errors from preparing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The deployment template directory does not exist.
    #[error("deployment directory not found: {0}")]
    TemplateNotFound(PathBuf),

    /// Another run holds the shared workspace.
    #[error("workspace {0} is locked by another run (remove the lock file if stale)")]
    Locked(PathBuf),

    /// A cleanup pattern would leave the workspace.
    #[error("invalid cleanup pattern: {0}")]
    InvalidPattern(String),

    /// One or more seed sources are missing.
    #[error("missing seed files: {}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MissingSeeds(Vec<PathBuf>),

    /// A seed file does not parse.
    #[error("invalid seed file {path}: {reason}")]
    InvalidSeed {
        /// Seed source path.
        path: PathBuf,
        /// Parser error.
        reason: String,
    },

    /// Descriptor rewrite failed.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Filesystem error.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A cleanup pattern: a directory plus either an exact name or a name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanPattern {
    /// Directory, relative to the workspace root.
    pub parent: PathBuf,
    /// Entry name or name prefix.
    pub name: String,
    /// True when `name` is a prefix (pattern ended in `*`).
    pub prefix: bool,
}

impl CleanPattern {
    /// Parse `dir/name*` style patterns.
    pub fn parse(pattern: &str) -> Result<Self, WorkspaceError> {
        let path = Path::new(pattern);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if pattern.is_empty() || escapes {
            return Err(WorkspaceError::InvalidPattern(pattern.to_string()));
        }

        let file = path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| WorkspaceError::InvalidPattern(pattern.to_string()))?;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let (name, prefix) = match file.strip_suffix('*') {
            Some(stem) => (stem.to_string(), true),
            None => (file.to_string(), false),
        };
        if name.contains('*') || (prefix && name.is_empty()) {
            return Err(WorkspaceError::InvalidPattern(pattern.to_string()));
        }

        Ok(Self {
            parent,
            name,
            prefix,
        })
    }

    /// Whether an entry named `entry` in `parent` matches.
    pub fn matches(&self, entry: &str) -> bool {
        if self.prefix {
            entry.starts_with(&self.name)
        } else {
            entry == self.name
        }
    }
}

/// Holds a shared workspace for one run; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock in `dir`, failing if another run holds it.
    pub fn acquire(dir: &Path, run_id: &str) -> Result<Self, WorkspaceError> {
        let path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::Locked(dir.to_path_buf()));
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        writeln!(file, "run={} pid={}", run_id, std::process::id()).map_err(io_err(&path))?;
        Ok(Self { path })
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), "failed to release workspace lock: {}", e);
        }
    }
}

/// A deployment workspace for one run.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    isolated: bool,
    keep: bool,
    _lock: Option<WorkspaceLock>,
}

impl Workspace {
    /// Open the workspace for run `run_id`.
    ///
    /// Isolated mode copies `template` into `<runs_dir>/run-<run_id>`,
    /// skipping entries matched by the cleanup patterns. Shared mode locks
    /// `template` and uses it directly.
    pub fn open(template: &Path, config: &DeployConfig, run_id: &str) -> Result<Self, WorkspaceError> {
        if !template.is_dir() {
            return Err(WorkspaceError::TemplateNotFound(template.to_path_buf()));
        }

        if !config.isolate {
            let lock = WorkspaceLock::acquire(template, run_id)?;
            tracing::info!(workspace = %template.display(), "using shared workspace");
            return Ok(Self {
                root: template.to_path_buf(),
                isolated: false,
                keep: true,
                _lock: Some(lock),
            });
        }

        let runs_dir = config
            .runs_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("axon-smoke"));
        let root = runs_dir.join(format!("run-{}", run_id));
        let patterns = parse_patterns(&config.clean)?;

        copy_tree(template, &root, Path::new(""), &patterns)?;
        tracing::info!(
            template = %template.display(),
            workspace = %root.display(),
            "created isolated workspace"
        );

        Ok(Self {
            root,
            isolated: true,
            keep: config.keep_workspace,
            _lock: None,
        })
    }

    /// Workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether this is a per-run copy.
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Resolve a workspace-relative path.
    pub fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Remove every path matched by `patterns`. Missing paths are fine.
    ///
    /// Returns the removed paths.
    pub fn clean(&self, patterns: &[String]) -> Result<Vec<PathBuf>, WorkspaceError> {
        let mut removed = Vec::new();
        for pattern in parse_patterns(patterns)? {
            let parent = self.root.join(&pattern.parent);
            let entries = match fs::read_dir(&parent) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&parent)(e)),
            };

            for entry in entries {
                let entry = entry.map_err(io_err(&parent))?;
                let name = entry.file_name();
                if !pattern.matches(&name.to_string_lossy()) {
                    continue;
                }
                let path = entry.path();
                remove_path(&path)?;
                removed.push(path);
            }
        }

        tracing::info!(removed = removed.len(), "cleaned workspace");
        Ok(removed)
    }

    /// Point the workspace descriptor at `image`.
    pub fn rewrite_descriptor(
        &self,
        descriptor: &Path,
        image: &str,
        services: &[String],
    ) -> Result<Vec<String>, WorkspaceError> {
        Ok(descriptor::rewrite_image(
            &self.path(descriptor),
            image,
            services,
        )?)
    }

    /// Copy configuration files from `source` into the workspace.
    ///
    /// All sources are checked (existence, and JSON/TOML syntax by
    /// extension) before anything is copied, so a bad seed leaves the
    /// workspace untouched. Existing destinations are overwritten.
    pub fn seed(&self, source: &Path, seeds: &[CopySpec]) -> Result<(), WorkspaceError> {
        let missing: Vec<PathBuf> = seeds
            .iter()
            .map(|s| source.join(&s.from))
            .filter(|p| !p.is_file())
            .collect();
        if !missing.is_empty() {
            return Err(WorkspaceError::MissingSeeds(missing));
        }

        for seed in seeds {
            validate_seed(&source.join(&seed.from))?;
        }

        for seed in seeds {
            let from = source.join(&seed.from);
            let to = self.path(&seed.to);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            fs::copy(&from, &to).map_err(io_err(&from))?;
            tracing::debug!(from = %from.display(), to = %to.display(), "seeded");
        }

        tracing::info!(files = seeds.len(), "seeded configuration");
        Ok(())
    }

    /// Run every preparation step in order: clean, rewrite, seed.
    pub fn prepare(&self, config: &DeployConfig, source: &Path, image: &str) -> Result<(), WorkspaceError> {
        self.clean(&config.clean)?;
        self.rewrite_descriptor(&config.descriptor, image, &config.services)?;
        self.seed(source, &config.seed)?;
        Ok(())
    }

    /// Release the workspace; isolated copies are deleted unless kept.
    pub fn dispose(self) -> Result<(), WorkspaceError> {
        if self.isolated && !self.keep {
            remove_path(&self.root)?;
            tracing::info!(workspace = %self.root.display(), "removed isolated workspace");
        } else {
            tracing::info!(workspace = %self.root.display(), "workspace kept");
        }
        Ok(())
    }
}

fn parse_patterns(patterns: &[String]) -> Result<Vec<CleanPattern>, WorkspaceError> {
    patterns.iter().map(|p| CleanPattern::parse(p)).collect()
}

fn remove_path(path: &Path) -> Result<(), WorkspaceError> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(io_err(path))
}

fn validate_seed(path: &Path) -> Result<(), WorkspaceError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext != "json" && ext != "toml" {
        return Ok(());
    }

    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let invalid = |reason: String| WorkspaceError::InvalidSeed {
        path: path.to_path_buf(),
        reason,
    };
    match ext {
        "json" => serde_json::from_str::<serde_json::Value>(&content)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        _ => toml::from_str::<toml::Table>(&content)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
    }
}

/// Recursively copy `src` into `dst`, skipping top-down matches of `skip`.
fn copy_tree(
    src: &Path,
    dst: &Path,
    relative: &Path,
    skip: &[CleanPattern],
) -> Result<(), WorkspaceError> {
    fs::create_dir_all(dst).map_err(io_err(dst))?;

    for entry in fs::read_dir(src).map_err(io_err(src))? {
        let entry = entry.map_err(io_err(src))?;
        let name = entry.file_name();
        if name == LOCK_FILE {
            continue;
        }
        let skipped = skip
            .iter()
            .any(|p| p.parent == relative && p.matches(&name.to_string_lossy()));
        if skipped {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(io_err(&from))?;
        if file_type.is_symlink() {
            copy_link(&from, &to)?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to, &relative.join(&name), skip)?;
        } else {
            fs::copy(&from, &to).map_err(io_err(&from))?;
        }
    }
    Ok(())
}

/// Recreate the symlink at `from` as `to`, with the same target.
#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    let target = fs::read_link(from).map_err(io_err(from))?;
    std::os::unix::fs::symlink(&target, to).map_err(io_err(to))
}

/// Recreate the symlink at `from` as `to`, with the same target.
#[cfg(windows)]
fn copy_link(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    let target = fs::read_link(from).map_err(io_err(from))?;
    if from.is_dir() {
        std::os::windows::fs::symlink_dir(&target, to).map_err(io_err(to))
    } else {
        std::os::windows::fs::symlink_file(&target, to).map_err(io_err(to))
    }
}
