//! Initialization helpers for `.devloop/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::core::types::Backlog;
use crate::io::backlog::BacklogStore;
use crate::io::config::{DevloopConfig, write_config};
use crate::io::progress::ProgressLedger;

/// All canonical paths within `.devloop/` for a project root.
#[derive(Debug, Clone)]
pub struct DevloopPaths {
    pub root: PathBuf,
    pub devloop_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub backlog_path: PathBuf,
    pub config_path: PathBuf,
    pub progress_path: PathBuf,
}

impl DevloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let devloop_dir = root.join(".devloop");
        Self {
            root: root.clone(),
            devloop_dir: devloop_dir.clone(),
            iterations_dir: devloop_dir.join("iterations"),
            gitignore_path: devloop_dir.join(".gitignore"),
            backlog_path: devloop_dir.join("backlog.json"),
            config_path: devloop_dir.join("config.toml"),
            progress_path: devloop_dir.join("progress.md"),
        }
    }
}

/// Options for `init_devloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Rewrite config and `.gitignore` even if `.devloop/` exists.
    pub force: bool,
}

/// Create `.devloop/` scaffolding in `root`.
///
/// Fails if `.devloop/` already exists unless `options.force` is set. Even
/// with force, an existing backlog or ledger is never overwritten.
pub fn init_devloop(root: &Path, options: &InitOptions) -> Result<DevloopPaths> {
    let paths = DevloopPaths::new(root);
    if paths.devloop_dir.exists() && !paths.devloop_dir.is_dir() {
        return Err(anyhow!(
            "devloop init: .devloop exists but is not a directory"
        ));
    }
    if paths.devloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "devloop init: .devloop already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.iterations_dir)
        .with_context(|| format!("create directory {}", paths.iterations_dir.display()))?;
    fs::write(&paths.gitignore_path, DEVLOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &DevloopConfig::default())?;

    if !paths.backlog_path.exists() {
        BacklogStore::new(&paths.backlog_path).save(&empty_backlog(root))?;
    }
    ProgressLedger::new(&paths.progress_path).ensure_initialized()?;

    info!(dir = %paths.devloop_dir.display(), "initialized devloop");
    Ok(paths)
}

fn empty_backlog(root: &Path) -> Backlog {
    let project_name = root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "project".to_string());
    Backlog {
        project_name,
        description: String::new(),
        user_stories: Vec::new(),
    }
}

/// Orchestrator bookkeeping that must never dirty the working tree.
pub const DEVLOOP_GITIGNORE: &str = "iterations/\nprogress.md\n";
