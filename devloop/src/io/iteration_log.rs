//! Iteration artifacts under `.devloop/iterations/<run-id>/<iter>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{GateOutcome, IterationOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub story_id: String,
    pub branch: String,
    pub outcome: IterationOutcome,
    pub agent_exit_code: Option<i32>,
    pub agent_timed_out: bool,
    pub gate: Option<GateOutcome>,
    pub changed_files: Vec<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub agent_log_path: PathBuf,
    pub gate_log_path: PathBuf,
    pub scaffold_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(iterations_dir: &Path, run_id: &str, iter: u32) -> Self {
        let dir = iterations_dir.join(run_id).join(iter.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            agent_log_path: dir.join("agent.log"),
            gate_log_path: dir.join("gate.log"),
            scaffold_log_path: dir.join("scaffold.log"),
        }
    }
}

pub fn write_meta(paths: &IterationPaths, meta: &IterationMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;
    let mut buf = serde_json::to_string_pretty(meta).context("serialize iteration meta")?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))
}
