//! Loop configuration stored under `.devloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::compose::DEFAULT_CHANGED_FILES_LIMIT;

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans and checked in. Missing fields
/// default to the values below; CLI flags override them per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevloopConfig {
    /// Integration branch every story branch starts from and merges into.
    pub main_branch: String,
    pub remote: String,
    /// Story branches are named `<branch_prefix><story id>`.
    pub branch_prefix: String,
    /// Delete a same-named local/remote branch instead of aborting the story.
    pub force_recreate: bool,
    pub max_iterations: u32,
    pub merge_enabled: bool,
    pub merge_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub changed_files_limit: usize,
    /// Byte budget for the rendered agent prompt.
    pub prompt_budget_bytes: usize,
    /// Project conventions document inlined into the agent policy, relative to the repo root.
    pub conventions_path: Option<PathBuf>,

    pub agent: AgentConfig,
    pub gate: GateConfig,
    pub scaffold: ScaffoldConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent command; the prompt is written to its stdin.
    pub command: Vec<String>,
    /// Unset means the agent runs until it exits.
    pub timeout_secs: Option<u64>,
    /// Truncate agent stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Quality gate command (e.g. `["just","ci"]`). Empty disables the gate.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScaffoldConfig {
    /// Scaffolder command, invoked as `<command...> <skill> <story id>`. Empty disables it.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Per-call timeout for `gh` invocations.
    pub timeout_secs: u64,
}

impl Default for DevloopConfig {
    fn default() -> Self {
        Self {
            main_branch: "main".to_string(),
            remote: "origin".to_string(),
            branch_prefix: "story/".to_string(),
            force_recreate: true,
            max_iterations: 10,
            merge_enabled: true,
            merge_timeout_secs: 600,
            poll_interval_secs: 15,
            changed_files_limit: DEFAULT_CHANGED_FILES_LIMIT,
            prompt_budget_bytes: 200_000,
            conventions_path: None,
            agent: AgentConfig::default(),
            gate: GateConfig::default(),
            scaffold: ScaffoldConfig::default(),
            host: HostConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl DevloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.main_branch.trim().is_empty() {
            return Err(anyhow!("main_branch must not be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        if self.branch_prefix.starts_with('/') || self.branch_prefix.contains("..") {
            return Err(anyhow!("branch_prefix is not a valid ref prefix"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == Some(0) {
            return Err(anyhow!("agent.timeout_secs must be > 0 when set"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if !self.gate.command.is_empty() && self.gate.command[0].trim().is_empty() {
            return Err(anyhow!("gate.command must start with a program name"));
        }
        if self.gate.timeout_secs == 0 {
            return Err(anyhow!("gate.timeout_secs must be > 0"));
        }
        if self.gate.output_limit_bytes == 0 {
            return Err(anyhow!("gate.output_limit_bytes must be > 0"));
        }
        if self.scaffold.timeout_secs == 0 {
            return Err(anyhow!("scaffold.timeout_secs must be > 0"));
        }
        if self.host.timeout_secs == 0 {
            return Err(anyhow!("host.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent.timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DevloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<DevloopConfig> {
    if !path.exists() {
        let cfg = DevloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DevloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DevloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DevloopConfig::default());
        assert_eq!(cfg.agent_timeout(), None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = DevloopConfig {
            gate: GateConfig {
                command: vec!["just".to_string(), "ci".to_string()],
                ..GateConfig::default()
            },
            agent: AgentConfig {
                timeout_secs: Some(3600),
                ..AgentConfig::default()
            },
            ..DevloopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_files_fill_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 3\n\n[gate]\ncommand = [\"make\", \"check\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.gate.command, vec!["make", "check"]);
        assert_eq!(cfg.gate.timeout_secs, GateConfig::default().timeout_secs);
        assert_eq!(cfg.main_branch, "main");
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let cfg = DevloopConfig {
            poll_interval_secs: 0,
            ..DevloopConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }
}
