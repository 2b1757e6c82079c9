//! Explicit per-run context handed to every orchestration component.

use std::path::Path;

use chrono::Utc;

use crate::io::agent::Agent;
use crate::io::backlog::BacklogStore;
use crate::io::clock::Clock;
use crate::io::code_host::CodeHost;
use crate::io::config::DevloopConfig;
use crate::io::gate::QualityGate;
use crate::io::git::VersionControl;
use crate::io::init::DevloopPaths;
use crate::io::progress::ProgressLedger;
use crate::io::scaffold::Scaffolder;

/// External capabilities the loop drives.
#[derive(Clone, Copy)]
pub struct Ports<'a> {
    pub vcs: &'a dyn VersionControl,
    pub host: &'a dyn CodeHost,
    pub agent: &'a dyn Agent,
    pub scaffolder: &'a dyn Scaffolder,
    pub gate: &'a dyn QualityGate,
    pub clock: &'a dyn Clock,
}

/// Built once per `devloop run`.
pub struct RunContext<'a> {
    pub run_id: String,
    pub paths: DevloopPaths,
    pub config: DevloopConfig,
    pub ports: Ports<'a>,
}

impl<'a> RunContext<'a> {
    pub fn new(root: &Path, config: DevloopConfig, ports: Ports<'a>) -> Self {
        Self {
            run_id: new_run_id(),
            paths: DevloopPaths::new(root),
            config,
            ports,
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn backlog(&self) -> BacklogStore {
        BacklogStore::new(&self.paths.backlog_path)
    }

    pub fn ledger(&self) -> ProgressLedger {
        ProgressLedger::new(&self.paths.progress_path)
    }

    /// `<branch_prefix><story id>`.
    pub fn branch_for(&self, story_id: &str) -> String {
        format!("{}{}", self.config.branch_prefix, story_id)
    }
}

/// Sortable, filesystem-safe run identifier (UTC timestamp).
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_path_safe() {
        let id = new_run_id();
        assert!(id.ends_with('Z'));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
