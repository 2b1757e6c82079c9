//! Project quality gate (lint/build/test) run after the agent.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::GateOutcome;
use crate::io::process::{command_from_argv, run_command, write_log};

/// Abstraction over gate execution so tests can script outcomes.
pub trait QualityGate {
    /// Run the gate in `workdir`, writing its log to `log_path`.
    fn check(&self, workdir: &Path, log_path: &Path) -> Result<GateOutcome>;
}

/// Runs the configured gate command. An empty command skips the gate.
#[derive(Debug, Clone)]
pub struct CommandGate {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGate {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }
}

impl QualityGate for CommandGate {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn check(&self, workdir: &Path, log_path: &Path) -> Result<GateOutcome> {
        if self.command.is_empty() {
            info!("no gate command configured, skipping");
            return Ok(GateOutcome::Skipped);
        }
        info!(command = %self.command.join(" "), "running quality gate");
        let mut cmd = command_from_argv(&self.command)?;
        cmd.current_dir(workdir);

        let output = run_command(cmd, None, Some(self.timeout), self.output_limit_bytes, None)
            .with_context(|| format!("run gate {}", self.command.join(" ")))?;
        write_log(log_path, &output.render_log("gate", self.output_limit_bytes))?;

        if output.success() {
            info!("quality gate passed");
            Ok(GateOutcome::Pass)
        } else {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "quality gate failed");
            Ok(GateOutcome::Fail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(script: &str) -> CommandGate {
        CommandGate::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(10),
            10_000,
        )
    }

    #[test]
    fn exit_status_decides_the_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("gate.log");

        assert_eq!(
            gate("echo ok").check(temp.path(), &log).expect("gate"),
            GateOutcome::Pass
        );
        assert_eq!(
            gate("echo broken >&2; exit 1")
                .check(temp.path(), &log)
                .expect("gate"),
            GateOutcome::Fail
        );
        let contents = std::fs::read_to_string(&log).expect("log");
        assert!(contents.contains("broken"));
    }

    #[test]
    fn empty_command_skips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = CommandGate::new(Vec::new(), Duration::from_secs(1), 100);
        assert_eq!(
            gate.check(temp.path(), &temp.path().join("gate.log"))
                .expect("gate"),
            GateOutcome::Skipped
        );
    }
}
