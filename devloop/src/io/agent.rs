//! Agent abstraction for story implementation.
//!
//! The [`Agent`] trait decouples the loop from the actual coding agent
//! backend. The agent signals completion only by flipping `passes` in the
//! backlog; its exit status is recorded for diagnostics and nothing else.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::process::{command_from_argv, run_command, write_log};

/// Environment variable carrying the in-flight story id to the agent.
pub const STORY_ID_ENV: &str = "DEVLOOP_STORY_ID";
/// Environment variable carrying the backlog path to the agent.
pub const BACKLOG_ENV: &str = "DEVLOOP_BACKLOG";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    pub story_id: String,
    pub backlog_path: PathBuf,
    pub prompt: String,
    /// Streamed stdout plus the final stdout/stderr log.
    pub log_path: PathBuf,
    /// `None` waits for the agent to exit on its own.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// What happened when the agent ran. Never a completion signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

pub trait Agent {
    /// Run the agent to completion. Errors only when it could not be run at all.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Agent that spawns an external command and writes the prompt to its stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(story_id = %request.story_id, timeout_secs = request.timeout.map(|t| t.as_secs())))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(command = %self.command.join(" "), workdir = %request.workdir.display(), "starting agent");

        let mut cmd = command_from_argv(&self.command)?;
        cmd.current_dir(&request.workdir)
            .env(STORY_ID_ENV, &request.story_id)
            .env(BACKLOG_ENV, &request.backlog_path);

        let output = run_command(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            Some(&request.log_path),
        )
        .with_context(|| format!("run agent {}", self.command.join(" ")))?;

        write_log(
            &request.log_path,
            &output.render_log("agent", request.output_limit_bytes),
        )?;

        if output.timed_out {
            warn!("agent timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited non-zero");
        }

        Ok(AgentRun {
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            duration: output.elapsed,
        })
    }
}
