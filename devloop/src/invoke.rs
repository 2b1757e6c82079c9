//! Agent and scaffold invocation for one story.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::core::types::Story;
use crate::io::agent::{AgentRequest, AgentRun};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::scaffold::ScaffoldRequest;

/// Run the story's scaffold generator. Failures are logged and swallowed.
#[instrument(skip_all, fields(skill, story_id))]
pub fn invoke_scaffold(ctx: &RunContext<'_>, skill: &str, story_id: &str, log_path: &Path) -> bool {
    let request = ScaffoldRequest {
        workdir: ctx.root().to_path_buf(),
        skill: skill.to_string(),
        story_id: story_id.to_string(),
        log_path: log_path.to_path_buf(),
        timeout: Duration::from_secs(ctx.config.scaffold.timeout_secs),
    };
    match ctx.ports.scaffolder.scaffold(&request) {
        Ok(()) => {
            info!("scaffold completed");
            true
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "scaffold failed, continuing");
            false
        }
    }
}

/// Render the prompt and run the agent once, blocking until it returns.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn invoke_agent(ctx: &RunContext<'_>, story: &Story, log_path: &Path) -> Result<AgentRun> {
    let prompt = build_prompt(ctx, story)?;
    let request = AgentRequest {
        workdir: ctx.root().to_path_buf(),
        story_id: story.id.clone(),
        backlog_path: ctx.paths.backlog_path.clone(),
        prompt,
        log_path: log_path.to_path_buf(),
        timeout: ctx.config.agent_timeout(),
        output_limit_bytes: ctx.config.agent.output_limit_bytes,
    };
    let run = ctx.ports.agent.invoke(&request)?;
    info!(
        exit_code = ?run.exit_code,
        timed_out = run.timed_out,
        duration_ms = run.duration.as_millis() as u64,
        "agent returned"
    );
    Ok(run)
}

pub fn build_prompt(ctx: &RunContext<'_>, story: &Story) -> Result<String> {
    let inputs = PromptInputs {
        story: story.clone(),
        ledger: ctx.ledger().read_all()?,
        conventions: read_conventions(ctx)?,
        backlog_path: relative_display(ctx.root(), &ctx.paths.backlog_path),
        pass_command: format!("devloop pass {}", story.id),
    };
    PromptBuilder::new(ctx.config.prompt_budget_bytes).build(&inputs)
}

fn read_conventions(ctx: &RunContext<'_>) -> Result<Option<String>> {
    let Some(relative) = ctx.config.conventions_path.as_ref() else {
        return Ok(None);
    };
    let path = ctx.root().join(relative);
    if !path.exists() {
        warn!(path = %path.display(), "conventions file not found");
        return Ok(None);
    }
    fs::read_to_string(&path)
        .map(Some)
        .with_context(|| format!("read conventions {}", path.display()))
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
