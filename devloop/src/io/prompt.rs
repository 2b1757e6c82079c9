//! Agent prompt builder.
//!
//! The template is split into sections with `<!-- section:KEY required|droppable -->`
//! markers; markers are stripped and empty droppable sections disappear. When
//! the prompt exceeds its byte budget the ledger loses its oldest entries
//! first; the title and `## Codebase Patterns` preamble always stay.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::types::Story;
use crate::io::progress::entry_offsets;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");
const TRUNCATION_MARKER: &str = "[earlier entries truncated]\n";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .unwrap_or_else(|err| panic!("section marker regex: {err}"))
});

/// Everything the agent prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub story: Story,
    /// Full progress ledger text.
    pub ledger: String,
    /// Project conventions document, if configured.
    pub conventions: Option<String>,
    pub backlog_path: String,
    /// Command the agent runs to mark the story passed.
    pub pass_command: String,
}

/// Builds the agent prompt within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Render the prompt. When it exceeds the budget, the oldest ledger
    /// entries are dropped and the prompt re-rendered.
    pub fn build(&self, input: &PromptInputs) -> Result<String> {
        let ledger = input.ledger.trim();
        let prompt = render_sections(input, ledger)?;
        let over = prompt.len().saturating_sub(self.budget_bytes);
        if over == 0 || ledger.is_empty() {
            if over > 0 {
                warn!(budget = self.budget_bytes, len = prompt.len(), "prompt exceeds budget");
            }
            return Ok(prompt);
        }

        let kept = fit_ledger(ledger, ledger.len().saturating_sub(over));
        debug!(
            before_len = ledger.len(),
            after_len = kept.len(),
            "truncated ledger for budget"
        );
        let prompt = render_sections(input, &kept)?;
        if prompt.len() > self.budget_bytes {
            warn!(
                budget = self.budget_bytes,
                len = prompt.len(),
                "required prompt sections exceed budget"
            );
        }
        Ok(prompt)
    }
}

fn render_sections(input: &PromptInputs, ledger: &str) -> Result<String> {
    let rendered = render_template(input, ledger)?;
    Ok(parse_sections(&rendered).join("\n\n"))
}

fn render_template(input: &PromptInputs, ledger: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("agent", AGENT_TEMPLATE)
        .context("load agent template")?;
    let story_json =
        serde_json::to_string_pretty(&input.story).context("serialize story for prompt")?;
    let template = env.get_template("agent")?;
    let rendered = template
        .render(context! {
            story => &input.story,
            story_json => story_json,
            backlog_path => &input.backlog_path,
            pass_command => &input.pass_command,
            ledger => Some(ledger.trim()).filter(|s| !s.is_empty()),
            conventions => input.conventions.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })
        .context("render agent template")?;
    Ok(rendered)
}

/// Split rendered output on section markers. Empty droppable sections vanish.
fn parse_sections(rendered: &str) -> Vec<String> {
    let markers: Vec<(usize, usize, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, end, required)) in markers.iter().enumerate() {
        let next = markers.get(i + 1).map_or(rendered.len(), |m| m.0);
        let content = rendered[*end..next].trim();
        if !content.is_empty() || *required {
            sections.push(content.to_string());
        }
    }
    sections
}

/// Fit the ledger into `allowed` bytes. Everything before the first entry is
/// pinned and whole entries are dropped oldest first. A ledger without entry
/// headers is cut from the front instead.
fn fit_ledger(ledger: &str, allowed: usize) -> String {
    if ledger.len() <= allowed {
        return ledger.to_string();
    }
    let offsets = entry_offsets(ledger);
    let Some(&first) = offsets.first() else {
        return keep_tail(ledger, allowed);
    };
    let preamble = &ledger[..first];
    let room = allowed.saturating_sub(preamble.len() + TRUNCATION_MARKER.len() + 1);
    let start = offsets
        .iter()
        .copied()
        .find(|&at| ledger.len() - at <= room)
        .unwrap_or(ledger.len());
    format!("{preamble}{TRUNCATION_MARKER}\n{}", &ledger[start..])
}

/// Keep roughly the last `allowed` bytes of `content`, cut at a line start.
fn keep_tail(content: &str, allowed: usize) -> String {
    if content.len() <= allowed {
        return content.to_string();
    }
    let room = allowed.saturating_sub(TRUNCATION_MARKER.len());
    let mut start = content.len() - room;
    while !content.is_char_boundary(start) {
        start += 1;
    }
    let tail = &content[start..];
    let tail = match tail.find('\n') {
        Some(pos) if start > 0 => &tail[pos + 1..],
        _ => tail,
    };
    format!("{TRUNCATION_MARKER}{tail}")
}
