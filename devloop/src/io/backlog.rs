//! Backlog load/save helpers with schema + invariant validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::invariants::validate_invariants;
use crate::core::selector::next_story_excluding;
use crate::core::types::{Backlog, Story};

pub const BACKLOG_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/backlog/v1.schema.json"
));

/// File-backed backlog. Every read goes back to disk.
#[derive(Debug, Clone)]
pub struct BacklogStore {
    path: PathBuf,
}

impl BacklogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the backlog (schema + invariants).
    pub fn load(&self) -> Result<Backlog> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read backlog {}", self.path.display()))?;
        parse_backlog(&raw).with_context(|| format!("load backlog {}", self.path.display()))
    }

    /// Atomically write the backlog (temp file + rename).
    pub fn save(&self, backlog: &Backlog) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(backlog).context("serialize backlog")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }

    pub fn next_story(&self) -> Result<Option<Story>> {
        self.next_story_excluding(&HashSet::new())
    }

    pub fn next_story_excluding(&self, skip: &HashSet<String>) -> Result<Option<Story>> {
        let backlog = self.load()?;
        Ok(next_story_excluding(&backlog, skip).cloned())
    }

    /// Set `passes = true` for `id`. Idempotent; returns whether the file changed.
    #[instrument(skip_all, fields(id))]
    pub fn mark_passed(&self, id: &str) -> Result<bool> {
        let mut backlog = self.load()?;
        let story = backlog
            .user_stories
            .iter_mut()
            .find(|story| story.id == id)
            .ok_or_else(|| anyhow!("unknown story id '{id}'"))?;
        if story.passes {
            debug!(id, "story already passed");
            return Ok(false);
        }
        story.passes = true;
        self.save(&backlog)?;
        info!(id, "story marked passed");
        Ok(true)
    }

    pub fn remaining_count(&self) -> Result<usize> {
        Ok(self.load()?.remaining_count())
    }

    pub fn total_count(&self) -> Result<usize> {
        Ok(self.load()?.total_count())
    }
}

/// Parse and validate a backlog document: schema conformance + semantic invariants.
pub fn parse_backlog(raw: &str) -> Result<Backlog> {
    let value: Value = serde_json::from_str(raw).context("parse backlog json")?;
    validate_schema(&value)?;
    let backlog: Backlog = serde_json::from_value(value).context("deserialize backlog")?;
    let errors = validate_invariants(&backlog);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(backlog)
}

/// Validate a JSON instance against the embedded backlog schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).context("parse backlog schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile backlog schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("backlog path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp backlog {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace backlog {}", path.display()))?;
    Ok(())
}
