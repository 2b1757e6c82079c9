//! Append-only progress ledger at `.devloop/progress.md`.
//!
//! The ledger is product output: the agent reads it in full every iteration
//! and curates the `Codebase Patterns` section at its top. The loop only ever
//! appends entry blocks:
//!
//! ```text
//! ## 2026-01-05T10:00:00+00:00 | US-001 | PASSED
//!
//! narrative...
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::core::types::OutcomeKeyword;

pub const LEDGER_HEADER: &str = "# Progress Ledger\n\
\n\
## Codebase Patterns\n\
\n\
<!-- Record reusable patterns discovered while implementing stories here. -->\n\
\n";

/// Story id used for run-level entries such as `ALL COMPLETE`.
pub const RUN_ENTRY_ID: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: String,
    pub story_id: String,
    pub keyword: OutcomeKeyword,
    pub narrative: String,
}

impl ProgressEntry {
    /// New entry stamped with the current UTC time.
    pub fn now(story_id: &str, keyword: OutcomeKeyword, narrative: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            story_id: story_id.to_string(),
            keyword,
            narrative: narrative.into(),
        }
    }

    fn render(&self) -> String {
        let mut block = format!(
            "## {} | {} | {}\n\n",
            self.timestamp, self.story_id, self.keyword
        );
        let narrative = self.narrative.trim();
        if !narrative.is_empty() {
            block.push_str(narrative);
            block.push_str("\n\n");
        }
        block
    }
}

#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger with its header if it does not exist yet.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&self.path, LEDGER_HEADER)
            .with_context(|| format!("write ledger {}", self.path.display()))
    }

    /// Append one entry block. Existing content is never rewritten.
    pub fn append(&self, entry: &ProgressEntry) -> Result<()> {
        self.ensure_initialized()?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        file.write_all(entry.render().as_bytes())
            .with_context(|| format!("append ledger {}", self.path.display()))?;
        debug!(story_id = %entry.story_id, keyword = %entry.keyword, "ledger entry appended");
        Ok(())
    }

    /// Full ledger text; empty when the ledger does not exist.
    pub fn read_all(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))
    }

    pub fn entries(&self) -> Result<Vec<ProgressEntry>> {
        Ok(parse_entries(&self.read_all()?))
    }
}

/// Parse entry blocks. Headings that are not entry headers (for example
/// `## Codebase Patterns`) end the previous narrative but are otherwise skipped.
pub fn parse_entries(text: &str) -> Vec<ProgressEntry> {
    let mut entries: Vec<ProgressEntry> = Vec::new();
    let mut current: Option<(ProgressEntry, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some((entry, lines)) = current.take() {
                entries.push(finish(entry, &lines));
            }
            current = parse_header(heading).map(|entry| (entry, Vec::new()));
            continue;
        }
        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((entry, lines)) = current {
        entries.push(finish(entry, &lines));
    }
    entries
}

/// Byte offsets of entry header lines, in file order. Other headings are not
/// entries.
pub fn entry_offsets(text: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut at = 0;
    for line in text.split_inclusive('\n') {
        let is_entry = line
            .strip_prefix("## ")
            .is_some_and(|heading| parse_header(heading.trim_end()).is_some());
        if is_entry {
            offsets.push(at);
        }
        at += line.len();
    }
    offsets
}

fn parse_header(heading: &str) -> Option<ProgressEntry> {
    let mut parts = heading.splitn(3, " | ");
    let timestamp = parts.next()?.trim();
    let story_id = parts.next()?.trim();
    let keyword = OutcomeKeyword::parse(parts.next()?)?;
    Some(ProgressEntry {
        timestamp: timestamp.to_string(),
        story_id: story_id.to_string(),
        keyword,
        narrative: String::new(),
    })
}

fn finish(mut entry: ProgressEntry, lines: &[&str]) -> ProgressEntry {
    entry.narrative = lines.join("\n").trim().to_string();
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, keyword: OutcomeKeyword, narrative: &str) -> ProgressEntry {
        ProgressEntry {
            timestamp: "2026-01-05T10:00:00+00:00".to_string(),
            story_id: id.to_string(),
            keyword,
            narrative: narrative.to_string(),
        }
    }

    #[test]
    fn append_creates_header_and_preserves_existing_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::new(temp.path().join("progress.md"));

        ledger
            .append(&entry("A", OutcomeKeyword::Started, "picked A"))
            .expect("append");
        let first = ledger.read_all().expect("read");
        assert!(first.starts_with(LEDGER_HEADER));

        ledger
            .append(&entry("A", OutcomeKeyword::Passed, "merged #1"))
            .expect("append");
        let second = ledger.read_all().expect("read");
        assert!(second.starts_with(&first));
        assert!(second.ends_with(
            "## 2026-01-05T10:00:00+00:00 | A | PASSED\n\nmerged #1\n\n"
        ));
    }

    #[test]
    fn entries_parse_back_with_multi_word_keywords() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::new(temp.path().join("progress.md"));
        ledger
            .append(&entry("A", OutcomeKeyword::PendingMerge, "line one\nline two"))
            .expect("append");
        ledger
            .append(&entry(RUN_ENTRY_ID, OutcomeKeyword::AllComplete, ""))
            .expect("append");

        let entries = ledger.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].keyword, OutcomeKeyword::PendingMerge);
        assert_eq!(entries[0].narrative, "line one\nline two");
        assert_eq!(entries[1].story_id, "-");
        assert_eq!(entries[1].keyword, OutcomeKeyword::AllComplete);
    }

    #[test]
    fn codebase_patterns_section_is_not_an_entry() {
        let text = format!("{LEDGER_HEADER}- use the mailer helper\n\n");
        assert!(parse_entries(&text).is_empty());
    }

    #[test]
    fn entry_offsets_skip_the_patterns_preamble() {
        let first = entry("A", OutcomeKeyword::Started, "picked A").render();
        let second = entry("A", OutcomeKeyword::Failed, "").render();
        let text = format!("{LEDGER_HEADER}- use the mailer helper\n\n{first}{second}");

        let offsets = entry_offsets(&text);

        let preamble = text.len() - first.len() - second.len();
        assert_eq!(offsets, vec![preamble, preamble + first.len()]);
    }

    #[test]
    fn missing_ledger_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = ProgressLedger::new(temp.path().join("missing.md"));
        assert_eq!(ledger.read_all().expect("read"), "");
    }
}
