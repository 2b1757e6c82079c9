//! Commit message and pull request text rendered from story fields.
//!
//! Everything here is a pure function of the story, the changed-file list and
//! the iteration number: same inputs, byte-identical output.

use crate::core::types::Story;

/// Default number of changed files listed before the `+N more` suffix.
pub const DEFAULT_CHANGED_FILES_LIMIT: usize = 20;

/// Renders commit and PR text with a bounded changed-files list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Composer {
    changed_files_limit: usize,
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            changed_files_limit: DEFAULT_CHANGED_FILES_LIMIT,
        }
    }
}

impl Composer {
    pub fn new(changed_files_limit: usize) -> Self {
        Self {
            changed_files_limit,
        }
    }

    /// Conventional-commit style summary line, also used as the PR title.
    pub fn summary_line(&self, story: &Story) -> String {
        format!(
            "feat({}): {}",
            story.id,
            story.title.trim().to_lowercase()
        )
    }

    pub fn commit_message(
        &self,
        story: &Story,
        changed_files: &[String],
        iteration: u32,
    ) -> String {
        let mut buf = self.summary_line(story);
        buf.push('\n');

        let description = story.description.trim();
        if !description.is_empty() {
            buf.push('\n');
            buf.push_str(description);
            buf.push('\n');
        }

        if !story.acceptance_criteria.is_empty() {
            buf.push_str("\nAcceptance criteria:\n");
            for item in &story.acceptance_criteria {
                buf.push_str(&format!("- [x] {}\n", item.trim()));
            }
        }

        if !changed_files.is_empty() {
            buf.push_str(&format!("\nChanged files ({}):\n", changed_files.len()));
            for line in self.file_lines(changed_files, |path| path.to_string()) {
                buf.push_str(&format!("- {line}\n"));
            }
        }

        if let Some(notes) = non_empty(story.notes.as_deref()) {
            buf.push_str("\nNotes:\n");
            buf.push_str(notes);
            buf.push('\n');
        }

        buf.push_str(&format!("\nStory-Id: {}\nIteration: {}\n", story.id, iteration));
        buf
    }

    pub fn pr_body(&self, story: &Story, changed_files: &[String], iteration: u32) -> String {
        let mut buf = String::new();

        buf.push_str("## Summary\n\n");
        match non_empty(Some(story.description.as_str())) {
            Some(description) => buf.push_str(description),
            None => buf.push_str(story.title.trim()),
        }
        buf.push('\n');

        if !story.acceptance_criteria.is_empty() {
            buf.push_str("\n## Acceptance Criteria\n\n");
            for item in &story.acceptance_criteria {
                buf.push_str(&format!("- [x] {}\n", item.trim()));
            }
        }

        if !story.test_criteria.is_empty() {
            buf.push_str("\n## Test Criteria\n\n");
            for item in &story.test_criteria {
                buf.push_str(&format!("- {}\n", item.trim()));
            }
        }

        if !story.test_files.is_empty() {
            buf.push_str("\n## Test Files\n\n");
            for path in &story.test_files {
                buf.push_str(&format!("- `{}`\n", path.trim()));
            }
        }

        if !changed_files.is_empty() {
            buf.push_str(&format!("\n## Changed Files ({})\n\n", changed_files.len()));
            for line in self.file_lines(changed_files, |path| format!("`{path}`")) {
                buf.push_str(&format!("- {line}\n"));
            }
        }

        if let Some(notes) = non_empty(story.notes.as_deref()) {
            buf.push_str("\n## Notes\n\n");
            buf.push_str(notes);
            buf.push('\n');
        }

        buf.push_str(&format!(
            "\n---\nStory: `{}` | Iteration: {}\n",
            story.id, iteration
        ));
        buf
    }

    /// Bounded file list; the last line is `+N more` when the list overflows.
    fn file_lines(&self, changed_files: &[String], render: impl Fn(&str) -> String) -> Vec<String> {
        let shown = changed_files.len().min(self.changed_files_limit);
        let mut lines: Vec<String> = changed_files[..shown]
            .iter()
            .map(|path| render(path))
            .collect();
        let hidden = changed_files.len() - shown;
        if hidden > 0 {
            lines.push(format!("+{hidden} more"));
        }
        lines
    }
}

pub fn compose_pr_title(story: &Story) -> String {
    Composer::default().summary_line(story)
}

pub fn compose_commit_message(story: &Story, changed_files: &[String], iteration: u32) -> String {
    Composer::default().commit_message(story, changed_files, iteration)
}

pub fn compose_pr_body(story: &Story, changed_files: &[String], iteration: u32) -> String {
    Composer::default().pr_body(story, changed_files, iteration)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
