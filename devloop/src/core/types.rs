//! Shared deterministic types for the loop core.
//!
//! These types define stable contracts between core components and the
//! persisted backlog format. They do not perform I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unit of work in the backlog.
///
/// Field names are part of the persisted backlog format and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub test_criteria: Vec<String>,
    #[serde(default)]
    pub test_files: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold_skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub passes: bool,
}

/// The persisted backlog document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub user_stories: Vec<Story>,
}

impl Backlog {
    pub fn find(&self, id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|story| story.id == id)
    }

    pub fn remaining_count(&self) -> usize {
        self.user_stories
            .iter()
            .filter(|story| !story.passes)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.user_stories.len()
    }

    /// Ids of stories with `passes=false`, in declaration order.
    pub fn remaining_ids(&self) -> Vec<String> {
        self.user_stories
            .iter()
            .filter(|story| !story.passes)
            .map(|story| story.id.clone())
            .collect()
    }
}

/// Pull request state as reported by the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// Mergeability signal reported by the code host. Not owned by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mergeable {
    Mergeable,
    Conflicting,
    #[serde(other)]
    Unknown,
}

/// A pull request correlated 1:1 with a story through its head branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head: String,
}

/// Observed pull request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub state: PrState,
    pub mergeable: Mergeable,
}

/// Pipeline stage at which an iteration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Branching,
    Invoking,
    Verifying,
    Committing,
    Merging,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Branching => "branching",
            Stage::Invoking => "invoking",
            Stage::Verifying => "verifying",
            Stage::Committing => "committing",
            Stage::Merging => "merging",
        }
    }
}

/// Final outcome of one iteration that worked on a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationOutcome {
    /// PR merged and branch cleaned up.
    Merged { pr: PullRequest },
    /// PR opened; merging was disabled for this run.
    Published { pr: PullRequest },
    /// PR open with auto-merge armed, merge not observed before the timeout.
    MergePending { pr: PullRequest },
    /// Work committed on the branch but no PR is open yet.
    PrPending { reason: String },
    /// Story not completed; the branch was discarded or the PR cannot land.
    Failed { stage: Stage, reason: String },
}

impl IterationOutcome {
    pub fn keyword(&self) -> OutcomeKeyword {
        match self {
            IterationOutcome::Merged { .. } | IterationOutcome::Published { .. } => {
                OutcomeKeyword::Passed
            }
            IterationOutcome::MergePending { .. } => OutcomeKeyword::PendingMerge,
            IterationOutcome::PrPending { .. } => OutcomeKeyword::PrPending,
            IterationOutcome::Failed { .. } => OutcomeKeyword::Failed,
        }
    }
}

/// Outcome keyword recorded in the progress ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKeyword {
    Started,
    Passed,
    Failed,
    PendingMerge,
    PrPending,
    AllComplete,
}

impl OutcomeKeyword {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKeyword::Started => "STARTED",
            OutcomeKeyword::Passed => "PASSED",
            OutcomeKeyword::Failed => "FAILED",
            OutcomeKeyword::PendingMerge => "PENDING MERGE",
            OutcomeKeyword::PrPending => "PR PENDING",
            OutcomeKeyword::AllComplete => "ALL COMPLETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let keyword = match raw.trim() {
            "STARTED" => OutcomeKeyword::Started,
            "PASSED" => OutcomeKeyword::Passed,
            "FAILED" => OutcomeKeyword::Failed,
            "PENDING MERGE" => OutcomeKeyword::PendingMerge,
            "PR PENDING" => OutcomeKeyword::PrPending,
            "ALL COMPLETE" => OutcomeKeyword::AllComplete,
            _ => return None,
        };
        Some(keyword)
    }
}

impl fmt::Display for OutcomeKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the quality gate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOutcome {
    Pass,
    Fail,
    /// No gate command configured.
    Skipped,
}
