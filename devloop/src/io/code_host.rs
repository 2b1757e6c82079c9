//! Code host port (pull requests) and its `gh` CLI adapter.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{PullRequest, PullRequestStatus};
use crate::io::process::{CommandOutput, run_command};

const GH_OUTPUT_LIMIT: usize = 100_000;

/// Pull request to open for a story branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
}

pub trait CodeHost {
    /// Open a PR. If one already exists for `head`, return that one.
    fn create_pull_request(&self, request: &PrRequest) -> Result<PullRequest>;
    /// The open PR whose head is `head`, if any.
    fn find_pull_request(&self, head: &str) -> Result<Option<PullRequest>>;
    /// Arm squash auto-merge. `Ok(false)` when the host refuses (e.g. not
    /// enabled for the repo).
    ///
    /// The merge calls take `limit`, the longest the caller can wait for an
    /// answer; adapters must give up once it elapses.
    fn enable_auto_merge(&self, number: u64, limit: Duration) -> Result<bool>;
    /// Squash-merge immediately. `Ok(false)` when the host refuses.
    fn merge_now(&self, number: u64, limit: Duration) -> Result<bool>;
    fn status(&self, number: u64, limit: Duration) -> Result<PullRequestStatus>;
}

/// [`CodeHost`] backed by the GitHub CLI.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
    timeout: Duration,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        self.run_within(args, stdin, self.timeout)
    }

    /// Like `run`, with the configured timeout shortened to `limit`.
    fn run_within(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.workdir);
        let timeout = self.timeout.min(limit);
        let output = run_command(cmd, stdin, Some(timeout), GH_OUTPUT_LIMIT, None)
            .with_context(|| format!("spawn gh {}", args.join(" ")))?;
        if output.timed_out {
            return Err(anyhow!("gh {} timed out", args.join(" ")));
        }
        Ok(output)
    }

    fn run_checked(&self, args: &[&str], limit: Duration) -> Result<String> {
        let output = self.run_within(args, None, limit)?;
        if !output.status.success() {
            return Err(anyhow!(
                "gh {} failed: {}",
                args.join(" "),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output.stdout_lossy())
    }
}

impl CodeHost for GhCli {
    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pull_request(&self, request: &PrRequest) -> Result<PullRequest> {
        let args = [
            "pr",
            "create",
            "--title",
            request.title.as_str(),
            "--body-file",
            "-",
            "--base",
            request.base.as_str(),
            "--head",
            request.head.as_str(),
        ];
        let output = self.run(&args, Some(request.body.as_bytes()))?;
        if output.status.success() {
            let url = last_url(&output.stdout_lossy())
                .ok_or_else(|| anyhow!("gh pr create printed no PR url"))?;
            let number = pr_number_from_url(&url)?;
            info!(number, %url, "pull request created");
            return Ok(PullRequest {
                number,
                url,
                head: request.head.clone(),
            });
        }

        let stderr = output.stderr_lossy();
        if stderr.contains("already exists") {
            debug!("pull request already exists, looking it up");
            let existing = self.find_pull_request(&request.head)?;
            let head = &request.head;
            return existing.ok_or_else(|| anyhow!("gh reported a PR for {head} but found none"));
        }
        Err(anyhow!("gh pr create failed: {}", stderr.trim()))
    }

    fn find_pull_request(&self, head: &str) -> Result<Option<PullRequest>> {
        let output = self.run(&["pr", "view", head, "--json", "number,url,headRefName"], None)?;
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            if stderr.contains("no pull requests found") {
                return Ok(None);
            }
            return Err(anyhow!("gh pr view {head} failed: {}", stderr.trim()));
        }
        let view: PrView =
            serde_json::from_slice(&output.stdout).context("parse gh pr view output")?;
        Ok(Some(PullRequest {
            number: view.number,
            url: view.url,
            head: view.head_ref_name,
        }))
    }

    #[instrument(skip_all, fields(number))]
    fn enable_auto_merge(&self, number: u64, limit: Duration) -> Result<bool> {
        let n = number.to_string();
        let output = self.run_within(&["pr", "merge", &n, "--auto", "--squash"], None, limit)?;
        if !output.status.success() {
            warn!(stderr = %output.stderr_lossy().trim(), "auto-merge not available");
        }
        Ok(output.status.success())
    }

    #[instrument(skip_all, fields(number))]
    fn merge_now(&self, number: u64, limit: Duration) -> Result<bool> {
        let n = number.to_string();
        let output = self.run_within(&["pr", "merge", &n, "--squash"], None, limit)?;
        if !output.status.success() {
            warn!(stderr = %output.stderr_lossy().trim(), "immediate merge refused");
        }
        Ok(output.status.success())
    }

    fn status(&self, number: u64, limit: Duration) -> Result<PullRequestStatus> {
        let n = number.to_string();
        let stdout = self.run_checked(&["pr", "view", &n, "--json", "state,mergeable"], limit)?;
        serde_json::from_str(&stdout).context("parse gh pr status")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrView {
    number: u64,
    url: String,
    head_ref_name: String,
}

fn last_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.starts_with("https://") || line.starts_with("http://"))
        .map(str::to_string)
}

/// Extract the PR number from `.../pull/<n>`.
pub fn pr_number_from_url(url: &str) -> Result<u64> {
    let (_, tail) = url
        .trim_end_matches('/')
        .rsplit_once("/pull/")
        .ok_or_else(|| anyhow!("unexpected PR url '{url}'"))?;
    tail.parse()
        .with_context(|| format!("parse PR number from '{url}'"))
}
