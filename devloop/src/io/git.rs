//! Git adapter for the loop.
//!
//! The loop owns branch lifecycle and commits deterministically, so we keep a
//! small, explicit wrapper around `git` subprocess calls behind the
//! [`VersionControl`] port.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Version-control capabilities the loop consumes.
pub trait VersionControl {
    /// Fetch from `remote`, pruning refs deleted upstream.
    fn fetch(&self, remote: &str) -> Result<()>;
    fn checkout(&self, branch: &str) -> Result<()>;
    /// Create `branch` at HEAD and check it out.
    fn checkout_new_branch(&self, branch: &str) -> Result<()>;
    /// Fast-forward the current branch to `<remote>/<branch>`.
    fn fast_forward(&self, remote: &str, branch: &str) -> Result<()>;
    fn current_branch(&self) -> Result<String>;
    /// Status entries, untracked included and ignored files excluded.
    fn status(&self) -> Result<Vec<StatusEntry>>;

    fn local_branch_exists(&self, branch: &str) -> Result<bool>;
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;
    fn delete_local_branch(&self, branch: &str) -> Result<()>;
    fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<()>;
    fn prune_remote(&self, remote: &str) -> Result<()>;

    /// Discard tracked changes and untracked files. Ignored files are kept.
    fn reset_worktree(&self) -> Result<()>;
    /// Stage all changes (respects .gitignore).
    fn add_all(&self) -> Result<()>;
    /// Files that differ between `base` and the index.
    fn changed_files(&self, base: &str) -> Result<Vec<String>>;
    fn has_staged_changes(&self) -> Result<bool>;
    /// Number of commits on HEAD that are not on `base`.
    fn commits_ahead(&self, base: &str) -> Result<u32>;
    /// Commit staged changes. Returns `false` when nothing was staged.
    fn commit_staged(&self, message: &str) -> Result<bool>;
    /// Push `branch` and set its upstream.
    fn push_upstream(&self, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    #[instrument(skip_all, fields(remote))]
    fn fetch(&self, remote: &str) -> Result<()> {
        debug!(remote, "fetching");
        self.run_checked(&["fetch", remote, "--prune"])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    fn fast_forward(&self, remote: &str, branch: &str) -> Result<()> {
        let upstream = format!("{remote}/{branch}");
        self.run_checked(&["merge", "--ff-only", &upstream])?;
        Ok(())
    }

    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        Ok(name)
    }

    fn status(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        let out = self.run_capture(&["ls-remote", "--heads", remote, &refname])?;
        Ok(!out.trim().is_empty())
    }

    #[instrument(skip_all, fields(branch))]
    fn delete_local_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting local branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, branch))]
    fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "deleting remote branch");
        self.run_checked(&["push", remote, "--delete", branch])?;
        Ok(())
    }

    fn prune_remote(&self, remote: &str) -> Result<()> {
        self.run_checked(&["remote", "prune", remote])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn reset_worktree(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard", "HEAD"])?;
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }

    fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    fn changed_files(&self, base: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--cached", "--name-only", base])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn commits_ahead(&self, base: &str) -> Result<u32> {
        let range = format!("{base}..HEAD");
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse rev-list count '{}'", out.trim()))
    }

    #[instrument(skip_all)]
    fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    #[instrument(skip_all, fields(remote, branch))]
    fn push_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pushing branch");
        self.run_checked(&["push", "-u", remote, branch])?;
        Ok(())
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
