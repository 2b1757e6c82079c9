//! Test-only builders, throwaway git repositories and scripted ports.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{
    Backlog, GateOutcome, Mergeable, PrState, PullRequest, PullRequestStatus, Story,
};
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::backlog::BacklogStore;
use crate::io::clock::Clock;
use crate::io::code_host::{CodeHost, PrRequest};
use crate::io::gate::QualityGate;
use crate::io::git::Git;
use crate::io::init::{DevloopPaths, InitOptions, init_devloop};
use crate::io::scaffold::{ScaffoldRequest, Scaffolder};

/// Create a deterministic pending story with empty optional fields.
pub fn story(id: &str, priority: i64) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        priority,
        description: String::new(),
        acceptance_criteria: Vec::new(),
        test_criteria: Vec::new(),
        test_files: Vec::new(),
        files_to_create: Vec::new(),
        scaffold_skill: None,
        notes: None,
        passes: false,
    }
}

pub fn backlog_of(stories: Vec<Story>) -> Backlog {
    Backlog {
        project_name: "demo".to_string(),
        description: String::new(),
        user_stories: stories,
    }
}

/// A work clone on `main` with a local bare `origin`, `.devloop/` committed
/// and pushed.
pub struct TestRepo {
    temp: TempDir,
    work: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        Self::with_stories(Vec::new())
    }

    pub fn with_stories(stories: Vec<Story>) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let remote = temp.path().join("remote.git");
        let work = temp.path().join("work");
        fs::create_dir_all(&work).context("create work dir")?;

        run_git(temp.path(), &["init", "--bare", "remote.git"])?;
        run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"])?;

        run_git(&work, &["init"])?;
        run_git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        configure_identity(&work)?;
        let remote_url = remote.to_string_lossy().to_string();
        run_git(&work, &["remote", "add", "origin", &remote_url])?;

        init_devloop(&work, &InitOptions { force: false })?;
        BacklogStore::new(work.join(".devloop/backlog.json")).save(&backlog_of(stories))?;
        run_git(&work, &["add", "-A"])?;
        run_git(&work, &["commit", "-m", "chore: init devloop"])?;
        run_git(&work, &["push", "-u", "origin", "main"])?;

        Ok(Self { temp, work, remote })
    }

    pub fn root(&self) -> &Path {
        &self.work
    }

    pub fn remote_dir(&self) -> &Path {
        &self.remote
    }

    pub fn git(&self) -> Git {
        Git::new(&self.work)
    }

    pub fn paths(&self) -> DevloopPaths {
        DevloopPaths::new(&self.work)
    }

    pub fn store(&self) -> BacklogStore {
        BacklogStore::new(self.paths().backlog_path)
    }

    /// Contents of `path` on the remote's `main`.
    pub fn remote_main_file(&self, path: &str) -> Result<String> {
        let object = format!("main:{path}");
        run_git(&self.remote, &["show", &object])
    }

    /// Backlog as committed on the remote's `main`.
    pub fn remote_backlog(&self) -> Result<Backlog> {
        let raw = self.remote_main_file(".devloop/backlog.json")?;
        serde_json::from_str(&raw).context("parse remote backlog")
    }

    /// Commit `file` directly on the remote's `main` from a second clone.
    pub fn advance_remote_main(&self, file: &str) -> Result<()> {
        let upstream = self.temp.path().join("upstream");
        if upstream.exists() {
            run_git(&upstream, &["pull", "--ff-only"])?;
        } else {
            let remote_url = self.remote.to_string_lossy().to_string();
            run_git(self.temp.path(), &["clone", &remote_url, "upstream"])?;
            configure_identity(&upstream)?;
        }
        fs::write(upstream.join(file), "upstream\n").context("write upstream file")?;
        run_git(&upstream, &["add", "-A"])?;
        run_git(&upstream, &["commit", "-m", "chore: upstream change"])?;
        run_git(&upstream, &["push", "origin", "main"])?;
        Ok(())
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    run_git(dir, &["config", "user.email", "devloop@example.test"])?;
    run_git(dir, &["config", "user.name", "devloop tests"])?;
    run_git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// One scripted agent behaviour.
#[derive(Debug, Clone)]
pub enum AgentScript {
    /// Write files, then mark the in-flight story passed.
    Pass { files: Vec<(String, String)> },
    /// Write files but leave `passes=false`.
    NoPass { files: Vec<(String, String)> },
    /// Mark a different story passed.
    PassOther(String),
    TimedOut,
    /// The agent binary could not be started.
    SpawnError,
}

impl AgentScript {
    pub fn pass_with_file(path: &str) -> Self {
        AgentScript::Pass {
            files: vec![(path.to_string(), format!("// {path}\n"))],
        }
    }
}

/// [`Agent`] that replays scripts in order and records every prompt.
pub struct ScriptedAgent {
    scripts: RefCell<VecDeque<AgentScript>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(scripts: Vec<AgentScript>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let script = self
            .scripts
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted"))?;
        let store = BacklogStore::new(&request.backlog_path);
        let mut timed_out = false;
        match script {
            AgentScript::Pass { files } => {
                write_files(&request.workdir, &files)?;
                store.mark_passed(&request.story_id)?;
            }
            AgentScript::NoPass { files } => write_files(&request.workdir, &files)?,
            AgentScript::PassOther(id) => {
                store.mark_passed(&id)?;
            }
            AgentScript::TimedOut => timed_out = true,
            AgentScript::SpawnError => bail!("spawn agent: No such file or directory"),
        }
        Ok(AgentRun {
            exit_code: if timed_out { None } else { Some(0) },
            timed_out,
            duration: Duration::from_millis(5),
        })
    }
}

fn write_files(root: &Path, files: &[(String, String)]) -> Result<()> {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

/// In-memory [`CodeHost`]. Reporting `MERGED` fast-forwards the bare
/// remote's `main` to the PR head, the way a squash merge would land.
pub struct ScriptedCodeHost {
    remote: PathBuf,
    statuses: RefCell<VecDeque<PullRequestStatus>>,
    created: RefCell<Vec<PrRequest>>,
    merge_calls: RefCell<Vec<String>>,
    heads: RefCell<HashMap<u64, String>>,
    next_number: Cell<u64>,
    create_fails: bool,
    auto_merge: bool,
    status_errors: bool,
}

impl ScriptedCodeHost {
    pub fn new(remote: &Path) -> Self {
        Self {
            remote: remote.to_path_buf(),
            statuses: RefCell::new(VecDeque::new()),
            created: RefCell::new(Vec::new()),
            merge_calls: RefCell::new(Vec::new()),
            heads: RefCell::new(HashMap::new()),
            next_number: Cell::new(1),
            create_fails: false,
            auto_merge: true,
            status_errors: false,
        }
    }

    /// Statuses returned by successive polls; afterwards the PR stays open.
    pub fn with_statuses(self, statuses: Vec<PullRequestStatus>) -> Self {
        *self.statuses.borrow_mut() = statuses.into();
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.create_fails = true;
        self
    }

    pub fn without_auto_merge(mut self) -> Self {
        self.auto_merge = false;
        self
    }

    pub fn with_status_errors(mut self) -> Self {
        self.status_errors = true;
        self
    }

    pub fn created(&self) -> Vec<PrRequest> {
        self.created.borrow().clone()
    }

    pub fn merge_calls(&self) -> Vec<String> {
        self.merge_calls.borrow().clone()
    }

    fn land(&self, number: u64) -> Result<()> {
        let Some(head) = self.heads.borrow().get(&number).cloned() else {
            return Ok(());
        };
        let source = format!("refs/heads/{head}");
        run_git(&self.remote, &["update-ref", "refs/heads/main", &source])?;
        Ok(())
    }
}

impl CodeHost for ScriptedCodeHost {
    fn create_pull_request(&self, request: &PrRequest) -> Result<PullRequest> {
        if self.create_fails {
            bail!("gh pr create failed: HTTP 502");
        }
        self.created.borrow_mut().push(request.clone());
        if let Some(existing) = self.find_pull_request(&request.head)? {
            return Ok(existing);
        }
        let number = self.next_number.get();
        self.next_number.set(number + 1);
        self.heads.borrow_mut().insert(number, request.head.clone());
        Ok(PullRequest {
            number,
            url: format!("https://example.test/acme/app/pull/{number}"),
            head: request.head.clone(),
        })
    }

    fn find_pull_request(&self, head: &str) -> Result<Option<PullRequest>> {
        Ok(self
            .heads
            .borrow()
            .iter()
            .find(|(_, h)| h.as_str() == head)
            .map(|(number, h)| PullRequest {
                number: *number,
                url: format!("https://example.test/acme/app/pull/{number}"),
                head: h.clone(),
            }))
    }

    fn enable_auto_merge(&self, number: u64, _limit: Duration) -> Result<bool> {
        self.merge_calls.borrow_mut().push(format!("auto {number}"));
        Ok(self.auto_merge)
    }

    fn merge_now(&self, number: u64, _limit: Duration) -> Result<bool> {
        self.merge_calls.borrow_mut().push(format!("now {number}"));
        Ok(false)
    }

    fn status(&self, number: u64, _limit: Duration) -> Result<PullRequestStatus> {
        if self.status_errors {
            bail!("gh pr view {number} failed: HTTP 500");
        }
        let status = self
            .statuses
            .borrow_mut()
            .pop_front()
            .unwrap_or(PullRequestStatus {
                state: PrState::Open,
                mergeable: Mergeable::Unknown,
            });
        if status.state == PrState::Merged {
            self.land(number)?;
        }
        Ok(status)
    }
}

/// Clock whose sleeps advance time instantly.
pub struct FakeClock {
    start: Instant,
    offset: Cell<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Total simulated time slept.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

/// Gate returning a fixed outcome and counting calls.
pub struct FakeGate {
    outcome: GateOutcome,
    calls: Cell<u32>,
}

impl FakeGate {
    pub fn new(outcome: GateOutcome) -> Self {
        Self {
            outcome,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl QualityGate for FakeGate {
    fn check(&self, _workdir: &Path, log_path: &Path) -> Result<GateOutcome> {
        self.calls.set(self.calls.get() + 1);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(log_path, format!("fake gate: {:?}\n", self.outcome))?;
        Ok(self.outcome)
    }
}

/// Scaffolder that records `(skill, story id)` pairs and optionally fails.
#[derive(Default)]
pub struct RecordingScaffolder {
    calls: RefCell<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingScaffolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl Scaffolder for RecordingScaffolder {
    fn scaffold(&self, request: &ScaffoldRequest) -> Result<()> {
        self.calls
            .borrow_mut()
            .push((request.skill.clone(), request.story_id.clone()));
        if self.fail {
            bail!("scaffold '{}' failed with status Some(1)", request.skill);
        }
        Ok(())
    }
}
