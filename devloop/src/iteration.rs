//! One loop iteration as an explicit state machine.
//!
//! `Syncing → Branching → Scaffolding → Invoking → Verifying → Committing →
//! Publishing → Merging → Done`, with `Failed` (discard the branch, then
//! `Done`) reachable from the pre-publish states and `Exhausted` when there is
//! nothing left to select. Each state has exactly one handler.

use std::collections::HashSet;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::branches::BranchManager;
use crate::context::RunContext;
use crate::core::compose::Composer;
use crate::core::selector::next_story_excluding;
use crate::core::types::{
    Backlog, GateOutcome, IterationOutcome, OutcomeKeyword, PullRequest, Stage, Story,
};
use crate::invoke::{invoke_agent, invoke_scaffold};
use crate::io::agent::AgentRun;
use crate::io::iteration_log::{IterationMeta, IterationPaths, write_meta};
use crate::io::progress::ProgressEntry;
use crate::looping::LoopOptions;
use crate::merge::{MergeOutcome, MergePoller};
use crate::publish::{PublishOutcome, Publisher};
use crate::verify::Verifier;

/// What a finished iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// No selectable story remained.
    Exhausted,
    Worked(IterationReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iter: u32,
    pub story_id: String,
    pub branch: String,
    pub outcome: IterationOutcome,
}

/// Data accumulated while working on the selected story.
#[derive(Debug)]
struct Work {
    story: Story,
    branch: String,
    /// Backlog as loaded on main before the agent ran.
    baseline: Backlog,
    paths: IterationPaths,
    started: Instant,
    started_at: String,
    agent: Option<AgentRun>,
    gate: Option<GateOutcome>,
    changed_files: Vec<String>,
}

#[derive(Debug)]
enum IterationState {
    Syncing,
    Branching(Box<Work>),
    Scaffolding(Box<Work>),
    Invoking(Box<Work>),
    Verifying(Box<Work>),
    Committing(Box<Work>),
    Publishing(Box<Work>),
    Merging(Box<Work>, PullRequest),
    /// Discard the branch, then finish with a failed outcome.
    Failed(Box<Work>, Stage, String),
    Done(Box<Work>, IterationOutcome),
    Exhausted,
}

/// Runs a single iteration against `ctx`.
pub struct Iteration<'c, 'p> {
    ctx: &'c RunContext<'p>,
    options: &'c LoopOptions,
    branches: BranchManager<'c>,
    iter: u32,
    skip: &'c HashSet<String>,
}

impl<'c, 'p> Iteration<'c, 'p> {
    pub fn new(
        ctx: &'c RunContext<'p>,
        options: &'c LoopOptions,
        iter: u32,
        skip: &'c HashSet<String>,
    ) -> Self {
        let branches = BranchManager::new(
            ctx.ports.vcs,
            &ctx.config.remote,
            &ctx.config.main_branch,
        );
        Self {
            ctx,
            options,
            branches,
            iter,
            skip,
        }
    }

    /// Drive the state machine to a terminal state.
    ///
    /// Errors are fatal for the run (sync, ledger or branch-restore failures);
    /// story-level problems end in a `Failed` outcome instead.
    #[instrument(skip_all, fields(iter = self.iter))]
    pub fn run(&self) -> Result<IterationResult> {
        let mut state = IterationState::Syncing;
        loop {
            state = match state {
                IterationState::Syncing => self.on_syncing()?,
                IterationState::Branching(work) => self.on_branching(work)?,
                IterationState::Scaffolding(work) => self.on_scaffolding(work),
                IterationState::Invoking(work) => self.on_invoking(work),
                IterationState::Verifying(work) => self.on_verifying(work)?,
                IterationState::Committing(work) => self.on_committing(work),
                IterationState::Publishing(work) => self.on_publishing(work)?,
                IterationState::Merging(work, pr) => self.on_merging(work, pr)?,
                IterationState::Failed(work, stage, reason) => {
                    self.on_failed(work, stage, reason)?
                }
                IterationState::Done(work, outcome) => {
                    return self.on_done(*work, outcome).map(IterationResult::Worked);
                }
                IterationState::Exhausted => return Ok(IterationResult::Exhausted),
            };
        }
    }

    fn on_syncing(&self) -> Result<IterationState> {
        self.branches.sync()?;
        let backlog = self.ctx.backlog().load().context("load backlog on main")?;
        let Some(story) = next_story_excluding(&backlog, self.skip).cloned() else {
            info!("no selectable story");
            return Ok(IterationState::Exhausted);
        };
        info!(story_id = %story.id, priority = story.priority, "selected story");

        let work = Work {
            branch: self.ctx.branch_for(&story.id),
            story,
            baseline: backlog,
            paths: IterationPaths::new(
                &self.ctx.paths.iterations_dir,
                &self.ctx.run_id,
                self.iter,
            ),
            started: Instant::now(),
            started_at: timestamp(),
            agent: None,
            gate: None,
            changed_files: Vec::new(),
        };
        Ok(IterationState::Branching(Box::new(work)))
    }

    fn on_branching(&self, work: Box<Work>) -> Result<IterationState> {
        self.ctx.ledger().append(&ProgressEntry::now(
            &work.story.id,
            OutcomeKeyword::Started,
            format!(
                "Iteration {} started `{}` on branch `{}`.",
                self.iter, work.story.title, work.branch
            ),
        ))?;

        match self
            .branches
            .create_branch(&work.branch, self.ctx.config.force_recreate)
        {
            Ok(()) => Ok(IterationState::Scaffolding(work)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "branch creation failed");
                let reason = format!("{err:#}");
                // A pre-existing branch is not ours to discard.
                Ok(IterationState::Done(
                    work,
                    IterationOutcome::Failed {
                        stage: Stage::Branching,
                        reason,
                    },
                ))
            }
        }
    }

    fn on_scaffolding(&self, work: Box<Work>) -> IterationState {
        if let Some(skill) = work.story.scaffold_skill.as_deref() {
            invoke_scaffold(
                self.ctx,
                skill,
                &work.story.id,
                &work.paths.scaffold_log_path,
            );
        }
        IterationState::Invoking(work)
    }

    fn on_invoking(&self, mut work: Box<Work>) -> IterationState {
        match invoke_agent(self.ctx, &work.story, &work.paths.agent_log_path) {
            Ok(run) => {
                let timed_out = run.timed_out;
                work.agent = Some(run);
                if timed_out {
                    IterationState::Failed(work, Stage::Invoking, "agent timed out".to_string())
                } else {
                    IterationState::Verifying(work)
                }
            }
            Err(err) => {
                let reason = format!("agent could not run: {err:#}");
                IterationState::Failed(work, Stage::Invoking, reason)
            }
        }
    }

    fn on_verifying(&self, mut work: Box<Work>) -> Result<IterationState> {
        let store = self.ctx.backlog();
        let verifier = Verifier::new(
            &store,
            work.baseline.clone(),
            self.ctx.ports.gate,
            self.ctx.root(),
        );
        let verdict = verifier.verify(&work.story.id, &work.paths.gate_log_path)?;
        work.gate = verdict.gate;
        if verdict.passed {
            Ok(IterationState::Committing(work))
        } else {
            let reason = verdict.summary();
            Ok(IterationState::Failed(work, Stage::Verifying, reason))
        }
    }

    fn on_committing(&self, mut work: Box<Work>) -> IterationState {
        match self.commit(&mut work) {
            Ok(()) => IterationState::Publishing(work),
            Err(err) => {
                let reason = format!("{err:#}");
                IterationState::Failed(work, Stage::Committing, reason)
            }
        }
    }

    fn commit(&self, work: &mut Work) -> Result<()> {
        let vcs = self.ctx.ports.vcs;
        let main = &self.ctx.config.main_branch;
        vcs.add_all()?;
        work.changed_files = vcs.changed_files(main)?;
        let message = self.composer().commit_message(
            &work.story,
            &work.changed_files,
            self.iter,
        );
        if !vcs.commit_staged(&message)? && vcs.commits_ahead(main)? == 0 {
            anyhow::bail!("nothing to publish: no changes relative to {main}");
        }
        info!(changed = work.changed_files.len(), "story committed");
        Ok(())
    }

    fn on_publishing(&self, work: Box<Work>) -> Result<IterationState> {
        let body = self
            .composer()
            .pr_body(&work.story, &work.changed_files, self.iter);
        let publisher = Publisher::new(
            self.ctx.ports.vcs,
            self.ctx.ports.host,
            &self.ctx.config.remote,
            &self.ctx.config.main_branch,
        );
        let next = match publisher.publish(&work.branch, &work.story, &body)? {
            PublishOutcome::Opened(pr) if self.options.merge_enabled => {
                IterationState::Merging(work, pr)
            }
            PublishOutcome::Opened(pr) => {
                IterationState::Done(work, IterationOutcome::Published { pr })
            }
            PublishOutcome::PrPending { reason } => {
                IterationState::Done(work, IterationOutcome::PrPending { reason })
            }
        };
        Ok(next)
    }

    fn on_merging(&self, work: Box<Work>, pr: PullRequest) -> Result<IterationState> {
        let poller = MergePoller::new(
            self.ctx.ports.host,
            self.ctx.ports.clock,
            &self.branches,
            self.ctx.config.poll_interval(),
        );
        let outcome = match poller.auto_merge(&pr, &work.branch, self.options.merge_timeout)? {
            MergeOutcome::Merged => IterationOutcome::Merged { pr },
            MergeOutcome::TimedOut => IterationOutcome::MergePending { pr },
            MergeOutcome::Closed => {
                if let Err(err) = self.branches.cleanup_after_merge(&work.branch) {
                    warn!(err = %format!("{err:#}"), "cleanup of closed PR branch failed");
                }
                IterationOutcome::Failed {
                    stage: Stage::Merging,
                    reason: format!("pull request #{} closed without merging", pr.number),
                }
            }
            MergeOutcome::Conflicting => IterationOutcome::Failed {
                stage: Stage::Merging,
                reason: format!(
                    "pull request #{} has conflicts; left open for manual resolution",
                    pr.number
                ),
            },
        };
        Ok(IterationState::Done(work, outcome))
    }

    fn on_failed(&self, work: Box<Work>, stage: Stage, reason: String) -> Result<IterationState> {
        warn!(story_id = %work.story.id, stage = stage.as_str(), %reason, "iteration failed");
        self.branches
            .discard(&work.branch)
            .with_context(|| format!("discard branch {}", work.branch))?;
        Ok(IterationState::Done(
            work,
            IterationOutcome::Failed { stage, reason },
        ))
    }

    fn on_done(&self, work: Work, outcome: IterationOutcome) -> Result<IterationReport> {
        self.ctx.ledger().append(&ProgressEntry::now(
            &work.story.id,
            outcome.keyword(),
            narrative(&work, &outcome),
        ))?;

        let meta = IterationMeta {
            run_id: self.ctx.run_id.clone(),
            iter: self.iter,
            story_id: work.story.id.clone(),
            branch: work.branch.clone(),
            outcome: outcome.clone(),
            agent_exit_code: work.agent.as_ref().and_then(|run| run.exit_code),
            agent_timed_out: work.agent.as_ref().is_some_and(|run| run.timed_out),
            gate: work.gate,
            changed_files: work.changed_files.clone(),
            started_at: work.started_at.clone(),
            ended_at: timestamp(),
            duration_ms: work.started.elapsed().as_millis() as u64,
        };
        if let Err(err) = write_meta(&work.paths, &meta) {
            warn!(err = %format!("{err:#}"), "failed to write iteration meta");
        }

        info!(story_id = %work.story.id, keyword = %outcome.keyword(), "iteration done");
        Ok(IterationReport {
            iter: self.iter,
            story_id: work.story.id,
            branch: work.branch,
            outcome,
        })
    }

    fn composer(&self) -> Composer {
        Composer::new(self.ctx.config.changed_files_limit)
    }
}

fn narrative(work: &Work, outcome: &IterationOutcome) -> String {
    match outcome {
        IterationOutcome::Merged { pr } => format!(
            "Merged {} ({} changed files). Branch `{}` deleted.",
            pr.url,
            work.changed_files.len(),
            work.branch
        ),
        IterationOutcome::Published { pr } => {
            format!("Opened {} (merging disabled for this run).", pr.url)
        }
        IterationOutcome::MergePending { pr } => format!(
            "{} still open at the merge timeout; auto-merge stays armed and branch `{}` is kept.",
            pr.url, work.branch
        ),
        IterationOutcome::PrPending { reason } => format!(
            "Committed on local branch `{}` but no pull request is open: {reason}",
            work.branch
        ),
        IterationOutcome::Failed { stage, reason } => {
            format!("Failed while {}: {reason}", stage.as_str())
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
