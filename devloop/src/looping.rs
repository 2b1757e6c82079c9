//! Multi-iteration loop for `devloop run`.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::branches::BranchManager;
use crate::context::RunContext;
use crate::core::types::{IterationOutcome, OutcomeKeyword};
use crate::io::config::DevloopConfig;
use crate::io::progress::{ProgressEntry, RUN_ENTRY_ID};
use crate::iteration::{Iteration, IterationReport, IterationResult};

/// Per-run switches; CLI flags override the config values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOptions {
    pub max_iterations: u32,
    pub merge_enabled: bool,
    pub merge_timeout: Duration,
}

impl LoopOptions {
    pub fn from_config(config: &DevloopConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            merge_enabled: config.merge_enabled,
            merge_timeout: Duration::from_secs(config.merge_timeout_secs),
        }
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// No story with `passes=false` is left on main.
    AllComplete,
    /// Pending stories remain, but all of them were attempted in this run.
    Exhausted,
    MaxIterations,
}

/// Summary of a loop invocation. Advisory; the backlog and ledger are the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub run_id: String,
    pub iterations: u32,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub merge_pending: Vec<String>,
    pub pr_pending: Vec<String>,
    pub remaining: Vec<String>,
    pub stop: LoopStop,
}

/// Run iterations until the backlog is exhausted or `max_iterations` is reached.
///
/// Fails fast with [`crate::error::LoopError::DirtyWorktree`] when the tree is
/// not clean. Stories attempted in this run are not selected again. Any other
/// error (sync, ledger, restoring main) stops the run immediately.
#[instrument(skip_all, fields(run_id = %ctx.run_id, max_iterations = options.max_iterations))]
pub fn run_loop<F: FnMut(&IterationReport)>(
    ctx: &RunContext<'_>,
    options: &LoopOptions,
    mut on_iteration: F,
) -> Result<LoopSummary> {
    let branches = BranchManager::new(
        ctx.ports.vcs,
        &ctx.config.remote,
        &ctx.config.main_branch,
    );
    branches.ensure_clean()?;
    ctx.ledger().ensure_initialized()?;

    let mut summary = LoopSummary {
        run_id: ctx.run_id.clone(),
        iterations: 0,
        completed: Vec::new(),
        failed: Vec::new(),
        merge_pending: Vec::new(),
        pr_pending: Vec::new(),
        remaining: Vec::new(),
        stop: LoopStop::MaxIterations,
    };
    let mut attempted: HashSet<String> = HashSet::new();

    for iter in 1..=options.max_iterations {
        let result = Iteration::new(ctx, options, iter, &attempted).run();
        let restored = branches.return_to_main();
        let result = result?;
        restored.context("return to main after iteration")?;

        match result {
            IterationResult::Exhausted => {
                let pending = ctx.backlog().load()?.remaining_count();
                summary.stop = if pending == 0 {
                    LoopStop::AllComplete
                } else {
                    LoopStop::Exhausted
                };
                break;
            }
            IterationResult::Worked(report) => {
                summary.iterations += 1;
                attempted.insert(report.story_id.clone());
                let bucket = match &report.outcome {
                    IterationOutcome::Merged { .. } | IterationOutcome::Published { .. } => {
                        &mut summary.completed
                    }
                    IterationOutcome::MergePending { .. } => &mut summary.merge_pending,
                    IterationOutcome::PrPending { .. } => &mut summary.pr_pending,
                    IterationOutcome::Failed { .. } => &mut summary.failed,
                };
                bucket.push(report.story_id.clone());
                on_iteration(&report);
            }
        }
    }

    if summary.stop == LoopStop::AllComplete {
        ctx.ledger().append(&ProgressEntry::now(
            RUN_ENTRY_ID,
            OutcomeKeyword::AllComplete,
            format!("Every story passes. Run {} is done.", ctx.run_id),
        ))?;
    }

    summary.remaining = remaining_after_run(ctx, &branches, &summary)?;
    info!(
        iterations = summary.iterations,
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        remaining = summary.remaining.len(),
        stop = ?summary.stop,
        "loop finished"
    );
    Ok(summary)
}

/// Pending stories on the latest main, minus the ones this run already landed
/// or left waiting on a pull request.
fn remaining_after_run(
    ctx: &RunContext<'_>,
    branches: &BranchManager<'_>,
    summary: &LoopSummary,
) -> Result<Vec<String>> {
    if let Err(err) = branches.sync() {
        warn!(err = %format!("{err:#}"), "final sync failed; remaining is based on local main");
    }
    let in_flight: HashSet<&String> = summary
        .completed
        .iter()
        .chain(&summary.merge_pending)
        .chain(&summary.pr_pending)
        .collect();
    Ok(ctx
        .backlog()
        .load()?
        .remaining_ids()
        .into_iter()
        .filter(|id| !in_flight.contains(id))
        .collect())
}
