//! Autonomous story-by-story development loop.
//!
//! Works through `.devloop/backlog.json` one story per iteration: branch,
//! agent, verify, commit, pull request, merge.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use devloop::context::{Ports, RunContext};
use devloop::error::LoopError;
use devloop::exit_codes;
use devloop::io::agent::{BACKLOG_ENV, CommandAgent};
use devloop::io::backlog::BacklogStore;
use devloop::io::clock::SystemClock;
use devloop::io::code_host::GhCli;
use devloop::io::config::load_config;
use devloop::io::gate::CommandGate;
use devloop::io::git::Git;
use devloop::io::init::{DevloopPaths, InitOptions, init_devloop};
use devloop::io::scaffold::CommandScaffolder;
use devloop::logging;
use devloop::looping::{LoopOptions, LoopSummary, run_loop};

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Autonomous story-by-story development loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work through pending stories until none remain or the iteration cap is hit.
    Run {
        /// Maximum number of iterations (overrides `max_iterations`).
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Stop after opening the pull request.
        #[arg(long)]
        no_merge: bool,
        /// Seconds to wait for each merge (overrides `merge_timeout_secs`).
        #[arg(long, value_name = "SECS")]
        merge_timeout: Option<u64>,
    },
    /// Create `.devloop/` with config, an empty backlog and the progress ledger.
    Init {
        /// Rewrite config and `.gitignore`. Never touches backlog or ledger.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the id of the next pending story.
    Next,
    /// Show per-story state and remaining/total counts.
    Status,
    /// Mark a story as passed. Called by the agent once its tests are green.
    Pass {
        /// Story id.
        id: String,
    },
    /// Check the backlog against its schema and invariants.
    Validate,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            match err.downcast_ref::<LoopError>() {
                Some(LoopError::DirtyWorktree { .. }) => exit_codes::DIRTY,
                _ => exit_codes::INVALID,
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = env::current_dir().context("resolve current directory")?;
    let default_directive = match cli.command {
        Command::Run { .. } => "info",
        _ => "warn",
    };
    logging::init(default_directive);
    match cli.command {
        Command::Run {
            max_iterations,
            no_merge,
            merge_timeout,
        } => cmd_run(&root, max_iterations, no_merge, merge_timeout),
        Command::Init { force } => cmd_init(&root, force),
        Command::Next => cmd_next(&root),
        Command::Status => cmd_status(&root),
        Command::Pass { id } => cmd_pass(&root, &id),
        Command::Validate => cmd_validate(&root),
    }
}

fn cmd_run(
    root: &Path,
    max_iterations: Option<u32>,
    no_merge: bool,
    merge_timeout: Option<u64>,
) -> Result<i32> {
    let paths = DevloopPaths::new(root);
    let config = load_config(&paths.config_path)?;

    let git = Git::new(root);
    let host = GhCli::new(root, Duration::from_secs(config.host.timeout_secs));
    let agent = CommandAgent::new(config.agent.command.clone());
    let scaffolder = CommandScaffolder::new(config.scaffold.command.clone());
    let gate = CommandGate::new(
        config.gate.command.clone(),
        Duration::from_secs(config.gate.timeout_secs),
        config.gate.output_limit_bytes,
    );
    let clock = SystemClock;
    let ports = Ports {
        vcs: &git,
        host: &host,
        agent: &agent,
        scaffolder: &scaffolder,
        gate: &gate,
        clock: &clock,
    };

    let mut options = LoopOptions::from_config(&config);
    if let Some(max) = max_iterations {
        options.max_iterations = max;
    }
    if no_merge {
        options.merge_enabled = false;
    }
    if let Some(secs) = merge_timeout {
        options.merge_timeout = Duration::from_secs(secs);
    }

    let ctx = RunContext::new(root, config, ports);
    let summary = run_loop(&ctx, &options, |report| {
        println!(
            "iteration {}: {} {}",
            report.iter,
            report.story_id,
            report.outcome.keyword()
        );
    })?;
    print_summary(&summary);
    Ok(exit_codes::OK)
}

fn print_summary(summary: &LoopSummary) {
    println!("run {} stopped: {:?}", summary.run_id, summary.stop);
    println!("iterations:    {}", summary.iterations);
    println!("completed:     {}", summary.completed.join(", "));
    println!("failed:        {}", summary.failed.join(", "));
    println!("merge pending: {}", summary.merge_pending.join(", "));
    println!("pr pending:    {}", summary.pr_pending.join(", "));
    println!("remaining:     {}", summary.remaining.join(", "));
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_devloop(root, &InitOptions { force })?;
    println!("initialized {}", paths.devloop_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_next(root: &Path) -> Result<i32> {
    let store = BacklogStore::new(DevloopPaths::new(root).backlog_path);
    match store.next_story()? {
        Some(story) => {
            println!("{}", story.id);
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("no pending story: every story has passes=true");
            Ok(exit_codes::COMPLETE)
        }
    }
}

fn cmd_status(root: &Path) -> Result<i32> {
    let backlog = BacklogStore::new(DevloopPaths::new(root).backlog_path).load()?;
    println!("{}", backlog.project_name);
    for story in &backlog.user_stories {
        let mark = if story.passes { "x" } else { " " };
        println!(
            "[{mark}] {} (priority {}) {}",
            story.id, story.priority, story.title
        );
    }
    println!(
        "{} of {} remaining",
        backlog.remaining_count(),
        backlog.total_count()
    );
    Ok(exit_codes::OK)
}

/// The agent runs with [`BACKLOG_ENV`] set; fall back to the project layout.
fn cmd_pass(root: &Path, id: &str) -> Result<i32> {
    let path = env::var_os(BACKLOG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| DevloopPaths::new(root).backlog_path);
    if BacklogStore::new(path).mark_passed(id)? {
        println!("{id} passed");
    } else {
        println!("{id} already passed");
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let backlog = BacklogStore::new(DevloopPaths::new(root).backlog_path).load()?;
    println!(
        "backlog ok: {} stories, {} remaining",
        backlog.total_count(),
        backlog.remaining_count()
    );
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["devloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_run_overrides() {
        let cli = Cli::parse_from([
            "devloop",
            "run",
            "--max-iterations",
            "3",
            "--no-merge",
            "--merge-timeout",
            "30",
        ]);
        let Command::Run {
            max_iterations,
            no_merge,
            merge_timeout,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(max_iterations, Some(3));
        assert!(no_merge);
        assert_eq!(merge_timeout, Some(30));
    }

    #[test]
    fn parse_pass_takes_story_id() {
        let cli = Cli::parse_from(["devloop", "pass", "US-7"]);
        assert!(matches!(cli.command, Command::Pass { id } if id == "US-7"));
    }
}
