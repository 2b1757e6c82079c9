//! Merge confirmation: arm auto-merge, then poll the PR with a hard deadline.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::branches::BranchManager;
use crate::core::merge_state::{PollState, classify};
use crate::core::types::PullRequest;
use crate::io::clock::Clock;
use crate::io::code_host::CodeHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged; local and remote branches deleted.
    Merged,
    /// Closed without merging.
    Closed,
    /// Open but the host reports conflicts.
    Conflicting,
    /// Still open at the deadline; auto-merge stays armed.
    TimedOut,
}

pub struct MergePoller<'a> {
    host: &'a dyn CodeHost,
    clock: &'a dyn Clock,
    branches: &'a BranchManager<'a>,
    interval: Duration,
}

impl<'a> MergePoller<'a> {
    pub fn new(
        host: &'a dyn CodeHost,
        clock: &'a dyn Clock,
        branches: &'a BranchManager<'a>,
        interval: Duration,
    ) -> Self {
        Self {
            host,
            clock,
            branches,
            interval,
        }
    }

    /// Returns within `timeout`: the deadline is fixed before auto-merge is
    /// armed, and every host call and sleep is clamped to the time left.
    #[instrument(skip_all, fields(number = pr.number, branch, timeout_secs = timeout.as_secs()))]
    pub fn auto_merge(
        &self,
        pr: &PullRequest,
        branch: &str,
        timeout: Duration,
    ) -> Result<MergeOutcome> {
        let deadline = self.clock.now() + timeout;
        let remaining = || deadline.saturating_duration_since(self.clock.now());

        let armed = self
            .host
            .enable_auto_merge(pr.number, remaining())
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "enable auto-merge failed");
                false
            });
        if !armed && !remaining().is_zero() {
            let merged = self
                .host
                .merge_now(pr.number, remaining())
                .unwrap_or_else(|err| {
                    warn!(err = %format!("{err:#}"), "immediate merge failed");
                    false
                });
            debug!(merged, "attempted immediate merge");
        }

        let mut polls = 0u32;
        loop {
            let left = remaining();
            if left.is_zero() {
                info!(polls, "merge not observed before timeout");
                return Ok(MergeOutcome::TimedOut);
            }
            polls += 1;
            let state = match self.host.status(pr.number, left) {
                Ok(status) => classify(&status),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "PR status unreadable, treating as open");
                    PollState::Open
                }
            };
            debug!(polls, ?state, "polled PR");

            match state {
                PollState::Merged => {
                    info!(polls, "pull request merged");
                    if let Err(err) = self.branches.cleanup_after_merge(branch) {
                        warn!(err = %format!("{err:#}"), "branch cleanup after merge failed");
                    }
                    return Ok(MergeOutcome::Merged);
                }
                PollState::Closed => {
                    warn!("pull request closed without merging");
                    return Ok(MergeOutcome::Closed);
                }
                PollState::Conflicting => {
                    warn!("pull request has conflicts");
                    return Ok(MergeOutcome::Conflicting);
                }
                PollState::Open => {}
            }

            let left = remaining();
            if left.is_zero() {
                info!(polls, "merge not observed before timeout");
                return Ok(MergeOutcome::TimedOut);
            }
            self.clock.sleep(self.interval.min(left));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::core::types::{Mergeable, PrState, PullRequestStatus};
    use crate::io::code_host::PrRequest;
    use crate::io::git::VersionControl;
    use crate::test_support::{FakeClock, ScriptedCodeHost, TestRepo};

    fn status(state: PrState, mergeable: Mergeable) -> PullRequestStatus {
        PullRequestStatus { state, mergeable }
    }

    fn pushed_branch(repo: &TestRepo) -> PullRequest {
        let git = repo.git();
        git.checkout_new_branch("story/A").expect("branch");
        git.push_upstream("origin", "story/A").expect("push");
        PullRequest {
            number: 1,
            url: "https://example.test/pull/1".to_string(),
            head: "story/A".to_string(),
        }
    }

    #[test]
    fn open_open_merged_cleans_up_branches() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let host = ScriptedCodeHost::new(repo.remote_dir()).with_statuses(vec![
            status(PrState::Open, Mergeable::Unknown),
            status(PrState::Open, Mergeable::Mergeable),
            status(PrState::Merged, Mergeable::Unknown),
        ]);
        let clock = FakeClock::new();

        let outcome = MergePoller::new(&host, &clock, &branches, Duration::from_secs(15))
            .auto_merge(&pr, "story/A", Duration::from_secs(600))
            .expect("merge");

        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
        assert!(!git.local_branch_exists("story/A").expect("local"));
        assert!(
            !git.remote_branch_exists("origin", "story/A")
                .expect("remote")
        );
    }

    #[test]
    fn never_leaving_open_times_out_within_bound() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let host = ScriptedCodeHost::new(repo.remote_dir());
        let clock = FakeClock::new();
        let interval = Duration::from_secs(15);
        let timeout = Duration::from_secs(100);

        let outcome = MergePoller::new(&host, &clock, &branches, interval)
            .auto_merge(&pr, "story/A", timeout)
            .expect("merge");

        assert_eq!(outcome, MergeOutcome::TimedOut);
        assert!(clock.elapsed() <= timeout + interval);
        assert!(
            git.remote_branch_exists("origin", "story/A")
                .expect("remote")
        );
    }

    #[test]
    fn closed_and_conflicting_are_terminal_failures() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let clock = FakeClock::new();

        let host = ScriptedCodeHost::new(repo.remote_dir())
            .with_statuses(vec![status(PrState::Open, Mergeable::Conflicting)]);
        let outcome = MergePoller::new(&host, &clock, &branches, Duration::from_secs(15))
            .auto_merge(&pr, "story/A", Duration::from_secs(600))
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::Conflicting);

        let host = ScriptedCodeHost::new(repo.remote_dir())
            .with_statuses(vec![status(PrState::Closed, Mergeable::Unknown)]);
        let outcome = MergePoller::new(&host, &clock, &branches, Duration::from_secs(15))
            .auto_merge(&pr, "story/A", Duration::from_secs(600))
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::Closed);
    }

    #[test]
    fn falls_back_to_immediate_merge_when_auto_merge_unavailable() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let host = ScriptedCodeHost::new(repo.remote_dir())
            .without_auto_merge()
            .with_statuses(vec![status(PrState::Merged, Mergeable::Unknown)]);
        let clock = FakeClock::new();

        MergePoller::new(&host, &clock, &branches, Duration::from_secs(15))
            .auto_merge(&pr, "story/A", Duration::from_secs(60))
            .expect("merge");

        assert_eq!(host.merge_calls(), vec!["auto 1", "now 1"]);
    }

    /// Host whose merge calls hang until their limit (or two minutes) and fail.
    struct HangingHost<'a> {
        clock: &'a FakeClock,
        limits: RefCell<Vec<Duration>>,
    }

    impl HangingHost<'_> {
        fn hang(&self, limit: Duration) -> Result<()> {
            self.limits.borrow_mut().push(limit);
            self.clock.sleep(limit.min(Duration::from_secs(120)));
            anyhow::bail!("gh timed out")
        }
    }

    impl CodeHost for HangingHost<'_> {
        fn create_pull_request(&self, _request: &PrRequest) -> Result<PullRequest> {
            anyhow::bail!("not used")
        }

        fn find_pull_request(&self, _head: &str) -> Result<Option<PullRequest>> {
            Ok(None)
        }

        fn enable_auto_merge(&self, _number: u64, limit: Duration) -> Result<bool> {
            self.hang(limit).map(|()| true)
        }

        fn merge_now(&self, _number: u64, limit: Duration) -> Result<bool> {
            self.hang(limit).map(|()| true)
        }

        fn status(&self, _number: u64, limit: Duration) -> Result<PullRequestStatus> {
            self.hang(limit)
                .map(|()| status(PrState::Open, Mergeable::Unknown))
        }
    }

    #[test]
    fn slow_host_calls_stay_within_the_timeout() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let clock = FakeClock::new();
        let host = HangingHost {
            clock: &clock,
            limits: RefCell::new(Vec::new()),
        };
        let interval = Duration::from_secs(15);
        let timeout = Duration::from_secs(60);

        let outcome = MergePoller::new(&host, &clock, &branches, interval)
            .auto_merge(&pr, "story/A", timeout)
            .expect("merge");

        assert_eq!(outcome, MergeOutcome::TimedOut);
        assert!(clock.elapsed() <= timeout + interval);
        assert_eq!(*host.limits.borrow(), vec![timeout]);
    }

    #[test]
    fn unreadable_status_counts_as_open() {
        let repo = TestRepo::new().expect("repo");
        let pr = pushed_branch(&repo);
        let git = repo.git();
        let branches = BranchManager::new(&git, "origin", "main");
        let host = ScriptedCodeHost::new(repo.remote_dir()).with_status_errors();
        let clock = FakeClock::new();

        let outcome = MergePoller::new(&host, &clock, &branches, Duration::from_secs(10))
            .auto_merge(&pr, "story/A", Duration::from_secs(30))
            .expect("merge");
        assert_eq!(outcome, MergeOutcome::TimedOut);
    }
}
