//! Push a verified story branch and open its pull request.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::compose::compose_pr_title;
use crate::core::types::{PullRequest, Story};
use crate::io::code_host::{CodeHost, PrRequest};
use crate::io::git::VersionControl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Opened(PullRequest),
    /// Commit kept on the local branch; no PR is open.
    PrPending { reason: String },
}

pub struct Publisher<'a> {
    vcs: &'a dyn VersionControl,
    host: &'a dyn CodeHost,
    remote: String,
    main: String,
}

impl<'a> Publisher<'a> {
    pub fn new(
        vcs: &'a dyn VersionControl,
        host: &'a dyn CodeHost,
        remote: &str,
        main: &str,
    ) -> Self {
        Self {
            vcs,
            host,
            remote: remote.to_string(),
            main: main.to_string(),
        }
    }

    /// Push failures and PR creation failures are not errors: they yield
    /// [`PublishOutcome::PrPending`] and the loop moves on.
    #[instrument(skip_all, fields(branch, story_id = %story.id))]
    pub fn publish(&self, branch: &str, story: &Story, body: &str) -> Result<PublishOutcome> {
        if let Err(err) = self.vcs.push_upstream(&self.remote, branch) {
            warn!(err = %format!("{err:#}"), "push failed");
            return Ok(PublishOutcome::PrPending {
                reason: format!("push failed: {err:#}"),
            });
        }

        let request = PrRequest {
            title: compose_pr_title(story),
            body: body.to_string(),
            base: self.main.clone(),
            head: branch.to_string(),
        };
        match self.host.create_pull_request(&request) {
            Ok(pr) => {
                info!(number = pr.number, url = %pr.url, "pull request open");
                Ok(PublishOutcome::Opened(pr))
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "pull request creation failed");
                Ok(PublishOutcome::PrPending {
                    reason: format!("pull request creation failed: {err:#}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedCodeHost, TestRepo, story};

    #[test]
    fn opens_pr_against_main_with_composed_title() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.checkout_new_branch("story/A").expect("branch");
        let host = ScriptedCodeHost::new(repo.remote_dir());

        let outcome = Publisher::new(&git, &host, "origin", "main")
            .publish("story/A", &story("A", 1), "body")
            .expect("publish");

        let PublishOutcome::Opened(pr) = outcome else {
            panic!("expected opened PR, got {outcome:?}");
        };
        assert_eq!(pr.head, "story/A");
        let created = host.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "feat(A): a title");
        assert_eq!(created[0].base, "main");
        assert!(
            git.remote_branch_exists("origin", "story/A")
                .expect("remote")
        );
    }

    #[test]
    fn pr_creation_failure_is_pr_pending() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.checkout_new_branch("story/A").expect("branch");
        let host = ScriptedCodeHost::new(repo.remote_dir()).fail_create();

        let outcome = Publisher::new(&git, &host, "origin", "main")
            .publish("story/A", &story("A", 1), "body")
            .expect("publish");
        assert!(matches!(outcome, PublishOutcome::PrPending { .. }));
    }

    #[test]
    fn push_failure_is_pr_pending() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        git.checkout_new_branch("story/A").expect("branch");
        let host = ScriptedCodeHost::new(repo.remote_dir());

        let outcome = Publisher::new(&git, &host, "nowhere", "main")
            .publish("story/A", &story("A", 1), "body")
            .expect("publish");
        let PublishOutcome::PrPending { reason } = outcome else {
            panic!("expected PR pending");
        };
        assert!(reason.starts_with("push failed"));
        assert!(host.created().is_empty());
    }
}
