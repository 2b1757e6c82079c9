//! Classification of observed pull request status for the merge poller.

use crate::core::types::{Mergeable, PrState, PullRequestStatus};

/// What a single poll observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Still open and not known to conflict: keep waiting.
    Open,
    Merged,
    Closed,
    /// Open but the host reports a conflict it cannot resolve.
    Conflicting,
}

pub fn classify(status: &PullRequestStatus) -> PollState {
    match (status.state, status.mergeable) {
        (PrState::Merged, _) => PollState::Merged,
        (PrState::Closed, _) => PollState::Closed,
        (PrState::Open, Mergeable::Conflicting) => PollState::Conflicting,
        (PrState::Open, Mergeable::Mergeable | Mergeable::Unknown) => PollState::Open,
    }
}
