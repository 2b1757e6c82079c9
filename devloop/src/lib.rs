//! Autonomous story-by-story development loop.
//!
//! Each iteration picks the highest-priority pending story from
//! `.devloop/backlog.json`, hands it to an external agent on a fresh branch,
//! verifies the result, commits, opens a pull request and waits for the merge.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, invariants,
//!   immutability checks, commit/PR composition). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, git, `gh`, child
//!   processes) behind narrow traits so tests can substitute fakes.
//!
//! Orchestration modules ([`looping`], [`iteration`], [`branches`],
//! [`invoke`], [`verify`], [`publish`], [`merge`]) coordinate core logic with
//! I/O to implement `devloop run`.

pub mod branches;
pub mod context;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod invoke;
pub mod io;
pub mod iteration;
pub mod logging;
pub mod looping;
pub mod merge;
pub mod publish;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
