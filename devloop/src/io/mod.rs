//! Side-effecting adapters: filesystem, git, code host and child processes.
//!
//! Each external capability sits behind a narrow trait so the loop can be
//! driven by scripted fakes in tests.

pub mod agent;
pub mod backlog;
pub mod clock;
pub mod code_host;
pub mod config;
pub mod gate;
pub mod git;
pub mod init;
pub mod iteration_log;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod scaffold;
