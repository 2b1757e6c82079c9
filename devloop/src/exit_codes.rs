//! Stable exit codes for devloop CLI commands.

/// Command succeeded, or `devloop next` printed a story id.
pub const OK: i32 = 0;
/// Invalid backlog/config or any other error.
pub const INVALID: i32 = 1;
/// `devloop next` found no pending story (backlog complete).
pub const COMPLETE: i32 = 2;
/// `devloop run` refused to start on a dirty working tree.
pub const DIRTY: i32 = 3;
