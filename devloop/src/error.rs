//! Errors callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context; these are
//! recovered with `downcast_ref` where the loop or CLI must react to them.

/// Loop-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The working tree has uncommitted changes at loop start.
    #[error("working tree not clean:\n{entries}")]
    DirtyWorktree { entries: String },

    /// A branch of the story's name already exists and force-recreate is off.
    #[error("branch '{branch}' already exists (local: {local}, remote: {remote})")]
    BranchConflict {
        branch: String,
        local: bool,
        remote: bool,
    },

    /// Main could not be synced with the remote before an iteration.
    #[error("sync of '{branch}' failed: {reason}")]
    SyncFailed { branch: String, reason: String },
}
