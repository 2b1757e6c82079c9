//! Story branch lifecycle on top of the [`VersionControl`] port.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::LoopError;
use crate::io::git::VersionControl;

pub struct BranchManager<'a> {
    vcs: &'a dyn VersionControl,
    remote: String,
    main: String,
}

impl<'a> BranchManager<'a> {
    pub fn new(vcs: &'a dyn VersionControl, remote: &str, main: &str) -> Self {
        Self {
            vcs,
            remote: remote.to_string(),
            main: main.to_string(),
        }
    }

    /// Fail with [`LoopError::DirtyWorktree`] if anything but ignored files changed.
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.vcs.status()?;
        if entries.is_empty() {
            return Ok(());
        }
        warn!(count = entries.len(), "worktree not clean");
        let entries = entries
            .iter()
            .map(|entry| format!("{} {}", entry.code, entry.path))
            .collect::<Vec<_>>()
            .join("\n");
        Err(LoopError::DirtyWorktree { entries }.into())
    }

    /// Fetch, check out main and fast-forward it to the remote.
    #[instrument(skip_all, fields(main = %self.main))]
    pub fn sync(&self) -> Result<()> {
        let result = self
            .vcs
            .fetch(&self.remote)
            .and_then(|()| self.vcs.checkout(&self.main))
            .and_then(|()| self.vcs.fast_forward(&self.remote, &self.main));
        if let Err(err) = result {
            return Err(LoopError::SyncFailed {
                branch: self.main.clone(),
                reason: format!("{err:#}"),
            }
            .into());
        }
        debug!("main synced");
        Ok(())
    }

    /// Create `name` from the current HEAD and check it out.
    ///
    /// A same-named local or remote branch is deleted first when `force` is
    /// set, otherwise it is a [`LoopError::BranchConflict`].
    #[instrument(skip_all, fields(branch = name, force))]
    pub fn create_branch(&self, name: &str, force: bool) -> Result<()> {
        let local = self.vcs.local_branch_exists(name)?;
        let remote = self.vcs.remote_branch_exists(&self.remote, name)?;
        if local || remote {
            if !force {
                return Err(LoopError::BranchConflict {
                    branch: name.to_string(),
                    local,
                    remote,
                }
                .into());
            }
            info!(local, remote, "recreating existing branch");
            if local {
                if self.vcs.current_branch()? == name {
                    self.vcs.checkout(&self.main)?;
                }
                self.vcs.delete_local_branch(name)?;
            }
            if remote {
                self.vcs.delete_remote_branch(&self.remote, name)?;
            }
        }
        self.vcs
            .checkout_new_branch(name)
            .with_context(|| format!("create branch {name}"))
    }

    /// Delete local and remote copies of a landed or abandoned branch. Idempotent.
    #[instrument(skip_all, fields(branch = name))]
    pub fn cleanup_after_merge(&self, name: &str) -> Result<()> {
        if self.vcs.current_branch()? == name {
            self.vcs.checkout(&self.main)?;
        }
        if self.vcs.local_branch_exists(name)? {
            self.vcs.delete_local_branch(name)?;
        }
        if self.vcs.remote_branch_exists(&self.remote, name)? {
            self.vcs.delete_remote_branch(&self.remote, name)?;
        }
        self.vcs.prune_remote(&self.remote)?;
        info!("branch cleaned up");
        Ok(())
    }

    /// Throw away everything the iteration did: reset and clean the tree
    /// (ignored files kept), return to main, delete the local branch.
    #[instrument(skip_all, fields(branch = name))]
    pub fn discard(&self, name: &str) -> Result<()> {
        self.vcs.reset_worktree()?;
        self.vcs.checkout(&self.main)?;
        if self.vcs.local_branch_exists(name)? {
            self.vcs.delete_local_branch(name)?;
        }
        info!("branch discarded");
        Ok(())
    }

    /// Check out main without deleting anything.
    pub fn return_to_main(&self) -> Result<()> {
        if self.vcs.current_branch()? != self.main {
            self.vcs.checkout(&self.main)?;
        }
        Ok(())
    }
}
