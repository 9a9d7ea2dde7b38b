//! Isolated, disposable workspaces for agent execution.
//!
//! Each task gets its own detached git worktree pinned at the task's base
//! commit, derived from one canonical clone. Worktrees are keyed
//! deterministically by task id, so two tasks never alias the same
//! directory and an orphan left by a crash is identifiable and reclaimable
//! on the next run. The canonical clone is never mutated or deleted by
//! workspace operations.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::discovery::{is_url, Task};
use crate::error::{SetupError, WorkspaceError};

/// Terminal disposition of a workspace at release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The run finished; remove the checkout.
    Remove,
    /// The run failed; preserve the checkout under the archive path.
    Archive,
}

/// An isolated checkout exclusively owned by one task-runner invocation.
#[derive(Debug)]
pub struct Workspace {
    /// Task this workspace belongs to.
    pub task_id: u64,
    /// Deterministic key, also the directory name.
    pub key: String,
    /// Root of the checkout.
    pub root: PathBuf,
    released: bool,
}

impl Workspace {
    /// Deterministic workspace key for a task id.
    pub fn key_for(task_id: u64) -> String {
        format!("task-{task_id}")
    }

    /// Detached workspace over an arbitrary directory, no release tracking.
    #[cfg(test)]
    pub(crate) fn for_tests(task_id: u64, root: PathBuf) -> Self {
        Self {
            task_id,
            key: Self::key_for(task_id),
            root,
            released: true,
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            warn!(key = %self.key, "workspace dropped without release");
        }
    }
}

/// Creates and destroys workspaces derived from one canonical clone.
pub struct WorkspaceManager {
    /// The canonical clone all worktrees derive from. Read-only from the
    /// perspective of every workspace.
    repo_root: PathBuf,
    /// Parent directory for active worktrees.
    worktree_base: PathBuf,
    /// Parent directory for archived failed worktrees.
    archive_base: PathBuf,
}

impl WorkspaceManager {
    /// Open a manager over an existing local clone.
    pub fn open(repo_root: impl Into<PathBuf>, work_base: impl Into<PathBuf>) -> Self {
        let work_base = work_base.into();
        Self {
            repo_root: repo_root.into(),
            worktree_base: work_base.join("worktrees"),
            archive_base: work_base.join("archive"),
        }
    }

    /// Resolve a repository target into a manager, cloning if the target
    /// is a URL. Local targets must already be git repositories.
    pub fn from_target(target: &str, work_base: &Path) -> Result<Self, SetupError> {
        let repo_root = if is_url(target) {
            let dest = work_base.join("repo");
            if !dest.join(".git").exists() {
                info!(url = target, dest = %dest.display(), "cloning canonical repository");
                clone_repo(target, &dest)?;
            }
            dest
        } else {
            let local = PathBuf::from(target);
            if !local.exists() {
                return Err(SetupError::NotARepository(target.to_string()));
            }
            if !local.join(".git").exists() {
                return Err(SetupError::NotARepository(target.to_string()));
            }
            local
        };

        Ok(Self::open(repo_root, work_base))
    }

    /// Path to the canonical clone.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Deterministic archive path for a task's failed workspace.
    pub fn archive_path(&self, task_id: u64) -> PathBuf {
        self.archive_base.join(Workspace::key_for(task_id))
    }

    /// Create an isolated checkout pinned at the task's base commit.
    ///
    /// A leftover directory under the same key (an orphan from a crashed
    /// run) is pruned first, making provisioning idempotent per key.
    pub fn provision(&self, task: &Task) -> Result<Workspace, WorkspaceError> {
        let key = Workspace::key_for(task.id);
        let root = self.worktree_base.join(&key);

        fs::create_dir_all(&self.worktree_base)?;

        if root.exists() {
            info!(key = %key, "reclaiming orphaned workspace");
            self.remove_worktree(&root)?;
        }

        // Resolve the base commit before touching disk further, so an
        // unknown commit surfaces as its own error.
        let resolved = git(&self.repo_root, &["rev-parse", "--verify", &format!("{}^{{commit}}", task.base_commit)]);
        if let Err(reason) = resolved {
            return Err(WorkspaceError::UnresolvableCommit {
                task_id: task.id,
                commit: task.base_commit.clone(),
                reason,
            });
        }

        git(
            &self.repo_root,
            &[
                "worktree",
                "add",
                "--detach",
                &root.to_string_lossy(),
                &task.base_commit,
            ],
        )
        .map_err(|reason| WorkspaceError::CheckoutFailed {
            task_id: task.id,
            reason,
        })?;

        debug!(key = %key, root = %root.display(), "workspace provisioned");

        Ok(Workspace {
            task_id: task.id,
            key,
            root,
            released: false,
        })
    }

    /// Remove the checkout, or preserve it under the archive path when the
    /// outcome calls for it. Safe to call after a partial provision: a
    /// missing directory is not an error.
    pub fn release(
        &self,
        mut workspace: Workspace,
        outcome: ReleaseOutcome,
    ) -> Result<(), WorkspaceError> {
        workspace.released = true;

        if !workspace.root.exists() {
            git(&self.repo_root, &["worktree", "prune"]).ok();
            return Ok(());
        }

        match outcome {
            ReleaseOutcome::Remove => {
                self.remove_worktree(&workspace.root)?;
                debug!(key = %workspace.key, "workspace removed");
            }
            ReleaseOutcome::Archive => {
                let archive = self.archive_path(workspace.task_id);
                fs::create_dir_all(&self.archive_base)?;
                if archive.exists() {
                    fs::remove_dir_all(&archive)?;
                }
                fs::rename(&workspace.root, &archive).map_err(|e| {
                    WorkspaceError::ArchiveFailed {
                        path: archive.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                // The moved worktree is now stale from git's point of view.
                git(&self.repo_root, &["worktree", "prune"]).ok();
                info!(key = %workspace.key, archive = %archive.display(), "workspace archived");
            }
        }

        Ok(())
    }

    /// Remove any worktrees left behind by previous runs.
    pub fn cleanup_orphans(&self) -> Result<usize, WorkspaceError> {
        if !self.worktree_base.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.worktree_base)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                warn!(path = %path.display(), "removing orphaned workspace");
                self.remove_worktree(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), WorkspaceError> {
        let result = git(
            &self.repo_root,
            &["worktree", "remove", "--force", &path.to_string_lossy()],
        );

        if result.is_err() {
            // Fall back to manual removal when git refuses (e.g. the
            // worktree metadata is already gone).
            if path.exists() {
                fs::remove_dir_all(path).map_err(|e| WorkspaceError::RemovalFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
            git(&self.repo_root, &["worktree", "prune"]).ok();
        }

        Ok(())
    }
}

/// Run a git command in `dir`, returning stdout on success.
pub(crate) fn git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| format!("failed to run git: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

fn clone_repo(url: &str, dest: &Path) -> Result<(), SetupError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let output = Command::new("git")
        .args(["clone", url, &dest.to_string_lossy()])
        .output()?;

    if !output.status.success() {
        return Err(SetupError::CloneFailed {
            url: url.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
