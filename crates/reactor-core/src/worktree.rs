//! Git worktree lifecycle for isolated cell execution environments.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::git_exec::run_git;
use crate::{ReactorError, Result};

/// A single managed git worktree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worktree {
    pub id: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Creates, removes, and prunes worktrees rooted at a shared repository.
///
/// All worktrees live under a single `base_dir`, one subdirectory per `id`.
pub struct WorktreeManager {
    repo_root: PathBuf,
    base_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            base_dir: base_dir.into(),
        }
    }

    fn worktree_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// Creates a worktree at `base_dir/id` tracking `branch`.
    ///
    /// Fails with [`ReactorError::WorktreeConflict`] if the path already exists.
    pub async fn create_worktree(&self, id: &str, branch: &str) -> Result<Worktree> {
        let path = self.worktree_path(id);
        if path.exists() {
            return Err(ReactorError::WorktreeConflict(path.display().to_string()));
        }

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(ReactorError::Io)?;

        let branch_exists = self.branch_exists(branch).await?;
        let args: Vec<String> = if branch_exists {
            vec![
                "worktree".into(),
                "add".into(),
                path.display().to_string(),
                branch.into(),
            ]
        } else {
            vec![
                "worktree".into(),
                "add".into(),
                "-b".into(),
                branch.into(),
                path.display().to_string(),
            ]
        };
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_git(&arg_refs, &self.repo_root).await?;

        info!(id, branch, path = %path.display(), "worktree created");
        Ok(Worktree {
            id: id.to_string(),
            path,
            branch: branch.to_string(),
        })
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = run_git(
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            &self.repo_root,
        )
        .await;
        match out {
            Ok(o) => Ok(o.exit_code == 0),
            Err(_) => Ok(false),
        }
    }

    /// Removes the worktree directory and prunes git administrative refs.
    ///
    /// Idempotent: removing a non-existent worktree id is not an error.
    pub async fn remove_worktree(&self, id: &str) -> Result<()> {
        let path = self.worktree_path(id);
        if !path.exists() {
            debug!(id, "remove_worktree: path already absent, treating as success");
            self.prune().await?;
            return Ok(());
        }

        let removal = run_git(
            &["worktree", "remove", "--force", &path.display().to_string()],
            &self.repo_root,
        )
        .await;

        if let Err(e) = removal {
            warn!(id, error = %e, "git worktree remove failed, falling back to rm -rf");
            tokio::fs::remove_dir_all(&path).await.map_err(ReactorError::Io)?;
        }

        self.prune().await?;
        info!(id, "worktree removed");
        Ok(())
    }

    /// Prunes stale git worktree administrative state.
    pub async fn prune(&self) -> Result<()> {
        run_git(&["worktree", "prune"], &self.repo_root).await?;
        Ok(())
    }

    /// `prune_worktrees` is the same operation as [`Self::prune`], named to match
    /// the manager's external contract.
    pub async fn prune_worktrees(&self) -> Result<()> {
        self.prune().await
    }

    /// Lists worktrees currently registered with git under the base directory.
    pub async fn list_worktrees(&self) -> Result<Vec<Worktree>> {
        let out = run_git(&["worktree", "list", "--porcelain"], &self.repo_root).await?;
        Ok(parse_porcelain(&out.stdout, &self.base_dir))
    }

    /// Removes every worktree under `base_dir`, collecting but not propagating
    /// per-worktree errors until all have been attempted.
    pub async fn cleanup_all(&self) -> Result<()> {
        let worktrees = self.list_worktrees().await?;
        let mut errors = Vec::new();
        for wt in worktrees {
            if let Err(e) = self.remove_worktree(&wt.id).await {
                errors.push(format!("{}: {e}", wt.id));
            }
        }
        self.prune().await.ok();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReactorError::Cleanup(errors.join("; ")))
        }
    }
}

/// Parses `git worktree list --porcelain` output into [`Worktree`] entries
/// that live under `base_dir`, ignoring the repo's own primary worktree.
fn parse_porcelain(stdout: &str, base_dir: &Path) -> Vec<Worktree> {
    let mut result = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;

    for line in stdout.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let (Some(p), Some(b)) = (path.take(), branch.take()) {
                if let Ok(rel) = p.strip_prefix(base_dir) {
                    if let Some(id) = rel.to_str() {
                        if !id.is_empty() {
                            result.push(Worktree {
                                id: id.to_string(),
                                path: p,
                                branch: b,
                            });
                        }
                    }
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim_start_matches("refs/heads/").to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    async fn setup_test_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let dir = dir.path().to_path_buf();
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            async move {
                Command::new("git")
                    .args(&args)
                    .current_dir(&dir)
                    .output()
                    .await
                    .unwrap();
            }
        };
        run(&["init", "-q"]).await;
        run(&["config", "user.email", "test@example.com"]).await;
        run(&["config", "user.name", "test"]).await;
        tokio::fs::write(dir.path().join("README.md"), "hello").await.unwrap();
        run(&["add", "."]).await;
        run(&["commit", "-q", "-m", "init"]).await;
        dir
    }

    #[tokio::test]
    async fn create_and_remove_worktree() {
        let repo = setup_test_repo().await;
        let base = tempfile::tempdir().unwrap();
        let mgr = WorktreeManager::new(repo.path(), base.path());

        let wt = mgr.create_worktree("cell-1", "feature/x").await.unwrap();
        assert!(wt.path.exists());
        assert_eq!(wt.branch, "feature/x");

        mgr.remove_worktree("cell-1").await.unwrap();
        assert!(!wt.path.exists());
    }

    #[tokio::test]
    async fn create_existing_path_conflicts() {
        let repo = setup_test_repo().await;
        let base = tempfile::tempdir().unwrap();
        let mgr = WorktreeManager::new(repo.path(), base.path());

        mgr.create_worktree("cell-1", "feature/a").await.unwrap();
        let second = mgr.create_worktree("cell-1", "feature/b").await;
        assert!(matches!(second, Err(ReactorError::WorktreeConflict(_))));
    }

    #[tokio::test]
    async fn remove_nonexistent_is_idempotent() {
        let repo = setup_test_repo().await;
        let base = tempfile::tempdir().unwrap();
        let mgr = WorktreeManager::new(repo.path(), base.path());

        let result = mgr.remove_worktree("never-existed").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn list_worktrees_reflects_creation() {
        let repo = setup_test_repo().await;
        let base = tempfile::tempdir().unwrap();
        let mgr = WorktreeManager::new(repo.path(), base.path());

        mgr.create_worktree("cell-1", "feature/a").await.unwrap();
        mgr.create_worktree("cell-2", "feature/b").await.unwrap();

        let listed = mgr.list_worktrees().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|w| w.id.as_str()).collect();
        assert!(ids.contains(&"cell-1"));
        assert!(ids.contains(&"cell-2"));
    }

    #[tokio::test]
    async fn cleanup_all_removes_every_worktree() {
        let repo = setup_test_repo().await;
        let base = tempfile::tempdir().unwrap();
        let mgr = WorktreeManager::new(repo.path(), base.path());

        mgr.create_worktree("cell-1", "feature/a").await.unwrap();
        mgr.create_worktree("cell-2", "feature/b").await.unwrap();
        mgr.cleanup_all().await.unwrap();

        let listed = mgr.list_worktrees().await.unwrap();
        assert!(listed.is_empty());
    }
}
