//! Startup housekeeping: scans the durable store for runs orphaned by a
//! prior crash, prunes stale worktrees, and kills lingering agent processes.

use tracing::{info, warn};

use crate::platform::process::{check_orphan_processes, kill_orphans};
use crate::store::Store;
use crate::worktree::WorktreeManager;
use crate::Result;

/// Summary of one housekeeping pass, for startup logs and the readiness
/// report.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub orphaned_run_ids: Vec<String>,
    pub worktrees_pruned: bool,
    pub killed_pids: Vec<u32>,
}

/// Runs the full housekeeping sequence a worker performs before it starts
/// accepting work: mark runs left `Running` by a prior crash as `Orphaned`
/// (recorded, not resumed — see the engine-backing-store decision), prune
/// stale git worktree admin state, and best-effort kill any agent processes
/// whose command line still references a now-dead run.
pub async fn run_startup_housekeeping(
    store: &Store,
    worktrees: &WorktreeManager,
    command_line_patterns: &[String],
) -> Result<RecoveryReport> {
    let orphaned_run_ids = store.mark_orphaned_runs().await?;
    if !orphaned_run_ids.is_empty() {
        warn!(count = orphaned_run_ids.len(), "marked orphaned workflow runs from a prior crash");
    }

    worktrees.prune_worktrees().await?;
    info!("stale worktree admin state pruned");

    let mut killed_pids = Vec::new();
    for pattern in command_line_patterns {
        let pids = check_orphan_processes(pattern).await;
        if !pids.is_empty() {
            warn!(pattern, ?pids, "killing orphaned agent processes from a prior crash");
            kill_orphans(&pids).await?;
            killed_pids.extend(pids);
        }
    }

    Ok(RecoveryReport { orphaned_run_ids, worktrees_pruned: true, killed_pids })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn housekeeping_reports_orphaned_runs() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("stuck-run", "tcr").await.unwrap();

        let repo = tempfile::tempdir().unwrap();
        tokio::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(repo.path())
            .output()
            .await
            .unwrap();
        let base = tempfile::tempdir().unwrap();
        let worktrees = WorktreeManager::new(repo.path(), base.path());

        let report = run_startup_housekeeping(&store, &worktrees, &[]).await.unwrap();
        assert_eq!(report.orphaned_run_ids, vec!["stuck-run".to_string()]);
        assert!(report.killed_pids.is_empty());
    }

    #[tokio::test]
    async fn housekeeping_with_no_stale_state_is_a_noop() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = tempfile::tempdir().unwrap();
        tokio::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(repo.path())
            .output()
            .await
            .unwrap();
        let base = tempfile::tempdir().unwrap();
        let worktrees = WorktreeManager::new(repo.path(), base.path());

        let report = run_startup_housekeeping(&store, &worktrees, &[]).await.unwrap();
        assert!(report.orphaned_run_ids.is_empty());
    }
}
