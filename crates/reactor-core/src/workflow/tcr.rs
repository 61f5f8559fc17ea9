//! `[Start] → Bootstrap → Execute → RunTests → (Commit | Revert) → Teardown`
//! single-task pipeline with compensating cleanup (§4.8).

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activity::{
    commit_changes_activity, execute_task_activity, revert_changes_activity, run_tests_activity,
    teardown_cell_activity,
};
use crate::cell::CellLifecycle;
use crate::store::{RunStatus, Store};
use crate::workflow::context::WorkflowContext;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcrInput {
    pub cell_id: String,
    pub branch: String,
    pub task_id: String,
    pub description: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcrResult {
    pub success: bool,
    pub tests_passed: bool,
    pub files_changed: Vec<String>,
    pub error: String,
}

/// Runs one TCR workflow execution to completion.
///
/// `ctx` governs the `Execute`/`RunTests`/`Commit`/`Revert` body only: if it
/// is cancelled mid-flight (e.g. the worker is shutting down), the body is
/// abandoned in favor of an immediate cancelled result. `Teardown` is plain
/// sequential code below that race, never gated on `ctx`, so it always runs
/// regardless of which branch produced `result` (INV-5).
pub async fn run_tcr(
    lifecycle: &CellLifecycle,
    ctx: &WorkflowContext,
    store: &Store,
    run_id: &str,
    test_command: &str,
    input: TcrInput,
) -> Result<TcrResult> {
    store.create_run(run_id, "tcr").await?;

    let bootstrap = match lifecycle.bootstrap_cell(&input.cell_id, &input.branch).await {
        Ok(b) => b,
        Err(e) => {
            warn!(run_id, error = %e, "TCR bootstrap failed, nothing to tear down");
            store.complete_run(run_id, RunStatus::Failed).await.ok();
            return Ok(TcrResult {
                success: false,
                tests_passed: false,
                files_changed: Vec::new(),
                error: e.to_string(),
            });
        }
    };

    let body = run_tcr_body(lifecycle, store, run_id, test_command, &input, &bootstrap);
    tokio::pin!(body);
    let result = tokio::select! {
        r = &mut body => r,
        _ = ctx.token().cancelled() => {
            warn!(run_id, "TCR cancelled mid-flight, proceeding directly to teardown");
            Ok(TcrResult {
                success: false,
                tests_passed: false,
                files_changed: Vec::new(),
                error: "cancelled".into(),
            })
        }
    };

    // Plain sequential code, not raced against `ctx`, so it always runs
    // regardless of which branch above produced `result` (INV-5).
    if let Err(e) = teardown_cell_activity(lifecycle, &bootstrap).await {
        warn!(run_id, error = %e, "TCR teardown reported errors (collected, not fatal)");
    }

    let final_status = if result.as_ref().map(|r| r.success).unwrap_or(false) {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    };
    store.complete_run(run_id, final_status).await.ok();

    result
}

async fn run_tcr_body(
    lifecycle: &CellLifecycle,
    _store: &Store,
    run_id: &str,
    test_command: &str,
    input: &TcrInput,
    bootstrap: &crate::cell::BootstrapOutput,
) -> Result<TcrResult> {
    let exec = execute_task_activity(lifecycle, bootstrap, &input.description, &input.prompt).await?;

    if !exec.success {
        warn!(run_id, error = %exec.error_message, "TCR execute step failed");
        return Ok(TcrResult {
            success: false,
            tests_passed: false,
            files_changed: exec.files_modified,
            error: exec.error_message,
        });
    }

    let tests_passed = run_tests_activity(lifecycle, bootstrap, &exec.session_id, test_command).await?;
    info!(run_id, tests_passed, "TCR tests complete");

    if tests_passed {
        commit_changes_activity(lifecycle, bootstrap, &exec.session_id, &input.task_id, &input.description)
            .await?;
        Ok(TcrResult {
            success: true,
            tests_passed: true,
            files_changed: exec.files_modified,
            error: String::new(),
        })
    } else {
        revert_changes_activity(lifecycle, bootstrap, &exec.session_id).await?;
        Ok(TcrResult {
            success: false,
            tests_passed: false,
            files_changed: exec.files_modified,
            error: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_distinguishes_test_failure_from_infra_error() {
        let test_failure = TcrResult {
            success: false,
            tests_passed: false,
            files_changed: vec![],
            error: String::new(),
        };
        assert!(test_failure.error.is_empty());

        let infra_failure = TcrResult {
            success: false,
            tests_passed: false,
            files_changed: vec![],
            error: "port pool exhausted".into(),
        };
        assert!(!infra_failure.error.is_empty());
    }
}
