//! Serializable-in/serializable-out activity wrappers around cell and shell
//! operations, with the retry/heartbeat policy the workflow engine expects.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actions;
use crate::cell::{BootstrapOutput, CellLifecycle};
use crate::config::ActivityConfig;
use crate::{ReactorError, Result};

/// Mirrors the engine's per-activity retry policy fields (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl From<&ActivityConfig> for RetryPolicy {
    fn from(cfg: &ActivityConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(cfg.initial_interval_ms),
            backoff_coefficient: cfg.backoff_coefficient,
            max_interval: Duration::from_secs(cfg.max_interval_secs),
            max_attempts: cfg.max_attempts,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for activities that are unsafe to replay
    /// (`BootstrapCell`, `ExecuteTask`).
    pub fn no_retry() -> Self {
        Self {
            initial_interval: Duration::from_millis(0),
            backoff_coefficient: 1.0,
            max_interval: Duration::from_millis(0),
            max_attempts: 1,
        }
    }
}

/// Runs `f` under `policy`, retrying with exponential backoff on error up to
/// `max_attempts`. Logs each retry as a structured event.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, activity_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    let mut delay = policy.initial_interval;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    activity = activity_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "activity failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_coefficient).min(policy.max_interval.as_secs_f64()),
                );
                attempt += 1;
            }
            Err(e) => {
                warn!(activity = activity_name, attempt, error = %e, "activity exhausted retries");
                return Err(e);
            }
        }
    }
}

/// Output of the `ExecuteTask` activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteTaskResult {
    pub success: bool,
    pub output: String,
    pub files_modified: Vec<String>,
    pub error_message: String,
    pub session_id: String,
}

/// `BootstrapCell` activity: `MaxAttempts=1`, non-idempotent (§9 — registry
/// entries cannot survive a worker restart).
pub async fn bootstrap_cell_activity(
    lifecycle: &CellLifecycle,
    cell_id: &str,
    branch: &str,
) -> Result<BootstrapOutput> {
    info!(cell_id, branch, "scheduling BootstrapCell");
    lifecycle.bootstrap_cell(cell_id, branch).await
}

/// `ExecuteTask` activity: sends the task prompt through the cell's agent
/// client (INV-6).
pub async fn execute_task_activity(
    lifecycle: &CellLifecycle,
    bootstrap: &BootstrapOutput,
    description: &str,
    prompt: &str,
) -> Result<ExecuteTaskResult> {
    let client = lifecycle
        .registry()
        .client(&bootstrap.registry_key())
        .ok_or_else(|| ReactorError::AgentExecutionError("cell not found in registry".into()))?;

    let opts = crate::client::PromptOptions {
        title: Some(description.to_string()),
        ..Default::default()
    };

    match client.execute_prompt(prompt, &opts).await {
        Ok(result) => Ok(ExecuteTaskResult {
            success: true,
            output: result.output,
            files_modified: result.files_modified,
            error_message: String::new(),
            session_id: result.session_id,
        }),
        Err(e) => Ok(ExecuteTaskResult {
            success: false,
            output: String::new(),
            files_modified: Vec::new(),
            error_message: e.to_string(),
            session_id: String::new(),
        }),
    }
}

/// `RunTests` activity.
pub async fn run_tests_activity(
    lifecycle: &CellLifecycle,
    bootstrap: &BootstrapOutput,
    session_id: &str,
    test_command: &str,
) -> Result<bool> {
    let client = lifecycle
        .registry()
        .client(&bootstrap.registry_key())
        .ok_or_else(|| ReactorError::AgentExecutionError("cell not found in registry".into()))?;
    actions::run_tests(&client, session_id, test_command).await
}

/// `CommitChanges` activity: idempotent at the git level (empty diff ⇒
/// success), so a bounded retry policy is safe.
pub async fn commit_changes_activity(
    lifecycle: &CellLifecycle,
    bootstrap: &BootstrapOutput,
    session_id: &str,
    task_id: &str,
    description: &str,
) -> Result<()> {
    let client = lifecycle
        .registry()
        .client(&bootstrap.registry_key())
        .ok_or_else(|| ReactorError::AgentExecutionError("cell not found in registry".into()))?;
    actions::commit_changes(&client, session_id, task_id, description).await
}

/// `RevertChanges` activity: idempotent.
pub async fn revert_changes_activity(
    lifecycle: &CellLifecycle,
    bootstrap: &BootstrapOutput,
    session_id: &str,
) -> Result<()> {
    let client = lifecycle
        .registry()
        .client(&bootstrap.registry_key())
        .ok_or_else(|| ReactorError::AgentExecutionError("cell not found in registry".into()))?;
    actions::revert_changes(&client, session_id).await
}

/// `TeardownCell` activity: always scheduled on a disconnected context so it
/// runs even when the parent workflow was cancelled or failed (INV-5).
pub async fn teardown_cell_activity(lifecycle: &CellLifecycle, bootstrap: &BootstrapOutput) -> Result<()> {
    lifecycle.teardown_cell(bootstrap).await
}

/// `RunScript` activity: runs an arbitrary command inside a cell by `cellID`,
/// used by the DAG workflow's per-task script execution.
pub async fn run_script_activity(lifecycle: &CellLifecycle, cell_id: &str, command: &str) -> Result<String> {
    let client = lifecycle
        .registry()
        .client_for_cell(cell_id)
        .ok_or_else(|| ReactorError::AgentExecutionError(format!("cell {cell_id} not found in registry")))?;

    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| ReactorError::Config("RunScript command is empty".into()))?;
    let args: Vec<String> = parts.map(String::from).collect();

    // Each RunScript invocation is a fresh, unnamed session on the cell.
    let session = client
        .execute_prompt("", &crate::client::PromptOptions { no_reply: Some(true), ..Default::default() })
        .await?;

    let result = client.execute_command(&session.session_id, program, &args).await?;
    if result.exit_code.map(|c| c != 0).unwrap_or(false) {
        return Err(ReactorError::AgentExecutionError(format!(
            "command `{command}` exited with {:?}",
            result.exit_code
        )));
    }
    Ok(result.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn with_retry_succeeds_without_retrying_when_first_attempt_ok() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_millis(10),
            max_attempts: 3,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 1.0,
            max_interval: Duration::from_millis(5),
            max_attempts: 3,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retry(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReactorError::Process("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn no_retry_policy_allows_exactly_one_attempt() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn retry_policy_from_activity_config() {
        let cfg = ActivityConfig::default();
        let policy = RetryPolicy::from(&cfg);
        assert_eq!(policy.max_attempts, cfg.max_attempts);
        assert_eq!(policy.backoff_coefficient, cfg.backoff_coefficient);
    }
}
