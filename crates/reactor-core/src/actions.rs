//! Test / commit / revert actions, issued through the in-cell agent client
//! so every file mutation happens inside the cell's worktree (INV-6).

use tracing::info;

use crate::client::AgentClient;
use crate::{ReactorError, Result};

/// Runs the configured test command inside the cell and returns whether it
/// passed. Output is captured but not structurally interpreted.
pub async fn run_tests(client: &AgentClient, session_id: &str, test_command: &str) -> Result<bool> {
    let mut parts = test_command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| ReactorError::Config("testCommand is empty".into()))?;
    let args: Vec<String> = parts.map(String::from).collect();

    let result = client.execute_command(session_id, program, &args).await?;
    let passed = result.exit_code.map(|c| c == 0).unwrap_or(false);
    info!(session_id, passed, exit_code = ?result.exit_code, "test run complete");
    Ok(passed)
}

/// Commits staged changes with message `"Task {task_id}: {description}"`.
/// An empty diff is treated as success, per the accepted commit-on-empty-diff
/// decision.
pub async fn commit_changes(
    client: &AgentClient,
    session_id: &str,
    task_id: &str,
    description: &str,
) -> Result<()> {
    let message = format!("Task {task_id}: {description}");
    client
        .execute_command(session_id, "git", &["add".into(), "-A".into()])
        .await?;
    let result = client
        .execute_command(
            session_id,
            "git",
            &["commit".into(), "--allow-empty".into(), "-m".into(), message],
        )
        .await?;
    info!(session_id, task_id, output = %result.output, "commit complete");
    Ok(())
}

/// Discards all local changes. Idempotent on a clean worktree.
pub async fn revert_changes(client: &AgentClient, session_id: &str) -> Result<()> {
    client
        .execute_command(session_id, "git", &["reset".into(), "--hard".into(), "HEAD".into()])
        .await?;
    info!(session_id, "revert complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_format() {
        let message = format!("Task {}: {}", "T1", "add hello");
        assert_eq!(message, "Task T1: add hello");
    }
}
