//! Durable SQLite-backed store for workflow run records, activity history,
//! and buffered DAG signal deliveries.
//!
//! This backs the workflow engine integration's crash-visibility guarantee
//! (§10.E): it is not a replay log, just an append-only record an operator
//! or recovery scan can read after a worker restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::{ReactorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Orphaned,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Orphaned => "orphaned",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            "orphaned" => RunStatus::Orphaned,
            _ => RunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub kind: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// JSON-encoded `TcrResult`/`DagOutcome`, set once the run completes.
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub run_id: String,
    pub activity_name: String,
    pub attempt: u32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDelivery {
    pub run_id: String,
    pub signal_name: String,
    pub delivered_at: DateTime<Utc>,
    pub payload: Option<String>,
}

/// Durable store handle. Cheap to clone (wraps a connection pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path` and applies
    /// schema migrations.
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ReactorError::Store(format!("failed to open {}: {e}", path.display())))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Opens an in-memory database, used by tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| ReactorError::Store(format!("failed to open in-memory store: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                result TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS activity_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                activity_name TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS signal_deliveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                signal_name TEXT NOT NULL,
                delivered_at TEXT NOT NULL,
                payload TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                workflow_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    /// Enqueues a workflow submission on the task queue (§6): the worker and
    /// the CLI communicate only through this shared store.
    pub async fn enqueue_submission(&self, id: &str, workflow_kind: &str, payload: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO submissions (id, workflow_kind, payload, status, submitted_at) VALUES (?, ?, ?, 'queued', ?)",
        )
        .bind(id)
        .bind(workflow_kind)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Atomically claims the oldest queued submission, if any.
    pub async fn claim_next_submission(&self) -> Result<Option<(String, String, String)>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query(
            "SELECT id, workflow_kind, payload FROM submissions WHERE status = 'queued' ORDER BY submitted_at LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(store_err)?;
            return Ok(None);
        };

        let id: String = row.get("id");
        let kind: String = row.get("workflow_kind");
        let payload: String = row.get("payload");

        sqlx::query("UPDATE submissions SET status = 'claimed' WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(Some((id, kind, payload)))
    }

    pub async fn create_run(&self, id: &str, kind: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query("INSERT INTO workflow_runs (id, kind, status, started_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(kind)
            .bind(RunStatus::Running.as_str())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn complete_run(&self, id: &str, status: RunStatus) -> Result<()> {
        self.complete_run_with_result(id, status, None).await
    }

    /// Same as [`Store::complete_run`], additionally persisting the
    /// JSON-encoded workflow result so the CLI can retrieve it without
    /// holding a live handle to the run.
    pub async fn complete_run_with_result(
        &self,
        id: &str,
        status: RunStatus,
        result: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE workflow_runs SET status = ?, completed_at = ?, result = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(result)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query(
            "SELECT id, kind, status, started_at, completed_at, result FROM workflow_runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(row_to_run))
    }

    pub async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        let rows = sqlx::query(
            "SELECT id, kind, status, started_at, completed_at, result FROM workflow_runs ORDER BY started_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(row_to_run).collect())
    }

    /// Startup recovery scan: marks every run left `Running` by a prior
    /// crash as `Orphaned`. Does not attempt to resume them.
    pub async fn mark_orphaned_runs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM workflow_runs WHERE status = ?")
            .bind(RunStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let ids: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>("id")).collect();

        for id in &ids {
            self.complete_run(id, RunStatus::Orphaned).await?;
        }
        Ok(ids)
    }

    pub async fn record_activity_event(&self, event: &ActivityEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_history
                (run_id, activity_name, attempt, status, started_at, completed_at, error)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.run_id)
        .bind(&event.activity_name)
        .bind(event.attempt as i64)
        .bind(&event.status)
        .bind(event.started_at.to_rfc3339())
        .bind(event.completed_at.map(|t| t.to_rfc3339()))
        .bind(&event.error)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn activity_history(&self, run_id: &str) -> Result<Vec<ActivityEvent>> {
        let rows = sqlx::query(
            "SELECT run_id, activity_name, attempt, status, started_at, completed_at, error
             FROM activity_history WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ActivityEvent {
                run_id: row.get("run_id"),
                activity_name: row.get("activity_name"),
                attempt: row.get::<i64, _>("attempt") as u32,
                status: row.get("status"),
                started_at: parse_ts(row.get("started_at")),
                completed_at: row.get::<Option<String>, _>("completed_at").map(|s| parse_ts(s)),
                error: row.get("error"),
            })
            .collect())
    }

    pub async fn record_signal(&self, run_id: &str, signal_name: &str, payload: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO signal_deliveries (run_id, signal_name, delivered_at, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(signal_name)
        .bind(Utc::now().to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn signal_history(&self, run_id: &str, signal_name: &str) -> Result<Vec<SignalDelivery>> {
        let rows = sqlx::query(
            "SELECT run_id, signal_name, delivered_at, payload FROM signal_deliveries
             WHERE run_id = ? AND signal_name = ? ORDER BY id",
        )
        .bind(run_id)
        .bind(signal_name)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| SignalDelivery {
                run_id: row.get("run_id"),
                signal_name: row.get("signal_name"),
                delivered_at: parse_ts(row.get("delivered_at")),
                payload: row.get("payload"),
            })
            .collect())
    }
}

fn row_to_run(row: sqlx::sqlite::SqliteRow) -> WorkflowRun {
    WorkflowRun {
        id: row.get("id"),
        kind: row.get("kind"),
        status: RunStatus::parse(row.get::<String, _>("status").as_str()),
        started_at: parse_ts(row.get("started_at")),
        completed_at: row.get::<Option<String>, _>("completed_at").map(parse_ts),
        result: row.get("result"),
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn store_err(e: sqlx::Error) -> ReactorError {
    ReactorError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_run_roundtrips() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("run-1", "tcr").await.unwrap();

        let run = store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.kind, "tcr");
        assert!(matches!(run.status, RunStatus::Running));
        assert!(run.completed_at.is_none());
    }

    #[tokio::test]
    async fn complete_run_sets_status_and_timestamp() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("run-1", "dag").await.unwrap();
        store.complete_run("run-1", RunStatus::Succeeded).await.unwrap();

        let run = store.get_run("run-1").await.unwrap().unwrap();
        assert!(matches!(run.status, RunStatus::Succeeded));
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_orphaned_runs_only_touches_running() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("run-done", "tcr").await.unwrap();
        store.complete_run("run-done", RunStatus::Succeeded).await.unwrap();
        store.create_run("run-stuck", "tcr").await.unwrap();

        let orphaned = store.mark_orphaned_runs().await.unwrap();
        assert_eq!(orphaned, vec!["run-stuck".to_string()]);

        let run = store.get_run("run-stuck").await.unwrap().unwrap();
        assert!(matches!(run.status, RunStatus::Orphaned));
        let done = store.get_run("run-done").await.unwrap().unwrap();
        assert!(matches!(done.status, RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn activity_history_records_in_order() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("run-1", "tcr").await.unwrap();

        store
            .record_activity_event(&ActivityEvent {
                run_id: "run-1".into(),
                activity_name: "BootstrapCell".into(),
                attempt: 1,
                status: "succeeded".into(),
                started_at: Utc::now(),
                completed_at: Some(Utc::now()),
                error: None,
            })
            .await
            .unwrap();

        let history = store.activity_history("run-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].activity_name, "BootstrapCell");
    }

    #[tokio::test]
    async fn signal_history_filters_by_name() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("run-1", "dag").await.unwrap();
        store.record_signal("run-1", "FixApplied", None).await.unwrap();

        let delivered = store.signal_history("run-1", "FixApplied").await.unwrap();
        assert_eq!(delivered.len(), 1);

        let other = store.signal_history("run-1", "OtherSignal").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn list_runs_returns_all() {
        let store = Store::connect_in_memory().await.unwrap();
        store.create_run("a", "tcr").await.unwrap();
        store.create_run("b", "dag").await.unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn claim_next_submission_returns_oldest_queued() {
        let store = Store::connect_in_memory().await.unwrap();
        store.enqueue_submission("sub-1", "tcr", "{}").await.unwrap();
        store.enqueue_submission("sub-2", "dag", "{}").await.unwrap();

        let claimed = store.claim_next_submission().await.unwrap().unwrap();
        assert_eq!(claimed.0, "sub-1");
        assert_eq!(claimed.1, "tcr");
    }

    #[tokio::test]
    async fn claim_next_submission_does_not_return_the_same_row_twice() {
        let store = Store::connect_in_memory().await.unwrap();
        store.enqueue_submission("sub-1", "tcr", "{}").await.unwrap();

        let first = store.claim_next_submission().await.unwrap();
        assert!(first.is_some());
        let second = store.claim_next_submission().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_next_submission_empty_queue_is_none() {
        let store = Store::connect_in_memory().await.unwrap();
        assert!(store.claim_next_submission().await.unwrap().is_none());
    }
}
