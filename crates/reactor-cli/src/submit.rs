//! `reactor-client submit`: enqueues a workflow submission onto the shared
//! store (§6). The worker polling the same store picks it up; there is no
//! direct connection between this process and the worker process.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use reactor_core::config::ReactorConfig;
use reactor_core::store::{RunStatus, Store};
use reactor_core::workflow::{DagInput, DagTask, TcrInput};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum SubmitCommand {
    /// Submit a single-task Test && Commit || Revert workflow.
    Tcr {
        #[arg(long)]
        cell_id: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        prompt: String,
        /// Block until the workflow finishes and print its result.
        #[arg(long)]
        wait: bool,
        #[arg(long)]
        json: bool,
    },
    /// Submit a dependency-ordered multi-task DAG workflow. `--tasks-file`
    /// points at a JSON array of `{name, command, deps}` objects.
    Dag {
        #[arg(long)]
        workflow_id: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        tasks_file: PathBuf,
        #[arg(long)]
        wait: bool,
        #[arg(long)]
        json: bool,
    },
    /// Deliver a buffered `FixApplied` signal to a running DAG workflow so
    /// its retry loop resumes after a fix has been applied out of band.
    FixApplied {
        #[arg(long)]
        run_id: String,
    },
}

pub async fn run(config: &ReactorConfig, command: SubmitCommand) -> Result<()> {
    let store = Store::connect(&config.store.path).await?;

    match command {
        SubmitCommand::Tcr {
            cell_id,
            branch,
            task_id,
            description,
            prompt,
            wait,
            json,
        } => {
            let run_id = Uuid::new_v4().to_string();
            let input = TcrInput { cell_id, branch, task_id, description, prompt };
            let payload = serde_json::to_string(&input)?;
            store.enqueue_submission(&run_id, "tcr", &payload).await?;
            report_submitted(&store, &run_id, wait, json).await
        }
        SubmitCommand::Dag { workflow_id, branch, tasks_file, wait, json } => {
            let raw = std::fs::read_to_string(&tasks_file)
                .with_context(|| format!("failed to read {}", tasks_file.display()))?;
            let tasks: Vec<DagTask> = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {} as a task list", tasks_file.display()))?;

            let run_id = Uuid::new_v4().to_string();
            let input = DagInput { workflow_id, branch, tasks };
            let payload = serde_json::to_string(&input)?;
            store.enqueue_submission(&run_id, "dag", &payload).await?;
            report_submitted(&store, &run_id, wait, json).await
        }
        SubmitCommand::FixApplied { run_id } => {
            let id = Uuid::new_v4().to_string();
            store.enqueue_submission(&id, "signal:fix-applied", &run_id).await?;
            println!("FixApplied signal queued for run {run_id}");
            Ok(())
        }
    }
}

async fn report_submitted(store: &Store, run_id: &str, wait: bool, json: bool) -> Result<()> {
    if !wait {
        if json {
            println!("{}", serde_json::json!({ "run_id": run_id, "status": "queued" }));
        } else {
            println!("Submitted run {run_id}");
        }
        return Ok(());
    }

    loop {
        let run = store
            .get_run(run_id)
            .await?
            .context("run disappeared from the store while waiting")?;

        if !matches!(run.status, RunStatus::Running) {
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("Run {run_id}: {:?}", run.status);
                if let Some(result) = &run.result {
                    println!("  {result}");
                }
            }
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}
