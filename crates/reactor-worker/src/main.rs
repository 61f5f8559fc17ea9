//! The Task Queue Worker: polls the shared store for queued submissions and
//! drives each one through the TCR or DAG workflow to completion.
//!
//! There is no external wire protocol between this binary and `reactor-cli`;
//! both speak exclusively to the same SQLite-backed store (§6). The worker
//! owns every long-lived singleton a cell is built from — the port pool, the
//! worktree manager, the agent server supervisor, and the in-process
//! registry bridging live (non-serializable) handles across activity calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reactor_core::cell::CellLifecycle;
use reactor_core::config::ReactorConfig;
use reactor_core::doctor::DoctorReport;
use reactor_core::port::PortAllocator;
use reactor_core::recovery::run_startup_housekeeping;
use reactor_core::registry::GlobalRegistry;
use reactor_core::store::Store;
use reactor_core::supervisor::AgentServerSupervisor;
use reactor_core::workflow::{run_dag_workflow, run_tcr, DagInput, TcrInput, WorkflowContext};
use reactor_core::worktree::WorktreeManager;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "reactor-worker", about = "Runs queued TCR and DAG workflows against isolated cells")]
struct Cli {
    /// Path to a reactor.toml config file. Defaults to ./reactor.toml, or
    /// built-in defaults if absent.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// How often to poll the submissions queue when it is empty.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,
}

/// Pending `FixApplied` senders for in-flight DAG workflows, keyed by run id,
/// so a signal submitted through the same queue can be routed to the
/// matching retry loop.
type SignalRoutes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<()>>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reactor_core::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReactorConfig::load(path)?,
        None => ReactorConfig::load_or_default_in_cwd(),
    };
    config.validate()?;

    let store = Store::connect(&config.store.path).await?;
    let worktrees = Arc::new(WorktreeManager::new(
        config.repo.repo_dir.as_path(),
        config.repo.worktree_base.as_path(),
    ));

    let housekeeping = run_startup_housekeeping(&store, &worktrees, &[config.repo.agent_server_command.clone()]).await?;
    info!(
        orphaned = housekeeping.orphaned_run_ids.len(),
        killed = housekeeping.killed_pids.len(),
        "startup housekeeping complete"
    );

    let report = DoctorReport::run(&config);
    if !report.overall_ready {
        for reason in report.not_ready_reasons() {
            error!(%reason, "not ready to accept work");
        }
        anyhow::bail!("readiness check failed, refusing to start");
    }
    info!("readiness check passed");

    let ports = Arc::new(PortAllocator::new(config.ports.min, config.ports.max));
    let supervisor = Arc::new(AgentServerSupervisor::new(
        config.repo.agent_server_command.clone(),
        Duration::from_secs(config.supervisor.healthcheck_timeout_secs),
        Duration::from_millis(config.supervisor.healthcheck_interval_ms),
        Duration::from_secs(config.supervisor.shutdown_grace_secs),
    ));
    let registry = Arc::new(GlobalRegistry::new());
    let lifecycle = Arc::new(CellLifecycle::new(ports, worktrees, supervisor, registry));

    let signal_routes: SignalRoutes = Arc::new(Mutex::new(HashMap::new()));
    let permits = Arc::new(Semaphore::new(config.worker.worker_concurrency));
    let mut in_flight = JoinSet::new();

    // The parent of every in-flight run's context. Cancelling it on shutdown
    // fans out to each run without any one run being able to cancel another.
    let shutdown_ctx = WorkflowContext::new();

    info!(concurrency = config.worker.worker_concurrency, "worker ready, polling for submissions");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, cancelling in-flight run bodies and draining teardown");
                shutdown_ctx.cancel();
                break;
            }
            claimed = store.claim_next_submission() => {
                match claimed {
                    Ok(Some((id, kind, payload))) => {
                        if kind == "signal:fix-applied" {
                            route_signal(&signal_routes, &payload).await;
                            continue;
                        }

                        let permit = permits.clone().acquire_owned().await.expect("semaphore closed");
                        let lifecycle = lifecycle.clone();
                        let store = store.clone();
                        let routes = signal_routes.clone();
                        let test_command = config.repo.test_command.clone();
                        let ctx = shutdown_ctx.child();

                        in_flight.spawn(async move {
                            let _permit = permit;
                            dispatch_submission(&lifecycle, &store, &routes, &id, &kind, &payload, &test_command, &ctx).await;
                        });
                    }
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(cli.poll_interval_ms)).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to poll submissions queue");
                        tokio::time::sleep(Duration::from_millis(cli.poll_interval_ms)).await;
                    }
                }
            }
        }
    }

    let deadline = Duration::from_secs(config.worker.graceful_shutdown_secs);
    let drained = tokio::time::timeout(deadline, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(grace_secs = deadline.as_secs(), "graceful shutdown deadline exceeded, aborting remaining work");
        in_flight.shutdown().await;
    }

    info!("worker stopped");
    Ok(())
}

async fn route_signal(routes: &SignalRoutes, run_id: &str) {
    let routes = routes.lock().await;
    match routes.get(run_id) {
        Some(tx) => {
            if tx.send(()).is_err() {
                warn!(run_id, "FixApplied signal has no live receiver, workflow may have already completed");
            }
        }
        None => warn!(run_id, "FixApplied signal targets an unknown or completed run"),
    }
}

async fn dispatch_submission(
    lifecycle: &CellLifecycle,
    store: &Store,
    routes: &SignalRoutes,
    id: &str,
    kind: &str,
    payload: &str,
    test_command: &str,
    ctx: &WorkflowContext,
) {
    match kind {
        "tcr" => {
            let input: TcrInput = match serde_json::from_str(payload) {
                Ok(i) => i,
                Err(e) => {
                    error!(submission = id, error = %e, "malformed TCR submission payload");
                    return;
                }
            };
            match run_tcr(lifecycle, ctx, store, id, test_command, input).await {
                Ok(result) => {
                    info!(submission = id, success = result.success, "TCR workflow finished");
                    persist_result(store, id, result.success, &result).await;
                }
                Err(e) => error!(submission = id, error = %e, "TCR workflow errored"),
            }
        }
        "dag" => {
            let input: DagInput = match serde_json::from_str(payload) {
                Ok(i) => i,
                Err(e) => {
                    error!(submission = id, error = %e, "malformed DAG submission payload");
                    return;
                }
            };
            let (tx, rx) = mpsc::unbounded_channel();
            routes.lock().await.insert(id.to_string(), tx);

            let outcome = run_dag_workflow(lifecycle, store, id, input, rx).await;
            routes.lock().await.remove(id);

            match outcome {
                Ok(result) => {
                    info!(submission = id, ?result, "DAG workflow finished");
                    let success = matches!(result, reactor_core::workflow::DagOutcome::Success { .. });
                    persist_result(store, id, success, &result).await;
                }
                Err(e) => error!(submission = id, error = %e, "DAG workflow errored"),
            }
        }
        other => error!(submission = id, kind = other, "unknown workflow kind"),
    }
}

async fn persist_result(store: &Store, run_id: &str, success: bool, result: &impl serde::Serialize) {
    use reactor_core::store::RunStatus;

    let status = if success { RunStatus::Succeeded } else { RunStatus::Failed };
    let encoded = match serde_json::to_string(result) {
        Ok(s) => s,
        Err(e) => {
            error!(run_id, error = %e, "failed to encode workflow result for persistence");
            return;
        }
    };
    if let Err(e) = store.complete_run_with_result(run_id, status, Some(&encoded)).await {
        error!(run_id, error = %e, "failed to persist workflow result");
    }
}
