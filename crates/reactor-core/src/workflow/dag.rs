//! Dependency-resolved parallel task execution with a signal-driven TDD
//! retry loop (§4.9).

use std::collections::{HashMap, HashSet, VecDeque};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::activity::run_script_activity;
use crate::cell::CellLifecycle;
use crate::store::Store;
use crate::{ReactorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagTask {
    pub name: String,
    pub command: String,
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagInput {
    pub workflow_id: String,
    pub branch: String,
    pub tasks: Vec<DagTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DagOutcome {
    Success { attempts: u32 },
    Blocked { attempts: u32, failed: Vec<String> },
}

/// Validates task names are unique and every `dep` resolves, then returns a
/// topological order. Fails with [`ReactorError::CycleDetected`] on a cycle.
pub fn topo_order(tasks: &[DagTask]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    for t in tasks {
        if !seen.insert(t.name.as_str()) {
            return Err(ReactorError::Config(format!("duplicate task name: {}", t.name)));
        }
    }

    let names: HashSet<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    for t in tasks {
        for dep in &t.deps {
            if !names.contains(dep.as_str()) {
                return Err(ReactorError::Config(format!(
                    "task {} depends on unknown task {}",
                    t.name, dep
                )));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for t in tasks {
        for dep in &t.deps {
            *in_degree.get_mut(t.name.as_str()).unwrap() += 1;
            dependents.entry(dep.as_str()).or_default().push(t.name.as_str());
        }
    }

    // Deterministic order for tests/log stability.
    let mut initial: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    initial.sort();
    let mut queue: VecDeque<&str> = initial.into();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(n) = queue.pop_front() {
        order.push(n.to_string());
        if let Some(deps) = dependents.get(n) {
            let mut ready = Vec::new();
            for &d in deps {
                let entry = in_degree.get_mut(d).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    ready.push(d);
                }
            }
            ready.sort();
            for r in ready {
                queue.push_back(r);
            }
        }
    }

    if order.len() != tasks.len() {
        let unresolved: Vec<String> = tasks
            .iter()
            .map(|t| t.name.clone())
            .filter(|n| !order.contains(n))
            .collect();
        return Err(ReactorError::CycleDetected(unresolved));
    }

    Ok(order)
}

/// Runs every task to completion exactly once, respecting dependency order
/// and running independently-ready tasks concurrently. Failed siblings do
/// not cancel already-running tasks.
pub async fn run_dag_once(
    lifecycle: &CellLifecycle,
    cell_id: &str,
    tasks: &[DagTask],
    order: &[String],
) -> Result<Vec<String>> {
    let by_name: HashMap<&str, &DagTask> = tasks.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut completed: HashSet<String> = HashSet::new();
    let mut failed: Vec<String> = Vec::new();
    let mut pending_names: HashSet<String> = HashSet::new();
    let mut in_flight = FuturesUnordered::new();

    loop {
        for name in order {
            if completed.contains(name) || pending_names.contains(name) || failed.contains(name) {
                continue;
            }
            let task = by_name[name.as_str()];
            if task.deps.iter().all(|d| completed.contains(d)) {
                pending_names.insert(name.clone());
                let task_name = name.clone();
                let command = task.command.clone();
                in_flight.push(async move {
                    let result = run_script_activity(lifecycle, cell_id, &command).await;
                    (task_name, result)
                });
            }
        }

        if in_flight.is_empty() {
            if completed.len() + failed.len() < tasks.len() {
                return Err(ReactorError::StallDetected(
                    tasks.len() - completed.len() - failed.len(),
                ));
            }
            break;
        }

        if let Some((name, result)) = in_flight.next().await {
            pending_names.remove(&name);
            match result {
                Ok(_) => {
                    completed.insert(name.clone());
                    info!(task = name, "DAG task completed");
                }
                Err(e) => {
                    warn!(task = name, error = %e, "DAG task failed");
                    failed.push(name);
                }
            }
        }
    }

    Ok(failed)
}

/// Outer TDD retry loop: bootstraps one cell for the whole workflow (named
/// after `input.workflow_id`/`input.branch`) and reruns the DAG inside it on
/// a `FixApplied` signal after any failed attempt, tearing the cell down on
/// every exit path. Signals sent before the first wait are buffered (an
/// unbounded channel naturally satisfies this).
pub async fn run_dag_workflow(
    lifecycle: &CellLifecycle,
    store: &Store,
    run_id: &str,
    input: DagInput,
    mut fix_applied: mpsc::UnboundedReceiver<()>,
) -> Result<DagOutcome> {
    store.create_run(run_id, "dag").await?;

    let order = match topo_order(&input.tasks) {
        Ok(o) => o,
        Err(e) => {
            store.complete_run(run_id, crate::store::RunStatus::Failed).await.ok();
            return Err(e);
        }
    };

    if input.tasks.is_empty() {
        store.complete_run(run_id, crate::store::RunStatus::Succeeded).await.ok();
        return Ok(DagOutcome::Success { attempts: 1 });
    }

    let bootstrap = match lifecycle.bootstrap_cell(&input.workflow_id, &input.branch).await {
        Ok(b) => b,
        Err(e) => {
            warn!(run_id, error = %e, "DAG bootstrap failed, nothing to tear down");
            store.complete_run(run_id, crate::store::RunStatus::Failed).await.ok();
            return Err(e);
        }
    };

    let mut attempt = 1u32;
    let outcome = loop {
        let failed = match run_dag_once(lifecycle, &bootstrap.cell_id, &input.tasks, &order).await {
            Ok(f) => f,
            Err(e) => break Err(e),
        };

        if failed.is_empty() {
            break Ok(DagOutcome::Success { attempts: attempt });
        }

        info!(run_id, attempt, ?failed, "DAG attempt failed, waiting for FixApplied");
        match fix_applied.recv().await {
            Some(()) => {
                store.record_signal(run_id, "FixApplied", None).await.ok();
                attempt += 1;
            }
            None => {
                // Signal channel closed: treat as external cancellation of
                // the retry loop rather than success or silent failure.
                break Ok(DagOutcome::Blocked { attempts: attempt, failed });
            }
        }
    };

    if let Err(e) = lifecycle.teardown_cell(&bootstrap).await {
        warn!(run_id, error = %e, "DAG teardown reported errors (collected, not fatal)");
    }

    let final_status = if matches!(outcome, Ok(DagOutcome::Success { .. })) {
        crate::store::RunStatus::Succeeded
    } else {
        crate::store::RunStatus::Failed
    };
    store.complete_run(run_id, final_status).await.ok();

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, deps: &[&str]) -> DagTask {
        DagTask {
            name: name.to_string(),
            command: "true".to_string(),
            deps: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn topo_sort_linear_chain() {
        let tasks = vec![task("A", &[]), task("B", &["A"]), task("C", &["B"])];
        let order = topo_order(&tasks).unwrap();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn topo_sort_diamond_places_s_first_and_x_last() {
        let tasks = vec![task("S", &[]), task("A", &["S"]), task("B", &["S"]), task("X", &["A", "B"])];
        let order = topo_order(&tasks).unwrap();
        assert_eq!(order.first().unwrap(), "S");
        assert_eq!(order.last().unwrap(), "X");
    }

    #[test]
    fn topo_sort_detects_cycle() {
        let tasks = vec![task("A", &["B"]), task("B", &["A"])];
        let result = topo_order(&tasks);
        assert!(matches!(result, Err(ReactorError::CycleDetected(_))));
    }

    #[test]
    fn topo_sort_rejects_unknown_dependency() {
        let tasks = vec![task("A", &["Z"])];
        let result = topo_order(&tasks);
        assert!(result.is_err());
        assert!(!matches!(result, Err(ReactorError::CycleDetected(_))));
    }

    #[test]
    fn topo_sort_empty_tasks_is_empty_order() {
        let order = topo_order(&[]).unwrap();
        assert!(order.is_empty());
    }
}
