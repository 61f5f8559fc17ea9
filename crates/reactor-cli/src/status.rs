//! `reactor-client status`: reads run records back out of the shared store.

use anyhow::{Context, Result};
use reactor_core::config::ReactorConfig;
use reactor_core::store::Store;

pub async fn show(config: &ReactorConfig, run_id: &str, json: bool) -> Result<()> {
    let store = Store::connect(&config.store.path).await?;
    let run = store.get_run(run_id).await?.context("no such run")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!("Run {}", run.id);
    println!("  kind:    {}", run.kind);
    println!("  status:  {:?}", run.status);
    println!("  started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("  ended:   {completed}");
    }
    if let Some(result) = &run.result {
        println!("  result:  {result}");
    }
    Ok(())
}

pub async fn list(config: &ReactorConfig, json: bool) -> Result<()> {
    let store = Store::connect(&config.store.path).await?;
    let runs = store.list_runs().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    for run in &runs {
        println!("{}  {:<8}  {:?}", run.id, run.kind, run.status);
    }
    Ok(())
}
