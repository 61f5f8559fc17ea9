mod doctor;
mod status;
mod submit;

use anyhow::Result;
use clap::{Parser, Subcommand};
use reactor_core::config::ReactorConfig;

#[derive(Parser)]
#[command(name = "reactor-client", version, about = "Submits and inspects workflow runs against a reactor worker")]
struct Cli {
    /// Path to a reactor.toml config file. Defaults to ./reactor.toml, or
    /// built-in defaults if absent. Must match the worker's config so both
    /// sides agree on the store path.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that git, the repo, and the agent server command are usable.
    Doctor {
        #[arg(long)]
        json: bool,
    },
    /// Enqueue a workflow run.
    Submit {
        #[command(subcommand)]
        command: submit::SubmitCommand,
    },
    /// Look up a single run's status and, once complete, its result.
    Status {
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List every run recorded in the store.
    List {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    reactor_core::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReactorConfig::load(path)?,
        None => ReactorConfig::load_or_default_in_cwd(),
    };

    match cli.command {
        Command::Doctor { json } => {
            let ready = doctor::run(&config, json)?;
            if !ready {
                std::process::exit(1);
            }
        }
        Command::Submit { command } => submit::run(&config, command).await?,
        Command::Status { run_id, json } => status::show(&config, &run_id, json).await?,
        Command::List { json } => status::list(&config, json).await?,
    }

    Ok(())
}
