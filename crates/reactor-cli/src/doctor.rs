//! `reactor-client doctor`: runs the readiness check and prints it as JSON or
//! a human-readable checklist, without enqueueing any work.

use anyhow::Result;
use reactor_core::config::ReactorConfig;
use reactor_core::doctor::DoctorReport;

pub fn run(config: &ReactorConfig, json: bool) -> Result<bool> {
    let report = DoctorReport::run(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.overall_ready);
    }

    println!("Readiness Check");
    println!("===============");
    println!("  git available:              {}", check_mark(report.git_available));
    if let Some(version) = &report.git_version {
        println!("    version: {version}");
    }
    println!("  repo is a git repo:         {}", check_mark(report.repo_dir_is_git_repo));
    println!("  worktree base usable:       {}", check_mark(report.worktree_base_usable));
    println!("  port range non-empty:      {}", check_mark(report.port_range_non_empty));
    println!(
        "  agent server discoverable: {}",
        check_mark(report.agent_server_command_discoverable)
    );
    println!();

    if report.overall_ready {
        println!("Ready.");
    } else {
        println!("Not ready:");
        for reason in report.not_ready_reasons() {
            println!("  - {reason}");
        }
    }

    Ok(report.overall_ready)
}

fn check_mark(ok: bool) -> &'static str {
    if ok {
        "yes"
    } else {
        "no"
    }
}
