//! Startup readiness check: reports whether `git`, the configured repo, and
//! the configured worktree base are usable before the worker takes work.

use std::path::Path;
use std::process::Output;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ReactorConfig;

/// Abstraction over running a subprocess and capturing its output, so the
/// doctor's checks can be exercised against a mock in tests.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output>;
}

/// Runs real system commands.
pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        std::process::Command::new(program).args(args).output()
    }
}

/// Serializable readiness report, printable as JSON or human-readable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub git_available: bool,
    pub git_version: Option<String>,
    pub repo_dir_is_git_repo: bool,
    pub worktree_base_usable: bool,
    pub port_range_non_empty: bool,
    pub agent_server_command_discoverable: bool,
    pub overall_ready: bool,
}

impl DoctorReport {
    pub fn run(config: &ReactorConfig) -> Self {
        let runner = RealCommandRunner;
        Self::run_with_runner(&runner, config)
    }

    pub fn run_with_runner(runner: &dyn CommandRunner, config: &ReactorConfig) -> Self {
        let (git_available, git_version) = check_git_binary(runner);
        let repo_dir_is_git_repo = git_available && check_is_git_repo(runner, &config.repo.repo_dir);
        let worktree_base_usable = check_worktree_base(&config.repo.worktree_base);
        let port_range_non_empty = config.ports.min <= config.ports.max;
        let agent_server_command_discoverable =
            check_discoverable(runner, &config.repo.agent_server_command);

        let overall_ready = git_available
            && repo_dir_is_git_repo
            && worktree_base_usable
            && port_range_non_empty
            && agent_server_command_discoverable;

        Self {
            git_available,
            git_version,
            repo_dir_is_git_repo,
            worktree_base_usable,
            port_range_non_empty,
            agent_server_command_discoverable,
            overall_ready,
        }
    }

    /// Human-readable reasons the system is not ready. Empty if ready.
    pub fn not_ready_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if !self.git_available {
            reasons.push("git is not installed or not in PATH".to_string());
        }
        if self.git_available && !self.repo_dir_is_git_repo {
            reasons.push("repo.repo_dir is not a git repository".to_string());
        }
        if !self.worktree_base_usable {
            reasons.push("repo.worktree_base does not exist and could not be created".to_string());
        }
        if !self.port_range_non_empty {
            reasons.push("ports.min is greater than ports.max".to_string());
        }
        if !self.agent_server_command_discoverable {
            reasons.push("repo.agent_server_command is not discoverable on PATH".to_string());
        }
        reasons
    }
}

fn check_git_binary(runner: &dyn CommandRunner) -> (bool, Option<String>) {
    match runner.run("git", &["--version"]) {
        Ok(output) if output.status.success() => {
            let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let version = raw.strip_prefix("git version ").map(str::to_string).unwrap_or(raw);
            debug!(%version, "git found");
            (true, Some(version))
        }
        Ok(_) => {
            warn!("git --version exited non-zero");
            (false, None)
        }
        Err(e) => {
            warn!(error = %e, "git not found");
            (false, None)
        }
    }
}

fn check_is_git_repo(runner: &dyn CommandRunner, repo_dir: &Path) -> bool {
    let dir_arg = format!("-C{}", repo_dir.display());
    match runner.run("git", &[&dir_arg, "rev-parse", "--is-inside-work-tree"]) {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

fn check_worktree_base(worktree_base: &Path) -> bool {
    if worktree_base.is_dir() {
        return true;
    }
    std::fs::create_dir_all(worktree_base).is_ok()
}

fn check_discoverable(runner: &dyn CommandRunner, command: &str) -> bool {
    let which = if cfg!(windows) { "where" } else { "which" };
    match runner.run(which, &[command]) {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactorConfig;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct MockRunner {
        responses: std::collections::HashMap<String, std::io::Result<Output>>,
    }

    impl MockRunner {
        fn new() -> Self {
            Self { responses: std::collections::HashMap::new() }
        }

        fn register(&mut self, cmd: &str, result: std::io::Result<Output>) {
            self.responses.insert(cmd.to_string(), result);
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
            let key = format!("{program} {}", args.join(" "));
            match self.responses.get(&key) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(_)) | None => {
                    Err(std::io::Error::new(std::io::ErrorKind::NotFound, format!("no mock for: {key}")))
                }
            }
        }
    }

    fn success_output(stdout: &str) -> Output {
        Output { status: ExitStatus::from_raw(0), stdout: stdout.as_bytes().to_vec(), stderr: Vec::new() }
    }

    fn fail_output() -> Output {
        Output { status: ExitStatus::from_raw(1 << 8), stdout: Vec::new(), stderr: Vec::new() }
    }

    fn test_config(worktree_base: std::path::PathBuf) -> ReactorConfig {
        let mut cfg = ReactorConfig::default();
        cfg.repo.worktree_base = worktree_base;
        cfg
    }

    #[test]
    fn git_missing_fails_everything_downstream() {
        let mock = MockRunner::new();
        let tmp = tempfile::tempdir().unwrap();
        let report = DoctorReport::run_with_runner(&mock, &test_config(tmp.path().join("wt")));
        assert!(!report.git_available);
        assert!(!report.repo_dir_is_git_repo);
        assert!(!report.overall_ready);
    }

    #[test]
    fn worktree_base_created_if_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("not-yet-created");
        assert!(!base.exists());
        assert!(check_worktree_base(&base));
        assert!(base.is_dir());
    }

    #[test]
    fn port_range_non_empty_check() {
        let mut mock = MockRunner::new();
        mock.register("git --version", Ok(success_output("git version 2.43.0\n")));
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = test_config(tmp.path().join("wt"));
        cfg.ports.min = 9000;
        cfg.ports.max = 8000;

        let report = DoctorReport::run_with_runner(&mock, &cfg);
        assert!(!report.port_range_non_empty);
        assert!(!report.overall_ready);
    }

    #[test]
    fn agent_server_command_missing_is_reported() {
        let mut mock = MockRunner::new();
        mock.register("git --version", Ok(success_output("git version 2.43.0\n")));
        mock.register("git -C/repo rev-parse --is-inside-work-tree", Ok(success_output("true\n")));
        mock.register("which agent-server", Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing")));

        let mut cfg = ReactorConfig::default();
        cfg.repo.repo_dir = "/repo".into();
        let tmp = tempfile::tempdir().unwrap();
        cfg.repo.worktree_base = tmp.path().join("wt");

        let report = DoctorReport::run_with_runner(&mock, &cfg);
        assert!(!report.agent_server_command_discoverable);
        assert!(!report.overall_ready);
        assert!(report
            .not_ready_reasons()
            .iter()
            .any(|r| r.contains("agent_server_command")));
    }

    #[test]
    fn all_checks_pass_yields_overall_ready() {
        let mut mock = MockRunner::new();
        mock.register("git --version", Ok(success_output("git version 2.43.0\n")));
        mock.register("git -C/repo rev-parse --is-inside-work-tree", Ok(success_output("true\n")));
        mock.register("which agent-server", Ok(success_output("/usr/local/bin/agent-server\n")));

        let mut cfg = ReactorConfig::default();
        cfg.repo.repo_dir = "/repo".into();
        let tmp = tempfile::tempdir().unwrap();
        cfg.repo.worktree_base = tmp.path().join("wt");

        let report = DoctorReport::run_with_runner(&mock, &cfg);
        assert!(report.overall_ready);
        assert!(report.not_ready_reasons().is_empty());
    }

    #[test]
    fn not_in_git_repo_is_reported() {
        let mut mock = MockRunner::new();
        mock.register("git --version", Ok(success_output("git version 2.43.0\n")));
        mock.register("git -C/repo rev-parse --is-inside-work-tree", Ok(fail_output()));

        let mut cfg = ReactorConfig::default();
        cfg.repo.repo_dir = "/repo".into();
        let tmp = tempfile::tempdir().unwrap();
        cfg.repo.worktree_base = tmp.path().join("wt");

        let report = DoctorReport::run_with_runner(&mock, &cfg);
        assert!(!report.repo_dir_is_git_repo);
        assert!(!report.overall_ready);
    }
}
