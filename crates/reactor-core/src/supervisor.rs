//! Starts, health-checks, and kills the external agent server process bound
//! to a single cell's worktree and port.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{ReactorError, Result};

/// Lifecycle events emitted while a server is being booted or torn down.
///
/// Consumers (cell lifecycle, observability) can drain this channel instead
/// of polling process state themselves.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Spawned { pid: u32 },
    HealthProbeAttempt { attempt: u32 },
    Healthy,
    TimedOut,
    Exited { code: Option<i32> },
    Killed,
}

/// A live, non-serializable handle to a running agent server.
///
/// Valid only while the process that produced it is alive; the serializable
/// projection used across activity boundaries is the cell's `BootstrapOutput`.
pub struct ServerHandle {
    pub port: u16,
    pub worktree_id: String,
    pub work_dir: PathBuf,
    pub base_url: String,
    pub pid: u32,
    child: Child,
}

/// Boots, health-checks, and kills agent server processes.
pub struct AgentServerSupervisor {
    command: String,
    healthcheck_timeout: Duration,
    healthcheck_interval: Duration,
    shutdown_grace: Duration,
    http: reqwest::Client,
}

impl AgentServerSupervisor {
    pub fn new(
        command: impl Into<String>,
        healthcheck_timeout: Duration,
        healthcheck_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            healthcheck_timeout,
            healthcheck_interval,
            shutdown_grace,
            http: reqwest::Client::new(),
        }
    }

    /// Starts the agent server with its working directory bound to the
    /// cell's worktree (INV-2) and polls `/health` until ready or timeout.
    pub async fn boot_server(
        &self,
        worktree_path: &Path,
        worktree_id: &str,
        port: u16,
        events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    ) -> Result<ServerHandle> {
        let mut cmd = Command::new(&self.command);
        cmd.args(["serve", "--port", &port.to_string(), "--hostname", "localhost"])
            .current_dir(worktree_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ReactorError::Process(format!("failed to spawn {}: {e}", self.command)))?;
        let pid = child
            .id()
            .ok_or_else(|| ReactorError::Process("spawned child has no pid".into()))?;

        info!(pid, port, worktree_id, "agent server spawned");
        if let Some(tx) = &events {
            let _ = tx.send(SupervisorEvent::Spawned { pid });
        }

        let base_url = format!("http://localhost:{port}");
        let deadline = tokio::time::Instant::now() + self.healthcheck_timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if let Some(tx) = &events {
                let _ = tx.send(SupervisorEvent::HealthProbeAttempt { attempt });
            }

            if let Some(code) = child.try_wait().map_err(ReactorError::Io)? {
                warn!(pid, ?code, "agent server exited before becoming healthy");
                if let Some(tx) = &events {
                    let _ = tx.send(SupervisorEvent::Exited { code: code.code() });
                }
                return Err(ReactorError::ServerUnready(format!(
                    "process exited before healthy: {code:?}"
                )));
            }

            if self.probe_health(&base_url).await {
                info!(pid, port, "agent server healthy");
                if let Some(tx) = &events {
                    let _ = tx.send(SupervisorEvent::Healthy);
                }
                return Ok(ServerHandle {
                    port,
                    worktree_id: worktree_id.to_string(),
                    work_dir: worktree_path.to_path_buf(),
                    base_url,
                    pid,
                    child,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(pid, port, "agent server failed to become healthy in time");
                if let Some(tx) = &events {
                    let _ = tx.send(SupervisorEvent::TimedOut);
                }
                self.kill(&mut child, pid).await;
                return Err(ReactorError::ServerUnready(format!(
                    "no 200 OK from {base_url}/health within {:?}",
                    self.healthcheck_timeout
                )));
            }

            tokio::time::sleep(self.healthcheck_interval).await;
        }
    }

    async fn probe_health(&self, base_url: &str) -> bool {
        match self
            .http
            .get(format!("{base_url}/health"))
            .timeout(self.healthcheck_interval.max(Duration::from_millis(50)))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Single-probe health check with a short timeout, independent of boot.
    pub async fn is_healthy(&self, handle: &ServerHandle) -> bool {
        self.probe_health(&handle.base_url).await
    }

    /// SIGTERMs the process group, escalating to SIGKILL after the configured
    /// grace period. Returns once the process is reaped or the grace expires.
    pub async fn shutdown(&self, mut handle: ServerHandle) -> Result<()> {
        self.kill(&mut handle.child, handle.pid).await;
        Ok(())
    }

    /// Signals the process group (SIGTERM, escalating to SIGKILL) and reaps
    /// the child within `shutdown_grace`, delegating the platform-specific
    /// signalling to [`crate::platform::process::terminate_process_group`]
    /// rather than duplicating it here.
    async fn kill(&self, child: &mut Child, pid: u32) {
        if let Err(e) = crate::platform::process::terminate_process_group(pid).await {
            debug!(pid, error = %e, "terminate_process_group failed");
        }

        if tokio::time::timeout(self.shutdown_grace, child.wait()).await.is_err() {
            warn!(pid, "process did not exit within shutdown grace after signalling");
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("port", &self.port)
            .field("worktree_id", &self.worktree_id)
            .field("pid", &self.pid)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boot_nonexistent_command_errors() {
        let sup = AgentServerSupervisor::new(
            "definitely-not-a-real-binary-xyz",
            Duration::from_millis(200),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );
        let tmp = tempfile::tempdir().unwrap();
        let result = sup.boot_server(tmp.path(), "wt-1", 18080, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn boot_process_that_never_listens_times_out() {
        // `sleep` never binds a port, so the health probe never succeeds and
        // boot_server should surface ServerUnready once the timeout elapses.
        let sup = AgentServerSupervisor::new(
            "sleep",
            Duration::from_millis(300),
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let tmp = tempfile::tempdir().unwrap();
        let result = sup.boot_server(tmp.path(), "wt-2", 18081, None).await;
        assert!(matches!(result, Err(ReactorError::ServerUnready(_))));
    }
}
