//! Composes the port allocator, worktree manager, and agent server
//! supervisor into one atomic bootstrap/teardown unit with saga-style
//! rollback of partial failures.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::client::AgentClient;
use crate::port::PortAllocator;
use crate::registry::{GlobalRegistry, RegistryKey};
use crate::supervisor::AgentServerSupervisor;
use crate::worktree::WorktreeManager;
use crate::{ReactorError, Result};

/// The serializable, on-the-wire projection of a bootstrapped cell. Workflow
/// activities pass this between each other; live handles are re-resolved
/// from the [`GlobalRegistry`] using `(cell_id, port, worktree_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapOutput {
    pub cell_id: String,
    pub port: u16,
    pub worktree_id: String,
    pub worktree_path: std::path::PathBuf,
    pub base_url: String,
    pub server_pid: u32,
}

impl BootstrapOutput {
    pub fn registry_key(&self) -> RegistryKey {
        RegistryKey {
            cell_id: self.cell_id.clone(),
            port: self.port,
            worktree_id: self.worktree_id.clone(),
        }
    }
}

/// Owns the singleton resources a cell is built from.
pub struct CellLifecycle {
    ports: Arc<PortAllocator>,
    worktrees: Arc<WorktreeManager>,
    supervisor: Arc<AgentServerSupervisor>,
    registry: Arc<GlobalRegistry>,
}

impl CellLifecycle {
    pub fn new(
        ports: Arc<PortAllocator>,
        worktrees: Arc<WorktreeManager>,
        supervisor: Arc<AgentServerSupervisor>,
        registry: Arc<GlobalRegistry>,
    ) -> Self {
        Self { ports, worktrees, supervisor, registry }
    }

    /// Allocates a port, creates a worktree, boots the agent server, and
    /// registers the live handles, rolling back everything already acquired
    /// if a later step fails.
    pub async fn bootstrap_cell(&self, cell_id: &str, branch: &str) -> Result<BootstrapOutput> {
        let port = self.ports.allocate()?;
        info!(cell_id, port, "port allocated");

        let worktree_id = format!("cell-{cell_id}-{}", monotonic_suffix());

        let worktree = match self.worktrees.create_worktree(&worktree_id, branch).await {
            Ok(wt) => wt,
            Err(e) => {
                self.ports.release(port).ok();
                return Err(e);
            }
        };
        info!(cell_id, worktree_id, "worktree created");

        let handle = match self
            .supervisor
            .boot_server(&worktree.path, &worktree_id, port, None)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                if let Err(cleanup_err) = self.worktrees.remove_worktree(&worktree_id).await {
                    warn!(cell_id, error = %cleanup_err, "compensating worktree removal failed");
                }
                self.ports.release(port).ok();
                return Err(e);
            }
        };
        info!(cell_id, port, pid = handle.pid, "agent server healthy");

        let base_url = handle.base_url.clone();
        let server_pid = handle.pid;
        let client = AgentClient::new(&base_url, port);

        let key = RegistryKey {
            cell_id: cell_id.to_string(),
            port,
            worktree_id: worktree_id.clone(),
        };
        self.registry.insert(key, handle, client);

        Ok(BootstrapOutput {
            cell_id: cell_id.to_string(),
            port,
            worktree_id,
            worktree_path: worktree.path,
            base_url,
            server_pid,
        })
    }

    /// Shuts down the server, removes the worktree, and releases the port,
    /// in that order, collecting per-step errors without aborting (INV-5).
    /// Idempotent: a second call against the same output, once the registry
    /// entry is gone, is a no-op success.
    pub async fn teardown_cell(&self, output: &BootstrapOutput) -> Result<()> {
        let key = output.registry_key();
        let mut errors = Vec::new();

        if let Some((handle, _client)) = self.registry.remove(&key) {
            if let Err(e) = self.supervisor.shutdown(handle).await {
                error!(cell_id = %output.cell_id, error = %e, "server shutdown failed during teardown");
                errors.push(format!("shutdown: {e}"));
            }
        } else {
            info!(cell_id = %output.cell_id, "teardown: registry entry already absent, skipping shutdown");
        }

        if let Err(e) = self.worktrees.remove_worktree(&output.worktree_id).await {
            error!(cell_id = %output.cell_id, error = %e, "worktree removal failed during teardown");
            errors.push(format!("worktree: {e}"));
        }

        if let Err(e) = self.ports.release(output.port) {
            // Releasing an already-released port is expected on re-teardown.
            if !matches!(e, ReactorError::PortNotAllocated(_)) {
                error!(cell_id = %output.cell_id, error = %e, "port release failed during teardown");
                errors.push(format!("port: {e}"));
            }
        }

        info!(cell_id = %output.cell_id, "cell torn down");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReactorError::Cleanup(errors.join("; ")))
        }
    }

    pub fn registry(&self) -> &Arc<GlobalRegistry> {
        &self.registry
    }
}

/// A monotonic-enough suffix for worktree ids without depending on a real
/// clock inside deterministic test contexts: nanosecond timestamp plus a
/// per-process atomic counter.
fn monotonic_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos}-{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_matches_bootstrap_fields() {
        let output = BootstrapOutput {
            cell_id: "c1".into(),
            port: 8001,
            worktree_id: "wt-1".into(),
            worktree_path: "/tmp/wt-1".into(),
            base_url: "http://localhost:8001".into(),
            server_pid: 123,
        };
        let key = output.registry_key();
        assert_eq!(key.cell_id, "c1");
        assert_eq!(key.port, 8001);
        assert_eq!(key.worktree_id, "wt-1");
    }

    #[test]
    fn monotonic_suffix_is_unique_across_calls() {
        let a = monotonic_suffix();
        let b = monotonic_suffix();
        assert_ne!(a, b);
    }
}
