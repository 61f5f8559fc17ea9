use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::{ReactorError, Result};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReactorConfig {
    pub ports: PortRangeConfig,
    pub repo: RepoConfig,
    pub supervisor: SupervisorTimingConfig,
    pub activity: ActivityConfig,
    pub worker: WorkerConfig,
    pub store: StoreConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            ports: PortRangeConfig::default(),
            repo: RepoConfig::default(),
            supervisor: SupervisorTimingConfig::default(),
            activity: ActivityConfig::default(),
            worker: WorkerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ReactorConfig {
    /// Load config from a specific `reactor.toml` file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ReactorError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ReactorError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(%e, path = %path.display(), "failed to load config, falling back to defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Load from `./reactor.toml` if it exists, otherwise return defaults.
    pub fn load_or_default_in_cwd() -> Self {
        Self::load_or_default(Path::new("reactor.toml"))
    }

    /// Validate the config and return actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if self.ports.min > self.ports.max {
            return Err(ReactorError::Config(format!(
                "ports.min ({}) must be <= ports.max ({})",
                self.ports.min, self.ports.max
            )));
        }

        if !self.repo.repo_dir.is_absolute() {
            return Err(ReactorError::Config(
                "repo.repo_dir must be an absolute path".into(),
            ));
        }
        if !self.repo.worktree_base.is_absolute() {
            return Err(ReactorError::Config(
                "repo.worktree_base must be an absolute path".into(),
            ));
        }

        if self.worker.worker_concurrency == 0 {
            return Err(ReactorError::Config(
                "worker.worker_concurrency must be > 0".into(),
            ));
        }

        let pool_size = (self.ports.max - self.ports.min + 1) as usize;
        if self.worker.worker_concurrency > pool_size {
            return Err(ReactorError::Config(format!(
                "worker.worker_concurrency ({}) exceeds the port pool size ({pool_size}); excess \
                 concurrency would always see PortExhausted",
                self.worker.worker_concurrency
            )));
        }

        if self.supervisor.healthcheck_interval_ms == 0 {
            return Err(ReactorError::Config(
                "supervisor.healthcheck_interval_ms must be > 0".into(),
            ));
        }

        if self.activity.max_attempts == 0 {
            return Err(ReactorError::Config(
                "activity.max_attempts must be > 0".into(),
            ));
        }
        if self.activity.backoff_coefficient < 1.0 {
            return Err(ReactorError::Config(
                "activity.backoff_coefficient must be >= 1.0".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PortRangeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortRangeConfig {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            min: 8000,
            max: 9000,
        }
    }
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    pub repo_dir: PathBuf,
    pub worktree_base: PathBuf,
    pub agent_server_command: String,
    pub test_command: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            repo_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            worktree_base: std::env::temp_dir().join("reactor-worktrees"),
            agent_server_command: "agent-server".to_string(),
            test_command: "cargo test".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SupervisorTimingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorTimingConfig {
    pub healthcheck_timeout_secs: u64,
    pub healthcheck_interval_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SupervisorTimingConfig {
    fn default() -> Self {
        Self {
            healthcheck_timeout_secs: 10,
            healthcheck_interval_ms: 200,
            shutdown_grace_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// ActivityConfig (retry policy defaults)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivityConfig {
    pub start_to_close_secs: u64,
    pub heartbeat_secs: u64,
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub max_interval_secs: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            start_to_close_secs: 600,
            heartbeat_secs: 30,
            max_attempts: 3,
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            max_interval_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub worker_concurrency: usize,
    pub graceful_shutdown_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 50,
            graceful_shutdown_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("reactor-state.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = ReactorConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_port_range_rejected() {
        let mut cfg = ReactorConfig::default();
        cfg.ports.min = 9000;
        cfg.ports.max = 8000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relative_repo_dir_rejected() {
        let mut cfg = ReactorConfig::default();
        cfg.repo.repo_dir = PathBuf::from("relative/path");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_worker_concurrency_rejected() {
        let mut cfg = ReactorConfig::default();
        cfg.worker.worker_concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn worker_concurrency_exceeding_port_pool_rejected() {
        let mut cfg = ReactorConfig::default();
        cfg.ports.min = 8000;
        cfg.ports.max = 8001;
        cfg.worker.worker_concurrency = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_missing_file_errors() {
        let result = ReactorConfig::load(Path::new("/nonexistent/reactor.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn roundtrip_through_toml() {
        let cfg = ReactorConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed: ReactorConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.ports.min, cfg.ports.min);
        assert_eq!(parsed.worker.worker_concurrency, cfg.worker.worker_concurrency);
    }
}
