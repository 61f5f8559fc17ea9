use thiserror::Error;

/// Top-level error type for the reactor-core library.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// No free port in the configured range.
    #[error("port pool exhausted: no free port in range")]
    PortExhausted,

    /// Attempted to release a port that was not allocated.
    #[error("port {0} is not currently allocated")]
    PortNotAllocated(u16),

    /// A worktree path already exists where a new one was to be created.
    #[error("worktree conflict: {0} already exists")]
    WorktreeConflict(String),

    /// Git worktree lifecycle error (outside the conflict case above).
    #[error("worktree error: {0}")]
    Worktree(String),

    /// The agent server failed to become healthy within its timeout.
    #[error("server unready: {0}")]
    ServerUnready(String),

    /// Agent process supervision error (spawn/signal failures).
    #[error("process error: {0}")]
    Process(String),

    /// The agent returned an error response or violated a semantic precondition.
    #[error("agent execution error: {0}")]
    AgentExecutionError(String),

    /// Structural error in a DAG's task graph: a cycle was found.
    #[error("cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    /// No task became ready in a scheduling pass despite incomplete tasks remaining.
    #[error("stall detected: no task is ready but {0} task(s) remain incomplete")]
    StallDetected(usize),

    /// Aggregated errors collected during a saga's compensating / teardown steps.
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Durable store read/write error.
    #[error("store error: {0}")]
    Store(String),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Git command error.
    #[error("git error: {0}")]
    Git(String),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ReactorError>;

impl From<crate::git_exec::GitExecError> for ReactorError {
    fn from(e: crate::git_exec::GitExecError) -> Self {
        ReactorError::Git(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ReactorError::PortExhausted;
        assert_eq!(err.to_string(), "port pool exhausted: no free port in range");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::other("boom");
        let err: ReactorError = io_err.into();
        assert!(matches!(err, ReactorError::Io(_)));
    }

    #[test]
    fn cycle_detected_lists_task_names() {
        let err = ReactorError::CycleDetected(vec!["A".into(), "B".into()]);
        assert!(err.to_string().contains("A"));
    }
}
