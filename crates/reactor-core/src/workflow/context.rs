//! A lightweight stand-in for the durable engine's cancellation and
//! disconnected-context primitives, built on the async runtime's own tokens.

use tokio_util::sync::CancellationToken;

/// Carries cancellation for one workflow execution.
///
/// `Teardown` activities must run even when the parent workflow has been
/// cancelled, so they are scheduled against a [`Self::disconnected`] context
/// rather than this one (INV-5).
#[derive(Clone)]
pub struct WorkflowContext {
    token: CancellationToken,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns an independent context, unlinked from this one's cancellation,
    /// so work scheduled against it survives this context being cancelled.
    pub fn disconnected(&self) -> WorkflowContext {
        WorkflowContext::new()
    }

    /// Returns a context cancelled automatically whenever `self` is, without
    /// being able to cancel `self` in turn. The worker uses this to fan its
    /// own shutdown signal out to every in-flight run without giving any one
    /// run's context a way to affect the others.
    pub fn child(&self) -> WorkflowContext {
        WorkflowContext { token: self.token.child_token() }
    }
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_context_survives_parent_cancellation() {
        let parent = WorkflowContext::new();
        let child = parent.disconnected();

        parent.cancel();

        assert!(parent.is_cancelled());
        assert!(!child.is_cancelled());
    }
}
