use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Workspace teardown signal. Child tokens are cancelled with it.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token for a sub-task that must stop with the workspace.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}
