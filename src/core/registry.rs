//! Suspended-run registry: one resumable continuation per workspace.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::WorkspaceId;
use crate::error::SourceLocation;
use crate::evaluator::{Context, SuspendedHandle};

/// A continuation together with the context it was suspended under.
#[derive(Debug)]
pub struct SuspendedRun {
    pub handle: SuspendedHandle,
    pub context: Context,
    /// Context generation at suspension time.
    pub generation: u64,
}

impl SuspendedRun {
    pub fn new(handle: SuspendedHandle, context: Context) -> Self {
        let generation = context.generation();
        Self {
            handle,
            context,
            generation,
        }
    }

    /// False once the context has been reset since suspension.
    pub fn is_valid(&self) -> bool {
        self.context.generation() == self.generation
    }
}

/// Registry of suspended runs keyed by workspace.
#[derive(Clone, Default)]
pub struct SuspendedRunRegistry {
    slots: Arc<Mutex<HashMap<WorkspaceId, SuspendedRun>>>,
}

impl SuspendedRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `run`, replacing any earlier suspension of the workspace.
    pub fn set(&self, workspace: &WorkspaceId, run: SuspendedRun) {
        self.slots.lock().insert(workspace.clone(), run);
    }

    /// Remove and return the workspace's run. A run whose context was reset
    /// after suspension is discarded.
    pub fn take(&self, workspace: &WorkspaceId) -> Option<SuspendedRun> {
        let run = self.slots.lock().remove(workspace)?;
        if run.is_valid() {
            Some(run)
        } else {
            tracing::debug!(workspace = %workspace, "discarding stale suspended run");
            None
        }
    }

    pub fn clear(&self, workspace: &WorkspaceId) {
        self.slots.lock().remove(workspace);
    }

    pub fn contains(&self, workspace: &WorkspaceId) -> bool {
        self.slots
            .lock()
            .get(workspace)
            .map(SuspendedRun::is_valid)
            .unwrap_or(false)
    }

    /// Where the workspace's run stopped, if it stopped at a line.
    pub fn location(&self, workspace: &WorkspaceId) -> Option<SourceLocation> {
        self.slots
            .lock()
            .get(workspace)
            .and_then(|run| run.handle.location().cloned())
    }
}
