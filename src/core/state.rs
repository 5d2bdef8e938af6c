use serde::Serialize;
use uuid::Uuid;

use super::types::RunTarget;

/// Why the last run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    Errored,
    Interrupted,
    /// Stopped at a breakpoint or on a pause request.
    Paused,
}

/// Execution state of one workspace, published on every transition.
///
/// `is_running` and `is_debugging` are never both true.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkspaceExecutionState {
    /// A run is in flight.
    pub is_running: bool,
    /// The last run stopped at a pause and may be resumed.
    pub is_debugging: bool,
    /// `None` until the first run ends.
    pub last_stop: Option<StopReason>,
    /// Id of the current or last run.
    pub run_id: Option<Uuid>,
    pub target: Option<RunTarget>,
    /// Wall-clock budget each local run is given.
    pub execution_timeout_ms: u64,
    /// Step budget each local run is given.
    pub step_limit: u64,
}

impl WorkspaceExecutionState {
    /// Idle state for a workspace with the given budgets.
    pub fn with_budgets(execution_timeout_ms: u64, step_limit: u64) -> Self {
        Self {
            execution_timeout_ms,
            step_limit,
            ..Self::default()
        }
    }

    pub(crate) fn start(&mut self, run_id: Uuid, target: RunTarget) {
        self.is_running = true;
        self.is_debugging = false;
        self.run_id = Some(run_id);
        self.target = Some(target);
    }

    pub(crate) fn stop(&mut self, reason: StopReason) {
        self.is_running = false;
        self.is_debugging = reason == StopReason::Paused;
        self.last_stop = Some(reason);
    }

    pub fn is_idle(&self) -> bool {
        !self.is_running
    }
}
