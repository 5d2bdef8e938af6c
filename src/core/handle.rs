//! Caller-side handle to a workspace task.

use tokio::sync::{mpsc, oneshot, watch};

use super::registry::SuspendedRunRegistry;
use super::shutdown::ShutdownSignal;
use super::state::WorkspaceExecutionState;
use super::types::{Trigger, WorkspaceId};
use crate::error::ExecError;
use crate::remote::{ConnectionState, DeviceDescriptor, RemoteSessionManager};

/// Commands consumed by the workspace task.
#[derive(Debug)]
pub enum WorkspaceCommand {
    /// Start a run. `ack` resolves once the run has started or was rejected.
    Run {
        trigger: Trigger,
        /// Explicit backtrack request (non-deterministic variant).
        retry: bool,
        ack: oneshot::Sender<Result<(), ExecError>>,
    },
    /// Abandon the run in flight, or stop it on the device.
    Interrupt,
    /// Suspend the run in flight at its next statement.
    DebugPause,
    /// Connect the workspace to a device, superseding any session.
    Connect(DeviceDescriptor),
    /// Drop the device session.
    Disconnect,
}

/// Handle to one workspace.
///
/// Requests are fire-and-forget: they resolve once the workspace task has
/// accepted them and outcomes arrive as notifications. State can be polled
/// with [`state()`](Self::state) or awaited with [`wait_for()`](Self::wait_for).
#[derive(Clone)]
pub struct WorkspaceHandle {
    id: WorkspaceId,
    commands: mpsc::Sender<WorkspaceCommand>,
    state_rx: watch::Receiver<WorkspaceExecutionState>,
    session: RemoteSessionManager,
    registry: SuspendedRunRegistry,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl WorkspaceHandle {
    pub(crate) fn new(
        id: WorkspaceId,
        commands: mpsc::Sender<WorkspaceCommand>,
        state_rx: watch::Receiver<WorkspaceExecutionState>,
        session: RemoteSessionManager,
        registry: SuspendedRunRegistry,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            id,
            commands,
            state_rx,
            session,
            registry,
            shutdown,
        }
    }

    /// Workspace id
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    /// Current execution state (non-blocking).
    pub fn state(&self) -> WorkspaceExecutionState {
        self.state_rx.borrow().clone()
    }

    /// State of the workspace's device session.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Whether a paused run or backtrack point is waiting in the registry.
    pub fn has_suspended_run(&self) -> bool {
        self.registry.contains(&self.id)
    }

    /// Receiver that observes every published state transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceExecutionState> {
        self.state_rx.clone()
    }

    /// Block until the state satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<WorkspaceExecutionState, ExecError>
    where
        F: FnMut(&WorkspaceExecutionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ExecError::WorkspaceClosed(self.id.clone()))?;
        Ok(state.clone())
    }

    /// Submit a run. A run already in flight is interrupted first.
    ///
    /// Fails with `InvariantViolation` for a resume without a suspended run,
    /// and with `NoEntrypoint` when there is nothing to run.
    pub async fn request_run(&self, trigger: Trigger) -> Result<(), ExecError> {
        self.run(trigger, false).await
    }

    /// Continue the paused run. Same as `request_run(Trigger::DebugResume)`.
    pub async fn request_debug_resume(&self) -> Result<(), ExecError> {
        self.run(Trigger::DebugResume, false).await
    }

    /// Ask the last finished non-deterministic run for its next value.
    pub async fn request_retry(&self) -> Result<(), ExecError> {
        self.run(Trigger::EditorRun, true).await
    }

    /// Interrupt the run in flight. Ignored when nothing is running.
    pub async fn request_interrupt(&self) -> Result<(), ExecError> {
        self.send(WorkspaceCommand::Interrupt).await
    }

    /// Pause the run in flight. The run ends with `RunPaused`; its location is
    /// `None` when the evaluator could not suspend it.
    pub async fn request_debug_pause(&self) -> Result<(), ExecError> {
        self.send(WorkspaceCommand::DebugPause).await
    }

    /// Start connecting to `device`. Progress arrives as
    /// `ConnectionStateChanged` notifications.
    pub async fn request_connect(&self, device: DeviceDescriptor) -> Result<(), ExecError> {
        self.send(WorkspaceCommand::Connect(device)).await
    }

    /// Drop the device session or cancel the attempt in progress.
    pub async fn request_disconnect(&self) -> Result<(), ExecError> {
        self.send(WorkspaceCommand::Disconnect).await
    }

    /// Tear the workspace down. Any run in flight is abandoned.
    pub fn close(&self) {
        self.shutdown.trigger();
    }

    /// Whether the workspace has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered() || self.commands.is_closed()
    }

    async fn run(&self, trigger: Trigger, retry: bool) -> Result<(), ExecError> {
        let (ack, accepted) = oneshot::channel();
        self.send(WorkspaceCommand::Run { trigger, retry, ack }).await?;
        accepted
            .await
            .map_err(|_| ExecError::WorkspaceClosed(self.id.clone()))?
    }

    async fn send(&self, command: WorkspaceCommand) -> Result<(), ExecError> {
        if self.shutdown.is_triggered() {
            return Err(ExecError::WorkspaceClosed(self.id.clone()));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| ExecError::WorkspaceClosed(self.id.clone()))
    }
}
