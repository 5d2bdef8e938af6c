//! Execution coordinator: one supervising task per workspace.
//!
//! The task owns the workspace's execution state and interpreter context.
//! Every local run is a race between teardown, interrupt, pause and the
//! evaluator result, resolved in that priority order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::dispatcher::{DispatchPlan, PendingCall, RunRequest, VariantDispatcher};
use super::event_bus::{
    create_notification_channel, Notification, NotificationEmitter, NotificationReceiver,
    NotificationSender,
};
use super::handle::{WorkspaceCommand, WorkspaceHandle};
use super::injector;
use super::registry::{SuspendedRun, SuspendedRunRegistry};
use super::shutdown::ShutdownSignal;
use super::state::{StopReason, WorkspaceExecutionState};
use super::types::{RunTarget, Trigger, WorkspaceId};
use crate::config::{CoordinatorConfig, WorkspaceConfig};
use crate::editor::EditorSurface;
use crate::error::{Diagnostic, ErrorKind, ExecError, SourceLocation};
use crate::evaluator::{
    CapabilityTable, Context, EvalMode, Evaluator, ExecutionOptions, Outcome, ReferenceEvaluator,
    SourceFiles, Value,
};
use crate::remote::{
    DeviceConnector, DeviceDescriptor, DisplayKind, RemoteEvent, RemoteSessionManager,
};
use crate::sandbox::WasmSandbox;

/// File key of the active buffer outside folder mode.
const ACTIVE_BUFFER_KEY: &str = "main";
/// File key of REPL input.
const REPL_KEY: &str = "repl";
const PREPEND_KEY: &str = "prepend";
/// How often program output is forwarded while a run is in flight.
const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for [`ExecutionCoordinator`].
///
/// Every collaborator is optional: the reference evaluator, a default wasm
/// sandbox and the standard capability table are used when none is given.
/// Without a connector, connect requests fail.
pub struct ExecutionCoordinatorBuilder {
    evaluator: Option<Arc<dyn Evaluator>>,
    sandbox: Option<Arc<WasmSandbox>>,
    connector: Option<Arc<dyn DeviceConnector>>,
    capabilities: CapabilityTable,
    privileged: CapabilityTable,
    config: CoordinatorConfig,
}

impl Default for ExecutionCoordinatorBuilder {
    fn default() -> Self {
        Self {
            evaluator: None,
            sandbox: None,
            connector: None,
            capabilities: CapabilityTable::standard(),
            privileged: CapabilityTable::new(),
            config: CoordinatorConfig::default(),
        }
    }
}

impl ExecutionCoordinatorBuilder {
    /// Interpreter used for every workspace.
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Wasm host for the `Sandboxed` variant.
    pub fn sandbox(mut self, sandbox: Arc<WasmSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Resolves devices and opens transports for remote runs.
    pub fn connector(mut self, connector: Arc<dyn DeviceConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Capabilities visible to user programs.
    pub fn capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Extra capabilities available only to the prepend program.
    pub fn privileged(mut self, privileged: CapabilityTable) -> Self {
        self.privileged = privileged;
        self
    }

    /// Channel sizes, telemetry staleness and per-workspace presets.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the coordinator and the receiver for its notifications.
    pub fn build(self) -> (ExecutionCoordinator, NotificationReceiver) {
        let (notifications, receiver) = create_notification_channel();
        let coordinator = ExecutionCoordinator {
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(ReferenceEvaluator::new())),
            sandbox: self
                .sandbox
                .unwrap_or_else(|| Arc::new(WasmSandbox::default())),
            connector: self.connector,
            capabilities: self.capabilities,
            privileged: self.privileged,
            config: self.config,
            registry: SuspendedRunRegistry::new(),
            notifications,
            workspaces: Mutex::new(HashMap::new()),
        };
        (coordinator, receiver)
    }
}

struct OpenWorkspace {
    handle: WorkspaceHandle,
    task: JoinHandle<()>,
}

/// Owns the workspace tasks and the collaborators they share.
pub struct ExecutionCoordinator {
    evaluator: Arc<dyn Evaluator>,
    sandbox: Arc<WasmSandbox>,
    connector: Option<Arc<dyn DeviceConnector>>,
    capabilities: CapabilityTable,
    privileged: CapabilityTable,
    config: CoordinatorConfig,
    registry: SuspendedRunRegistry,
    notifications: NotificationSender,
    workspaces: Mutex<HashMap<WorkspaceId, OpenWorkspace>>,
}

impl ExecutionCoordinator {
    /// Create a builder
    pub fn builder() -> ExecutionCoordinatorBuilder {
        ExecutionCoordinatorBuilder::default()
    }

    /// Suspended runs of every workspace.
    pub fn registry(&self) -> &SuspendedRunRegistry {
        &self.registry
    }

    /// Open a workspace with its configured preset.
    pub fn open_workspace(
        &self,
        id: impl Into<WorkspaceId>,
        editor: Arc<dyn EditorSurface>,
    ) -> Result<WorkspaceHandle, ExecError> {
        let id = id.into();
        let config = self.config.workspace(id.as_str());
        self.open_workspace_with(id, editor, config)
    }

    /// Open a workspace and spawn its task. Must be called within a tokio runtime.
    pub fn open_workspace_with(
        &self,
        id: impl Into<WorkspaceId>,
        editor: Arc<dyn EditorSurface>,
        config: WorkspaceConfig,
    ) -> Result<WorkspaceHandle, ExecError> {
        let id = id.into();
        let mut workspaces = self.workspaces.lock();
        if let Some(open) = workspaces.get(&id) {
            if !open.handle.is_closed() {
                return Err(ExecError::WorkspaceExists(id));
            }
        }

        let shutdown = ShutdownSignal::new();
        let emitter = NotificationEmitter::new(self.notifications.clone(), id.clone());
        let (session, remote_events) = RemoteSessionManager::new(
            self.connector.clone(),
            emitter.clone(),
            shutdown.clone(),
            self.config.telemetry_staleness(),
        );
        let (commands_tx, commands) = mpsc::channel(self.config.command_buffer.max(1));
        let initial = WorkspaceExecutionState::with_budgets(config.execution_timeout_ms, config.step_limit);
        let (state_tx, state_rx) = watch::channel(initial.clone());

        let handle = WorkspaceHandle::new(
            id.clone(),
            commands_tx,
            state_rx,
            session.clone(),
            self.registry.clone(),
            shutdown.clone(),
        );

        let task = WorkspaceTask {
            id: id.clone(),
            config,
            editor,
            dispatcher: VariantDispatcher::new(
                self.evaluator.clone(),
                self.sandbox.clone(),
                self.registry.clone(),
            ),
            registry: self.registry.clone(),
            context: Context::new(self.capabilities.clone()),
            capabilities: self.capabilities.clone(),
            privileged: self.privileged.clone(),
            session,
            remote_events,
            emitter,
            state: initial,
            state_tx,
            commands,
            pending: VecDeque::new(),
            shutdown,
            remote_run: None,
            last_code: String::new(),
            highlighted: None,
        };
        tracing::info!(workspace = %id, variant = ?task.config.variant, "workspace opened");
        let task = tokio::spawn(task.run());

        workspaces.insert(
            id,
            OpenWorkspace {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    pub fn workspace(&self, id: &WorkspaceId) -> Result<WorkspaceHandle, ExecError> {
        self.workspaces
            .lock()
            .get(id)
            .map(|open| open.handle.clone())
            .ok_or_else(|| ExecError::WorkspaceNotFound(id.clone()))
    }

    /// Submit a run to `id`. Resolves once the workspace accepted it.
    pub async fn submit_run(&self, id: &WorkspaceId, trigger: Trigger) -> Result<(), ExecError> {
        self.workspace(id)?.request_run(trigger).await
    }

    /// Tear down `id` and wait for its task to finish.
    pub async fn close_workspace(&self, id: &WorkspaceId) -> Result<(), ExecError> {
        let open = self
            .workspaces
            .lock()
            .remove(id)
            .ok_or_else(|| ExecError::WorkspaceNotFound(id.clone()))?;
        open.handle.close();
        open.task
            .await
            .map_err(|e| ExecError::Internal(format!("workspace task failed: {}", e)))?;
        tracing::info!(workspace = %id, "workspace closed");
        Ok(())
    }
}

impl Drop for ExecutionCoordinator {
    fn drop(&mut self) {
        for open in self.workspaces.lock().values() {
            open.handle.close();
        }
    }
}

/// Buffers resolved for one run.
struct Program {
    files: SourceFiles,
    entrypoint: String,
    breakpoints: BTreeMap<String, BTreeSet<usize>>,
}

impl Program {
    fn single(key: &str, text: String, breakpoints: BTreeSet<usize>) -> Self {
        Self {
            files: std::iter::once((key.to_string(), text)).collect(),
            entrypoint: key.to_string(),
            breakpoints: std::iter::once((key.to_string(), breakpoints)).collect(),
        }
    }

    fn entry_text(&self) -> &str {
        self.files
            .get(&self.entrypoint)
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }
}

/// Bookkeeping for the run being raced or settled.
struct RunInfo {
    run_id: Uuid,
    trigger: Trigger,
    code: String,
    previous_suspension: Option<SourceLocation>,
}

struct RemoteRun {
    info: RunInfo,
}

enum RaceEnd {
    Interrupted,
    Paused,
    Settled(Outcome),
    Teardown,
}

enum RemoteAttempt {
    Sent,
    CompileFailed(Vec<Diagnostic>),
    Fallback,
}

struct WorkspaceTask {
    id: WorkspaceId,
    config: WorkspaceConfig,
    editor: Arc<dyn EditorSurface>,
    dispatcher: VariantDispatcher,
    registry: SuspendedRunRegistry,
    context: Context,
    capabilities: CapabilityTable,
    privileged: CapabilityTable,
    session: RemoteSessionManager,
    remote_events: mpsc::UnboundedReceiver<RemoteEvent>,
    emitter: NotificationEmitter,
    state: WorkspaceExecutionState,
    state_tx: watch::Sender<WorkspaceExecutionState>,
    commands: mpsc::Receiver<WorkspaceCommand>,
    /// Run requests that arrived during a race.
    pending: VecDeque<WorkspaceCommand>,
    shutdown: ShutdownSignal,
    remote_run: Option<RemoteRun>,
    /// Entrypoint text of the last fresh local run.
    last_code: String,
    /// Buffer currently carrying a highlight (`None` path means the active buffer).
    highlighted: Option<Option<String>>,
}

impl WorkspaceTask {
    async fn run(mut self) {
        loop {
            let command = match self.pending.pop_front() {
                Some(command) => command,
                None => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    command = self.commands.recv() => match command {
                        Some(command) => command,
                        None => break,
                    },
                    Some(event) = self.remote_events.recv() => {
                        self.on_remote_event(event);
                        continue;
                    }
                },
            };
            if !self.handle_command(command).await {
                break;
            }
        }
        self.teardown().await;
    }

    /// Returns false when the workspace is being torn down.
    async fn handle_command(&mut self, command: WorkspaceCommand) -> bool {
        match command {
            WorkspaceCommand::Run { trigger, retry, ack } => self.start_run(trigger, retry, ack).await,
            WorkspaceCommand::Interrupt => {
                if self.remote_run.is_some() {
                    self.stop_remote_run().await;
                } else {
                    tracing::debug!(workspace = %self.id, "interrupt with no run in flight");
                }
                true
            }
            WorkspaceCommand::DebugPause => {
                tracing::debug!(workspace = %self.id, "pause with no local run in flight");
                true
            }
            WorkspaceCommand::Connect(device) => {
                self.connect(device);
                true
            }
            WorkspaceCommand::Disconnect => {
                self.disconnect().await;
                true
            }
        }
    }

    fn connect(&mut self, device: DeviceDescriptor) {
        // The attempt settles on its own task; its outcome arrives as state changes.
        drop(self.session.connect(device));
    }

    async fn disconnect(&mut self) {
        self.session.disconnect().await;
        if let Some(remote) = self.remote_run.take() {
            self.stop(StopReason::Interrupted);
            tracing::info!(workspace = %self.id, run_id = %remote.info.run_id, "remote run dropped with session");
            self.emitter.emit(Notification::RunInterrupted);
        }
    }

    async fn start_run(
        &mut self,
        trigger: Trigger,
        retry: bool,
        ack: oneshot::Sender<Result<(), ExecError>>,
    ) -> bool {
        if self.remote_run.is_some() {
            self.stop_remote_run().await;
        }

        let program = match &trigger {
            Trigger::DebugResume => None,
            Trigger::ReplRun { code } => Some(Program::single(REPL_KEY, code.clone(), BTreeSet::new())),
            Trigger::EditorRun | Trigger::SilentRun => match self.resolve_buffers() {
                Ok(program) => Some(program),
                Err(e) => {
                    tracing::warn!(workspace = %self.id, error = %e, "run rejected");
                    let _ = ack.send(Err(e));
                    return true;
                }
            },
        };

        let entry_code = program.as_ref().map(|p| p.entry_text().to_string()).unwrap_or_default();
        let plan = DispatchPlan::for_request(
            &trigger,
            self.config.variant,
            &entry_code,
            &self.config.retry_token,
            retry,
        );

        match program {
            Some(program) if plan.is_fresh() => {
                if self.choose_target(&trigger) == RunTarget::Remote {
                    match self.try_remote(&program).await {
                        RemoteAttempt::Sent => {
                            let info = self.begin(trigger, entry_code, None, RunTarget::Remote);
                            let _ = ack.send(Ok(()));
                            self.remote_run = Some(RemoteRun { info });
                            return true;
                        }
                        RemoteAttempt::CompileFailed(diagnostics) => {
                            self.begin(trigger, entry_code, None, RunTarget::Remote);
                            let _ = ack.send(Ok(()));
                            self.stop(StopReason::Errored);
                            self.emitter.emit(Notification::RunErrored {
                                diagnostics,
                                hints: Vec::new(),
                            });
                            return true;
                        }
                        RemoteAttempt::Fallback => {}
                    }
                }
                self.run_fresh(trigger, program, ack).await
            }
            _ => self.run_continuation(trigger, plan, ack).await,
        }
    }

    fn choose_target(&self, trigger: &Trigger) -> RunTarget {
        let remote_capable = matches!(trigger, Trigger::EditorRun | Trigger::SilentRun);
        if remote_capable && self.session.state().is_connected() {
            RunTarget::Remote
        } else {
            RunTarget::Local
        }
    }

    async fn try_remote(&mut self, program: &Program) -> RemoteAttempt {
        let compiled = match self.dispatcher.evaluator().compile(
            &program.files,
            &program.entrypoint,
            &self.context,
        ) {
            Ok(compiled) => compiled,
            Err(diagnostics) => return RemoteAttempt::CompileFailed(diagnostics),
        };
        match self.session.send_run(&compiled).await {
            Ok(()) => RemoteAttempt::Sent,
            Err(e) => {
                tracing::warn!(workspace = %self.id, error = %e, "remote run failed, running locally");
                self.session.mark_failed(e.to_string()).await;
                RemoteAttempt::Fallback
            }
        }
    }

    fn resolve_buffers(&self) -> Result<Program, ExecError> {
        if !self.config.folder_mode {
            let buffer = self
                .editor
                .active_buffer()
                .ok_or_else(|| ExecError::NoEntrypoint("no active buffer".into()))?;
            let key = buffer
                .file_path
                .clone()
                .unwrap_or_else(|| ACTIVE_BUFFER_KEY.to_string());
            return Ok(Program::single(&key, buffer.source_text, buffer.breakpoint_lines));
        }

        let mut files = SourceFiles::new();
        let mut breakpoints = BTreeMap::new();
        for buffer in self.editor.buffers(&self.config.root) {
            if let Some(path) = buffer.file_path {
                breakpoints.insert(path.clone(), buffer.breakpoint_lines);
                files.insert(path, buffer.source_text);
            }
        }
        if files.is_empty() {
            return Err(ExecError::NoEntrypoint(format!(
                "no buffers under {}",
                self.config.root
            )));
        }
        let entrypoint = self
            .config
            .entrypoint
            .clone()
            .or_else(|| self.editor.active_buffer().and_then(|b| b.file_path))
            .ok_or_else(|| ExecError::NoEntrypoint("no entrypoint configured".into()))?;
        if !files.contains_key(&entrypoint) {
            return Err(ExecError::NoEntrypoint(format!(
                "{} is not under {}",
                entrypoint, self.config.root
            )));
        }
        Ok(Program {
            files,
            entrypoint,
            breakpoints,
        })
    }

    fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            mode: EvalMode::Standard,
            step_limit: self.config.step_limit,
            timeout: self.config.timeout(),
        }
    }

    async fn run_fresh(
        &mut self,
        trigger: Trigger,
        mut program: Program,
        ack: oneshot::Sender<Result<(), ExecError>>,
    ) -> bool {
        let is_repl = matches!(trigger, Trigger::ReplRun { .. });
        let entry_code = program.entry_text().to_string();
        self.clear_highlight();
        self.context.reset(is_repl);
        self.registry.clear(&self.id);
        let info = self.begin(trigger, entry_code.clone(), None, RunTarget::Local);
        let _ = ack.send(Ok(()));

        let evaluator = self.dispatcher.evaluator().clone();
        for (path, text) in program.files.iter_mut() {
            let Some(lines) = program.breakpoints.get(path) else {
                continue;
            };
            let injection = injector::inject(text, lines, evaluator.as_ref());
            if let Some(hint) = injection.hint {
                self.emitter.emit(Notification::BreakpointHintEmitted {
                    line: hint.line,
                    message: hint.message,
                });
            }
            *text = injection.text;
        }

        if !is_repl {
            self.last_code = entry_code.clone();
            match self.config.prepend.clone() {
                Some(prepend) => {
                    if !self.run_prepend(prepend).await {
                        return !self.shutdown.is_triggered();
                    }
                }
                None => self.context.set_capabilities(self.capabilities.clone()),
            }
        }

        let mut errors = evaluator.parse(program.entry_text());
        if !errors.is_empty() {
            if program.is_multi_file() {
                for error in &mut errors {
                    if let Some(location) = error.location.as_mut() {
                        location.file = Some(program.entrypoint.clone());
                    }
                }
            }
            self.finish_errored(errors, Vec::new());
            return true;
        }

        let request = RunRequest {
            workspace: self.id.clone(),
            variant: self.config.variant,
            files: program.files,
            entrypoint: program.entrypoint,
            context: self.context.clone(),
            options: self.options(),
        };
        match self.dispatcher.dispatch(DispatchPlan::Fresh, request) {
            Ok(call) => self.race(call, info).await,
            Err(e) => {
                self.finish_errored(
                    vec![Diagnostic::error(ErrorKind::InvariantViolation, e.to_string())],
                    Vec::new(),
                );
                true
            }
        }
    }

    /// Run the prepend program with elevated capabilities, then revoke the
    /// privileged names. Returns false if the run ended here.
    async fn run_prepend(&mut self, prepend: String) -> bool {
        let elevated = self.capabilities.merged(&self.privileged);
        let revoked = elevated.difference(&self.capabilities);
        self.context.set_capabilities(elevated);
        self.context.begin_run();

        let files: SourceFiles = std::iter::once((PREPEND_KEY.to_string(), prepend)).collect();
        let call = self.dispatcher.evaluator().run_files(
            files,
            PREPEND_KEY.to_string(),
            self.context.clone(),
            self.options(),
        );
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                self.dispatcher.evaluator().interrupt(&self.context);
                return false;
            }
            outcome = call => outcome,
        };

        if let Outcome::Error = outcome {
            tracing::warn!(workspace = %self.id, "prepend program failed");
            let errors = self.context.errors();
            self.finish_errored(errors, Vec::new());
            return false;
        }

        self.context.revoke(revoked);
        self.context.begin_run();
        true
    }

    async fn run_continuation(
        &mut self,
        trigger: Trigger,
        plan: DispatchPlan,
        ack: oneshot::Sender<Result<(), ExecError>>,
    ) -> bool {
        let previous_suspension = self.registry.location(&self.id);
        let request = RunRequest {
            workspace: self.id.clone(),
            variant: self.config.variant,
            files: SourceFiles::new(),
            entrypoint: String::new(),
            context: self.context.clone(),
            options: self.options(),
        };
        match self.dispatcher.dispatch(plan, request) {
            Ok(call) => {
                self.clear_highlight();
                let code = self.last_code.clone();
                let info = self.begin(trigger, code, previous_suspension, RunTarget::Local);
                let _ = ack.send(Ok(()));
                self.race(call, info).await
            }
            Err(e) => {
                let _ = ack.send(Err(e));
                true
            }
        }
    }

    /// Race the pending call against teardown, interrupt and pause requests.
    async fn race(&mut self, mut call: PendingCall, info: RunInfo) -> bool {
        let mut flush = tokio::time::interval(OUTPUT_FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let end = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break RaceEnd::Teardown,
                command = self.commands.recv() => match command {
                    None => break RaceEnd::Teardown,
                    Some(WorkspaceCommand::Interrupt) => break RaceEnd::Interrupted,
                    Some(WorkspaceCommand::DebugPause) => break RaceEnd::Paused,
                    Some(run @ WorkspaceCommand::Run { .. }) => {
                        tracing::debug!(workspace = %self.id, "run requested mid-race, interrupting");
                        self.pending.push_back(run);
                        break RaceEnd::Interrupted;
                    }
                    Some(WorkspaceCommand::Connect(device)) => self.connect(device),
                    Some(WorkspaceCommand::Disconnect) => self.session.disconnect().await,
                },
                outcome = &mut call => break RaceEnd::Settled(outcome),
                _ = flush.tick() => self.flush_output(),
            }
        };

        match end {
            RaceEnd::Teardown => {
                self.dispatcher.evaluator().interrupt(&self.context);
                false
            }
            RaceEnd::Interrupted => {
                self.finish_interrupted(&info);
                true
            }
            RaceEnd::Paused => {
                let evaluator = self.dispatcher.evaluator().clone();
                if !evaluator.request_pause(&self.context) {
                    evaluator.interrupt(&self.context);
                    self.flush_output();
                    self.stop(StopReason::Paused);
                    self.emitter.emit(Notification::RunPaused { location: None });
                    return true;
                }
                let outcome = tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        evaluator.interrupt(&self.context);
                        return false;
                    }
                    outcome = call => outcome,
                };
                self.settle_paused(outcome, info);
                true
            }
            RaceEnd::Settled(outcome) => {
                self.settle(outcome, info);
                true
            }
        }
    }

    fn settle(&mut self, outcome: Outcome, info: RunInfo) {
        self.flush_output();
        match outcome {
            Outcome::Error => {
                let errors = self.context.errors();
                let hints = if info.code.is_empty() {
                    Vec::new()
                } else {
                    self.dispatcher.evaluator().check(&info.code, &self.context)
                };
                if let Some(location) = errors.iter().find_map(|e| e.location.clone()) {
                    self.highlight(&location);
                }
                tracing::debug!(workspace = %self.id, run_id = %info.run_id, errors = errors.len(), "run errored");
                self.finish_errored(errors, hints);
            }
            Outcome::Suspended { handle } => {
                let location = handle.location().cloned();
                self.registry.set(&self.id, SuspendedRun::new(handle, self.context.clone()));
                if let Some(location) = &location {
                    self.highlight(location);
                }
                self.stop(StopReason::Paused);
                tracing::debug!(workspace = %self.id, run_id = %info.run_id, ?location, "run paused");
                self.emitter.emit(Notification::RunPaused { location });
            }
            Outcome::Finished {
                value,
                continuation,
            } => {
                if let Some(handle) = continuation {
                    self.registry.set(&self.id, SuspendedRun::new(handle, self.context.clone()));
                }
                self.finish(value, info);
            }
        }
    }

    /// Settle a call that lost the race to a pause request. Only a suspension
    /// is reported as such; a call that completed anyway still ends paused,
    /// without a location or continuation.
    fn settle_paused(&mut self, outcome: Outcome, info: RunInfo) {
        if let Outcome::Suspended { .. } = outcome {
            self.settle(outcome, info);
            return;
        }
        tracing::debug!(workspace = %self.id, run_id = %info.run_id, "run completed after pause was requested");
        self.flush_output();
        self.stop(StopReason::Paused);
        self.emitter.emit(Notification::RunPaused { location: None });
    }

    fn finish(&mut self, value: Value, info: RunInfo) {
        self.stop(StopReason::Finished);
        tracing::debug!(workspace = %self.id, run_id = %info.run_id, %value, "run finished");
        self.emitter.emit(Notification::RunFinished {
            value: value.clone(),
        });
        if info.trigger.is_interactive() {
            self.emitter.emit(Notification::ProgramEvaluated {
                value,
                code: info.code,
                previous_suspension: info.previous_suspension,
                context: self.context.snapshot(),
            });
        }
    }

    fn finish_interrupted(&mut self, info: &RunInfo) {
        self.dispatcher.evaluator().interrupt(&self.context);
        self.context.push_error(Diagnostic::interrupted());
        self.flush_output();
        self.stop(StopReason::Interrupted);
        tracing::info!(workspace = %self.id, run_id = %info.run_id, "run interrupted");
        self.emitter.emit(Notification::RunInterrupted);
    }

    fn finish_errored(&mut self, diagnostics: Vec<Diagnostic>, hints: Vec<Diagnostic>) {
        self.flush_output();
        self.stop(StopReason::Errored);
        self.emitter.emit(Notification::RunErrored { diagnostics, hints });
    }

    async fn stop_remote_run(&mut self) {
        let Some(remote) = self.remote_run.take() else {
            return;
        };
        if let Err(e) = self.session.send_stop().await {
            tracing::warn!(workspace = %self.id, error = %e, "failed to stop remote run");
        }
        self.stop(StopReason::Interrupted);
        tracing::info!(workspace = %self.id, run_id = %remote.info.run_id, "remote run interrupted");
        self.emitter.emit(Notification::RunInterrupted);
    }

    fn on_remote_event(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Display(message) => match message.kind {
                DisplayKind::Output => self.emitter.emit(Notification::Output { text: message.text }),
                DisplayKind::Result => match self.remote_run.take() {
                    Some(remote) => self.finish(Value::from_device_text(&message.text), remote.info),
                    None => tracing::debug!(workspace = %self.id, "device result with no run in flight"),
                },
                DisplayKind::Error => match self.remote_run.take() {
                    Some(_) => self.finish_errored(vec![Diagnostic::runtime(message.text)], Vec::new()),
                    None => tracing::debug!(workspace = %self.id, "device error with no run in flight"),
                },
            },
            RemoteEvent::SessionLost { reason } => {
                if self.remote_run.take().is_some() {
                    self.finish_errored(
                        vec![Diagnostic::error(ErrorKind::Connection, reason)],
                        Vec::new(),
                    );
                }
            }
        }
    }

    fn begin(
        &mut self,
        trigger: Trigger,
        code: String,
        previous_suspension: Option<SourceLocation>,
        target: RunTarget,
    ) -> RunInfo {
        let run_id = Uuid::new_v4();
        self.state.start(run_id, target);
        self.publish();
        tracing::debug!(workspace = %self.id, %run_id, ?trigger, ?target, "run started");
        self.emitter.emit(Notification::RunStarted {
            run_id,
            trigger: trigger.clone(),
            target,
        });
        RunInfo {
            run_id,
            trigger,
            code,
            previous_suspension,
        }
    }

    fn stop(&mut self, reason: StopReason) {
        self.state.stop(reason);
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn flush_output(&self) {
        for text in self.context.take_output() {
            self.emitter.emit(Notification::Output { text });
        }
    }

    fn highlight(&mut self, location: &SourceLocation) {
        self.clear_highlight();
        self.editor
            .set_highlighted_lines(location.file.as_deref(), vec![(location.line, location.line)]);
        self.highlighted = Some(location.file.clone());
    }

    fn clear_highlight(&mut self) {
        if let Some(file) = self.highlighted.take() {
            self.editor.set_highlighted_lines(file.as_deref(), Vec::new());
        }
    }

    async fn teardown(&mut self) {
        self.dispatcher.evaluator().interrupt(&self.context);
        if self.remote_run.is_some() {
            self.stop_remote_run().await;
        } else if self.state.is_running {
            self.stop(StopReason::Interrupted);
            self.emitter.emit(Notification::RunInterrupted);
        }
        self.registry.clear(&self.id);
        self.clear_highlight();
        self.session.disconnect().await;

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.pending.push_back(command);
        }
        for command in self.pending.drain(..) {
            if let WorkspaceCommand::Run { ack, .. } = command {
                let _ = ack.send(Err(ExecError::WorkspaceClosed(self.id.clone())));
            }
        }
        tracing::info!(workspace = %self.id, "workspace task stopped");
    }
}
