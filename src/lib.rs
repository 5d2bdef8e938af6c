//! # xexec: Execution control core
//!
//! `xexec` runs user-submitted programs against a pluggable interpreter and
//! keeps every run under supervision:
//!
//! - **Interruption**: a run in flight can be abandoned at any time; the
//!   interpreter observes the request at its next step.
//! - **Breakpoints**: pause markers are injected at chosen lines and a paused
//!   run is kept as a resumable continuation, one per workspace.
//! - **Variants**: standard, lazy (call-by-need bindings), non-deterministic
//!   (backtracking search) and sandboxed (compiled to wasm and executed under
//!   wasmtime with fuel and memory limits).
//! - **Remote devices**: when a workspace is connected to a device, programs
//!   are compiled and forwarded over the device transport; device output and
//!   telemetry come back as notifications.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xexec::{ExecutionCoordinator, InMemoryEditor, Notification, Trigger, WorkspaceId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (coordinator, mut notifications) = ExecutionCoordinator::builder().build();
//!     let editor = InMemoryEditor::with_text("let x = 20;\nx + 22;");
//!     let workspace = coordinator
//!         .open_workspace(WorkspaceId::playground(), Arc::new(editor))
//!         .unwrap();
//!     workspace.request_run(Trigger::EditorRun).await.unwrap();
//!     while let Some(envelope) = notifications.recv().await {
//!         if let Notification::RunFinished { value } = envelope.notification {
//!             println!("{}", value);
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod core;
pub mod editor;
pub mod error;
pub mod evaluator;
pub mod remote;
pub mod sandbox;

pub use crate::config::{load_config, ConfigFormat, CoordinatorConfig, Variant, WorkspaceConfig};
pub use crate::core::{
    ExecutionCoordinator, ExecutionCoordinatorBuilder, Notification, NotificationEnvelope,
    NotificationReceiver, RunTarget, StopReason, SuspendedRunRegistry, Trigger, WorkspaceExecutionState,
    WorkspaceHandle, WorkspaceId,
};
pub use crate::editor::{EditorBuffer, EditorSurface, InMemoryEditor};
pub use crate::error::{Diagnostic, ErrorKind, ExecError, ExecResult, SourceLocation};
pub use crate::evaluator::{
    Capability, CapabilityTable, CompiledProgram, Context, EvalMode, Evaluator, ExecutionOptions,
    Outcome, ReferenceEvaluator, SourceFiles, SuspendedHandle, Value,
};
pub use crate::remote::{
    ConnectionError, ConnectionState, DeviceConnector, DeviceDescriptor, RemoteSessionManager,
    StaticConnector, Transport,
};
pub use crate::sandbox::{SandboxError, WasmSandbox, WasmSandboxConfig};
