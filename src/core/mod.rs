pub mod coordinator;
pub mod dispatcher;
pub mod event_bus;
pub mod handle;
pub mod injector;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod types;

pub use coordinator::{ExecutionCoordinator, ExecutionCoordinatorBuilder};
pub use dispatcher::{DispatchPlan, PendingCall, RunRequest, VariantDispatcher};
pub use event_bus::{
    create_notification_channel, Notification, NotificationEmitter, NotificationEnvelope,
    NotificationReceiver, NotificationSender,
};
pub use handle::{WorkspaceCommand, WorkspaceHandle};
pub use injector::{inject, BreakpointHint, Injection};
pub use registry::{SuspendedRun, SuspendedRunRegistry};
pub use shutdown::ShutdownSignal;
pub use state::{StopReason, WorkspaceExecutionState};
pub use types::{RunTarget, Trigger, WorkspaceId};
