use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{RunTarget, Trigger, WorkspaceId};
use crate::error::{Diagnostic, SourceLocation};
use crate::evaluator::{ContextSnapshot, Value};
use crate::remote::{ConnectionState, PeripheralReading};

/// Notification emitted by a workspace.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A run was accepted and is now in flight.
    RunStarted {
        run_id: Uuid,
        trigger: Trigger,
        target: RunTarget,
    },
    /// Output produced by the program, in order.
    Output { text: String },
    /// The run was abandoned on request or by a newer run.
    RunInterrupted,
    /// The run stopped at a breakpoint or on a pause request. `location` is
    /// `None` when no continuation was kept.
    RunPaused { location: Option<SourceLocation> },
    /// The run completed with `value`.
    RunFinished { value: Value },
    /// The run failed. `hints` are static findings about the program.
    RunErrored {
        diagnostics: Vec<Diagnostic>,
        hints: Vec<Diagnostic>,
    },
    /// Sent after `RunFinished` for interactive triggers.
    ProgramEvaluated {
        value: Value,
        code: String,
        previous_suspension: Option<SourceLocation>,
        context: ContextSnapshot,
    },
    /// A breakpoint could not be placed; it and the ones after it were skipped.
    BreakpointHintEmitted { line: usize, message: String },
    /// The device session changed state.
    ConnectionStateChanged { state: ConnectionState },
    /// Latest reading per port, stale ports removed.
    TelemetryUpdated { readings: Vec<PeripheralReading> },
}

impl Notification {
    /// True for the notifications that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notification::RunInterrupted
                | Notification::RunPaused { .. }
                | Notification::RunFinished { .. }
                | Notification::RunErrored { .. }
        )
    }
}

/// A notification tagged with its workspace.
#[derive(Clone, Debug, Serialize)]
pub struct NotificationEnvelope {
    pub workspace: WorkspaceId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Notification sender
pub type NotificationSender = mpsc::UnboundedSender<NotificationEnvelope>;

/// Notification receiver
pub type NotificationReceiver = mpsc::UnboundedReceiver<NotificationEnvelope>;

/// Create the notification channel
pub fn create_notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

/// Emits notifications on behalf of one workspace.
#[derive(Clone)]
pub struct NotificationEmitter {
    tx: NotificationSender,
    workspace: WorkspaceId,
}

impl NotificationEmitter {
    pub fn new(tx: NotificationSender, workspace: WorkspaceId) -> Self {
        Self { tx, workspace }
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    pub fn emit(&self, notification: Notification) {
        let envelope = NotificationEnvelope {
            workspace: self.workspace.clone(),
            timestamp: Utc::now(),
            notification,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!(workspace = %self.workspace, "notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notification_channel() {
        let (sender, mut receiver) = create_notification_channel();
        let emitter = NotificationEmitter::new(sender, WorkspaceId::playground());

        emitter.emit(Notification::RunFinished {
            value: Value::Int(2),
        });

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.workspace, WorkspaceId::playground());
        match envelope.notification {
            Notification::RunFinished { value } => assert_eq!(value, Value::Int(2)),
            _ => panic!("Unexpected notification type"),
        }
    }

    #[test]
    fn test_envelope_serializes_flat() {
        let envelope = NotificationEnvelope {
            workspace: WorkspaceId::new("grading"),
            timestamp: Utc::now(),
            notification: Notification::BreakpointHintEmitted {
                line: 4,
                message: "hint".into(),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["workspace"], "grading");
        assert_eq!(json["type"], "breakpoint_hint_emitted");
        assert_eq!(json["line"], 4);
    }

    #[test]
    fn test_terminal_notifications() {
        assert!(Notification::RunInterrupted.is_terminal());
        assert!(!Notification::Output { text: "x".into() }.is_terminal());
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sender, receiver) = create_notification_channel();
        drop(receiver);
        NotificationEmitter::new(sender, WorkspaceId::playground()).emit(Notification::RunInterrupted);
    }
}
