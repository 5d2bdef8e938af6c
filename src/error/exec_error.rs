//! Core-level error types.

use thiserror::Error;

use crate::core::WorkspaceId;
use crate::remote::ConnectionError;

/// Errors returned by coordinator operations.
///
/// Run-level faults (syntax, runtime, interruption) are never returned here;
/// they are recovered into [`Diagnostic`](super::Diagnostic)s and delivered as
/// notifications.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),
    #[error("Workspace already open: {0}")]
    WorkspaceExists(WorkspaceId),
    #[error("Workspace closed: {0}")]
    WorkspaceClosed(WorkspaceId),
    #[error("No entrypoint: {0}")]
    NoEntrypoint(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ExecError {
    fn from(e: serde_json::Error) -> Self {
        ExecError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for ExecError {
    fn from(e: toml::de::Error) -> Self {
        ExecError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_display() {
        assert_eq!(
            ExecError::InvariantViolation("resume requested with no suspended run".into())
                .to_string(),
            "Invariant violation: resume requested with no suspended run"
        );
        assert_eq!(
            ExecError::WorkspaceNotFound(WorkspaceId::new("grading")).to_string(),
            "Workspace not found: grading"
        );
        assert_eq!(
            ExecError::NoEntrypoint("folder is empty".into()).to_string(),
            "No entrypoint: folder is empty"
        );
    }

    #[test]
    fn test_exec_error_from_connection_error() {
        let err: ExecError = ConnectionError::NotConnected.into();
        assert!(matches!(err, ExecError::Connection(_)));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_exec_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ExecError = json_err.into();
        assert!(matches!(err, ExecError::Config(_)));
    }
}
