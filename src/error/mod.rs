//! Error types for the execution core.
//!
//! - [`Diagnostic`]: User-facing errors and hints carried by run notifications.
//! - [`ExecError`]: Errors returned by coordinator operations.

pub mod diagnostic;
pub mod exec_error;

pub use diagnostic::{Diagnostic, ErrorKind, ErrorSeverity, SourceLocation};
pub use exec_error::ExecError;

/// Convenience alias for coordinator-level results.
pub type ExecResult<T> = Result<T, ExecError>;
