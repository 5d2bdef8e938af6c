use serde::{Deserialize, Serialize};

/// Diagnostic classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Pre-run parse failure; the run is aborted before dispatch.
    Syntax,
    /// A pause marker would have broken the program; the run continues.
    BreakpointInjection,
    /// Fault reported by the interpreter during execution.
    Runtime,
    /// Synthetic terminal error appended when a run is interrupted.
    Interrupted,
    /// Endpoint resolution or transport failure.
    Connection,
    /// A caller broke a precondition of the core.
    InvariantViolation,
    /// Supplementary information produced by a static check.
    Hint,
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

/// Position of a diagnostic or suspension inside the submitted sources.
///
/// Lines are 1-based. `file` is `None` for single-buffer runs without a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: Option<String>, line: usize) -> Self {
        Self { file, line }
    }

    pub fn line(line: usize) -> Self {
        Self { file: None, line }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.line),
            None => write!(f, "Line {}", self.line),
        }
    }
}

/// A user-facing error or hint, carried by run notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: ErrorSeverity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn syntax(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::error(ErrorKind::Syntax, message).at(location)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::Runtime, message)
    }

    pub fn interrupted() -> Self {
        Self::error(ErrorKind::Interrupted, "Execution aborted by user.")
    }

    pub fn hint(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Hint,
            severity: ErrorSeverity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == ErrorSeverity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_with_location() {
        let diag = Diagnostic::syntax("Missing semicolon", SourceLocation::line(3));
        assert_eq!(diag.to_string(), "Line 3: Missing semicolon");

        let diag = Diagnostic::runtime("x is not declared")
            .at(SourceLocation::new(Some("/lib.js".into()), 2));
        assert_eq!(diag.to_string(), "/lib.js:2: x is not declared");
    }

    #[test]
    fn test_hint_is_not_an_error() {
        assert!(!Diagnostic::hint("unused").is_error());
        assert!(Diagnostic::interrupted().is_error());
        assert_eq!(Diagnostic::interrupted().kind, ErrorKind::Interrupted);
    }

    #[test]
    fn test_diagnostic_serializes_snake_case() {
        let diag = Diagnostic::error(ErrorKind::BreakpointInjection, "bad");
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "breakpoint_injection");
        assert_eq!(json["severity"], "error");
        assert!(json.get("location").is_none());
    }
}
