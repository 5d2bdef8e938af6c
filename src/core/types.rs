use serde::{Deserialize, Serialize};

/// Identifier of an independent workspace (playground, assessment, grading...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn playground() -> Self {
        Self::new("playground")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkspaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What caused a run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Run the editor buffers from scratch.
    EditorRun,
    /// Evaluate `code` against the globals of the previous program.
    ReplRun { code: String },
    /// Continue the run suspended at a breakpoint.
    DebugResume,
    /// Run without producing an evaluation notification.
    SilentRun,
}

impl Trigger {
    /// Interactive runs additionally report a `ProgramEvaluated` notification.
    pub fn is_interactive(&self) -> bool {
        !matches!(self, Trigger::SilentRun)
    }
}

/// Where a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTarget {
    /// Evaluated in-process.
    Local,
    /// Compiled and sent to the connected device.
    Remote,
}
