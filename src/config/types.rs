use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution strategy used for a workspace's runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    #[default]
    Standard,
    NonDeterministic,
    Lazy,
    Sandboxed,
}

/// Per-workspace execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub variant: Variant,
    /// Wall-clock budget handed to the interpreter for one run.
    pub execution_timeout_ms: u64,
    /// Step budget handed to the interpreter for one run.
    pub step_limit: u64,
    /// Run every buffer under `root` instead of only the active buffer.
    pub folder_mode: bool,
    pub root: String,
    /// Entrypoint path used in folder mode. Falls back to the active buffer.
    pub entrypoint: Option<String>,
    /// Privileged setup program executed before every fresh run.
    pub prepend: Option<String>,
    /// Entrypoint text that resumes the last backtrack point (non-deterministic variant).
    pub retry_token: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Standard,
            execution_timeout_ms: 1000,
            step_limit: 1_000_000,
            folder_mode: false,
            root: "/".to_string(),
            entrypoint: None,
            prepend: None,
            retry_token: "try_again".to_string(),
        }
    }
}

impl WorkspaceConfig {
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.execution_timeout_ms = timeout_ms;
        self
    }

    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn with_prepend(mut self, prepend: impl Into<String>) -> Self {
        self.prepend = Some(prepend.into());
        self
    }

    pub fn with_folder(mut self, root: impl Into<String>, entrypoint: impl Into<String>) -> Self {
        self.folder_mode = true;
        self.root = root.into();
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

/// Coordinator-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Capacity of each workspace's command channel.
    pub command_buffer: usize,
    /// Telemetry entries older than this are dropped on every update.
    pub telemetry_staleness_ms: u64,
    /// Named workspace presets, looked up by workspace id on open.
    pub workspaces: BTreeMap<String, WorkspaceConfig>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            telemetry_staleness_ms: 3000,
            workspaces: BTreeMap::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn telemetry_staleness(&self) -> Duration {
        Duration::from_millis(self.telemetry_staleness_ms)
    }

    /// Preset for `workspace`, or the defaults.
    pub fn workspace(&self, workspace: &str) -> WorkspaceConfig {
        self.workspaces.get(workspace).cloned().unwrap_or_default()
    }
}
