//! The evaluator boundary.
//!
//! The coordinator never interprets programs itself. It hands source files,
//! a [`Context`] and [`ExecutionOptions`] to an [`Evaluator`] and receives an
//! [`Outcome`]. A suspended or backtrackable run comes back as an opaque
//! [`SuspendedHandle`] that only the same evaluator can resume.

pub mod capability;
pub mod context;
pub mod reference;
pub mod value;

use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Diagnostic, SourceLocation};

pub use capability::{Capability, CapabilityError, CapabilityTable, HostFunction};
pub use context::{Context, ContextSnapshot};
pub use reference::ReferenceEvaluator;
pub use value::Value;

/// Source files keyed by path.
pub type SourceFiles = BTreeMap<String, String>;

/// Interpretation mode requested from the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    #[default]
    Standard,
    Lazy,
    NonDeterministic,
}

/// Budgets handed to the evaluator for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionOptions {
    pub mode: EvalMode,
    pub step_limit: u64,
    pub timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            mode: EvalMode::Standard,
            step_limit: 1_000_000,
            timeout: Duration::from_millis(1000),
        }
    }
}

/// Opaque continuation of a suspended run.
pub struct SuspendedHandle {
    location: Option<SourceLocation>,
    state: Box<dyn Any + Send>,
}

impl SuspendedHandle {
    pub fn new<S: Any + Send>(location: Option<SourceLocation>, state: S) -> Self {
        Self {
            location,
            state: Box::new(state),
        }
    }

    /// Where the run stopped. `None` for backtrack points.
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Recover the evaluator-specific state.
    pub fn downcast<S: Any>(self) -> Option<S> {
        self.state.downcast::<S>().ok().map(|state| *state)
    }
}

impl std::fmt::Debug for SuspendedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedHandle")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Result of one evaluator call.
#[derive(Debug)]
pub enum Outcome {
    /// The program ran to completion. `continuation` is set when the search
    /// can be resumed for another value.
    Finished {
        value: Value,
        continuation: Option<SuspendedHandle>,
    },
    /// The program hit a pause marker or an external pause request.
    Suspended { handle: SuspendedHandle },
    /// The program failed; diagnostics are in the context.
    Error,
}

impl Outcome {
    pub fn finished(value: Value) -> Self {
        Outcome::Finished {
            value,
            continuation: None,
        }
    }
}

/// Program compiled for the wasm sandbox or a remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub entrypoint: String,
    pub bytes: Vec<u8>,
}

/// Interpreter interface used by the coordinator.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Statement that suspends the program when executed.
    fn pause_marker(&self) -> &str {
        "debugger;"
    }

    /// Syntax errors in `text`, empty when it parses.
    fn parse(&self, text: &str) -> Vec<Diagnostic>;

    /// Static hints for a program that failed at runtime.
    fn check(&self, text: &str, context: &Context) -> Vec<Diagnostic> {
        let _ = (text, context);
        Vec::new()
    }

    async fn run_files(
        &self,
        files: SourceFiles,
        entrypoint: String,
        context: Context,
        options: ExecutionOptions,
    ) -> Outcome;

    /// Continue a suspended run or ask a finished search for its next value.
    async fn resume(
        &self,
        handle: SuspendedHandle,
        context: Context,
        options: ExecutionOptions,
    ) -> Outcome;

    fn interrupt(&self, context: &Context) {
        context.request_interrupt();
    }

    /// Ask the in-flight run to suspend at its next statement. Returns false
    /// when this evaluator cannot suspend on request.
    fn request_pause(&self, context: &Context) -> bool {
        let _ = context;
        false
    }

    fn compile(
        &self,
        files: &SourceFiles,
        entrypoint: &str,
        context: &Context,
    ) -> Result<CompiledProgram, Vec<Diagnostic>>;
}
