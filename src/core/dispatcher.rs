//! Variant dispatch: turns a run request into a pending evaluator call.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::registry::SuspendedRunRegistry;
use super::types::{Trigger, WorkspaceId};
use crate::config::Variant;
use crate::error::{Diagnostic, ExecError};
use crate::evaluator::{
    Context, EvalMode, Evaluator, ExecutionOptions, Outcome, SourceFiles, Value,
};
use crate::sandbox::{SandboxError, WasmSandbox};

/// Evaluator call in flight. Raced against interrupt and pause requests.
pub type PendingCall = BoxFuture<'static, Outcome>;

/// How a run request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPlan {
    /// Start the program from scratch.
    Fresh,
    /// Continue the run suspended at a breakpoint.
    ResumeSuspended,
    /// Ask the last finished search for its next value.
    Backtrack,
}

impl DispatchPlan {
    /// `entry_code` is the entrypoint text (or REPL input) of the request.
    pub fn for_request(
        trigger: &Trigger,
        variant: Variant,
        entry_code: &str,
        retry_token: &str,
        explicit_retry: bool,
    ) -> Self {
        match trigger {
            Trigger::DebugResume => DispatchPlan::ResumeSuspended,
            _ if variant == Variant::NonDeterministic
                && (explicit_retry || entry_code.trim() == retry_token) =>
            {
                DispatchPlan::Backtrack
            }
            _ => DispatchPlan::Fresh,
        }
    }

    pub fn is_fresh(self) -> bool {
        self == DispatchPlan::Fresh
    }
}

/// Everything a fresh call needs.
pub struct RunRequest {
    pub workspace: WorkspaceId,
    pub variant: Variant,
    pub files: SourceFiles,
    pub entrypoint: String,
    pub context: Context,
    pub options: ExecutionOptions,
}

/// Picks the evaluator entry point for a workspace variant.
#[derive(Clone)]
pub struct VariantDispatcher {
    evaluator: Arc<dyn Evaluator>,
    sandbox: Arc<WasmSandbox>,
    registry: SuspendedRunRegistry,
}

impl VariantDispatcher {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        sandbox: Arc<WasmSandbox>,
        registry: SuspendedRunRegistry,
    ) -> Self {
        Self {
            evaluator,
            sandbox,
            registry,
        }
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    /// Start the call for `plan`.
    ///
    /// Resume and backtrack take the workspace's suspended run; with nothing
    /// stored they fail with [`ExecError::InvariantViolation`] and leave the
    /// context untouched.
    pub fn dispatch(&self, plan: DispatchPlan, request: RunRequest) -> Result<PendingCall, ExecError> {
        let mut options = request.options;
        options.mode = eval_mode(request.variant);

        match plan {
            DispatchPlan::ResumeSuspended | DispatchPlan::Backtrack => {
                let Some(run) = self.registry.take(&request.workspace) else {
                    let message = match plan {
                        DispatchPlan::Backtrack => "retry requested with no backtrack point",
                        _ => "resume requested with no suspended run",
                    };
                    tracing::error!(workspace = %request.workspace, ?plan, "{}", message);
                    return Err(ExecError::InvariantViolation(message.to_string()));
                };
                run.context.begin_run();
                tracing::debug!(workspace = %request.workspace, ?plan, "resuming suspended run");
                let evaluator = self.evaluator.clone();
                let call = async move { evaluator.resume(run.handle, run.context, options).await };
                Ok(normalize(request.variant, call.boxed()))
            }
            DispatchPlan::Fresh if request.variant == Variant::Sandboxed => Ok(self.sandboxed(request, options)),
            DispatchPlan::Fresh => {
                let evaluator = self.evaluator.clone();
                let RunRequest {
                    files,
                    entrypoint,
                    context,
                    variant,
                    ..
                } = request;
                let call = async move { evaluator.run_files(files, entrypoint, context, options).await };
                Ok(normalize(variant, call.boxed()))
            }
        }
    }

    fn sandboxed(&self, request: RunRequest, options: ExecutionOptions) -> PendingCall {
        let context = request.context;
        let epoch = context.epoch();

        if request.files.len() > 1 {
            context.push_error_for(
                epoch,
                Diagnostic::runtime("The sandboxed variant runs a single file; multi-file programs are not supported."),
            );
            return futures::future::ready(Outcome::Error).boxed();
        }

        let program = match self.evaluator.compile(&request.files, &request.entrypoint, &context) {
            Ok(program) => program,
            Err(errors) => {
                for error in errors {
                    context.push_error_for(epoch, error);
                }
                return futures::future::ready(Outcome::Error).boxed();
            }
        };

        let sandbox = self.sandbox.clone();
        async move {
            match sandbox.execute(&program, &context, &options).await {
                Ok(value) => Outcome::finished(value),
                Err(e) => {
                    tracing::debug!(error = %e, "sandboxed run failed");
                    context.push_error_for(epoch, sandbox_diagnostic(&e));
                    Outcome::Error
                }
            }
        }
        .boxed()
    }
}

fn eval_mode(variant: Variant) -> EvalMode {
    match variant {
        Variant::NonDeterministic => EvalMode::NonDeterministic,
        Variant::Lazy => EvalMode::Lazy,
        Variant::Standard | Variant::Sandboxed => EvalMode::Standard,
    }
}

/// A search that ended in `cut()` reports no value.
fn normalize(variant: Variant, call: PendingCall) -> PendingCall {
    if variant != Variant::NonDeterministic {
        return call;
    }
    call.map(|outcome| match outcome {
        Outcome::Finished {
            value: Value::Cut,
            continuation,
        } => Outcome::Finished {
            value: Value::Unit,
            continuation,
        },
        other => other,
    })
    .boxed()
}

fn sandbox_diagnostic(error: &SandboxError) -> Diagnostic {
    match error {
        SandboxError::StepLimitExceeded(_)
        | SandboxError::ExecutionTimeout
        | SandboxError::InstantiationError(_) => Diagnostic::runtime(error.to_string()),
        SandboxError::ExecutionError(message) => Diagnostic::runtime(message.clone()),
        SandboxError::Interrupted => Diagnostic::interrupted(),
        _ => Diagnostic::runtime(format!("Sandbox failure: {}", error)),
    }
}
