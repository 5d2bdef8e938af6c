/// Sandbox errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Code too large (max {max} bytes, got {actual} bytes)")]
    CodeTooLarge { max: usize, actual: usize },

    #[error("Compilation error: {0}")]
    CompilationError(String),

    #[error("Capability not available in the sandbox: {0}")]
    InstantiationError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Potential infinite loop: exceeded the step limit of {0} steps.")]
    StepLimitExceeded(u64),

    #[error("Memory limit exceeded")]
    MemoryLimitExceeded,

    #[error("Execution interrupted")]
    Interrupted,

    #[error("Execution timeout")]
    ExecutionTimeout,

    #[error("Internal error: {0}")]
    InternalError(String),
}
