//! WebAssembly sandbox for the `Sandboxed` variant.
//!
//! Programs compiled by the evaluator run under wasmtime with fuel metering
//! and a memory cap. Host imports are built from the context's capabilities.

pub mod error;
pub mod wasm_sandbox;

pub use error::SandboxError;
pub use wasm_sandbox::{WasmSandbox, WasmSandboxConfig};
