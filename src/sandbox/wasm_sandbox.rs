//! WASM sandbox implementation using wasmtime.
//!
//! ABI: the module exports `main() -> i64`. Each visible capability of the
//! context is offered as an `env` import taking `i64` arguments and returning
//! an `i64`.
//!
//! Execution is bounded three ways: fuel (the step limit), a memory cap, and
//! epoch interruption. A ticker task advances the engine epoch while a module
//! runs; on every tick the store checks the run's context and stops the
//! module once the run was interrupted, superseded or out of time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::{
    Engine, FuncType, Linker, Module, Store, StoreLimitsBuilder, Trap, UpdateDeadline, Val, ValType,
};

use super::error::SandboxError;
use crate::evaluator::{CompiledProgram, Context, ExecutionOptions, Value};

/// WASM sandbox configuration
#[derive(Clone, Debug)]
pub struct WasmSandboxConfig {
    /// Max wasm binary size (bytes)
    pub max_wasm_size: usize,
    /// Max linear memory pages (64KB per page)
    pub max_memory_pages: u32,
    /// Meter instructions against the run's step limit
    pub enable_fuel: bool,
}

impl Default for WasmSandboxConfig {
    fn default() -> Self {
        Self {
            max_wasm_size: 5 * 1024 * 1024,
            max_memory_pages: 256,
            enable_fuel: true,
        }
    }
}

/// How often a running module checks whether it should stop.
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Slack on the outer wall-clock guard, past the in-store deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

struct WasmStoreState {
    limits: wasmtime::StoreLimits,
    context: Context,
}

/// WASM sandbox implementation
pub struct WasmSandbox {
    engine: Engine,
    config: WasmSandboxConfig,
}

impl Default for WasmSandbox {
    fn default() -> Self {
        Self::new(WasmSandboxConfig::default())
    }
}

impl WasmSandbox {
    pub fn new(config: WasmSandboxConfig) -> Self {
        let engine = build_engine(&config).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default wasm engine");
            Engine::default()
        });
        Self { engine, config }
    }

    fn validate_wasm_bytes(&self, bytes: &[u8]) -> Result<(), SandboxError> {
        if bytes.len() > self.config.max_wasm_size {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_wasm_size,
                actual: bytes.len(),
            });
        }
        if bytes.len() < 4 || !bytes.starts_with(b"\0asm") {
            return Err(SandboxError::CompilationError(
                "Invalid WASM magic header".into(),
            ));
        }
        Ok(())
    }

    /// Run `program` on a blocking thread until it returns, traps, or its
    /// run is interrupted or superseded.
    pub async fn execute(
        &self,
        program: &CompiledProgram,
        context: &Context,
        options: &ExecutionOptions,
    ) -> Result<Value, SandboxError> {
        self.validate_wasm_bytes(&program.bytes)?;

        let bytes = program.bytes.clone();
        let config = self.config.clone();
        let engine = self.engine.clone();
        let epoch = context.bound_epoch().unwrap_or_else(|| context.epoch());
        let context = context.bound_to(epoch);
        let step_limit = options.step_limit;
        let timeout = if options.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            options.timeout
        };

        let running = Arc::new(AtomicBool::new(true));
        spawn_epoch_ticker(engine.clone(), running.clone());

        let handle = tokio::task::spawn_blocking(move || {
            let _running = RunningGuard(running);
            let deadline = Instant::now() + timeout;
            let module = Module::new(&engine, &bytes)
                .map_err(|e| SandboxError::CompilationError(e.to_string()))?;

            let linker = build_linker(&engine, &context)?;

            let limits = StoreLimitsBuilder::new()
                .memory_size(config.max_memory_pages as usize * 64 * 1024)
                .build();
            let mut store = Store::new(
                &engine,
                WasmStoreState {
                    limits,
                    context: context.clone(),
                },
            );
            store.limiter(|state| &mut state.limits);

            let watched = context.clone();
            store.set_epoch_deadline(1);
            store.epoch_deadline_callback(move |_| {
                if must_stop(&watched, epoch, deadline) {
                    return Err(Trap::Interrupt.into());
                }
                Ok(UpdateDeadline::Continue(1))
            });

            if config.enable_fuel {
                store
                    .set_fuel(step_limit)
                    .map_err(|e| SandboxError::InternalError(e.to_string()))?;
            }

            let instance = linker
                .instantiate(&mut store, &module)
                .map_err(|e| SandboxError::InstantiationError(e.to_string()))?;

            let main = instance
                .get_typed_func::<(), i64>(&mut store, "main")
                .map_err(|_| SandboxError::ExecutionError("Missing export: main".into()))?;

            let result = main
                .call(&mut store, ())
                .map_err(|e| {
                    if context.interrupt_requested() || !context.is_current(epoch) {
                        SandboxError::Interrupted
                    } else if Instant::now() >= deadline {
                        SandboxError::ExecutionTimeout
                    } else {
                        map_wasm_error(&e, step_limit)
                    }
                })?;

            if config.enable_fuel {
                if let Ok(remaining) = store.get_fuel() {
                    context.add_steps(step_limit.saturating_sub(remaining));
                }
            }
            Ok(Value::Int(result))
        });

        match tokio::time::timeout(timeout + DEADLINE_GRACE, handle).await {
            Ok(join_result) => match join_result {
                Ok(res) => res,
                Err(e) => Err(SandboxError::ExecutionError(e.to_string())),
            },
            Err(_) => Err(SandboxError::ExecutionTimeout),
        }
    }
}

/// Clears the running flag when the blocking job ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Advance the engine epoch until the job owning `running` has returned.
///
/// The ticker does not depend on the caller's future, so a module whose
/// caller was dropped still reaches its next deadline check.
fn spawn_epoch_ticker(engine: Engine, running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EPOCH_TICK);
        while running.load(Ordering::SeqCst) {
            interval.tick().await;
            engine.increment_epoch();
        }
    });
}

fn must_stop(context: &Context, epoch: u64, deadline: Instant) -> bool {
    context.interrupt_requested() || !context.is_current(epoch) || Instant::now() >= deadline
}

fn build_engine(config: &WasmSandboxConfig) -> Result<Engine, SandboxError> {
    let mut cfg = wasmtime::Config::new();
    cfg.epoch_interruption(true);
    if config.enable_fuel {
        cfg.consume_fuel(true);
    }
    Engine::new(&cfg).map_err(|e| SandboxError::InternalError(e.to_string()))
}

/// Offer every visible capability as an `env` import.
fn build_linker(engine: &Engine, context: &Context) -> Result<Linker<WasmStoreState>, SandboxError> {
    let mut linker: Linker<WasmStoreState> = Linker::new(engine);
    for capability in context.capabilities().visible() {
        let capability = capability.clone();
        let ty = FuncType::new(
            engine,
            std::iter::repeat(ValType::I64).take(capability.arity()),
            [ValType::I64],
        );
        let name = capability.name().to_string();
        linker
            .func_new("env", &name, ty, move |caller, params, results| {
                let ctx = caller.data().context.clone();
                let args: Vec<Value> = params
                    .iter()
                    .map(|p| Value::Int(p.i64().unwrap_or_default()))
                    .collect();
                let value = capability
                    .call(&ctx, &args)
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                results[0] = Val::I64(value.to_wasm_int());
                Ok(())
            })
            .map_err(|e| SandboxError::InternalError(e.to_string()))?;
    }
    Ok(linker)
}

fn map_wasm_error(err: &anyhow::Error, step_limit: u64) -> SandboxError {
    if let Some(trap) = err.downcast_ref::<Trap>() {
        return match trap {
            Trap::OutOfFuel => SandboxError::StepLimitExceeded(step_limit),
            Trap::IntegerDivisionByZero => SandboxError::ExecutionError("Division by zero.".into()),
            Trap::IntegerOverflow => SandboxError::ExecutionError("Integer overflow.".into()),
            other => SandboxError::ExecutionError(other.to_string()),
        };
    }
    let msg = err.root_cause().to_string();
    if msg.to_lowercase().contains("memory") {
        SandboxError::MemoryLimitExceeded
    } else {
        SandboxError::ExecutionError(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Capability, CapabilityTable};

    fn program(wat: &str) -> CompiledProgram {
        CompiledProgram {
            entrypoint: "main".into(),
            bytes: wat::parse_str(wat).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_wasm_sandbox_basic() {
        let sandbox = WasmSandbox::default();
        let result = sandbox
            .execute(
                &program(r#"(module (func (export "main") (result i64) (i64.const 42)))"#),
                &Context::default(),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[tokio::test]
    async fn test_wasm_sandbox_calls_capability() {
        let sandbox = WasmSandbox::default();
        let ctx = Context::default();
        let wat = r#"(module
    (import "env" "display" (func $display (param i64) (result i64)))
    (func (export "main") (result i64)
        (call $display (i64.const 7))))"#;
        let result = sandbox
            .execute(&program(wat), &ctx, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(result, Value::Int(7));
        assert_eq!(ctx.take_output(), vec!["7".to_string()]);
    }

    #[tokio::test]
    async fn test_wasm_sandbox_revoked_capability_not_importable() {
        let sandbox = WasmSandbox::default();
        let ctx = Context::new(
            CapabilityTable::standard().with(Capability::new("motor", 1, |_, a| Ok(a[0].clone()))),
        );
        ctx.revoke(["motor".to_string()].into_iter().collect());
        let wat = r#"(module
    (import "env" "motor" (func $motor (param i64) (result i64)))
    (func (export "main") (result i64) (call $motor (i64.const 1))))"#;
        let result = sandbox
            .execute(&program(wat), &ctx, &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(SandboxError::InstantiationError(_))));
    }

    #[cfg_attr(target_os = "windows", ignore)]
    #[tokio::test]
    async fn test_wasm_sandbox_fuel_limit() {
        let sandbox = WasmSandbox::default();
        let wat = r#"(module
    (func (export "main") (result i64)
        (loop $loop (br $loop))
        (i64.const 0)))"#;
        let options = ExecutionOptions {
            step_limit: 10_000,
            ..ExecutionOptions::default()
        };
        let result = sandbox.execute(&program(wat), &Context::default(), &options).await;
        assert!(matches!(result, Err(SandboxError::StepLimitExceeded(10_000))));
    }

    #[tokio::test]
    async fn test_wasm_sandbox_memory_limit() {
        let sandbox = WasmSandbox::new(WasmSandboxConfig {
            max_memory_pages: 1,
            ..WasmSandboxConfig::default()
        });
        let wat = r#"(module
    (memory (export "memory") 1)
    (func (export "main") (result i64)
        (i64.extend_i32_s (memory.grow (i32.const 1000)))))"#;
        let result = sandbox
            .execute(&program(wat), &Context::default(), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(result, Value::Int(-1));
    }

    const SPIN_WITH_OUTPUT: &str = r#"(module
    (import "env" "display" (func $display (param i64) (result i64)))
    (func (export "main") (result i64)
        (local $i i64)
        (loop $loop
            (drop (call $display (local.get $i)))
            (local.set $i (i64.add (local.get $i) (i64.const 1)))
            (br $loop))
        (i64.const 0)))"#;

    fn unbounded() -> ExecutionOptions {
        ExecutionOptions {
            step_limit: 1 << 40,
            timeout: Duration::from_secs(60),
            ..ExecutionOptions::default()
        }
    }

    #[tokio::test]
    async fn test_wasm_sandbox_stops_on_interrupt() {
        let sandbox = Arc::new(WasmSandbox::default());
        let ctx = Context::default();
        ctx.begin_run();

        let task = {
            let sandbox = sandbox.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { sandbox.execute(&program(SPIN_WITH_OUTPUT), &ctx, &unbounded()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.request_interrupt();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("module kept running after interrupt")
            .unwrap();
        assert!(matches!(result, Err(SandboxError::Interrupted)));
    }

    #[tokio::test]
    async fn test_wasm_sandbox_abandoned_run_stops_and_stays_silent() {
        let sandbox = Arc::new(WasmSandbox::default());
        let ctx = Context::default();
        ctx.begin_run();

        let task = {
            let sandbox = sandbox.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { sandbox.execute(&program(SPIN_WITH_OUTPUT), &ctx, &unbounded()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A newer run starts without the old one ever being polled again.
        ctx.begin_run();
        ctx.take_output();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("superseded module kept running")
            .unwrap();
        assert!(matches!(result, Err(SandboxError::Interrupted)));
        assert!(ctx.take_output().is_empty());
    }

    #[tokio::test]
    async fn test_wasm_sandbox_wall_clock_deadline() {
        let sandbox = WasmSandbox::default();
        let options = ExecutionOptions {
            step_limit: 1 << 40,
            timeout: Duration::from_millis(100),
            ..ExecutionOptions::default()
        };
        let wat = r#"(module
    (func (export "main") (result i64)
        (loop $loop (br $loop))
        (i64.const 0)))"#;
        let result = sandbox.execute(&program(wat), &Context::default(), &options).await;
        assert!(matches!(result, Err(SandboxError::ExecutionTimeout)));
    }

    #[tokio::test]
    async fn test_wasm_sandbox_division_by_zero() {
        let sandbox = WasmSandbox::default();
        let wat = r#"(module
    (func (export "main") (result i64)
        (i64.div_s (i64.const 1) (i64.const 0))))"#;
        let err = sandbox
            .execute(&program(wat), &Context::default(), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Execution error: Division by zero.");
    }

    #[tokio::test]
    async fn test_wasm_sandbox_invalid_wasm() {
        let sandbox = WasmSandbox::default();
        let bad = CompiledProgram {
            entrypoint: "main".into(),
            bytes: vec![0, 0, 0, 0],
        };
        let result = sandbox
            .execute(&bad, &Context::default(), &ExecutionOptions::default())
            .await;
        assert!(matches!(result, Err(SandboxError::CompilationError(_))));
    }

    #[tokio::test]
    async fn test_wasm_sandbox_missing_export() {
        let sandbox = WasmSandbox::default();
        let result = sandbox
            .execute(
                &program(r#"(module (memory (export "memory") 1))"#),
                &Context::default(),
                &ExecutionOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
