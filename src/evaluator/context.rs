//! Per-workspace interpreter context.
//!
//! The context is shared between the workspace actor and the interpreter
//! thread. Every run begins by bumping the epoch; writes tagged with an older
//! epoch are dropped, so an abandoned run can never leak into a newer one.
//! Interpreters hand capabilities a context bound to their run with
//! [`Context::bound_to`], which applies the same rule to output.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::capability::{Capability, CapabilityError, CapabilityTable};
use crate::error::Diagnostic;

/// Shared interpreter context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
    /// Run this handle writes for, if any.
    run: Option<u64>,
}

struct ContextInner {
    generation: AtomicU64,
    epoch: AtomicU64,
    interrupt: AtomicBool,
    pause: AtomicBool,
    steps: AtomicU64,
    errors: Mutex<Vec<Diagnostic>>,
    output: Mutex<Vec<String>>,
    environment: Mutex<Option<Box<dyn Any + Send>>>,
    capabilities: RwLock<CapabilityTable>,
}

/// Serializable view of a context, attached to evaluation notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub generation: u64,
    pub epoch: u64,
    pub steps: u64,
    pub errors: Vec<Diagnostic>,
    pub capabilities: Vec<String>,
    pub revoked: Vec<String>,
}

impl Context {
    pub fn new(capabilities: CapabilityTable) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                interrupt: AtomicBool::new(false),
                pause: AtomicBool::new(false),
                steps: AtomicU64::new(0),
                errors: Mutex::new(Vec::new()),
                output: Mutex::new(Vec::new()),
                environment: Mutex::new(None),
                capabilities: RwLock::new(capabilities),
            }),
            run: None,
        }
    }

    /// A handle whose output and errors are dropped once run `epoch` is stale.
    pub fn bound_to(&self, epoch: u64) -> Context {
        Context {
            inner: self.inner.clone(),
            run: Some(epoch),
        }
    }

    /// The run this handle is bound to.
    pub fn bound_epoch(&self) -> Option<u64> {
        self.run
    }

    /// Number of full resets so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Identifier of the current run.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Discard everything a previous program left behind.
    ///
    /// With `keep_environment` the global bindings survive (REPL evaluation).
    pub fn reset(&self, keep_environment: bool) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.begin_run();
        if !keep_environment {
            *self.inner.environment.lock() = None;
        }
    }

    /// Start a new run segment and return its epoch.
    pub fn begin_run(&self) -> u64 {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.interrupt.store(false, Ordering::SeqCst);
        self.inner.pause.store(false, Ordering::SeqCst);
        self.inner.steps.store(0, Ordering::SeqCst);
        self.inner.errors.lock().clear();
        self.inner.output.lock().clear();
        epoch
    }

    pub fn request_interrupt(&self) {
        self.inner.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn interrupt_requested(&self) -> bool {
        self.inner.interrupt.load(Ordering::SeqCst)
    }

    pub fn request_pause(&self) {
        self.inner.pause.store(true, Ordering::SeqCst);
    }

    /// Consume a pending pause request.
    pub fn take_pause_request(&self) -> bool {
        self.inner.pause.swap(false, Ordering::SeqCst)
    }

    pub fn add_steps(&self, steps: u64) {
        self.inner.steps.fetch_add(steps, Ordering::Relaxed);
    }

    pub fn steps(&self) -> u64 {
        self.inner.steps.load(Ordering::Relaxed)
    }

    pub fn push_error(&self, diagnostic: Diagnostic) {
        match self.run {
            Some(epoch) => {
                self.push_error_for(epoch, diagnostic);
            }
            None => self.inner.errors.lock().push(diagnostic),
        }
    }

    /// Record an error on behalf of run `epoch`. Returns false if that run is stale.
    pub fn push_error_for(&self, epoch: u64, diagnostic: Diagnostic) -> bool {
        let mut errors = self.inner.errors.lock();
        if !self.is_current(epoch) {
            return false;
        }
        errors.push(diagnostic);
        true
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.inner.errors.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.inner.errors.lock().is_empty()
    }

    pub fn push_output(&self, text: impl Into<String>) {
        match self.run {
            Some(epoch) => {
                self.push_output_for(epoch, text);
            }
            None => self.inner.output.lock().push(text.into()),
        }
    }

    /// Record output on behalf of run `epoch`. Returns false if that run is stale.
    pub fn push_output_for(&self, epoch: u64, text: impl Into<String>) -> bool {
        let mut output = self.inner.output.lock();
        if !self.is_current(epoch) {
            return false;
        }
        output.push(text.into());
        true
    }

    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.output.lock())
    }

    /// Clone the evaluator-owned environment, or a fresh default one.
    pub fn load_environment<E>(&self) -> E
    where
        E: Any + Send + Clone + Default,
    {
        self.inner
            .environment
            .lock()
            .as_ref()
            .and_then(|env| env.downcast_ref::<E>())
            .cloned()
            .unwrap_or_default()
    }

    /// Store the environment left by run `epoch`. Returns false if that run is stale.
    pub fn store_environment_for<E>(&self, epoch: u64, environment: E) -> bool
    where
        E: Any + Send,
    {
        let mut slot = self.inner.environment.lock();
        if !self.is_current(epoch) {
            return false;
        }
        *slot = Some(Box::new(environment));
        true
    }

    pub fn capabilities(&self) -> CapabilityTable {
        self.inner.capabilities.read().clone()
    }

    pub fn set_capabilities(&self, table: CapabilityTable) {
        *self.inner.capabilities.write() = table;
    }

    pub fn revoke(&self, names: BTreeSet<String>) {
        self.inner.capabilities.write().revoke(names);
    }

    /// Look up a callable capability. The lock is released before the call.
    pub fn capability(&self, name: &str) -> Result<Capability, CapabilityError> {
        self.inner.capabilities.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let capabilities = self.inner.capabilities.read();
        ContextSnapshot {
            generation: self.generation(),
            epoch: self.epoch(),
            steps: self.steps(),
            errors: self.errors(),
            capabilities: capabilities.visible().map(|c| c.name().to_string()).collect(),
            revoked: capabilities.revoked().iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("generation", &self.generation())
            .field("epoch", &self.epoch())
            .field("run", &self.run)
            .field("errors", &self.inner.errors.lock().len())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(CapabilityTable::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_writes_are_dropped() {
        let ctx = Context::default();
        let old = ctx.begin_run();
        let new = ctx.begin_run();
        assert!(!ctx.push_error_for(old, Diagnostic::runtime("late")));
        assert!(!ctx.store_environment_for(old, 1u32));
        assert!(ctx.push_error_for(new, Diagnostic::runtime("fresh")));
        assert_eq!(ctx.errors().len(), 1);
    }

    #[test]
    fn test_bound_handle_drops_output_of_stale_run() {
        let ctx = Context::default();
        let old = ctx.begin_run();
        let bound = ctx.bound_to(old);
        bound.push_output("first");
        assert_eq!(ctx.take_output(), vec!["first".to_string()]);

        let new = ctx.begin_run();
        bound.push_output("late");
        bound.push_error(Diagnostic::runtime("late"));
        assert!(!ctx.push_output_for(old, "late"));
        assert!(ctx.take_output().is_empty());
        assert!(!ctx.has_errors());

        assert!(ctx.push_output_for(new, "fresh"));
        ctx.bound_to(new).push_output("also fresh");
        assert_eq!(ctx.take_output(), vec!["fresh".to_string(), "also fresh".to_string()]);
    }

    #[test]
    fn test_begin_run_clears_run_state() {
        let ctx = Context::default();
        ctx.push_error(Diagnostic::runtime("x"));
        ctx.push_output("hello");
        ctx.request_interrupt();
        ctx.request_pause();
        ctx.begin_run();
        assert!(!ctx.has_errors());
        assert!(ctx.take_output().is_empty());
        assert!(!ctx.interrupt_requested());
        assert!(!ctx.take_pause_request());
    }

    #[test]
    fn test_reset_environment() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        assert!(ctx.store_environment_for(epoch, vec![1u8, 2]));
        ctx.reset(true);
        assert_eq!(ctx.load_environment::<Vec<u8>>(), vec![1, 2]);
        ctx.reset(false);
        assert!(ctx.load_environment::<Vec<u8>>().is_empty());
        assert_eq!(ctx.generation(), 2);
    }

    #[test]
    fn test_pause_request_consumed_once() {
        let ctx = Context::default();
        ctx.request_pause();
        assert!(ctx.take_pause_request());
        assert!(!ctx.take_pause_request());
    }

    #[test]
    fn test_snapshot_lists_revocations() {
        let ctx = Context::default();
        ctx.revoke(["display".to_string()].into_iter().collect());
        let snapshot = ctx.snapshot();
        assert!(snapshot.revoked.contains(&"display".to_string()));
        assert!(!snapshot.capabilities.contains(&"display".to_string()));
    }
}
