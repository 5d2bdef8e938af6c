//! Step machine for the reference language.
//!
//! Each file is lowered to a flat instruction list. The machine state is a
//! stack of (file, pc) frames plus the global environment, so a paused run or
//! a backtrack point is just a clone of the machine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::syntax::{BinOp, Expr, Program, Stmt, StmtKind, UnOp};
use crate::error::{Diagnostic, SourceLocation};
use crate::evaluator::{Context, EvalMode, ExecutionOptions, Outcome, SuspendedHandle, Value};

#[derive(Debug, Clone)]
pub(crate) enum Instr {
    Let(String, Expr),
    Assign(String, Expr),
    Eval(Expr),
    JumpUnless(Expr, usize),
    Jump(usize),
    Pause,
    Import(String),
    Require(Expr),
    Choose {
        name: String,
        declare: bool,
        alternatives: Vec<Expr>,
    },
}

/// Lowered instructions of one file, tagged with their source line.
pub(crate) type Code = Arc<Vec<(Instr, usize)>>;

pub(crate) fn lower(program: &Program) -> Code {
    let mut out = Vec::new();
    lower_block(&program.stmts, &mut out);
    Arc::new(out)
}

fn lower_block(stmts: &[Stmt], out: &mut Vec<(Instr, usize)>) {
    for stmt in stmts {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Let(name, expr) => out.push((Instr::Let(name.clone(), expr.clone()), line)),
            StmtKind::Assign(name, expr) => {
                out.push((Instr::Assign(name.clone(), expr.clone()), line))
            }
            StmtKind::Expr(expr) => out.push((Instr::Eval(expr.clone()), line)),
            StmtKind::Debugger => out.push((Instr::Pause, line)),
            StmtKind::Import(path) => out.push((Instr::Import(path.clone()), line)),
            StmtKind::Require(expr) => out.push((Instr::Require(expr.clone()), line)),
            StmtKind::Choose {
                name,
                declare,
                alternatives,
            } => out.push((
                Instr::Choose {
                    name: name.clone(),
                    declare: *declare,
                    alternatives: alternatives.clone(),
                },
                line,
            )),
            StmtKind::While(cond, body) => {
                let start = out.len();
                out.push((Instr::JumpUnless(cond.clone(), 0), line));
                lower_block(body, out);
                out.push((Instr::Jump(start), line));
                let end = out.len();
                patch(out, start, end);
            }
            StmtKind::If(cond, then, otherwise) => {
                let branch = out.len();
                out.push((Instr::JumpUnless(cond.clone(), 0), line));
                lower_block(then, out);
                if otherwise.is_empty() {
                    let end = out.len();
                    patch(out, branch, end);
                } else {
                    let skip = out.len();
                    out.push((Instr::Jump(0), line));
                    let alt = out.len();
                    patch(out, branch, alt);
                    lower_block(otherwise, out);
                    let end = out.len();
                    patch(out, skip, end);
                }
            }
        }
    }
}

fn patch(out: &mut [(Instr, usize)], at: usize, target: usize) {
    if let Some((Instr::JumpUnless(_, t) | Instr::Jump(t), _)) = out.get_mut(at) {
        *t = target;
    }
}

/// Global bindings of a program.
#[derive(Debug, Clone, Default)]
pub(crate) struct Environment {
    bindings: BTreeMap<String, Binding>,
}

#[derive(Debug, Clone)]
enum Binding {
    Value(Value),
    Deferred(Expr),
    Forcing,
}

impl Environment {
    pub(crate) fn names(&self) -> impl Iterator<Item = &String> {
        self.bindings.keys()
    }

    fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_string(), Binding::Value(value));
    }
}

#[derive(Debug, Clone)]
struct Frame {
    file: String,
    pc: usize,
}

#[derive(Debug, Clone)]
struct ChoicePoint {
    frames: Vec<Frame>,
    loaded: BTreeSet<String>,
    env: Environment,
    last: Value,
    name: String,
    remaining: Vec<Expr>,
    location: SourceLocation,
}

enum Fault {
    Runtime(Diagnostic),
    /// A `require` did not hold.
    Fail,
    /// Interrupted, or the run was superseded.
    Stopped,
}

impl Fault {
    fn runtime(message: impl Into<String>) -> Self {
        Fault::Runtime(Diagnostic::runtime(message))
    }

    fn at(self, location: SourceLocation) -> Self {
        match self {
            Fault::Runtime(diag) if diag.location.is_none() => Fault::Runtime(diag.at(location)),
            other => other,
        }
    }
}

enum Step {
    Continue,
    Pause(SourceLocation),
    Done,
}

enum Exit {
    Finished,
    Suspended(SourceLocation),
    Failed(Diagnostic),
    Stopped,
}

struct Budget {
    epoch: u64,
    steps: u64,
    limit: u64,
    started: Instant,
    timeout: Duration,
}

impl Budget {
    fn new(options: &ExecutionOptions, epoch: u64) -> Self {
        Self {
            epoch,
            steps: 0,
            limit: options.step_limit,
            started: Instant::now(),
            timeout: options.timeout,
        }
    }

    fn tick(&mut self, ctx: &Context) -> Result<(), Fault> {
        self.steps += 1;
        if ctx.interrupt_requested() || !ctx.is_current(self.epoch) {
            return Err(Fault::Stopped);
        }
        if self.steps > self.limit {
            return Err(Fault::runtime(format!(
                "Potential infinite loop: exceeded the step limit of {} steps.",
                self.limit
            )));
        }
        if self.steps % 256 == 0 && self.started.elapsed() > self.timeout {
            return Err(Fault::runtime(format!(
                "Potential infinite loop: exceeded the time limit of {}ms.",
                self.timeout.as_millis()
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct Machine {
    mode: EvalMode,
    modules: Arc<BTreeMap<String, Code>>,
    frames: Vec<Frame>,
    loaded: BTreeSet<String>,
    env: Environment,
    last: Value,
    choices: Vec<ChoicePoint>,
    backtrack_on_resume: bool,
}

impl Machine {
    pub(crate) fn new(
        mode: EvalMode,
        modules: BTreeMap<String, Code>,
        entrypoint: &str,
        env: Environment,
    ) -> Self {
        Self {
            mode,
            modules: Arc::new(modules),
            frames: vec![Frame {
                file: entrypoint.to_string(),
                pc: 0,
            }],
            loaded: std::iter::once(entrypoint.to_string()).collect(),
            env,
            last: Value::Unit,
            choices: Vec::new(),
            backtrack_on_resume: false,
        }
    }

    fn location(&self, file: &str, line: usize) -> SourceLocation {
        let file = (self.modules.len() > 1).then(|| file.to_string());
        SourceLocation::new(file, line)
    }

    pub(crate) fn run(self, ctx: &Context, options: &ExecutionOptions, epoch: u64) -> Outcome {
        let mut budget = Budget::new(options, epoch);
        self.drive(ctx, &mut budget)
    }

    pub(crate) fn resume(mut self, ctx: &Context, options: &ExecutionOptions, epoch: u64) -> Outcome {
        let mut budget = Budget::new(options, epoch);
        if self.backtrack_on_resume {
            self.backtrack_on_resume = false;
            if let Err(fault) = self.backtrack(ctx, &mut budget) {
                return self.settle(ctx, &budget, exit_for(fault));
            }
        }
        self.drive(ctx, &mut budget)
    }

    fn drive(mut self, ctx: &Context, budget: &mut Budget) -> Outcome {
        let exit = loop {
            match self.step(ctx, budget) {
                Ok(Step::Continue) => {}
                Ok(Step::Pause(location)) => break Exit::Suspended(location),
                Ok(Step::Done) => break Exit::Finished,
                Err(Fault::Fail) => {
                    if let Err(fault) = self.backtrack(ctx, budget) {
                        break exit_for(fault);
                    }
                }
                Err(fault) => break exit_for(fault),
            }
        };
        self.settle(ctx, budget, exit)
    }

    fn settle(mut self, ctx: &Context, budget: &Budget, exit: Exit) -> Outcome {
        ctx.add_steps(budget.steps);
        let epoch = budget.epoch;
        match exit {
            Exit::Stopped => Outcome::Error,
            Exit::Failed(diag) => {
                ctx.store_environment_for(epoch, self.env.clone());
                ctx.push_error_for(epoch, diag);
                Outcome::Error
            }
            Exit::Suspended(location) => {
                ctx.store_environment_for(epoch, self.env.clone());
                Outcome::Suspended {
                    handle: SuspendedHandle::new(Some(location), self),
                }
            }
            Exit::Finished => {
                ctx.store_environment_for(epoch, self.env.clone());
                let value = std::mem::take(&mut self.last);
                if self.mode == EvalMode::NonDeterministic {
                    self.backtrack_on_resume = true;
                    Outcome::Finished {
                        value,
                        continuation: Some(SuspendedHandle::new(None, self)),
                    }
                } else {
                    Outcome::finished(value)
                }
            }
        }
    }

    fn step(&mut self, ctx: &Context, budget: &mut Budget) -> Result<Step, Fault> {
        budget.tick(ctx)?;
        let Some(frame) = self.frames.last() else {
            return Ok(Step::Done);
        };
        let (file, pc) = (frame.file.clone(), frame.pc);
        let code = self
            .modules
            .get(&file)
            .cloned()
            .ok_or_else(|| Fault::runtime(format!("Module '{}' not found.", file)))?;
        let Some((instr, line)) = code.get(pc) else {
            self.frames.pop();
            return Ok(Step::Continue);
        };
        let location = self.location(&file, *line);
        if ctx.take_pause_request() {
            return Ok(Step::Pause(location));
        }
        self.jump(pc + 1);
        self.exec(instr, &location, ctx, budget)
            .map_err(|fault| fault.at(location))
    }

    fn jump(&mut self, target: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target;
        }
    }

    fn exec(
        &mut self,
        instr: &Instr,
        location: &SourceLocation,
        ctx: &Context,
        budget: &mut Budget,
    ) -> Result<Step, Fault> {
        match instr {
            Instr::Let(name, expr) => {
                let binding = if self.mode == EvalMode::Lazy {
                    Binding::Deferred(expr.clone())
                } else {
                    Binding::Value(self.eval(expr, ctx, budget)?)
                };
                self.env.bindings.insert(name.clone(), binding);
                self.last = Value::Unit;
            }
            Instr::Assign(name, expr) => {
                if !self.env.contains(name) {
                    return Err(Fault::runtime(format!("Name {} not declared.", name)));
                }
                let value = self.eval(expr, ctx, budget)?;
                self.env.set(name, value.clone());
                self.last = value;
            }
            Instr::Eval(expr) => self.last = self.eval(expr, ctx, budget)?,
            Instr::JumpUnless(cond, target) => {
                let value = self.eval(cond, ctx, budget)?;
                if !truthy(&value)? {
                    self.jump(*target);
                }
            }
            Instr::Jump(target) => self.jump(*target),
            Instr::Pause => return Ok(Step::Pause(location.clone())),
            Instr::Import(path) => {
                if !self.modules.contains_key(path) {
                    return Err(Fault::runtime(format!("Module '{}' not found.", path)));
                }
                if self.loaded.insert(path.clone()) {
                    self.frames.push(Frame {
                        file: path.clone(),
                        pc: 0,
                    });
                }
            }
            Instr::Require(cond) => {
                if self.mode != EvalMode::NonDeterministic {
                    return Err(Fault::runtime(
                        "require is only available in the non-deterministic variant.",
                    ));
                }
                let value = self.eval(cond, ctx, budget)?;
                if !truthy(&value)? {
                    return Err(Fault::Fail);
                }
            }
            Instr::Choose {
                name,
                declare,
                alternatives,
            } => {
                if self.mode != EvalMode::NonDeterministic {
                    return Err(Fault::runtime(
                        "amb is only available in the non-deterministic variant.",
                    ));
                }
                if !declare && !self.env.contains(name) {
                    return Err(Fault::runtime(format!("Name {} not declared.", name)));
                }
                let Some((first, rest)) = alternatives.split_first() else {
                    return Err(Fault::Fail);
                };
                if !rest.is_empty() {
                    self.choices.push(ChoicePoint {
                        frames: self.frames.clone(),
                        loaded: self.loaded.clone(),
                        env: self.env.clone(),
                        last: self.last.clone(),
                        name: name.clone(),
                        remaining: rest.to_vec(),
                        location: location.clone(),
                    });
                }
                let value = self.eval(first, ctx, budget)?;
                self.env.set(name, value);
                self.last = Value::Unit;
            }
        }
        Ok(Step::Continue)
    }

    /// Restore the most recent choice point with alternatives left.
    fn backtrack(&mut self, ctx: &Context, budget: &mut Budget) -> Result<(), Fault> {
        while let Some(mut point) = self.choices.pop() {
            if point.remaining.is_empty() {
                continue;
            }
            let next = point.remaining.remove(0);
            self.frames = point.frames.clone();
            self.loaded = point.loaded.clone();
            self.env = point.env.clone();
            self.last = point.last.clone();
            let name = point.name.clone();
            let location = point.location.clone();
            if !point.remaining.is_empty() {
                self.choices.push(point);
            }
            let value = self
                .eval(&next, ctx, budget)
                .map_err(|fault| fault.at(location))?;
            self.env.set(&name, value);
            self.last = Value::Unit;
            return Ok(());
        }
        Err(Fault::runtime("No more values."))
    }

    fn eval(&mut self, expr: &Expr, ctx: &Context, budget: &mut Budget) -> Result<Value, Fault> {
        budget.tick(ctx)?;
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Cut => {
                self.choices.clear();
                Ok(Value::Cut)
            }
            Expr::Name(name) => self.lookup(name, ctx, budget),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner, ctx, budget)?;
                unary(*op, value)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let lhs = self.eval(lhs, ctx, budget)?;
                if !truthy(&lhs)? {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval(rhs, ctx, budget)?;
                Ok(Value::Bool(truthy(&rhs)?))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let lhs = self.eval(lhs, ctx, budget)?;
                if truthy(&lhs)? {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval(rhs, ctx, budget)?;
                Ok(Value::Bool(truthy(&rhs)?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, ctx, budget)?;
                let rhs = self.eval(rhs, ctx, budget)?;
                binary(*op, lhs, rhs)
            }
            Expr::Call(name, args) => {
                let capability = ctx
                    .capability(name)
                    .map_err(|e| Fault::runtime(e.to_string()))?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx, budget)?);
                }
                capability
                    .call(ctx, &values)
                    .map_err(|e| Fault::runtime(e.to_string()))
            }
        }
    }

    fn lookup(&mut self, name: &str, ctx: &Context, budget: &mut Budget) -> Result<Value, Fault> {
        match self.env.bindings.get(name) {
            Some(Binding::Value(value)) => Ok(value.clone()),
            Some(Binding::Forcing) => Err(Fault::runtime(format!(
                "{} is defined in terms of itself.",
                name
            ))),
            Some(Binding::Deferred(expr)) => {
                let expr = expr.clone();
                self.env.bindings.insert(name.to_string(), Binding::Forcing);
                match self.eval(&expr, ctx, budget) {
                    Ok(value) => {
                        self.env.set(name, value.clone());
                        Ok(value)
                    }
                    Err(fault) => {
                        self.env
                            .bindings
                            .insert(name.to_string(), Binding::Deferred(expr));
                        Err(fault)
                    }
                }
            }
            None => Err(Fault::runtime(format!("Name {} not declared.", name))),
        }
    }
}

fn exit_for(fault: Fault) -> Exit {
    match fault {
        Fault::Runtime(diag) => Exit::Failed(diag),
        Fault::Fail => Exit::Failed(Diagnostic::runtime("No more values.")),
        Fault::Stopped => Exit::Stopped,
    }
}

fn truthy(value: &Value) -> Result<bool, Fault> {
    value.as_bool().ok_or_else(|| {
        Fault::runtime(format!(
            "Expected boolean as condition, got {}.",
            value.type_name()
        ))
    })
}

fn unary(op: UnOp, value: Value) -> Result<Value, Fault> {
    match (op, value) {
        (UnOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Fault::runtime("Integer overflow.")),
        (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnOp::Neg, other) => Err(Fault::runtime(format!(
            "Expected number on right hand side of operation, got {}.",
            other.type_name()
        ))),
        (UnOp::Not, other) => Err(Fault::runtime(format!(
            "Expected boolean on right hand side of operation, got {}.",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, Fault> {
    let overflow = || Fault::runtime("Integer overflow.");
    match (op, lhs, rhs) {
        (BinOp::Eq, l, r) => Ok(Value::Bool(l == r)),
        (BinOp::Ne, l, r) => Ok(Value::Bool(l != r)),
        (BinOp::Add, Value::Str(l), r) => Ok(Value::Str(format!("{}{}", l, r))),
        (BinOp::Add, l, Value::Str(r)) => Ok(Value::Str(format!("{}{}", l, r))),
        (op, Value::Int(l), Value::Int(r)) => match op {
            BinOp::Add => l.checked_add(r).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => l.checked_sub(r).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => l.checked_mul(r).map(Value::Int).ok_or_else(overflow),
            BinOp::Div | BinOp::Rem if r == 0 => Err(Fault::runtime("Division by zero.")),
            BinOp::Div => l.checked_div(r).map(Value::Int).ok_or_else(overflow),
            BinOp::Rem => l.checked_rem(r).map(Value::Int).ok_or_else(overflow),
            BinOp::Lt => Ok(Value::Bool(l < r)),
            BinOp::Le => Ok(Value::Bool(l <= r)),
            BinOp::Gt => Ok(Value::Bool(l > r)),
            BinOp::Ge => Ok(Value::Bool(l >= r)),
            BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => {
                Err(Fault::runtime("Unsupported operation."))
            }
        },
        (_, l, r) => Err(Fault::runtime(format!(
            "Expected number on both sides of operation, got {} and {}.",
            l.type_name(),
            r.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::syntax::parse;
    use super::*;

    fn machine(mode: EvalMode, source: &str) -> Machine {
        let modules = [("main".to_string(), lower(&parse(source).unwrap()))]
            .into_iter()
            .collect();
        Machine::new(mode, modules, "main", Environment::default())
    }

    fn run(mode: EvalMode, source: &str) -> (Outcome, Context) {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let outcome = machine(mode, source).run(&ctx, &ExecutionOptions::default(), epoch);
        (outcome, ctx)
    }

    fn finished_value(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Finished { value, .. } => value,
            other => panic!("expected finished, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_and_branches() {
        let source = "let i = 0;\nlet acc = 0;\nwhile (i < 5) {\n  if (i % 2 == 0) { acc = acc + i; } else { acc = acc - 1; }\n  i = i + 1;\n}\nacc;";
        let (outcome, _) = run(EvalMode::Standard, source);
        assert_eq!(finished_value(outcome), Value::Int(4));
    }

    #[test]
    fn test_debugger_suspends_and_resumes() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let outcome = machine(EvalMode::Standard, "let x = 1;\ndebugger;\nx + 1;")
            .run(&ctx, &ExecutionOptions::default(), epoch);
        let handle = match outcome {
            Outcome::Suspended { handle } => handle,
            other => panic!("expected suspension, got {:?}", other),
        };
        assert_eq!(handle.location(), Some(&SourceLocation::line(2)));
        let machine = handle.downcast::<Machine>().unwrap();
        let epoch = ctx.begin_run();
        let outcome = machine.resume(&ctx, &ExecutionOptions::default(), epoch);
        assert_eq!(finished_value(outcome), Value::Int(2));
    }

    #[test]
    fn test_runtime_error_located() {
        let (outcome, ctx) = run(EvalMode::Standard, "let x = 1;\ny + 1;");
        assert!(matches!(outcome, Outcome::Error));
        let errors = ctx.errors();
        assert_eq!(errors[0].message, "Name y not declared.");
        assert_eq!(errors[0].location, Some(SourceLocation::line(2)));
    }

    #[test]
    fn test_step_limit() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let options = ExecutionOptions {
            step_limit: 1000,
            ..ExecutionOptions::default()
        };
        let outcome = machine(EvalMode::Standard, "while (true) {}").run(&ctx, &options, epoch);
        assert!(matches!(outcome, Outcome::Error));
        assert!(ctx.errors()[0].message.contains("Potential infinite loop"));
    }

    #[test]
    fn test_stale_run_stops_without_writes() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        ctx.begin_run();
        let outcome = machine(EvalMode::Standard, "error(\"boom\");")
            .run(&ctx, &ExecutionOptions::default(), epoch);
        assert!(matches!(outcome, Outcome::Error));
        assert!(ctx.errors().is_empty());
    }

    #[test]
    fn test_lazy_binding_never_forced() {
        let (outcome, _) = run(EvalMode::Lazy, "let x = error(\"never\");\n1;");
        assert_eq!(finished_value(outcome), Value::Int(1));

        let (outcome, ctx) = run(EvalMode::Standard, "let x = error(\"never\");\n1;");
        assert!(matches!(outcome, Outcome::Error));
        assert_eq!(ctx.errors()[0].message, "Error: never");
    }

    #[test]
    fn test_lazy_binding_forced_once() {
        let (outcome, ctx) = run(EvalMode::Lazy, "let x = display(3);\nx + x;");
        assert_eq!(finished_value(outcome), Value::Int(6));
        assert_eq!(ctx.take_output(), vec!["3".to_string()]);
    }

    #[test]
    fn test_amb_backtracks_on_require() {
        let (outcome, _) = run(
            EvalMode::NonDeterministic,
            "let x = amb(1, 2, 3);\nrequire(x > 1);\nx;",
        );
        assert_eq!(finished_value(outcome), Value::Int(2));
    }

    #[test]
    fn test_retry_yields_next_value_then_exhausts() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let outcome = machine(EvalMode::NonDeterministic, "let x = amb(1, 2);\nx;")
            .run(&ctx, &ExecutionOptions::default(), epoch);
        let Outcome::Finished {
            value,
            continuation: Some(handle),
        } = outcome
        else {
            panic!("expected a backtrack point");
        };
        assert_eq!(value, Value::Int(1));

        let epoch = ctx.begin_run();
        let outcome = handle
            .downcast::<Machine>()
            .unwrap()
            .resume(&ctx, &ExecutionOptions::default(), epoch);
        let Outcome::Finished {
            value,
            continuation: Some(handle),
        } = outcome
        else {
            panic!("expected a backtrack point");
        };
        assert_eq!(value, Value::Int(2));

        let epoch = ctx.begin_run();
        let outcome = handle
            .downcast::<Machine>()
            .unwrap()
            .resume(&ctx, &ExecutionOptions::default(), epoch);
        assert!(matches!(outcome, Outcome::Error));
        assert_eq!(ctx.errors()[0].message, "No more values.");
    }

    #[test]
    fn test_cut_prunes_choices() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let outcome = machine(EvalMode::NonDeterministic, "let x = amb(1, 2);\ncut();")
            .run(&ctx, &ExecutionOptions::default(), epoch);
        let Outcome::Finished {
            value,
            continuation: Some(handle),
        } = outcome
        else {
            panic!("expected finished");
        };
        assert_eq!(value, Value::Cut);
        let epoch = ctx.begin_run();
        let outcome = handle
            .downcast::<Machine>()
            .unwrap()
            .resume(&ctx, &ExecutionOptions::default(), epoch);
        assert!(matches!(outcome, Outcome::Error));
    }

    #[test]
    fn test_amb_rejected_outside_non_deterministic() {
        let (outcome, ctx) = run(EvalMode::Standard, "let x = amb(1, 2);");
        assert!(matches!(outcome, Outcome::Error));
        assert!(ctx.errors()[0].message.contains("non-deterministic"));
    }

    #[test]
    fn test_import_runs_module_once() {
        let modules = [
            (
                "/main".to_string(),
                lower(&parse("import \"/lib\";\nimport \"/lib\";\ntwice(2);").unwrap()),
            ),
            ("/lib".to_string(), lower(&parse("let base = 10;").unwrap())),
        ]
        .into_iter()
        .collect::<BTreeMap<_, _>>();
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        let outcome = Machine::new(EvalMode::Standard, modules, "/main", Environment::default())
            .run(&ctx, &ExecutionOptions::default(), epoch);
        assert!(matches!(outcome, Outcome::Error));
        let error = &ctx.errors()[0];
        assert_eq!(
            error.location,
            Some(SourceLocation::new(Some("/main".into()), 3))
        );
        assert!(ctx.load_environment::<Environment>().names().any(|n| n == "base"));
    }

    #[test]
    fn test_pause_request_suspends_before_next_statement() {
        let ctx = Context::default();
        let epoch = ctx.begin_run();
        ctx.request_pause();
        let outcome = machine(EvalMode::Standard, "1;\n2;").run(&ctx, &ExecutionOptions::default(), epoch);
        match outcome {
            Outcome::Suspended { handle } => {
                assert_eq!(handle.location(), Some(&SourceLocation::line(1)))
            }
            other => panic!("expected suspension, got {:?}", other),
        }
    }
}
