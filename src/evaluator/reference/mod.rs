//! Reference evaluator: a small statement language interpreted on a blocking
//! thread, with lazy and backtracking modes and a wasm compiler for its
//! integer subset.

mod codegen;
mod machine;
mod syntax;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use self::machine::{Code, Environment, Machine};
use self::syntax::{Expr, Stmt, StmtKind};
use super::{
    CompiledProgram, Context, Evaluator, ExecutionOptions, Outcome, SourceFiles, SuspendedHandle,
};
use crate::error::{Diagnostic, SourceLocation};

/// Evaluator for the built-in statement language.
#[derive(Debug, Clone, Default)]
pub struct ReferenceEvaluator;

impl ReferenceEvaluator {
    pub fn new() -> Self {
        Self
    }
}

fn location(multi_file: bool, path: &str, line: usize) -> SourceLocation {
    SourceLocation::new(multi_file.then(|| path.to_string()), line)
}

fn load_modules(files: &SourceFiles) -> Result<BTreeMap<String, Code>, Vec<Diagnostic>> {
    let multi_file = files.len() > 1;
    let mut modules = BTreeMap::new();
    let mut errors = Vec::new();
    for (path, text) in files {
        match syntax::parse(text) {
            Ok(program) => {
                modules.insert(path.clone(), machine::lower(&program));
            }
            Err(e) => errors.push(Diagnostic::syntax(
                e.message,
                location(multi_file, path, e.line),
            )),
        }
    }
    if errors.is_empty() {
        Ok(modules)
    } else {
        Err(errors)
    }
}

async fn run_blocking<F>(context: Context, epoch: u64, f: F) -> Outcome
where
    F: FnOnce(&Context) -> Outcome + Send + 'static,
{
    let ctx = context.bound_to(epoch);
    match tokio::task::spawn_blocking(move || f(&ctx)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "interpreter thread failed");
            context.push_error_for(epoch, Diagnostic::runtime(format!("Interpreter failed: {}", e)));
            Outcome::Error
        }
    }
}

#[async_trait]
impl Evaluator for ReferenceEvaluator {
    fn parse(&self, text: &str) -> Vec<Diagnostic> {
        match syntax::parse(text) {
            Ok(_) => Vec::new(),
            Err(e) => vec![Diagnostic::syntax(e.message, SourceLocation::line(e.line))],
        }
    }

    fn check(&self, text: &str, context: &Context) -> Vec<Diagnostic> {
        let Ok(program) = syntax::parse(text) else {
            return Vec::new();
        };
        let mut declared: BTreeSet<String> = context
            .load_environment::<Environment>()
            .names()
            .cloned()
            .collect();
        let callable: BTreeSet<String> = context
            .capabilities()
            .visible()
            .map(|c| c.name().to_string())
            .collect();
        let mut hints = Vec::new();
        check_block(&program.stmts, &mut declared, &callable, &mut hints);
        hints
    }

    async fn run_files(
        &self,
        files: SourceFiles,
        entrypoint: String,
        context: Context,
        options: ExecutionOptions,
    ) -> Outcome {
        let epoch = context.epoch();
        let modules = match load_modules(&files) {
            Ok(modules) => modules,
            Err(errors) => {
                for error in errors {
                    context.push_error_for(epoch, error);
                }
                return Outcome::Error;
            }
        };
        if !modules.contains_key(&entrypoint) {
            context.push_error_for(
                epoch,
                Diagnostic::runtime(format!("Entrypoint {} not found.", entrypoint)),
            );
            return Outcome::Error;
        }
        let environment = context.load_environment::<Environment>();
        let machine = Machine::new(options.mode, modules, &entrypoint, environment);
        tracing::debug!(entrypoint = %entrypoint, mode = ?options.mode, "interpreter run");
        run_blocking(context, epoch, move |ctx| machine.run(ctx, &options, epoch)).await
    }

    async fn resume(
        &self,
        handle: SuspendedHandle,
        context: Context,
        options: ExecutionOptions,
    ) -> Outcome {
        let epoch = context.epoch();
        let Some(machine) = handle.downcast::<Machine>() else {
            context.push_error_for(
                epoch,
                Diagnostic::runtime("Cannot resume a run started by another evaluator."),
            );
            return Outcome::Error;
        };
        run_blocking(context, epoch, move |ctx| machine.resume(ctx, &options, epoch)).await
    }

    fn request_pause(&self, context: &Context) -> bool {
        context.request_pause();
        true
    }

    fn compile(
        &self,
        files: &SourceFiles,
        entrypoint: &str,
        _context: &Context,
    ) -> Result<CompiledProgram, Vec<Diagnostic>> {
        let text = files.get(entrypoint).ok_or_else(|| {
            vec![Diagnostic::runtime(format!(
                "Entrypoint {} not found.",
                entrypoint
            ))]
        })?;
        let program = syntax::parse(text)
            .map_err(|e| vec![Diagnostic::syntax(e.message, SourceLocation::line(e.line))])?;
        let wat = codegen::to_wat(&program)
            .map_err(|e| vec![Diagnostic::syntax(e.message, SourceLocation::line(e.line))])?;
        let bytes = wat::parse_str(&wat).map_err(|e| {
            vec![Diagnostic::runtime(format!(
                "Failed to assemble program: {}",
                e
            ))]
        })?;
        Ok(CompiledProgram {
            entrypoint: entrypoint.to_string(),
            bytes,
        })
    }
}

fn check_block(
    stmts: &[Stmt],
    declared: &mut BTreeSet<String>,
    callable: &BTreeSet<String>,
    hints: &mut Vec<Diagnostic>,
) {
    for stmt in stmts {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                check_expr(expr, line, declared, callable, hints);
                declared.insert(name.clone());
            }
            StmtKind::Assign(name, expr) => {
                check_expr(expr, line, declared, callable, hints);
                check_declared(name, line, declared, hints);
            }
            StmtKind::Choose {
                name,
                declare,
                alternatives,
            } => {
                for alt in alternatives {
                    check_expr(alt, line, declared, callable, hints);
                }
                if *declare {
                    declared.insert(name.clone());
                } else {
                    check_declared(name, line, declared, hints);
                }
            }
            StmtKind::Expr(expr) | StmtKind::Require(expr) => {
                check_expr(expr, line, declared, callable, hints)
            }
            StmtKind::While(cond, body) => {
                check_expr(cond, line, declared, callable, hints);
                check_block(body, declared, callable, hints);
            }
            StmtKind::If(cond, then, otherwise) => {
                check_expr(cond, line, declared, callable, hints);
                check_block(then, declared, callable, hints);
                check_block(otherwise, declared, callable, hints);
            }
            StmtKind::Debugger | StmtKind::Import(_) => {}
        }
    }
}

fn check_expr(
    expr: &Expr,
    line: usize,
    declared: &BTreeSet<String>,
    callable: &BTreeSet<String>,
    hints: &mut Vec<Diagnostic>,
) {
    match expr {
        Expr::Name(name) => check_declared(name, line, declared, hints),
        Expr::Unary(_, inner) => check_expr(inner, line, declared, callable, hints),
        Expr::Binary(_, lhs, rhs) => {
            check_expr(lhs, line, declared, callable, hints);
            check_expr(rhs, line, declared, callable, hints);
        }
        Expr::Call(name, args) => {
            if !callable.contains(name) {
                push_hint(
                    hints,
                    format!("{} is not a function available in this context.", name),
                    line,
                );
            }
            for arg in args {
                check_expr(arg, line, declared, callable, hints);
            }
        }
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Cut => {}
    }
}

fn check_declared(name: &str, line: usize, declared: &BTreeSet<String>, hints: &mut Vec<Diagnostic>) {
    if !declared.contains(name) {
        push_hint(hints, format!("Name {} not declared.", name), line);
    }
}

fn push_hint(hints: &mut Vec<Diagnostic>, message: String, line: usize) {
    if hints.iter().all(|hint| hint.message != message) {
        hints.push(Diagnostic::hint(message).at(SourceLocation::line(line)));
    }
}
