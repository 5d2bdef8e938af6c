//! Lowers the integer subset of the reference language to WebAssembly text.
//!
//! Module ABI: every capability the program calls is imported from `env` with
//! `i64` parameters and an `i64` result, and the program body is exported as
//! `main() -> i64` returning the value of the last expression statement.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use super::syntax::{BinOp, Expr, Program, Stmt, StmtKind, UnOp};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoweringError {
    pub message: String,
    pub line: usize,
}

#[derive(Default)]
struct Lowering {
    locals: BTreeSet<String>,
    imports: BTreeMap<String, usize>,
    body: String,
    labels: usize,
}

pub(crate) fn to_wat(program: &Program) -> Result<String, LoweringError> {
    let mut lowering = Lowering::default();
    for stmt in &program.stmts {
        lowering.stmt(stmt)?;
    }
    Ok(lowering.finish())
}

impl Lowering {
    fn emit(&mut self, instr: &str) {
        self.body.push_str("    ");
        self.body.push_str(instr);
        self.body.push('\n');
    }

    fn finish(self) -> String {
        let mut wat = String::from("(module\n");
        for (name, arity) in &self.imports {
            let params = if *arity == 0 {
                String::new()
            } else {
                format!(" (param{})", " i64".repeat(*arity))
            };
            let _ = writeln!(
                wat,
                "  (import \"env\" \"{name}\" (func $cap_{name}{params} (result i64)))"
            );
        }
        wat.push_str("  (func (export \"main\") (result i64)\n");
        wat.push_str("    (local $__result i64)\n");
        for local in &self.locals {
            let _ = writeln!(wat, "    (local $v_{} i64)", local);
        }
        wat.push_str(&self.body);
        wat.push_str("    local.get $__result))\n");
        wat
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), LoweringError> {
        stmts.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LoweringError> {
        let line = stmt.line;
        let fail = |message: &str| LoweringError {
            message: message.to_string(),
            line,
        };
        match &stmt.kind {
            StmtKind::Let(name, expr) => {
                self.expr(expr, line)?;
                check_name(name, line)?;
                self.locals.insert(name.clone());
                self.emit(&format!("local.set $v_{}", name));
                self.emit("i64.const 0");
                self.emit("local.set $__result");
            }
            StmtKind::Assign(name, expr) => {
                if !self.locals.contains(name) {
                    return Err(fail(&format!("Name {} not declared.", name)));
                }
                self.expr(expr, line)?;
                self.emit(&format!("local.tee $v_{}", name));
                self.emit("local.set $__result");
            }
            StmtKind::Expr(expr) => {
                self.expr(expr, line)?;
                self.emit("local.set $__result");
            }
            StmtKind::While(cond, body) => {
                let label = self.next_label();
                self.emit(&format!("block $exit_{}", label));
                self.emit(&format!("loop $loop_{}", label));
                self.expr(cond, line)?;
                self.emit("i32.wrap_i64");
                self.emit("i32.eqz");
                self.emit(&format!("br_if $exit_{}", label));
                self.block(body)?;
                self.emit(&format!("br $loop_{}", label));
                self.emit("end");
                self.emit("end");
            }
            StmtKind::If(cond, then, otherwise) => {
                self.expr(cond, line)?;
                self.emit("i32.wrap_i64");
                self.emit("if");
                self.block(then)?;
                if !otherwise.is_empty() {
                    self.emit("else");
                    self.block(otherwise)?;
                }
                self.emit("end");
            }
            StmtKind::Debugger => {}
            StmtKind::Import(_) => {
                return Err(fail("Imports cannot be compiled for the sandbox."));
            }
            StmtKind::Require(_) | StmtKind::Choose { .. } => {
                return Err(fail(
                    "Non-deterministic constructs cannot be compiled for the sandbox.",
                ));
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, line: usize) -> Result<(), LoweringError> {
        let fail = |message: String| LoweringError { message, line };
        match expr {
            Expr::Int(n) => self.emit(&format!("i64.const {}", n)),
            Expr::Bool(b) => self.emit(&format!("i64.const {}", i64::from(*b))),
            Expr::Str(_) => {
                return Err(fail("Strings cannot be compiled for the sandbox.".into()));
            }
            Expr::Cut => {
                return Err(fail("cut() cannot be compiled for the sandbox.".into()));
            }
            Expr::Name(name) => {
                if !self.locals.contains(name) {
                    return Err(fail(format!("Name {} not declared.", name)));
                }
                self.emit(&format!("local.get $v_{}", name));
            }
            Expr::Unary(UnOp::Neg, inner) => {
                self.emit("i64.const 0");
                self.expr(inner, line)?;
                self.emit("i64.sub");
            }
            Expr::Unary(UnOp::Not, inner) => {
                self.expr(inner, line)?;
                self.emit("i64.eqz");
                self.emit("i64.extend_i32_u");
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                self.expr(lhs, line)?;
                self.emit("i32.wrap_i64");
                self.emit("if (result i64)");
                self.expr(rhs, line)?;
                self.emit("else");
                self.emit("i64.const 0");
                self.emit("end");
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                self.expr(lhs, line)?;
                self.emit("i32.wrap_i64");
                self.emit("if (result i64)");
                self.emit("i64.const 1");
                self.emit("else");
                self.expr(rhs, line)?;
                self.emit("end");
            }
            Expr::Binary(op, lhs, rhs) => {
                self.expr(lhs, line)?;
                self.expr(rhs, line)?;
                let (instr, compare) = match op {
                    BinOp::Add => ("i64.add", false),
                    BinOp::Sub => ("i64.sub", false),
                    BinOp::Mul => ("i64.mul", false),
                    BinOp::Div => ("i64.div_s", false),
                    BinOp::Rem => ("i64.rem_s", false),
                    BinOp::Eq => ("i64.eq", true),
                    BinOp::Ne => ("i64.ne", true),
                    BinOp::Lt => ("i64.lt_s", true),
                    BinOp::Le => ("i64.le_s", true),
                    BinOp::Gt => ("i64.gt_s", true),
                    BinOp::Ge => ("i64.ge_s", true),
                    BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
                };
                self.emit(instr);
                if compare {
                    self.emit("i64.extend_i32_u");
                }
            }
            Expr::Call(name, args) => {
                check_name(name, line)?;
                match self.imports.get(name) {
                    Some(arity) if *arity != args.len() => {
                        return Err(fail(format!(
                            "{} is called with different numbers of arguments.",
                            name
                        )));
                    }
                    _ => {
                        self.imports.insert(name.clone(), args.len());
                    }
                }
                for arg in args {
                    self.expr(arg, line)?;
                }
                self.emit(&format!("call $cap_{}", name));
            }
        }
        Ok(())
    }

    fn next_label(&mut self) -> usize {
        self.labels += 1;
        self.labels
    }
}

fn check_name(name: &str, line: usize) -> Result<(), LoweringError> {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(LoweringError {
            message: format!("Name {} cannot be compiled for the sandbox.", name),
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::syntax::parse;
    use super::*;

    #[test]
    fn test_lowered_module_assembles() {
        let program = parse(
            "let i = 0;\nlet acc = 0;\nwhile (i < 4 && true) {\n  acc = acc + i;\n  i = i + 1;\n}\ndisplay(acc);\nacc * 2;",
        )
        .unwrap();
        let wat = to_wat(&program).unwrap();
        assert!(wat.contains("(import \"env\" \"display\" (func $cap_display (param i64) (result i64)))"));
        assert!(wat::parse_str(&wat).is_ok());
    }

    #[test]
    fn test_strings_rejected() {
        let program = parse("let s = 1;\ndisplay(\"hi\");").unwrap();
        let err = to_wat(&program).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_undeclared_name_rejected() {
        let err = to_wat(&parse("x + 1;").unwrap()).unwrap_err();
        assert_eq!(err.message, "Name x not declared.");
    }

    #[test]
    fn test_conflicting_arity_rejected() {
        let err = to_wat(&parse("max(1, 2);\nmax(1);").unwrap()).unwrap_err();
        assert_eq!(err.line, 2);
    }
}
