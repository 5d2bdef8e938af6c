//! Lexer and parser for the reference statement language.
//!
//! ```text
//! program  := stmt*
//! stmt     := "let" IDENT "=" (expr | amb) ";"
//!           | IDENT "=" (expr | amb) ";"
//!           | "while" "(" expr ")" block
//!           | "if" "(" expr ")" block ("else" (block | stmt))?
//!           | "debugger" ";" | "import" STRING ";" | "require" "(" expr ")" ";"
//!           | expr ";"
//! amb      := "amb" "(" (expr ("," expr)*)? ")"
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Int(i64),
    Str(String),
    Ident(String),
    Let,
    While,
    If,
    Else,
    True,
    False,
    Debugger,
    Import,
    Require,
    Amb,
    Cut,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semi,
    Comma,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Tok::Int(n) => return write!(f, "{}", n),
            Tok::Str(s) => return write!(f, "\"{}\"", s),
            Tok::Ident(s) => return f.write_str(s),
            Tok::Let => "let",
            Tok::While => "while",
            Tok::If => "if",
            Tok::Else => "else",
            Tok::True => "true",
            Tok::False => "false",
            Tok::Debugger => "debugger",
            Tok::Import => "import",
            Tok::Require => "require",
            Tok::Amb => "amb",
            Tok::Cut => "cut",
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::Semi => ";",
            Tok::Comma => ",",
            Tok::Assign => "=",
            Tok::Eq => "==",
            Tok::Ne => "!=",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            Tok::Plus => "+",
            Tok::Minus => "-",
            Tok::Star => "*",
            Tok::Slash => "/",
            Tok::Percent => "%",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::Bang => "!",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

/// First syntax error found in a source text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Int(i64),
    Bool(bool),
    Str(String),
    Name(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Cut,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StmtKind {
    Let(String, Expr),
    Assign(String, Expr),
    Expr(Expr),
    While(Expr, Vec<Stmt>),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Debugger,
    Import(String),
    Require(Expr),
    Choose {
        name: String,
        declare: bool,
        alternatives: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Program {
    pub stmts: Vec<Stmt>,
}

/// Deepest recursion the parser allows, counting nested statements and
/// nested expressions together.
const MAX_NESTING: usize = 100;

/// Tallest expression tree the parser builds.
const MAX_EXPR_HEIGHT: usize = 512;

pub(crate) fn parse(text: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(text)?;
    let last_line = text.lines().count().max(1);
    Parser {
        tokens,
        pos: 0,
        last_line,
        depth: 0,
        height: 0,
    }
    .program()
}

fn tokenize(text: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        if c == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '/' {
            chars.next();
            if chars.peek() == Some(&'/') {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            } else {
                tokens.push(Token { tok: Tok::Slash, line });
            }
            continue;
        }
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let n = digits
                .parse::<i64>()
                .map_err(|_| SyntaxError::new(format!("Number {} is too large", digits), line))?;
            tokens.push(Token { tok: Tok::Int(n), line });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if !(d.is_alphanumeric() || d == '_') {
                    break;
                }
                ident.push(d);
                chars.next();
            }
            let tok = match ident.as_str() {
                "let" => Tok::Let,
                "while" => Tok::While,
                "if" => Tok::If,
                "else" => Tok::Else,
                "true" => Tok::True,
                "false" => Tok::False,
                "debugger" => Tok::Debugger,
                "import" => Tok::Import,
                "require" => Tok::Require,
                "amb" => Tok::Amb,
                "cut" => Tok::Cut,
                _ => Tok::Ident(ident),
            };
            tokens.push(Token { tok, line });
            continue;
        }
        if c == '"' {
            let start = line;
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None | Some('\n') => {
                        return Err(SyntaxError::new("Unterminated string literal", start))
                    }
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(other) => s.push(other),
                        None => {
                            return Err(SyntaxError::new("Unterminated string literal", start))
                        }
                    },
                    Some(other) => s.push(other),
                }
            }
            tokens.push(Token { tok: Tok::Str(s), line: start });
            continue;
        }

        chars.next();
        let next = chars.peek().copied();
        let (tok, wide) = match (c, next) {
            ('=', Some('=')) => (Tok::Eq, true),
            ('!', Some('=')) => (Tok::Ne, true),
            ('<', Some('=')) => (Tok::Le, true),
            ('>', Some('=')) => (Tok::Ge, true),
            ('&', Some('&')) => (Tok::AndAnd, true),
            ('|', Some('|')) => (Tok::OrOr, true),
            ('=', _) => (Tok::Assign, false),
            ('!', _) => (Tok::Bang, false),
            ('<', _) => (Tok::Lt, false),
            ('>', _) => (Tok::Gt, false),
            ('(', _) => (Tok::LParen, false),
            (')', _) => (Tok::RParen, false),
            ('{', _) => (Tok::LBrace, false),
            ('}', _) => (Tok::RBrace, false),
            (';', _) => (Tok::Semi, false),
            (',', _) => (Tok::Comma, false),
            ('+', _) => (Tok::Plus, false),
            ('-', _) => (Tok::Minus, false),
            ('*', _) => (Tok::Star, false),
            ('%', _) => (Tok::Percent, false),
            _ => return Err(SyntaxError::new(format!("Unexpected character '{}'", c), line)),
        };
        if wide {
            chars.next();
        }
        tokens.push(Token { tok, line });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    last_line: usize,
    depth: usize,
    /// Height of the expression parsed last.
    height: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.line)
            .unwrap_or(self.last_line)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), SyntaxError> {
        if self.eat(&tok) {
            return Ok(());
        }
        let line = self.line();
        Err(match self.peek() {
            Some(found) => SyntaxError::new(format!("Expected '{}' but found '{}'", tok, found), line),
            None if tok == Tok::Semi => SyntaxError::new("Missing semicolon at the end of statement", line),
            None => SyntaxError::new(format!("Expected '{}' but reached end of input", tok), line),
        })
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        let line = self.line();
        match self.advance() {
            Some(Tok::Ident(name)) => Ok(name),
            Some(other) => Err(SyntaxError::new(format!("Expected a name but found '{}'", other), line)),
            None => Err(SyntaxError::new("Expected a name but reached end of input", line)),
        }
    }

    fn enter(&mut self, what: &str) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new(format!("{} nested too deeply.", what), self.line()));
        }
        Ok(())
    }

    fn set_height(&mut self, height: usize) -> Result<(), SyntaxError> {
        if height > MAX_EXPR_HEIGHT {
            return Err(SyntaxError::new("Expression nested too deeply.", self.line()));
        }
        self.height = height;
        Ok(())
    }

    fn program(mut self) -> Result<Program, SyntaxError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.statement()?);
        }
        Ok(Program { stmts })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(Tok::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::RBrace) => {
                    self.pos += 1;
                    return Ok(stmts);
                }
                None => return Err(SyntaxError::new("Missing '}' to close block", self.line())),
                _ => stmts.push(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.enter("Statements")?;
        let stmt = self.statement_inner();
        self.depth -= 1;
        stmt
    }

    fn statement_inner(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = match self.peek() {
            Some(Tok::Let) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(Tok::Assign)?;
                self.binding(name, true)?
            }
            Some(Tok::Ident(_)) if self.peek_at(1) == Some(&Tok::Assign) => {
                let name = self.ident()?;
                self.pos += 1;
                self.binding(name, false)?
            }
            Some(Tok::While) => {
                self.pos += 1;
                let cond = self.condition()?;
                StmtKind::While(cond, self.block()?)
            }
            Some(Tok::If) => {
                self.pos += 1;
                let cond = self.condition()?;
                let then = self.block()?;
                let otherwise = if self.eat(&Tok::Else) {
                    if self.peek() == Some(&Tok::If) {
                        vec![self.statement()?]
                    } else {
                        self.block()?
                    }
                } else {
                    Vec::new()
                };
                StmtKind::If(cond, then, otherwise)
            }
            Some(Tok::Debugger) => {
                self.pos += 1;
                self.expect(Tok::Semi)?;
                StmtKind::Debugger
            }
            Some(Tok::Import) => {
                self.pos += 1;
                let path = match self.advance() {
                    Some(Tok::Str(path)) => path,
                    _ => return Err(SyntaxError::new("Expected a module path string after import", line)),
                };
                self.expect(Tok::Semi)?;
                StmtKind::Import(path)
            }
            Some(Tok::Require) => {
                self.pos += 1;
                let cond = self.condition()?;
                self.expect(Tok::Semi)?;
                StmtKind::Require(cond)
            }
            _ => {
                let expr = self.expr()?;
                self.expect(Tok::Semi)?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn binding(&mut self, name: String, declare: bool) -> Result<StmtKind, SyntaxError> {
        if self.eat(&Tok::Amb) {
            self.expect(Tok::LParen)?;
            let alternatives = self.arguments()?;
            self.expect(Tok::Semi)?;
            return Ok(StmtKind::Choose {
                name,
                declare,
                alternatives,
            });
        }
        let expr = self.expr()?;
        self.expect(Tok::Semi)?;
        Ok(if declare {
            StmtKind::Let(name, expr)
        } else {
            StmtKind::Assign(name, expr)
        })
    }

    fn condition(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(Tok::LParen)?;
        let cond = self.expr()?;
        self.expect(Tok::RParen)?;
        Ok(cond)
    }

    /// Comma separated expressions after an opening parenthesis.
    ///
    /// Leaves the tallest argument's height in `self.height`.
    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        let mut tallest = 0;
        if self.eat(&Tok::RParen) {
            self.height = tallest;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            tallest = tallest.max(self.height);
            if self.eat(&Tok::RParen) {
                self.height = tallest;
                return Ok(args);
            }
            self.expect(Tok::Comma)?;
        }
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.enter("Expression")?;
        let expr = self.binary(0);
        self.depth -= 1;
        expr
    }

    fn binary(&mut self, level: usize) -> Result<Expr, SyntaxError> {
        const LEVELS: &[&[(Tok, BinOp)]] = &[
            &[(Tok::OrOr, BinOp::Or)],
            &[(Tok::AndAnd, BinOp::And)],
            &[(Tok::Eq, BinOp::Eq), (Tok::Ne, BinOp::Ne)],
            &[
                (Tok::Lt, BinOp::Lt),
                (Tok::Le, BinOp::Le),
                (Tok::Gt, BinOp::Gt),
                (Tok::Ge, BinOp::Ge),
            ],
            &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)],
            &[
                (Tok::Star, BinOp::Mul),
                (Tok::Slash, BinOp::Div),
                (Tok::Percent, BinOp::Rem),
            ],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        let mut height = self.height;
        'outer: loop {
            for (tok, op) in LEVELS[level] {
                if self.eat(tok) {
                    let rhs = self.binary(level + 1)?;
                    height = height.max(self.height) + 1;
                    self.set_height(height)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            self.height = height;
            return Ok(lhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let mut ops = Vec::new();
        loop {
            if self.eat(&Tok::Minus) {
                ops.push(UnOp::Neg);
            } else if self.eat(&Tok::Bang) {
                ops.push(UnOp::Not);
            } else {
                break;
            }
            if ops.len() > MAX_EXPR_HEIGHT {
                return Err(SyntaxError::new("Expression nested too deeply.", self.line()));
            }
        }
        let mut expr = self.primary()?;
        self.set_height(self.height + ops.len())?;
        for op in ops.into_iter().rev() {
            expr = Expr::Unary(op, Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.height = 1;
        match self.advance() {
            Some(Tok::Int(n)) => Ok(Expr::Int(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::True) => Ok(Expr::Bool(true)),
            Some(Tok::False) => Ok(Expr::Bool(false)),
            Some(Tok::Cut) => {
                self.expect(Tok::LParen)?;
                self.expect(Tok::RParen)?;
                Ok(Expr::Cut)
            }
            Some(Tok::Ident(name)) => {
                if self.eat(&Tok::LParen) {
                    let args = self.arguments()?;
                    self.set_height(self.height + 1)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Amb) => Err(SyntaxError::new(
                "amb(...) may only appear as the value of a declaration or assignment",
                line,
            )),
            Some(other) => Err(SyntaxError::new(format!("Unexpected token '{}'", other), line)),
            None => Err(SyntaxError::new("Unexpected end of input", line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arithmetic_precedence() {
        let program = parse("1 + 2 * 3;").unwrap();
        assert_eq!(
            program.stmts[0].kind,
            StmtKind::Expr(Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3))
                ))
            ))
        );
    }

    #[test]
    fn test_statement_lines() {
        let program = parse("let x = 1;\n\nwhile (x < 3) {\n  x = x + 1;\n}\n").unwrap();
        assert_eq!(program.stmts[0].line, 1);
        assert_eq!(program.stmts[1].line, 3);
        match &program.stmts[1].kind {
            StmtKind::While(_, body) => assert_eq!(body[0].line, 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse("1 + 1").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("semicolon"));
    }

    #[test]
    fn test_amb_only_in_bindings() {
        let program = parse("let x = amb(1, 2, 3);").unwrap();
        assert!(matches!(
            &program.stmts[0].kind,
            StmtKind::Choose { declare: true, alternatives, .. } if alternatives.len() == 3
        ));
        assert!(parse("display(amb(1, 2));").is_err());
    }

    #[test]
    fn test_comments_and_strings() {
        let program = parse("// header\ndisplay(\"a // b\"); // trailing\n").unwrap();
        assert_eq!(program.stmts.len(), 1);
        assert_eq!(program.stmts[0].line, 2);
        assert!(parse("\"open").is_err());
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse("if (true) { 1; } else if (false) { 2; } else { 3; }").unwrap();
        match &program.stmts[0].kind {
            StmtKind::If(_, _, otherwise) => {
                assert!(matches!(otherwise[0].kind, StmtKind::If(..)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_character() {
        let err = parse("let x = 1;\nlet y = #;").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_deeply_nested_parentheses_rejected() {
        let source = format!("{}1{};", "(".repeat(20_000), ")".repeat(20_000));
        let err = parse(&source).unwrap_err();
        assert_eq!(err.message, "Expression nested too deeply.");
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let source = format!("1{};", " + 1".repeat(20_000));
        let err = parse(&source).unwrap_err();
        assert_eq!(err.message, "Expression nested too deeply.");

        let source = format!("{}1;", "-".repeat(20_000));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn test_deeply_nested_blocks_rejected() {
        let source = format!("{}1;{}", "if (true) { ".repeat(5_000), " }".repeat(5_000));
        let err = parse(&source).unwrap_err();
        assert!(err.message.ends_with("nested too deeply."));

        let source = format!("{}1;{}", "while (true) { ".repeat(150), " }".repeat(150));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn test_moderate_nesting_still_parses() {
        let source = format!("{}1{};", "(".repeat(40), ")".repeat(40));
        assert!(parse(&source).is_ok());
        let source = format!("1{};", " + 1".repeat(200));
        assert!(parse(&source).is_ok());
    }
}
