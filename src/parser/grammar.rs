use super::ast::*;
use super::lexer::{Keyword, Tok, Token};
use crate::diagnostics::{Diagnostic, Position};
use crate::frame::ScopeId;
use std::sync::Arc;

type PResult<T> = Result<T, Diagnostic>;

/// Deepest statement or expression nesting accepted.
pub const MAX_NESTING: usize = 64;

/// Deepest expression tree accepted, counting operator and postfix chains.
pub const MAX_EXPR_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    depth: usize,
    links: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            idx: 0,
            depth: 0,
            links: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn program(&mut self) -> Program {
        let body = self.statements(false);
        Program {
            body,
            end: self.peek().pos,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        &self.tokens[(self.idx + ahead).min(self.tokens.len() - 1)].tok
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        token
    }

    fn prev_end(&self) -> usize {
        self.idx
            .checked_sub(1)
            .map(|i| self.tokens[i].end)
            .unwrap_or(0)
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(&self.peek().tok, Tok::Punct(q) if *q == p)
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        self.peek().tok == Tok::Kw(kw)
    }

    fn at_eof(&self) -> bool {
        self.peek().tok == Tok::Eof
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Token> {
        if self.at_punct(p) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&format!("`{}`", p)))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<Token> {
        if self.at_kw(kw) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&format!("`{:?}`", kw).to_lowercase()))
        }
    }

    fn expect_ident(&mut self) -> PResult<(String, Position)> {
        let token = self.peek().clone();
        match token.tok {
            Tok::Ident(name) => {
                self.bump();
                Ok((name, token.pos))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let token = self.peek();
        let found = match &token.tok {
            Tok::Ident(name) => format!("`{}`", name),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Kw(kw) => format!("`{:?}`", kw).to_lowercase(),
            Tok::Punct(p) => format!("`{}`", p),
            Tok::Eof => "end of input".to_string(),
        };
        Diagnostic::error(token.pos, format!("expected {}, found {}", expected, found))
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING || self.depth + self.links >= MAX_EXPR_DEPTH {
            return Err(Diagnostic::error(
                self.peek().pos,
                format!("nesting deeper than {} levels", MAX_NESTING),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parse a left-associative chain; links added inside count toward the
    /// expression depth until the chain ends.
    fn chain(&mut self, parse: impl FnOnce(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        let base = self.links;
        let result = parse(self);
        self.links = base;
        result
    }

    fn link(&mut self, pos: Position) -> PResult<()> {
        self.links += 1;
        if self.depth + self.links > MAX_EXPR_DEPTH {
            return Err(Diagnostic::error(
                pos,
                format!("expression deeper than {} levels", MAX_EXPR_DEPTH),
            ));
        }
        Ok(())
    }

    /// Skip to the next statement boundary after an error.
    fn synchronize(&mut self) {
        let start = self.idx;
        loop {
            if self.at_eof() {
                break;
            }
            if self.eat_punct(";") {
                break;
            }
            if self.at_punct("}") {
                if self.idx == start {
                    self.bump();
                }
                break;
            }
            self.bump();
        }
    }

    fn statements(&mut self, in_block: bool) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            if self.at_eof() || (in_block && self.at_punct("}")) {
                break;
            }
            match self.statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.synchronize();
                }
            }
        }
        stmts
    }

    fn block(&mut self) -> PResult<Block> {
        let open = self.expect_punct("{")?.pos;
        let stmts = self.statements(true);
        let close = self.expect_punct("}")?.pos;
        Ok(Block {
            stmts,
            open: Some(open),
            close: Some(close),
            scope: ScopeId::default(),
        })
    }

    /// A braced block or one unbraced statement.
    fn body(&mut self) -> PResult<Block> {
        if self.at_punct("{") {
            return self.block();
        }
        let stmt = self.statement()?;
        Ok(Block {
            stmts: vec![stmt],
            open: None,
            close: None,
            scope: ScopeId::default(),
        })
    }

    fn finish(&self, kind: StmtKind, pos: Position) -> Stmt {
        Stmt {
            kind,
            pos,
            end: self.prev_end(),
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::statement_here)
    }

    fn statement_here(&mut self) -> PResult<Stmt> {
        let pos = self.peek().pos;
        let kind = match self.peek().tok.clone() {
            Tok::Kw(Keyword::If) => return self.if_statement(),
            Tok::Kw(Keyword::While) => {
                self.bump();
                self.expect_punct("(")?;
                let header = self.peek().pos;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let body = self.body()?;
                StmtKind::While {
                    cond,
                    body,
                    header,
                    trace: None,
                }
            }
            Tok::Kw(Keyword::For) => self.for_statement()?,
            Tok::Kw(Keyword::Break) => {
                self.bump();
                self.expect_punct(";")?;
                StmtKind::Break
            }
            Tok::Kw(Keyword::Continue) => {
                self.bump();
                self.expect_punct(";")?;
                StmtKind::Continue
            }
            Tok::Kw(Keyword::Return) => {
                self.bump();
                let value = if self.at_punct(";") {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_punct(";")?;
                StmtKind::Return(value)
            }
            Tok::Kw(Keyword::Throw) => {
                self.bump();
                let value = self.expr()?;
                self.expect_punct(";")?;
                StmtKind::Throw(value)
            }
            Tok::Kw(Keyword::Try) => {
                self.bump();
                let body = self.block()?;
                let catch_pos = self.expect_kw(Keyword::Catch)?.pos;
                self.expect_punct("(")?;
                let (binding, _) = self.expect_ident()?;
                self.expect_punct(")")?;
                let handler = self.block()?;
                StmtKind::Try {
                    body,
                    binding,
                    handler,
                    catch_pos,
                }
            }
            Tok::Kw(Keyword::Fn) if matches!(self.peek_at(1), Tok::Ident(_)) => {
                self.bump();
                let (name, _) = self.expect_ident()?;
                StmtKind::Function(Arc::new(self.function_rest(name, pos, false)?))
            }
            Tok::Kw(Keyword::Class) => self.class_declaration()?,
            _ => {
                let stmt = self.simple()?;
                self.expect_punct(";")?;
                return Ok(self.finish(stmt.kind, pos));
            }
        };
        Ok(self.finish(kind, pos))
    }

    /// `let`, assignment or expression statement without the trailing `;`.
    fn simple(&mut self) -> PResult<Stmt> {
        let pos = self.peek().pos;
        if self.eat_kw(Keyword::Let) {
            let (name, _) = self.expect_ident()?;
            self.expect_punct("=")?;
            let value = self.expr()?;
            return Ok(self.finish(StmtKind::Let { name, value }, pos));
        }
        let expr = self.expr()?;
        if self.at_punct("=") {
            let eq = self.bump();
            let target = match expr.kind {
                ExprKind::Name(name) => Target::Name(name),
                ExprKind::Field(object, name) => Target::Field(*object, name),
                ExprKind::Index(object, index) => Target::Index(*object, *index),
                _ => return Err(Diagnostic::error(eq.pos, "invalid assignment target")),
            };
            let value = self.expr()?;
            return Ok(self.finish(StmtKind::Assign { target, value }, pos));
        }
        Ok(self.finish(StmtKind::Expr(expr), pos))
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        let pos = self.expect_kw(Keyword::If)?.pos;
        let (cond, then) = if self.eat_kw(Keyword::Let) {
            let (name, _) = self.expect_ident()?;
            self.expect_punct("=")?;
            let value = self.expr()?;
            (Condition::Let { name, value }, self.block()?)
        } else {
            self.expect_punct("(")?;
            let cond = self.expr()?;
            self.expect_punct(")")?;
            (Condition::Expr(cond), self.body()?)
        };
        let otherwise = if self.eat_kw(Keyword::Else) {
            if self.at_kw(Keyword::If) {
                let nested = self.if_statement()?;
                Some(Block {
                    stmts: vec![nested],
                    open: None,
                    close: None,
                    scope: ScopeId::default(),
                })
            } else {
                Some(self.body()?)
            }
        } else {
            None
        };
        Ok(self.finish(
            StmtKind::If {
                cond,
                then,
                otherwise,
            },
            pos,
        ))
    }

    fn for_statement(&mut self) -> PResult<StmtKind> {
        self.expect_kw(Keyword::For)?;
        self.expect_punct("(")?;

        if matches!(self.peek().tok, Tok::Ident(_)) && *self.peek_at(1) == Tok::Kw(Keyword::In) {
            let header = self.peek().pos;
            let (var, _) = self.expect_ident()?;
            self.expect_kw(Keyword::In)?;
            let iter = self.expr()?;
            self.expect_punct(")")?;
            let body = self.body()?;
            return Ok(StmtKind::ForEach {
                var,
                iter,
                body,
                header,
                trace: None,
            });
        }

        let init = if self.at_punct(";") {
            None
        } else {
            Some(Box::new(self.simple()?))
        };
        self.expect_punct(";")?;
        let header = self.peek().pos;
        let cond = if self.at_punct(";") {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect_punct(";")?;
        let step = if self.at_punct(")") {
            None
        } else {
            Some(Box::new(self.simple()?))
        };
        self.expect_punct(")")?;
        let body = self.body()?;
        Ok(StmtKind::For {
            init,
            cond,
            step,
            body,
            header,
            trace: None,
        })
    }

    fn class_declaration(&mut self) -> PResult<StmtKind> {
        let pos = self.expect_kw(Keyword::Class)?.pos;
        let (name, _) = self.expect_ident()?;
        self.expect_punct("{")?;
        let mut methods = Vec::new();
        while !self.at_punct("}") {
            let method_pos = self.expect_kw(Keyword::Fn)?.pos;
            let (method, _) = self.expect_ident()?;
            methods.push(Arc::new(self.function_rest(method, method_pos, false)?));
        }
        self.expect_punct("}")?;
        Ok(StmtKind::Class(Arc::new(ClassDecl { name, methods, pos })))
    }

    fn params(&mut self) -> PResult<Vec<String>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.at_punct(")") {
            loop {
                params.push(self.expect_ident()?.0);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn function_rest(&mut self, name: String, pos: Position, lambda: bool) -> PResult<FnDecl> {
        let params = self.params()?;
        let body = if lambda && self.at_punct("=>") {
            self.bump();
            let value = self.expr()?;
            let value_pos = value.pos;
            Block {
                stmts: vec![Stmt {
                    kind: StmtKind::Return(Some(value)),
                    pos: value_pos,
                    end: self.prev_end(),
                }],
                open: None,
                close: None,
                scope: ScopeId::default(),
            }
        } else {
            self.block()?
        };
        Ok(FnDecl {
            name,
            params,
            body,
            pos,
            lambda,
        })
    }

    pub fn expr(&mut self) -> PResult<Expr> {
        self.nested(Self::logical_or)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.logical_and()?;
            while p.at_punct("||") {
                let pos = p.bump().pos;
                p.link(pos)?;
                let right = p.logical_and()?;
                left = Expr {
                    kind: ExprKind::Logical(LogicalOp::Or, Box::new(left), Box::new(right)),
                    pos,
                };
            }
            Ok(left)
        })
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.binary(0)?;
            while p.at_punct("&&") {
                let pos = p.bump().pos;
                p.link(pos)?;
                let right = p.binary(0)?;
                left = Expr {
                    kind: ExprKind::Logical(LogicalOp::And, Box::new(left), Box::new(right)),
                    pos,
                };
            }
            Ok(left)
        })
    }

    fn binary_op(&self, level: usize) -> Option<BinaryOp> {
        let Tok::Punct(p) = self.peek().tok else {
            return None;
        };
        let op = match (level, p) {
            (0, "==") => BinaryOp::Eq,
            (0, "!=") => BinaryOp::Ne,
            (1, "<") => BinaryOp::Lt,
            (1, "<=") => BinaryOp::Le,
            (1, ">") => BinaryOp::Gt,
            (1, ">=") => BinaryOp::Ge,
            (2, "+") => BinaryOp::Add,
            (2, "-") => BinaryOp::Sub,
            (3, "*") => BinaryOp::Mul,
            (3, "/") => BinaryOp::Div,
            (3, "%") => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    /// Equality, comparison, additive and multiplicative levels.
    fn binary(&mut self, level: usize) -> PResult<Expr> {
        if level > 3 {
            return self.unary();
        }
        self.chain(|p| {
            let mut left = p.binary(level + 1)?;
            while let Some(op) = p.binary_op(level) {
                let pos = p.bump().pos;
                p.link(pos)?;
                let right = p.binary(level + 1)?;
                left = Expr {
                    kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
                    pos,
                };
            }
            Ok(left)
        })
    }

    fn unary(&mut self) -> PResult<Expr> {
        let pos = self.peek().pos;
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("!") {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr {
            kind: ExprKind::Unary(op, Box::new(operand)),
            pos,
        })
    }

    fn args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.at_punct(")") {
            loop {
                args.push(self.expr()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut expr = p.primary()?;
            loop {
                if p.at_punct("(") {
                    let pos = p.bump().pos;
                    p.link(pos)?;
                    let args = p.args()?;
                    expr = Expr {
                        kind: ExprKind::Call(Box::new(expr), args),
                        pos,
                    };
                } else if p.at_punct(".") {
                    let pos = p.bump().pos;
                    p.link(pos)?;
                    let (name, _) = p.expect_ident()?;
                    expr = Expr {
                        kind: ExprKind::Field(Box::new(expr), name),
                        pos,
                    };
                } else if p.at_punct("[") {
                    let pos = p.bump().pos;
                    p.link(pos)?;
                    let index = p.expr()?;
                    p.expect_punct("]")?;
                    expr = Expr {
                        kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                        pos,
                    };
                } else {
                    return Ok(expr);
                }
            }
        })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let pos = token.pos;
        let kind = match token.tok {
            Tok::Int(i) => ExprKind::Int(i),
            Tok::Float(f) => ExprKind::Float(f),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::Ident(name) => ExprKind::Name(name),
            Tok::Kw(Keyword::True) => ExprKind::Bool(true),
            Tok::Kw(Keyword::False) => ExprKind::Bool(false),
            Tok::Kw(Keyword::Null) => ExprKind::Null,
            Tok::Punct("(") => {
                self.bump();
                let inner = self.expr()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            Tok::Punct("[") => {
                self.bump();
                let mut items = Vec::new();
                if !self.at_punct("]") {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct("]")?;
                return Ok(Expr {
                    kind: ExprKind::List(items),
                    pos,
                });
            }
            Tok::Kw(Keyword::New) => {
                self.bump();
                let (class, _) = self.expect_ident()?;
                self.expect_punct("(")?;
                let args = self.args()?;
                return Ok(Expr {
                    kind: ExprKind::New(class, args),
                    pos,
                });
            }
            Tok::Kw(Keyword::Fn) => {
                self.bump();
                let decl = self.function_rest("<lambda>".to_string(), pos, true)?;
                return Ok(Expr {
                    kind: ExprKind::Lambda(Arc::new(decl)),
                    pos,
                });
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.bump();
        Ok(Expr { kind, pos })
    }
}
