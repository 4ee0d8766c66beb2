//! Trace instrumentation pass.
//!
//! Rewrites a parsed program so every statement is preceded by an explicit
//! trace statement, every loop carries a header trace point checked before
//! each condition test, and every loop owns a slot in the per-activation
//! loop state arena. The rewrite is reversible with [`strip`].

mod emit;

pub use emit::{render, strip_rendered};

use crate::diagnostics::{Diagnostic, Position};
use crate::error::CompileError;
use crate::frame::ScopeId;
use crate::parser::ast::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Statement,
    LoopCheck,
    Catch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracePoint {
    pub id: TraceId,
    pub position: Position,
    /// 1-based order among the trace points of the same line.
    pub sub: u32,
    pub scope: ScopeId,
    /// Enclosing loops of the current function, outermost first.
    pub loops: Vec<LoopId>,
    pub kind: TraceKind,
    /// Byte offset where the rendered trace call goes.
    pub insert_at: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSlot {
    pub id: LoopId,
    /// Loop nesting depth within its function.
    pub depth: u32,
    pub position: Position,
    pub vars: Vec<String>,
    /// Synthesized cache local per control variable, same order as `vars`.
    pub cache_locals: Vec<String>,
    pub entered_local: String,
    /// Byte offset where the rendered cache update goes.
    pub cache_at: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
    Branch,
    Loop,
    Handler,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeInfo {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub start: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    pub name: String,
    pub position: Position,
    pub body_open: Option<Position>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceTable {
    pub points: Vec<TracePoint>,
    pub loops: Vec<LoopSlot>,
    pub scopes: Vec<ScopeInfo>,
    pub functions: Vec<FunctionEntry>,
}

impl TraceTable {
    pub fn point(&self, id: TraceId) -> Option<&TracePoint> {
        self.points.get(id.0 as usize)
    }

    pub fn loop_slot(&self, id: LoopId) -> Option<&LoopSlot> {
        self.loops.get(id.0 as usize)
    }

    pub fn points_on_line(&self, line: u32) -> impl Iterator<Item = &TracePoint> {
        self.points.iter().filter(move |p| p.position.line == line)
    }

    /// Scope of the first trace point on `line`; the branch a breakpoint on
    /// that line is qualified with.
    pub fn scope_of_line(&self, line: u32) -> Option<ScopeId> {
        self.points_on_line(line).next().map(|p| p.scope)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&ScopeInfo> {
        self.scopes.get(id.0 as usize)
    }
}

pub struct Instrumented {
    pub program: Program,
    pub table: TraceTable,
}

/// Instrument a parsed program. Fails when a statement has no usable source
/// position; no trace point is ever dropped silently.
pub fn instrument(program: &Program) -> Result<Instrumented, CompileError> {
    let mut pass = Instrumenter::default();
    let module_start = program
        .body
        .first()
        .map(|s| s.pos)
        .unwrap_or(Position::new(1, 1, 0));
    let scope = pass.new_scope(ScopeKind::Module, module_start);
    pass.scopes.push(scope);
    let body = pass.stmts(program.body.clone());
    pass.scopes.pop();

    if !pass.diagnostics.is_empty() {
        return Err(CompileError::new(pass.diagnostics));
    }
    tracing::debug!(
        points = pass.table.points.len(),
        loops = pass.table.loops.len(),
        "instrumented program"
    );
    Ok(Instrumented {
        program: Program {
            body,
            end: program.end,
        },
        table: pass.table,
    })
}

#[derive(Default)]
struct Instrumenter {
    table: TraceTable,
    subs: HashMap<u32, u32>,
    scopes: Vec<ScopeId>,
    loops: Vec<LoopId>,
    diagnostics: Vec<Diagnostic>,
}

impl Instrumenter {
    fn new_scope(&mut self, kind: ScopeKind, start: Position) -> ScopeId {
        let id = ScopeId(self.table.scopes.len() as u32);
        self.table.scopes.push(ScopeInfo {
            id,
            parent: self.scopes.last().copied(),
            kind,
            start,
        });
        id
    }

    fn new_point(&mut self, position: Position, kind: TraceKind, insert_at: usize) -> Option<TraceId> {
        if !position.is_known() {
            self.diagnostics.push(Diagnostic::error(
                position,
                "cannot place a trace point: statement has no source position",
            ));
            return None;
        }
        let sub = self.subs.entry(position.line).or_insert(0);
        *sub += 1;
        let id = TraceId(self.table.points.len() as u32);
        self.table.points.push(TracePoint {
            id,
            position,
            sub: *sub,
            scope: self.scopes.last().copied().unwrap_or_default(),
            loops: self.loops.clone(),
            kind,
            insert_at,
        });
        Some(id)
    }

    fn stmts(&mut self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len() * 2);
        for stmt in stmts {
            if let StmtKind::Trace(_) = stmt.kind {
                out.push(stmt);
                continue;
            }
            // loops trace their own header on every pass
            if !stmt.kind.is_loop() {
                if let Some(id) = self.new_point(stmt.pos, TraceKind::Statement, stmt.pos.offset) {
                    out.push(Stmt {
                        kind: StmtKind::Trace(id),
                        pos: stmt.pos,
                        end: stmt.pos.offset,
                    });
                }
            }
            out.push(self.stmt(stmt));
        }
        out
    }

    fn block(&mut self, block: Block, kind: ScopeKind) -> Block {
        let start = block
            .open
            .or_else(|| block.stmts.first().map(|s| s.pos))
            .unwrap_or_default();
        let scope = self.new_scope(kind, start);
        self.block_in(block, scope)
    }

    fn block_in(&mut self, block: Block, scope: ScopeId) -> Block {
        self.scopes.push(scope);
        let stmts = self.stmts(block.stmts);
        self.scopes.pop();
        Block {
            stmts,
            open: block.open,
            close: block.close,
            scope,
        }
    }

    fn stmt(&mut self, stmt: Stmt) -> Stmt {
        let Stmt { kind, pos, end } = stmt;
        let kind = match kind {
            StmtKind::Let { name, value } => StmtKind::Let {
                name,
                value: self.expr(value),
            },
            StmtKind::Assign { target, value } => {
                let target = match target {
                    Target::Name(name) => Target::Name(name),
                    Target::Field(object, name) => Target::Field(self.expr(object), name),
                    Target::Index(object, index) => Target::Index(self.expr(object), self.expr(index)),
                };
                StmtKind::Assign {
                    target,
                    value: self.expr(value),
                }
            }
            StmtKind::Expr(e) => StmtKind::Expr(self.expr(e)),
            StmtKind::Return(value) => StmtKind::Return(value.map(|v| self.expr(v))),
            StmtKind::Throw(value) => StmtKind::Throw(self.expr(value)),
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = match cond {
                    Condition::Expr(e) => Condition::Expr(self.expr(e)),
                    Condition::Let { name, value } => Condition::Let {
                        name,
                        value: self.expr(value),
                    },
                };
                StmtKind::If {
                    cond,
                    then: self.block(then, ScopeKind::Branch),
                    otherwise: otherwise.map(|b| self.block(b, ScopeKind::Branch)),
                }
            }
            StmtKind::While {
                cond, body, header, ..
            } => {
                let trace = self.enter_loop(pos, header, Vec::new(), &body);
                let cond = self.expr(cond);
                let body = self.block(body, ScopeKind::Block);
                self.exit_loop();
                StmtKind::While {
                    cond,
                    body,
                    header,
                    trace,
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
                header,
                ..
            } => {
                let vars = init.as_deref().and_then(control_variable).into_iter().collect();
                let trace = self.enter_loop(pos, header, vars, &body);
                let init = init.map(|s| Box::new(self.stmt(*s)));
                let cond = cond.map(|c| self.expr(c));
                let step = step.map(|s| Box::new(self.stmt(*s)));
                let body = self.block(body, ScopeKind::Block);
                self.exit_loop();
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                    header,
                    trace,
                }
            }
            StmtKind::ForEach {
                var,
                iter,
                body,
                header,
                ..
            } => {
                let trace = self.enter_loop(pos, header, vec![var.clone()], &body);
                let iter = self.expr(iter);
                let body = self.block(body, ScopeKind::Block);
                self.exit_loop();
                StmtKind::ForEach {
                    var,
                    iter,
                    body,
                    header,
                    trace,
                }
            }
            StmtKind::Try {
                body,
                binding,
                handler,
                catch_pos,
            } => {
                let body = self.block(body, ScopeKind::Block);
                let start = handler.open.unwrap_or(catch_pos);
                let scope = self.new_scope(ScopeKind::Handler, start);
                self.scopes.push(scope);
                let insert_at = handler.open.map(|p| p.offset + 1).unwrap_or(catch_pos.offset);
                let mut stmts = Vec::new();
                if let Some(id) = self.new_point(catch_pos, TraceKind::Catch, insert_at) {
                    stmts.push(Stmt {
                        kind: StmtKind::Trace(id),
                        pos: catch_pos,
                        end: catch_pos.offset,
                    });
                }
                stmts.extend(self.stmts(handler.stmts));
                self.scopes.pop();
                StmtKind::Try {
                    body,
                    binding,
                    handler: Block {
                        stmts,
                        open: handler.open,
                        close: handler.close,
                        scope,
                    },
                    catch_pos,
                }
            }
            StmtKind::Function(decl) => StmtKind::Function(self.function(&decl)),
            StmtKind::Class(decl) => {
                let methods = decl.methods.iter().map(|m| self.function(m)).collect();
                StmtKind::Class(Arc::new(ClassDecl {
                    name: decl.name.clone(),
                    methods,
                    pos: decl.pos,
                }))
            }
            other @ (StmtKind::Break | StmtKind::Continue | StmtKind::Trace(_)) => other,
        };
        Stmt { kind, pos, end }
    }

    fn enter_loop(
        &mut self,
        pos: Position,
        header: Position,
        vars: Vec<String>,
        body: &Block,
    ) -> Option<LoopTrace> {
        let id = LoopId(self.table.loops.len() as u32);
        let depth = self.loops.len() as u32;
        let mut prefix = format!("__loop{}", depth);
        if self.table.loops.iter().any(|l| l.depth == depth) {
            prefix = format!("{}_{}", prefix, id.0);
        }
        let cache_at = body
            .close
            .map(|p| p.offset)
            .or_else(|| body.stmts.last().map(|s| s.end))
            .unwrap_or(header.offset);
        self.table.loops.push(LoopSlot {
            id,
            depth,
            position: pos,
            cache_locals: vars.iter().map(|v| format!("{}_{}", prefix, v)).collect(),
            entered_local: format!("{}_entered", prefix),
            vars,
            cache_at,
        });

        let scope = self.new_scope(ScopeKind::Loop, pos);
        self.scopes.push(scope);
        self.loops.push(id);
        self.new_point(header, TraceKind::LoopCheck, header.offset)
            .map(|header| LoopTrace { id, header })
    }

    fn exit_loop(&mut self) {
        self.loops.pop();
        self.scopes.pop();
    }

    fn function(&mut self, decl: &FnDecl) -> Arc<FnDecl> {
        let saved_loops = std::mem::take(&mut self.loops);
        self.table.functions.push(FunctionEntry {
            name: decl.name.clone(),
            position: decl.pos,
            body_open: decl.body.open,
        });
        let scope = self.new_scope(ScopeKind::Function, decl.pos);
        let body = self.block_in(decl.body.clone(), scope);
        self.loops = saved_loops;
        Arc::new(FnDecl {
            name: decl.name.clone(),
            params: decl.params.clone(),
            body,
            pos: decl.pos,
            lambda: decl.lambda,
        })
    }

    fn exprs(&mut self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&mut self, expr: Box<Expr>) -> Box<Expr> {
        Box::new(self.expr(*expr))
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        let Expr { kind, pos } = expr;
        let kind = match kind {
            ExprKind::List(items) => ExprKind::List(self.exprs(items)),
            ExprKind::Unary(op, e) => ExprKind::Unary(op, self.boxed(e)),
            ExprKind::Binary(op, l, r) => ExprKind::Binary(op, self.boxed(l), self.boxed(r)),
            ExprKind::Logical(op, l, r) => ExprKind::Logical(op, self.boxed(l), self.boxed(r)),
            ExprKind::Call(callee, args) => ExprKind::Call(self.boxed(callee), self.exprs(args)),
            ExprKind::Field(object, name) => ExprKind::Field(self.boxed(object), name),
            ExprKind::Index(object, index) => ExprKind::Index(self.boxed(object), self.boxed(index)),
            ExprKind::New(class, args) => ExprKind::New(class, self.exprs(args)),
            ExprKind::Lambda(decl) => ExprKind::Lambda(self.function(&decl)),
            leaf => leaf,
        };
        Expr { kind, pos }
    }
}

/// Name a C-style loop's init clause declares or assigns.
fn control_variable(init: &Stmt) -> Option<String> {
    match &init.kind {
        StmtKind::Let { name, .. } => Some(name.clone()),
        StmtKind::Assign {
            target: Target::Name(name),
            ..
        } => Some(name.clone()),
        _ => None,
    }
}

/// Remove every trace statement and loop annotation, restoring the program
/// the parser produced.
pub fn strip(program: &Program) -> Program {
    Program {
        body: strip_stmts(&program.body),
        end: program.end,
    }
}

fn strip_stmts(stmts: &[Stmt]) -> Vec<Stmt> {
    stmts
        .iter()
        .filter(|s| !matches!(s.kind, StmtKind::Trace(_)))
        .map(strip_stmt)
        .collect()
}

fn strip_block(block: &Block) -> Block {
    Block {
        stmts: strip_stmts(&block.stmts),
        open: block.open,
        close: block.close,
        scope: ScopeId::default(),
    }
}

fn strip_fn(decl: &FnDecl) -> Arc<FnDecl> {
    Arc::new(FnDecl {
        name: decl.name.clone(),
        params: decl.params.clone(),
        body: strip_block(&decl.body),
        pos: decl.pos,
        lambda: decl.lambda,
    })
}

fn strip_stmt(stmt: &Stmt) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::Let { name, value } => StmtKind::Let {
            name: name.clone(),
            value: strip_expr(value),
        },
        StmtKind::Assign { target, value } => StmtKind::Assign {
            target: match target {
                Target::Name(n) => Target::Name(n.clone()),
                Target::Field(o, n) => Target::Field(strip_expr(o), n.clone()),
                Target::Index(o, i) => Target::Index(strip_expr(o), strip_expr(i)),
            },
            value: strip_expr(value),
        },
        StmtKind::Expr(e) => StmtKind::Expr(strip_expr(e)),
        StmtKind::Return(v) => StmtKind::Return(v.as_ref().map(strip_expr)),
        StmtKind::Throw(v) => StmtKind::Throw(strip_expr(v)),
        StmtKind::If {
            cond,
            then,
            otherwise,
        } => StmtKind::If {
            cond: match cond {
                Condition::Expr(e) => Condition::Expr(strip_expr(e)),
                Condition::Let { name, value } => Condition::Let {
                    name: name.clone(),
                    value: strip_expr(value),
                },
            },
            then: strip_block(then),
            otherwise: otherwise.as_ref().map(strip_block),
        },
        StmtKind::While {
            cond, body, header, ..
        } => StmtKind::While {
            cond: strip_expr(cond),
            body: strip_block(body),
            header: *header,
            trace: None,
        },
        StmtKind::For {
            init,
            cond,
            step,
            body,
            header,
            ..
        } => StmtKind::For {
            init: init.as_deref().map(|s| Box::new(strip_stmt(s))),
            cond: cond.as_ref().map(strip_expr),
            step: step.as_deref().map(|s| Box::new(strip_stmt(s))),
            body: strip_block(body),
            header: *header,
            trace: None,
        },
        StmtKind::ForEach {
            var,
            iter,
            body,
            header,
            ..
        } => StmtKind::ForEach {
            var: var.clone(),
            iter: strip_expr(iter),
            body: strip_block(body),
            header: *header,
            trace: None,
        },
        StmtKind::Try {
            body,
            binding,
            handler,
            catch_pos,
        } => StmtKind::Try {
            body: strip_block(body),
            binding: binding.clone(),
            handler: strip_block(handler),
            catch_pos: *catch_pos,
        },
        StmtKind::Function(decl) => StmtKind::Function(strip_fn(decl)),
        StmtKind::Class(decl) => StmtKind::Class(Arc::new(ClassDecl {
            name: decl.name.clone(),
            methods: decl.methods.iter().map(|m| strip_fn(m)).collect(),
            pos: decl.pos,
        })),
        other => other.clone(),
    };
    Stmt {
        kind,
        pos: stmt.pos,
        end: stmt.end,
    }
}

fn strip_expr(expr: &Expr) -> Expr {
    let boxed = |e: &Expr| Box::new(strip_expr(e));
    let kind = match &expr.kind {
        ExprKind::List(items) => ExprKind::List(items.iter().map(strip_expr).collect()),
        ExprKind::Unary(op, e) => ExprKind::Unary(*op, boxed(e)),
        ExprKind::Binary(op, l, r) => ExprKind::Binary(*op, boxed(l), boxed(r)),
        ExprKind::Logical(op, l, r) => ExprKind::Logical(*op, boxed(l), boxed(r)),
        ExprKind::Call(c, args) => ExprKind::Call(boxed(c), args.iter().map(strip_expr).collect()),
        ExprKind::Field(o, n) => ExprKind::Field(boxed(o), n.clone()),
        ExprKind::Index(o, i) => ExprKind::Index(boxed(o), boxed(i)),
        ExprKind::New(c, args) => ExprKind::New(c.clone(), args.iter().map(strip_expr).collect()),
        ExprKind::Lambda(decl) => ExprKind::Lambda(strip_fn(decl)),
        leaf => leaf.clone(),
    };
    Expr {
        kind,
        pos: expr.pos,
    }
}
