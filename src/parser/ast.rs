use crate::diagnostics::Position;
use crate::frame::ScopeId;
use std::sync::Arc;

/// Index into a unit's trace point table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u32);

/// Stable identifier of an instrumented loop; indexes the per-activation
/// loop state arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Position,
    /// Byte offset one past the last character of the statement.
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopTrace {
    pub id: LoopId,
    pub header: TraceId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        value: Expr,
    },
    Assign {
        target: Target,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Condition,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
        header: Position,
        trace: Option<LoopTrace>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Block,
        header: Position,
        trace: Option<LoopTrace>,
    },
    ForEach {
        var: String,
        iter: Expr,
        body: Block,
        header: Position,
        trace: Option<LoopTrace>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Block,
        binding: String,
        handler: Block,
        catch_pos: Position,
    },
    Function(Arc<FnDecl>),
    Class(Arc<ClassDecl>),
    Trace(TraceId),
}

impl StmtKind {
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            StmtKind::While { .. } | StmtKind::For { .. } | StmtKind::ForEach { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(Expr),
    /// `if let name = value { .. }` binds `name` in the then-branch only.
    Let { name: String, value: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Field(Expr, String),
    Index(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Position of `{`, absent for a single unbraced statement.
    pub open: Option<Position>,
    pub close: Option<Position>,
    pub scope: ScopeId,
}

impl Block {
    pub fn braced(&self) -> bool {
        self.open.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Block,
    pub pos: Position,
    pub lambda: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub methods: Vec<Arc<FnDecl>>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    New(String, Vec<Expr>),
    Lambda(Arc<FnDecl>),
}
