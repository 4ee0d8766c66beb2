use super::builtins::{self, Builtin};
use super::env::{Scope, ScopeRole};
use crate::context::{ContextTracker, ExecutionContext};
use crate::diagnostics::Position;
use crate::frame::{
    Binding, Bindings, FrameObserver, FrameStream, Halt, Location, LoopCache, UnitId,
};
use crate::instrument::{TracePoint, TraceTable};
use crate::parser::ast::*;
use crate::value::{ClassValue, Closure, Instance, Value};
use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

/// Script calls nest at most this deep before raising a script exception.
pub const MAX_CALL_DEPTH: usize = 100;

/// Why execution left the normal path.
#[derive(Debug, Clone)]
pub enum Fault {
    /// A script exception: `throw` or a runtime error. Catchable by `try`.
    Thrown {
        value: Value,
        message: String,
        position: Position,
    },
    /// The frame observer halted execution. Never catchable.
    Stopped { position: Option<Position> },
}

type Exec<T> = Result<T, Fault>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Per-activation state of one instrumented loop.
#[derive(Debug, Clone, Default)]
struct LoopTraceState {
    cached: Vec<Option<Value>>,
    entered: bool,
}

struct Activation {
    scope: Arc<Scope>,
    /// Loop arena indexed by `LoopId`.
    loops: Vec<LoopTraceState>,
    point: Option<TraceId>,
}

impl Activation {
    fn new(scope: Arc<Scope>) -> Self {
        Self {
            scope,
            loops: Vec::new(),
            point: None,
        }
    }

    fn loop_state(&mut self, id: LoopId) -> &mut LoopTraceState {
        let index = id.0 as usize;
        if self.loops.len() <= index {
            self.loops.resize_with(index + 1, LoopTraceState::default);
        }
        &mut self.loops[index]
    }
}

struct FrameBindings<'b> {
    scope: &'b Scope,
    point: Option<&'b TracePoint>,
    table: &'b TraceTable,
    loops: &'b [LoopTraceState],
}

fn frame_bindings<'b>(frame: &'b Activation, table: &'b TraceTable) -> FrameBindings<'b> {
    FrameBindings {
        scope: &frame.scope,
        point: frame.point.and_then(|id| table.point(id)),
        table,
        loops: &frame.loops,
    }
}

impl FrameBindings<'_> {
    /// Cache of the innermost enclosing loop that controls `name`.
    fn loop_cache(&self, name: &str) -> Option<LoopCache> {
        let point = self.point?;
        for id in point.loops.iter().rev() {
            let Some(slot) = self.table.loop_slot(*id) else {
                continue;
            };
            let Some(index) = slot.vars.iter().position(|v| v == name) else {
                continue;
            };
            let state = self.loops.get(id.0 as usize);
            return Some(LoopCache {
                entered: state.map(|s| s.entered).unwrap_or(false),
                cached: state.and_then(|s| s.cached.get(index).cloned().flatten()),
            });
        }
        None
    }
}

impl Bindings for FrameBindings<'_> {
    fn visible(&self) -> Vec<Binding> {
        self.scope
            .visible()
            .into_iter()
            .filter(|(_, value)| !value.is_declaration())
            .map(|(name, value)| {
                let loop_cache = self.loop_cache(&name);
                Binding {
                    name,
                    value,
                    loop_cache,
                }
            })
            .collect()
    }
}

/// Tree-walking executor for one invocation of an instrumented program.
pub struct Interpreter<'u, 'i> {
    program: &'u Program,
    table: &'u TraceTable,
    stream: FrameStream<'i>,
    globals: Arc<Scope>,
    context: &'i mut ExecutionContext,
    tracker: &'i ContextTracker,
    frame: Activation,
    try_depth: usize,
    call_depth: usize,
}

impl<'u, 'i> Interpreter<'u, 'i> {
    pub fn new(
        unit: UnitId,
        program: &'u Program,
        table: &'u TraceTable,
        context: &'i mut ExecutionContext,
        tracker: &'i ContextTracker,
        observer: Option<&'i mut dyn FrameObserver>,
    ) -> Self {
        let stream = match observer {
            Some(observer) => FrameStream::observed(unit, observer),
            None => FrameStream::new(unit),
        };
        let globals = Scope::global();
        for (name, value) in context.inputs() {
            globals.declare(name, value.clone());
        }
        Self {
            program,
            table,
            stream,
            frame: Activation::new(globals.clone()),
            globals,
            context,
            tracker,
            try_depth: 0,
            call_depth: 0,
        }
    }

    /// Execute the module's top level under a `<module>` call frame.
    pub fn run_module(&mut self) -> Result<(), Fault> {
        let program = self.program;
        let Some(first) = program.body.first() else {
            return Ok(());
        };
        let at = Location::new(first.pos.line, first.pos.column, 0);
        let entered = {
            let bindings = frame_bindings(&self.frame, self.table);
            self.stream.enter("<module>", at, &bindings)
        };
        if entered.is_err() {
            self.stream.unwind();
            return Err(Fault::Stopped {
                position: Some(first.pos),
            });
        }
        match self.exec_stmts(&program.body) {
            Ok(_) => self.leave(program.end),
            Err(fault) => {
                self.stream.unwind();
                Err(fault)
            }
        }
    }

    /// Call a function the module defined at top level.
    pub fn call_global(&mut self, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let position = self.program.end;
        match self.globals.get_local(name) {
            Some(callee @ (Value::Function(_) | Value::Class(_))) => {
                self.call_value(callee, args, position)
            }
            Some(other) => Err(Fault::Thrown {
                message: format!("'{}' is a {}, not a function", name, other.type_name()),
                value: other,
                position,
            }),
            None => Err(Fault::Thrown {
                value: Value::Null,
                message: format!("no function named '{}'", name),
                position,
            }),
        }
    }

    /// Copy every declared output back from the invocation's globals.
    pub fn copy_outputs(&mut self) {
        for name in self.context.output_names() {
            if let Some(value) = self.globals.get_local(&name) {
                self.context.set_output(name, value);
            }
        }
    }

    fn leave(&mut self, position: Position) -> Exec<()> {
        let bindings = frame_bindings(&self.frame, self.table);
        self.stream.leave(&bindings).map_err(|Halt| Fault::Stopped {
            position: Some(position),
        })
    }

    fn trace(&mut self, id: TraceId) -> Exec<()> {
        let table = self.table;
        let Some(point) = table.point(id) else {
            return Ok(());
        };
        self.frame.point = Some(id);
        let at = Location::new(point.position.line, point.position.column, point.sub);
        let bindings = frame_bindings(&self.frame, table);
        self.stream
            .line(at, Some(point.scope), &bindings)
            .map_err(|Halt| Fault::Stopped {
                position: Some(point.position),
            })
    }

    /// Report an exception at its raise site and build the fault that
    /// carries it up the stack.
    fn raise(&mut self, value: Value, message: String, position: Position) -> Fault {
        let handled = self.try_depth > 0;
        let sub = self
            .frame
            .point
            .and_then(|id| self.table.point(id))
            .filter(|p| p.position.line == position.line)
            .map(|p| p.sub)
            .unwrap_or(0);
        let at = Location::new(position.line, position.column, sub);
        let reported = {
            let bindings = frame_bindings(&self.frame, self.table);
            self.stream.exception(at, &message, handled, &bindings)
        };
        if !handled {
            tracing::debug!(%position, %message, "unhandled script exception");
        }
        match reported {
            Ok(()) => Fault::Thrown {
                value,
                message,
                position,
            },
            Err(Halt) => Fault::Stopped {
                position: Some(position),
            },
        }
    }

    fn error(&mut self, position: Position, message: impl Into<String>) -> Fault {
        let message = message.into();
        self.raise(Value::str(&message), message, position)
    }

    fn capture(&self) -> Option<Arc<Scope>> {
        match self.frame.scope.role() {
            ScopeRole::Global => None,
            _ => Some(self.frame.scope.clone()),
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Exec<Flow> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_in(&mut self, stmts: &[Stmt], scope: Arc<Scope>) -> Exec<Flow> {
        let outer = mem::replace(&mut self.frame.scope, scope);
        let result = self.exec_stmts(stmts);
        self.frame.scope = outer;
        result
    }

    fn exec_block(&mut self, block: &Block) -> Exec<Flow> {
        let scope = Scope::block(&self.frame.scope);
        self.exec_in(&block.stmts, scope)
    }

    fn exec(&mut self, stmt: &Stmt) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Trace(id) => self.trace(*id)?,
            StmtKind::Let { name, value } => {
                let value = self.eval(value)?;
                self.frame.scope.declare(name, value);
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value, stmt.pos)?;
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let taken = match cond {
                    Condition::Expr(expr) => {
                        if self.eval(expr)?.truthy() {
                            Some(Scope::block(&self.frame.scope))
                        } else {
                            None
                        }
                    }
                    Condition::Let { name, value } => {
                        let value = self.eval(value)?;
                        if value.is_null() {
                            None
                        } else {
                            let scope = Scope::block(&self.frame.scope);
                            scope.declare(name, value);
                            Some(scope)
                        }
                    }
                };
                return match (taken, otherwise) {
                    (Some(scope), _) => self.exec_in(&then.stmts, scope),
                    (None, Some(otherwise)) => self.exec_block(otherwise),
                    (None, None) => Ok(Flow::Normal),
                };
            }
            StmtKind::While {
                cond, body, trace, ..
            } => {
                let scope = Scope::block(&self.frame.scope);
                let outer = mem::replace(&mut self.frame.scope, scope);
                let result = self.exec_while(cond, body, trace.as_ref());
                self.frame.scope = outer;
                return result;
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
                trace,
                ..
            } => {
                let scope = Scope::block(&self.frame.scope);
                let outer = mem::replace(&mut self.frame.scope, scope);
                let result = self.exec_for(
                    init.as_deref(),
                    cond.as_ref(),
                    step.as_deref(),
                    body,
                    trace.as_ref(),
                );
                self.frame.scope = outer;
                return result;
            }
            StmtKind::ForEach {
                var,
                iter,
                body,
                trace,
                ..
            } => {
                let items = self.eval(iter)?;
                let items = self.iterate(items, iter.pos)?;
                let scope = Scope::block(&self.frame.scope);
                let outer = mem::replace(&mut self.frame.scope, scope);
                let result = self.exec_foreach(var, &items, body, trace.as_ref());
                self.frame.scope = outer;
                return result;
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr)?;
                let message = exception_message(&value);
                return Err(self.raise(value, message, stmt.pos));
            }
            StmtKind::Try {
                body,
                binding,
                handler,
                ..
            } => {
                self.try_depth += 1;
                let result = self.exec_block(body);
                self.try_depth -= 1;
                return match result {
                    Err(Fault::Thrown { value, .. }) => {
                        self.stream.caught();
                        let scope = Scope::block(&self.frame.scope);
                        scope.declare(binding, value);
                        self.exec_in(&handler.stmts, scope)
                    }
                    other => other,
                };
            }
            StmtKind::Function(decl) => {
                let closure = Closure {
                    decl: decl.clone(),
                    captured: self.capture(),
                };
                self.frame
                    .scope
                    .declare(&decl.name, Value::Function(Arc::new(closure)));
            }
            StmtKind::Class(decl) => {
                let class = ClassValue {
                    decl: decl.clone(),
                    captured: self.capture(),
                };
                self.frame
                    .scope
                    .declare(&decl.name, Value::Class(Arc::new(class)));
            }
        }
        Ok(Flow::Normal)
    }

    fn reset_loop(&mut self, trace: Option<&LoopTrace>) {
        let Some(trace) = trace else {
            return;
        };
        let vars = self
            .table
            .loop_slot(trace.id)
            .map(|slot| slot.vars.len())
            .unwrap_or(0);
        let state = self.frame.loop_state(trace.id);
        state.entered = false;
        state.cached = vec![None; vars];
    }

    fn loop_check(&mut self, trace: Option<&LoopTrace>) -> Exec<()> {
        match trace {
            Some(trace) => self.trace(trace.header),
            None => Ok(()),
        }
    }

    /// Record the control variables' values at the end of a pass.
    fn update_loop_cache(&mut self, trace: Option<&LoopTrace>) {
        let Some(trace) = trace else {
            return;
        };
        let table = self.table;
        let values: Vec<Option<Value>> = table
            .loop_slot(trace.id)
            .map(|slot| slot.vars.iter().map(|v| self.frame.scope.lookup(v)).collect())
            .unwrap_or_default();
        let state = self.frame.loop_state(trace.id);
        state.cached = values;
        state.entered = true;
    }

    fn exec_while(&mut self, cond: &Expr, body: &Block, trace: Option<&LoopTrace>) -> Exec<Flow> {
        self.reset_loop(trace);
        loop {
            self.loop_check(trace)?;
            if !self.eval(cond)?.truthy() {
                break;
            }
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.update_loop_cache(trace);
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Stmt>,
        body: &Block,
        trace: Option<&LoopTrace>,
    ) -> Exec<Flow> {
        if let Some(init) = init {
            self.exec(init)?;
        }
        self.reset_loop(trace);
        loop {
            self.loop_check(trace)?;
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    break;
                }
            }
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.update_loop_cache(trace);
            if let Some(step) = step {
                self.exec(step)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_foreach(
        &mut self,
        var: &str,
        items: &[Value],
        body: &Block,
        trace: Option<&LoopTrace>,
    ) -> Exec<Flow> {
        self.reset_loop(trace);
        let mut items = items.iter();
        loop {
            self.loop_check(trace)?;
            let Some(item) = items.next() else {
                break;
            };
            self.frame.scope.declare(var, item.clone());
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            self.update_loop_cache(trace);
        }
        Ok(Flow::Normal)
    }

    fn iterate(&mut self, value: Value, position: Position) -> Exec<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.as_ref().clone()),
            Value::Str(text) => Ok(text.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(self.error(
                position,
                format!("cannot iterate over {}", other.type_name()),
            )),
        }
    }

    fn assign(&mut self, target: &Target, value: Value, position: Position) -> Exec<()> {
        match target {
            Target::Name(name) => {
                self.assign_name(name, value);
                Ok(())
            }
            Target::Field(object, field) => match self.eval(object)? {
                Value::Object(instance) => {
                    instance.set(field, value);
                    Ok(())
                }
                other => Err(self.error(
                    position,
                    format!("cannot set field '{}' on {}", field, other.type_name()),
                )),
            },
            Target::Index(object, index) => {
                let index = self.eval(index)?;
                self.assign_index(object, index, value, position)
            }
        }
    }

    fn assign_name(&mut self, name: &str, value: Value) {
        if !self.frame.scope.assign(name, value.clone()) {
            self.frame.scope.function_scope().declare(name, value);
        }
    }

    /// Lists are shared values; writing an element rebuilds the list and
    /// stores it back through the indexed expression.
    fn assign_index(&mut self, object: &Expr, index: Value, value: Value, position: Position) -> Exec<()> {
        let Value::List(mut items) = self.eval(object)? else {
            return Err(self.error(position, "only list elements can be assigned by index"));
        };
        let slot = self.list_index(&index, items.len(), position)?;
        Arc::make_mut(&mut items)[slot] = value;
        let updated = Value::List(items);
        match &object.kind {
            ExprKind::Name(name) => {
                self.assign_name(name, updated);
                Ok(())
            }
            ExprKind::Field(inner, field) => {
                self.assign(&Target::Field((**inner).clone(), field.clone()), updated, position)
            }
            ExprKind::Index(inner, inner_index) => {
                let inner_index = self.eval(inner_index)?;
                self.assign_index(inner, inner_index, updated, position)
            }
            _ => Err(self.error(position, "cannot assign to a temporary list")),
        }
    }

    fn list_index(&mut self, index: &Value, len: usize, position: Position) -> Exec<usize> {
        match index.as_int() {
            Some(i) if i >= 0 && (i as usize) < len => Ok(i as usize),
            Some(i) => Err(self.error(
                position,
                format!("index {} out of range for length {}", i, len),
            )),
            None => Err(self.error(
                position,
                format!("index must be int, got {}", index.type_name()),
            )),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Exec<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::List(items) => Ok(Value::list(self.eval_args(items)?)),
            ExprKind::Name(name) => match self.frame.scope.lookup(name) {
                Some(value) => Ok(value),
                None => match Builtin::lookup(name) {
                    Some(builtin) => Ok(Value::Builtin(builtin)),
                    None => Err(self.error(expr.pos, format!("undefined name '{}'", name))),
                },
            },
            ExprKind::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
                    (UnaryOp::Neg, Value::Int(i)) => match i.checked_neg() {
                        Some(n) => Ok(Value::Int(n)),
                        None => Err(self.error(expr.pos, "integer overflow")),
                    },
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Neg, other) => Err(self.error(
                        expr.pos,
                        format!("cannot negate {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                apply_binary(*op, &lhs, &rhs).map_err(|message| self.error(expr.pos, message))
            }
            ExprKind::Logical(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?.truthy();
                let result = match op {
                    LogicalOp::And if !lhs => false,
                    LogicalOp::Or if lhs => true,
                    _ => self.eval(rhs)?.truthy(),
                };
                Ok(Value::Bool(result))
            }
            ExprKind::Call(callee, args) => {
                if let ExprKind::Field(object, method) = &callee.kind {
                    let object = self.eval(object)?;
                    let args = self.eval_args(args)?;
                    return self.call_method(object, method, args, expr.pos);
                }
                let callee = self.eval(callee)?;
                let args = self.eval_args(args)?;
                self.call_value(callee, args, expr.pos)
            }
            ExprKind::Field(object, field) => match self.eval(object)? {
                Value::Object(instance) => match instance.get(field) {
                    Some(value) => Ok(value),
                    None => Err(self.error(
                        expr.pos,
                        format!("{} object has no field '{}'", instance.class.decl.name, field),
                    )),
                },
                other => Err(self.error(
                    expr.pos,
                    format!("{} has no field '{}'", other.type_name(), field),
                )),
            },
            ExprKind::Index(object, index) => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match &object {
                    Value::List(items) => {
                        let slot = self.list_index(&index, items.len(), expr.pos)?;
                        Ok(items[slot].clone())
                    }
                    Value::Str(text) => {
                        let chars: Vec<char> = text.chars().collect();
                        let slot = self.list_index(&index, chars.len(), expr.pos)?;
                        Ok(Value::str(chars[slot].to_string()))
                    }
                    other => Err(self.error(
                        expr.pos,
                        format!("{} is not indexable", other.type_name()),
                    )),
                }
            }
            ExprKind::New(class, args) => {
                let args = self.eval_args(args)?;
                match self.frame.scope.lookup(class) {
                    Some(Value::Class(class)) => self.construct(&class, args, expr.pos),
                    Some(other) => Err(self.error(
                        expr.pos,
                        format!("'{}' is a {}, not a class", class, other.type_name()),
                    )),
                    None => Err(self.error(expr.pos, format!("undefined class '{}'", class))),
                }
            }
            ExprKind::Lambda(decl) => Ok(Value::Function(Arc::new(Closure {
                decl: decl.clone(),
                captured: self.capture(),
            }))),
        }
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, position: Position) -> Exec<Value> {
        match callee {
            Value::Function(closure) => {
                self.call_function(&closure.decl, closure.captured.clone(), None, args, position)
            }
            Value::Class(class) => self.construct(&class, args, position),
            Value::Builtin(builtin) => {
                let result = builtins::call(builtin, args, self.context, self.tracker);
                result.map_err(|message| self.error(position, message))
            }
            other => Err(self.error(
                position,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    fn call_method(&mut self, object: Value, name: &str, args: Vec<Value>, position: Position) -> Exec<Value> {
        let Value::Object(instance) = &object else {
            return Err(self.error(
                position,
                format!("{} has no method '{}'", object.type_name(), name),
            ));
        };
        if let Some(field) = instance.get(name) {
            return self.call_value(field, args, position);
        }
        let class = instance.class.clone();
        match class.method(name) {
            Some(method) => {
                self.call_function(&method, class.captured.clone(), Some(object), args, position)
            }
            None => Err(self.error(
                position,
                format!("{} object has no method '{}'", class.decl.name, name),
            )),
        }
    }

    fn construct(&mut self, class: &Arc<ClassValue>, args: Vec<Value>, position: Position) -> Exec<Value> {
        let object = Value::Object(Arc::new(Instance::new(class.clone())));
        match class.method("init") {
            Some(init) => {
                self.call_function(&init, class.captured.clone(), Some(object.clone()), args, position)?;
            }
            None if !args.is_empty() => {
                return Err(self.error(
                    position,
                    format!("{}() takes no arguments", class.decl.name),
                ));
            }
            None => {}
        }
        Ok(object)
    }

    fn call_function(
        &mut self,
        decl: &Arc<FnDecl>,
        captured: Option<Arc<Scope>>,
        this: Option<Value>,
        args: Vec<Value>,
        position: Position,
    ) -> Exec<Value> {
        let receiver = usize::from(this.is_some());
        if decl.params.len() != args.len() + receiver {
            return Err(self.error(
                position,
                format!(
                    "{}() takes {} argument(s), got {}",
                    decl.name,
                    decl.params.len().saturating_sub(receiver),
                    args.len()
                ),
            ));
        }
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.error(position, "maximum call depth exceeded"));
        }

        let scope = Scope::function(captured.unwrap_or_else(|| self.globals.clone()));
        for (param, value) in decl.params.iter().zip(this.into_iter().chain(args)) {
            scope.declare(param, value);
        }
        let caller = mem::replace(&mut self.frame, Activation::new(scope));
        self.call_depth += 1;
        tracing::trace!(function = %decl.name, depth = self.call_depth, "call");

        let at = Location::new(decl.pos.line, decl.pos.column, 0);
        let entered = {
            let bindings = frame_bindings(&self.frame, self.table);
            self.stream.enter(&decl.name, at, &bindings)
        };
        let result = match entered {
            Ok(()) => self.exec_stmts(&decl.body.stmts),
            Err(Halt) => Err(Fault::Stopped {
                position: Some(decl.pos),
            }),
        };

        self.frame = caller;
        self.call_depth -= 1;
        match result {
            Ok(flow) => {
                self.leave(position)?;
                Ok(match flow {
                    Flow::Return(value) => value,
                    _ => Value::Null,
                })
            }
            Err(fault) => {
                self.stream.unwind();
                Err(fault)
            }
        }
    }
}

fn exception_message(value: &Value) -> String {
    if let Value::Object(instance) = value {
        if let Some(message) = instance.get("message") {
            return message.to_string();
        }
    }
    value.to_string()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn ordered(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => false,
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use BinaryOp::*;
    match (op, lhs, rhs) {
        (Eq, _, _) => Ok(Value::Bool(lhs == rhs)),
        (Ne, _, _) => Ok(Value::Bool(lhs != rhs)),
        (Add, Value::Str(a), b) => Ok(Value::str(format!("{}{}", a, b))),
        (Add, a, Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (Add, Value::List(a), Value::List(b)) => {
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Lt | Le | Gt | Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(ordered(op, a.cmp(b)))),
        (_, Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let checked = match op {
                Add => a.checked_add(b),
                Sub => a.checked_sub(b),
                Mul => a.checked_mul(b),
                Div | Rem if b == 0 => return Err("division by zero".to_string()),
                Div => a.checked_div(b),
                Rem => a.checked_rem(b),
                _ => return Ok(Value::Bool(ordered(op, a.cmp(&b)))),
            };
            checked
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string())
        }
        _ => match (number(lhs), number(rhs)) {
            (Some(a), Some(b)) => match op {
                Add => Ok(Value::Float(a + b)),
                Sub => Ok(Value::Float(a - b)),
                Mul => Ok(Value::Float(a * b)),
                Div | Rem if b == 0.0 => Err("division by zero".to_string()),
                Div => Ok(Value::Float(a / b)),
                Rem => Ok(Value::Float(a % b)),
                _ => a
                    .partial_cmp(&b)
                    .map(|ordering| Value::Bool(ordered(op, ordering)))
                    .ok_or_else(|| "cannot compare NaN".to_string()),
            },
            _ => Err(format!(
                "unsupported operand types for {}: {} and {}",
                symbol(op),
                lhs.type_name(),
                rhs.type_name()
            )),
        },
    }
}
