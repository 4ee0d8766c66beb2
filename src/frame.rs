//! Execution frame stream.
//!
//! Instrumented code reports its progress through a [`FrameStream`]: calls
//! push a frame, trace points swap the top frame to a new event, and returns
//! pop it. Observers (the debug session, the profiler) see every transition.

use crate::value::Value;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identity of a compiled unit's source. Stable across rebuilds of the same
/// code handle, so breakpoints survive cache expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UnitId(Uuid);

impl UnitId {
    pub fn new() -> Self {
        UnitId(Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lexical scope assigned during instrumentation. Scope 0 is the module body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecEvent {
    Call,
    Line,
    Return,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRef {
    pub unit: UnitId,
    pub line: u32,
    pub column: u32,
}

/// Where a trace point sits: line, column and its order among the trace
/// points on the same line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub sub: u32,
}

impl Location {
    pub fn new(line: u32, column: u32, sub: u32) -> Self {
        Self { line, column, sub }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    pub message: String,
    pub handled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecFrame {
    pub event: ExecEvent,
    pub source: SourceRef,
    pub sub: u32,
    pub depth: usize,
    pub scope: Option<ScopeId>,
    pub function: String,
    pub exception: Option<ExceptionInfo>,
}

impl ExecFrame {
    pub fn line(&self) -> u32 {
        self.source.line
    }

    pub fn is_pausable_kind(&self) -> bool {
        matches!(self.event, ExecEvent::Line | ExecEvent::Exception)
    }
}

impl fmt::Display for ExecFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} line {} (depth {})",
            self.event, self.function, self.source.line, self.depth
        )
    }
}

/// Cached control-variable state of the innermost loop that declares a
/// binding.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCache {
    pub entered: bool,
    pub cached: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Value,
    pub loop_cache: Option<LoopCache>,
}

/// Lazily enumerated bindings visible at the current trace point. Only
/// evaluated when a pause actually happens.
pub trait Bindings {
    fn visible(&self) -> Vec<Binding>;
}

pub struct NoBindings;

impl Bindings for NoBindings {
    fn visible(&self) -> Vec<Binding> {
        Vec::new()
    }
}

/// Returned by an observer to abort execution. Once halted, a stream stops
/// calling its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt;

pub trait FrameObserver {
    fn pushed(&mut self, stack: &[ExecFrame], bindings: &dyn Bindings) -> Result<(), Halt>;

    fn swapped(
        &mut self,
        previous: &ExecFrame,
        stack: &[ExecFrame],
        bindings: &dyn Bindings,
    ) -> Result<(), Halt>;

    /// The outermost frame finished normally and is about to be popped.
    fn completed(&mut self, previous: &ExecFrame, stack: &[ExecFrame]);

    fn popped(&mut self, frame: &ExecFrame, stack: &[ExecFrame]);
}

pub struct FrameStream<'o> {
    unit: UnitId,
    stack: Vec<ExecFrame>,
    observer: Option<&'o mut dyn FrameObserver>,
    halted: bool,
    /// Set when an exception was caught; the next trace point never
    /// continues the Line event that was interrupted.
    caught: bool,
}

impl<'o> FrameStream<'o> {
    pub fn new(unit: UnitId) -> Self {
        Self {
            unit,
            stack: Vec::new(),
            observer: None,
            halted: false,
            caught: false,
        }
    }

    pub fn observed(unit: UnitId, observer: &'o mut dyn FrameObserver) -> Self {
        Self {
            unit,
            stack: Vec::new(),
            observer: Some(observer),
            halted: false,
            caught: false,
        }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> Option<&ExecFrame> {
        self.stack.last()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    fn source(&self, at: Location) -> SourceRef {
        SourceRef {
            unit: self.unit,
            line: at.line,
            column: at.column,
        }
    }

    fn checked(&mut self, result: Result<(), Halt>) -> Result<(), Halt> {
        if result.is_err() {
            self.halted = true;
        }
        result
    }

    /// A call begins. Call frames are reported but never paused on.
    pub fn enter(&mut self, function: &str, at: Location, bindings: &dyn Bindings) -> Result<(), Halt> {
        if self.halted {
            return Err(Halt);
        }
        let frame = ExecFrame {
            event: ExecEvent::Call,
            source: self.source(at),
            sub: at.sub,
            depth: self.stack.len(),
            scope: None,
            function: function.to_string(),
            exception: None,
        };
        self.stack.push(frame);
        let result = match self.observer.as_deref_mut() {
            Some(observer) => observer.pushed(&self.stack, bindings),
            None => Ok(()),
        };
        self.checked(result)
    }

    /// A trace point before a statement or loop condition. A trace point that
    /// follows an earlier one on the same line continues the current Line
    /// event instead of starting a new one.
    pub fn line(
        &mut self,
        at: Location,
        scope: Option<ScopeId>,
        bindings: &dyn Bindings,
    ) -> Result<(), Halt> {
        if self.halted {
            return Err(Halt);
        }
        let source = self.source(at);
        let resumed = std::mem::take(&mut self.caught);
        let Some(top) = self.stack.last_mut() else {
            return Ok(());
        };
        if !resumed && top.event == ExecEvent::Line && top.source.line == at.line && at.sub > top.sub {
            top.source = source;
            top.sub = at.sub;
            top.scope = scope;
            return Ok(());
        }
        let previous = top.clone();
        top.event = ExecEvent::Line;
        top.source = source;
        top.sub = at.sub;
        top.scope = scope;
        top.exception = None;
        let result = match self.observer.as_deref_mut() {
            Some(observer) => observer.swapped(&previous, &self.stack, bindings),
            None => Ok(()),
        };
        self.checked(result)
    }

    /// An exception was raised at `at`. Reported once, at the raise site.
    pub fn exception(
        &mut self,
        at: Location,
        message: &str,
        handled: bool,
        bindings: &dyn Bindings,
    ) -> Result<(), Halt> {
        if self.halted {
            return Err(Halt);
        }
        let source = self.source(at);
        let Some(top) = self.stack.last_mut() else {
            return Ok(());
        };
        let previous = top.clone();
        top.event = ExecEvent::Exception;
        top.source = source;
        top.sub = at.sub;
        top.exception = Some(ExceptionInfo {
            message: message.to_string(),
            handled,
        });
        let result = match self.observer.as_deref_mut() {
            Some(observer) => observer.swapped(&previous, &self.stack, bindings),
            None => Ok(()),
        };
        self.checked(result)
    }

    /// A call returned normally. The callee is popped and the caller is
    /// swapped to a Return event at its current position. When the frame
    /// leaving is the outermost one, its own Return is reported as completion
    /// instead.
    pub fn leave(&mut self, bindings: &dyn Bindings) -> Result<(), Halt> {
        if self.halted {
            return Err(Halt);
        }
        if self.stack.len() <= 1 {
            self.complete();
            return Ok(());
        }
        let Some(callee) = self.stack.pop() else {
            return Ok(());
        };
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.popped(&callee, &self.stack);
        }
        let Some(caller) = self.stack.last_mut() else {
            return Ok(());
        };
        let previous = caller.clone();
        caller.event = ExecEvent::Return;
        caller.exception = None;
        let result = match self.observer.as_deref_mut() {
            Some(observer) => observer.swapped(&previous, &self.stack, bindings),
            None => Ok(()),
        };
        self.checked(result)
    }

    fn complete(&mut self) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        let previous = top.clone();
        top.event = ExecEvent::Return;
        top.exception = None;
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.completed(&previous, &self.stack);
        }
        if let Some(frame) = self.stack.pop() {
            if let Some(observer) = self.observer.as_deref_mut() {
                observer.popped(&frame, &self.stack);
            }
        }
    }

    /// An exception was caught by the current frame. Its handler starts a
    /// new Line event even on the line the exception interrupted.
    pub fn caught(&mut self) {
        self.caught = true;
    }

    /// Pop the top frame while an exception or stop propagates. No Return
    /// event is produced, and nothing is reported once halted.
    pub fn unwind(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        if self.halted {
            return;
        }
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.popped(&frame, &self.stack);
        }
    }
}
