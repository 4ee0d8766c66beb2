//! Embeddable script runtime with a step-debugging engine.
//!
//! Source text is held by a [`Code`] handle, built by a pluggable
//! [`Language`](language::Language) into an instrumented unit, and executed
//! under an [`ExecutionContext`]. Instrumented code reports its progress as a
//! stream of [`ExecFrame`]s, which drive breakpoints, stepping and profiling.

pub mod code;
pub mod context;
pub mod debugger;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod frame;
pub mod instrument;
pub mod language;
pub mod parser;
pub mod profiler;
pub mod value;

pub use code::{Code, GroupGuard};
pub use context::{ContextIdentity, ContextKind, ExecutionContext, OptionValue, Options};
pub use debugger::{
    Breakpoint, Breakpoints, ContinueAllControls, DebugAction, DebugControls, ExceptionPolicy,
    PausedFrame, StackWatcher, Variable,
};
pub use diagnostics::{Diagnostic, Position, Severity};
pub use error::{CompileError, ExecuteError, RunError, RunResult};
pub use frame::{ExecEvent, ExecFrame, ScopeId, UnitId};
pub use value::Value;
