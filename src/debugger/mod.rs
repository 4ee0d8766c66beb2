//! Step debugging on top of the frame stream.

mod breakpoints;
mod console;
mod controls;
mod evaluator;
mod session;
mod stepping;

pub use breakpoints::{Breakpoint, Breakpoints};
pub use console::ConsoleControls;
pub use controls::{
    shared, ContinueAllControls, DebugControls, PauseReason, PausedFrame, SharedControls,
    StackEvent, StackWatcher,
};
pub use evaluator::{Evaluator, Variable};
pub use session::{DebugSession, SessionState};
pub use stepping::{DebugAction, ExceptionPolicy, StepMode};
