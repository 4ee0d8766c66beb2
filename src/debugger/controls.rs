use super::breakpoints::Breakpoints;
use super::evaluator::Variable;
use super::stepping::{DebugAction, ExceptionPolicy};
use crate::frame::ExecFrame;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PauseReason {
    Breakpoint,
    Step,
    Exception,
}

/// Everything the controls can inspect while execution is paused.
pub struct PausedFrame<'p> {
    pub frame: &'p ExecFrame,
    pub stack: &'p [ExecFrame],
    pub variables: &'p [Variable],
    pub reason: PauseReason,
}

impl PausedFrame<'_> {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Pause policy for a debug session. `pause` runs synchronously on the
/// executing thread and blocks it until an action is returned.
pub trait DebugControls: Send {
    fn breakpoints(&self) -> &Breakpoints;

    fn breakpoints_mut(&mut self) -> &mut Breakpoints;

    fn exception_policy(&self) -> ExceptionPolicy {
        ExceptionPolicy::default()
    }

    fn pause(&mut self, paused: &PausedFrame<'_>) -> DebugAction;

    fn on_attached(&mut self) {}

    fn on_detached(&mut self) {}

    fn on_frame_pushed(&mut self, _frame: &ExecFrame) {}

    fn on_frame_swapped(&mut self, _previous: &ExecFrame, _current: &ExecFrame) {}

    fn on_frame_popped(&mut self, _frame: &ExecFrame) {}
}

/// Controls attached to a code handle; locked only for the duration of each
/// callback.
pub type SharedControls = Arc<Mutex<dyn DebugControls>>;

pub fn shared(controls: impl DebugControls + 'static) -> SharedControls {
    Arc::new(Mutex::new(controls))
}

/// Resumes every pause with Continue, counting them.
#[derive(Debug, Default)]
pub struct ContinueAllControls {
    breakpoints: Breakpoints,
    policy: ExceptionPolicy,
    pub pauses: Vec<(PauseReason, u32)>,
}

impl ContinueAllControls {
    pub fn new(breakpoints: Breakpoints) -> Self {
        Self {
            breakpoints,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl DebugControls for ContinueAllControls {
    fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    fn exception_policy(&self) -> ExceptionPolicy {
        self.policy
    }

    fn pause(&mut self, paused: &PausedFrame<'_>) -> DebugAction {
        self.pauses.push((paused.reason, paused.frame.line()));
        DebugAction::Continue
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StackEvent {
    Attached,
    Pushed(ExecFrame),
    Swapped { previous: ExecFrame, current: ExecFrame },
    Popped(ExecFrame),
    Detached,
}

/// Records every stack transition and never pauses.
#[derive(Debug, Default)]
pub struct StackWatcher {
    breakpoints: Breakpoints,
    pub events: Vec<StackEvent>,
}

impl StackWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugControls for StackWatcher {
    fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    fn exception_policy(&self) -> ExceptionPolicy {
        ExceptionPolicy::PauseOnNone
    }

    fn pause(&mut self, _paused: &PausedFrame<'_>) -> DebugAction {
        DebugAction::Continue
    }

    fn on_attached(&mut self) {
        self.events.push(StackEvent::Attached);
    }

    fn on_detached(&mut self) {
        self.events.push(StackEvent::Detached);
    }

    fn on_frame_pushed(&mut self, frame: &ExecFrame) {
        self.events.push(StackEvent::Pushed(frame.clone()));
    }

    fn on_frame_swapped(&mut self, previous: &ExecFrame, current: &ExecFrame) {
        self.events.push(StackEvent::Swapped {
            previous: previous.clone(),
            current: current.clone(),
        });
    }

    fn on_frame_popped(&mut self, frame: &ExecFrame) {
        self.events.push(StackEvent::Popped(frame.clone()));
    }
}
