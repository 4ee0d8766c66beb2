use super::controls::{DebugControls, PauseReason, PausedFrame, SharedControls};
use super::evaluator::Evaluator;
use super::stepping::{DebugAction, StepMode};
use crate::frame::{Bindings, ExecEvent, ExecFrame, FrameObserver, Halt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Paused,
    Stopped,
    Disconnected,
}

enum ControlsRef<'c> {
    Borrowed(&'c mut dyn DebugControls),
    Shared(SharedControls),
}

impl ControlsRef<'_> {
    fn with<R>(&mut self, f: impl FnOnce(&mut dyn DebugControls) -> R) -> R {
        match self {
            ControlsRef::Borrowed(controls) => f(&mut **controls),
            ControlsRef::Shared(controls) => {
                let mut guard = controls.lock();
                f(&mut *guard)
            }
        }
    }
}

fn pause_reason(mode: StepMode, frame: &ExecFrame, controls: &dyn DebugControls) -> Option<PauseReason> {
    match frame.event {
        ExecEvent::Call => None,
        ExecEvent::Exception => {
            let handled = frame.exception.as_ref().map_or(false, |e| e.handled);
            controls
                .exception_policy()
                .pauses(handled)
                .then_some(PauseReason::Exception)
        }
        ExecEvent::Line if mode.admits_breakpoint(frame.depth) && controls.breakpoints().matches(frame) => {
            Some(PauseReason::Breakpoint)
        }
        ExecEvent::Line => mode.pauses_on_line(frame.depth).then_some(PauseReason::Step),
        ExecEvent::Return => mode.pauses_on_return(frame.depth).then_some(PauseReason::Step),
    }
}

/// Drives one debug invocation: watches the frame stream, decides where to
/// pause and hands each pause to the controls.
pub struct DebugSession<'c> {
    controls: ControlsRef<'c>,
    state: SessionState,
    mode: StepMode,
    evaluator: Evaluator,
    pauses: usize,
}

impl<'c> DebugSession<'c> {
    fn attach(controls: ControlsRef<'c>) -> Self {
        let mut session = Self {
            controls,
            state: SessionState::Running,
            mode: StepMode::Continue,
            evaluator: Evaluator::new(),
            pauses: 0,
        };
        session.controls.with(|c| c.on_attached());
        tracing::debug!("debug controls attached");
        session
    }

    pub fn borrowed(controls: &'c mut dyn DebugControls) -> Self {
        Self::attach(ControlsRef::Borrowed(controls))
    }

    pub fn shared(controls: SharedControls) -> Self {
        Self::attach(ControlsRef::Shared(controls))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pauses(&self) -> usize {
        self.pauses
    }

    fn is_detached(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    /// End of the invocation. Controls that were not disconnected get their
    /// detach notification here.
    pub fn finish(mut self) -> SessionState {
        if !self.is_detached() {
            self.controls.with(|c| c.on_detached());
            tracing::debug!(pauses = self.pauses, "debug controls detached");
        }
        self.state
    }

    fn apply(&mut self, action: DebugAction, frame: &ExecFrame) -> Result<(), Halt> {
        tracing::debug!(?action, line = frame.line(), depth = frame.depth, "resumed");
        match StepMode::after(action, frame.depth) {
            Some(mode) => {
                self.mode = mode;
                self.state = SessionState::Running;
                Ok(())
            }
            None if action == DebugAction::Stop => {
                self.state = SessionState::Stopped;
                Err(Halt)
            }
            None => {
                self.state = SessionState::Disconnected;
                self.controls.with(|c| c.on_detached());
                Ok(())
            }
        }
    }
}

impl FrameObserver for DebugSession<'_> {
    fn pushed(&mut self, stack: &[ExecFrame], _bindings: &dyn Bindings) -> Result<(), Halt> {
        if self.is_detached() {
            return Ok(());
        }
        if let Some(frame) = stack.last() {
            self.controls.with(|c| c.on_frame_pushed(frame));
        }
        Ok(())
    }

    fn swapped(
        &mut self,
        previous: &ExecFrame,
        stack: &[ExecFrame],
        bindings: &dyn Bindings,
    ) -> Result<(), Halt> {
        if self.is_detached() {
            return Ok(());
        }
        let Some(frame) = stack.last() else {
            return Ok(());
        };
        let mode = self.mode;
        let evaluator = &mut self.evaluator;
        let state = &mut self.state;
        let decision = self.controls.with(|controls| {
            controls.on_frame_swapped(previous, frame);
            let reason = pause_reason(mode, frame, controls)?;
            *state = SessionState::Paused;
            tracing::debug!(line = frame.line(), depth = frame.depth, ?reason, "paused");
            let variables = evaluator.evaluate(&bindings.visible());
            let paused = PausedFrame {
                frame,
                stack,
                variables: &variables,
                reason,
            };
            Some(controls.pause(&paused))
        });
        match decision {
            Some(action) => {
                self.pauses += 1;
                self.apply(action, frame)
            }
            None => Ok(()),
        }
    }

    fn completed(&mut self, previous: &ExecFrame, stack: &[ExecFrame]) {
        if self.is_detached() {
            return;
        }
        if let Some(frame) = stack.last() {
            self.controls.with(|c| c.on_frame_swapped(previous, frame));
        }
    }

    fn popped(&mut self, frame: &ExecFrame, _stack: &[ExecFrame]) {
        if self.is_detached() {
            return;
        }
        self.controls.with(|c| c.on_frame_popped(frame));
    }
}
