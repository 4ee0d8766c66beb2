use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the controls want after a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugAction {
    Continue,
    StepIn,
    StepOver,
    StepOut,
    Stop,
    Disconnect,
}

/// When exception frames pause, independent of stepping and breakpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionPolicy {
    PauseOnAny,
    PauseOnNone,
    #[default]
    PauseOnUnhandled,
}

impl ExceptionPolicy {
    pub fn pauses(&self, handled: bool) -> bool {
        match self {
            ExceptionPolicy::PauseOnAny => true,
            ExceptionPolicy::PauseOnNone => false,
            ExceptionPolicy::PauseOnUnhandled => !handled,
        }
    }
}

impl FromStr for ExceptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(ExceptionPolicy::PauseOnAny),
            "none" => Ok(ExceptionPolicy::PauseOnNone),
            "unhandled" => Ok(ExceptionPolicy::PauseOnUnhandled),
            other => Err(format!("unknown exception policy '{}'", other)),
        }
    }
}

impl fmt::Display for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExceptionPolicy::PauseOnAny => "any",
            ExceptionPolicy::PauseOnNone => "none",
            ExceptionPolicy::PauseOnUnhandled => "unhandled",
        })
    }
}

/// Stepping state between two pauses. Depths are those of the frame the
/// step started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Continue,
    StepIn,
    StepOver { depth: usize },
    StepOut { depth: usize },
}

impl StepMode {
    /// Mode entered when `action` is chosen at a frame of `depth`. `None`
    /// for the terminal actions.
    pub fn after(action: DebugAction, depth: usize) -> Option<StepMode> {
        match action {
            DebugAction::Continue => Some(StepMode::Continue),
            DebugAction::StepIn => Some(StepMode::StepIn),
            DebugAction::StepOver => Some(StepMode::StepOver { depth }),
            DebugAction::StepOut => Some(StepMode::StepOut { depth }),
            DebugAction::Stop | DebugAction::Disconnect => None,
        }
    }

    pub fn pauses_on_line(&self, depth: usize) -> bool {
        match *self {
            StepMode::Continue => false,
            StepMode::StepIn => true,
            StepMode::StepOver { depth: origin } => depth <= origin,
            StepMode::StepOut { depth: origin } => depth < origin,
        }
    }

    /// Breakpoints stop Continue and StepIn anywhere. A step over or out
    /// skips the frames it is stepping past, breakpoints included.
    pub fn admits_breakpoint(&self, depth: usize) -> bool {
        match *self {
            StepMode::Continue | StepMode::StepIn => true,
            StepMode::StepOver { .. } | StepMode::StepOut { .. } => self.pauses_on_line(depth),
        }
    }

    /// A Return frame is the caller resuming after a call; it only stops a
    /// step that started deeper than the caller.
    pub fn pauses_on_return(&self, depth: usize) -> bool {
        match *self {
            StepMode::Continue => false,
            StepMode::StepIn => true,
            StepMode::StepOver { depth: origin } | StepMode::StepOut { depth: origin } => {
                depth < origin
            }
        }
    }
}
