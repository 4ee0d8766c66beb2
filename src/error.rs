use crate::context::ContextKind;
use crate::diagnostics::{Diagnostic, Position, Severity};
use std::fmt;
use thiserror::Error;

pub type RunResult<T> = Result<T, RunError>;

/// Build failure. Carries every diagnostic the build produced, at least one
/// of them an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn single(position: Position, message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic::error(position, message)],
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn first_position(&self) -> Option<Position> {
        self.errors().next().map(|d| d.position)
    }

}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed with {} error(s)", self.error_count())?;
        for diagnostic in self.errors() {
            write!(f, "\n  [{}] {}", diagnostic.position, diagnostic.message)?;
        }
        Ok(())
    }
}

/// Unhandled runtime fault, or a lazy build that failed on the way to running.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ExecuteError {
    pub message: String,
    pub position: Option<Position>,
    #[source]
    pub inner: Option<CompileError>,
}

impl ExecuteError {
    pub fn new(message: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            message: message.into(),
            position,
            inner: None,
        }
    }

    pub fn from_build(err: CompileError) -> Self {
        Self {
            message: "script failed to build".to_string(),
            position: err.first_position(),
            inner: Some(err),
        }
    }
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "{} (at {})", self.message, position),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error("debugging stopped")]
    DebugStop { position: Option<Position> },
    #[error("no debug controls are attached")]
    NoDebugControls,
    #[error("no profiler is attached")]
    NoProfiler,
    #[error("a {existing:?} group is already active")]
    RunGroupExists { existing: ContextKind },
}

impl RunError {
    pub fn is_debug_stop(&self) -> bool {
        matches!(self, RunError::DebugStop { .. })
    }
}
