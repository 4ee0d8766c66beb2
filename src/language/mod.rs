//! Pluggable language backends.
//!
//! The engine only sees a [`Language`] that builds source text into a
//! [`CompiledUnit`], and units that report progress through a frame stream.

mod script;

pub use script::{ScriptLanguage, ScriptUnit};

use crate::context::{ContextTracker, ExecutionContext};
use crate::diagnostics::Position;
use crate::error::{CompileError, ExecuteError, RunError};
use crate::frame::{FrameObserver, ScopeId, UnitId};
use crate::value::Value;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub debug: bool,
    pub profile: bool,
    pub invoke: bool,
}

pub trait Language: Send + Sync {
    fn name(&self) -> &str;

    fn extension(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Boolean options the source turns on for its own builds.
    fn text_flags(&self, _source: &str) -> Vec<String> {
        Vec::new()
    }

    fn build(
        &self,
        unit: UnitId,
        source: &str,
        symbols: &BTreeSet<String>,
    ) -> Result<Arc<dyn CompiledUnit>, CompileError>;
}

/// Everything one execution of a unit needs from its caller.
pub struct Invocation<'a> {
    pub context: &'a mut ExecutionContext,
    pub tracker: &'a ContextTracker,
    pub observer: Option<&'a mut dyn FrameObserver>,
}

/// Why a unit stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecFault {
    Error {
        message: String,
        position: Option<Position>,
    },
    Stopped {
        position: Option<Position>,
    },
}

impl From<ExecFault> for RunError {
    fn from(fault: ExecFault) -> Self {
        match fault {
            ExecFault::Error { message, position } => {
                RunError::Execute(ExecuteError::new(message, position))
            }
            ExecFault::Stopped { position } => RunError::DebugStop { position },
        }
    }
}

/// An immutable build artifact. Many contexts may execute one unit at the
/// same time; all mutable state lives in the invocation.
pub trait CompiledUnit: Send + Sync {
    fn unit(&self) -> UnitId;

    /// Source text with every trace point rendered inline.
    fn instrumented_source(&self) -> String;

    /// Lexical scope of the trace points on `line`, for branch-scoped
    /// breakpoints.
    fn scope_of_line(&self, line: u32) -> Option<ScopeId>;

    fn execute(&self, invocation: Invocation<'_>) -> Result<(), ExecFault>;

    /// Run the unit's top level, then call one of the functions it defines.
    fn call(
        &self,
        invocation: Invocation<'_>,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ExecFault>;
}

/// Languages by name and by file extension.
#[derive(Default)]
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn Language>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in script language.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptLanguage::new()));
        registry
    }

    pub fn register(&mut self, language: Arc<dyn Language>) {
        tracing::debug!(name = language.name(), "language registered");
        self.languages.insert(language.name().to_string(), language);
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Language>> {
        self.languages.get(name).cloned()
    }

    pub fn by_extension(&self, extension: &str) -> Option<Arc<dyn Language>> {
        let extension = extension.trim_start_matches('.');
        self.languages
            .values()
            .find(|l| l.extension() == extension)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.languages.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_resolves_script_files() {
        let registry = LanguageRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["rcs".to_string()]);
        assert!(registry.by_extension(".rcs").is_some());
        assert!(registry.by_extension("py").is_none());
        assert_eq!(registry.by_name("rcs").map(|l| l.extension().to_string()), Some("rcs".to_string()));
        assert!(registry.by_name("python").is_none());
    }
}
