use super::{Capabilities, CompiledUnit, ExecFault, Invocation, Language};
use crate::error::CompileError;
use crate::executor::{Fault, Interpreter};
use crate::frame::{ScopeId, UnitId};
use crate::instrument::{self, Instrumented};
use crate::parser;
use crate::value::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The built-in `rcs` language.
#[derive(Debug, Default)]
pub struct ScriptLanguage;

impl ScriptLanguage {
    pub fn new() -> Self {
        ScriptLanguage
    }
}

impl Language for ScriptLanguage {
    fn name(&self) -> &str {
        "rcs"
    }

    fn extension(&self) -> &str {
        "rcs"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            debug: true,
            profile: true,
            invoke: true,
        }
    }

    fn text_flags(&self, source: &str) -> Vec<String> {
        parser::text_flags(source)
    }

    fn build(
        &self,
        unit: UnitId,
        source: &str,
        symbols: &BTreeSet<String>,
    ) -> Result<Arc<dyn CompiledUnit>, CompileError> {
        Ok(Arc::new(ScriptUnit::build(unit, source, symbols)?))
    }
}

/// A parsed and instrumented script. Holds no execution state.
pub struct ScriptUnit {
    unit: UnitId,
    source: String,
    instrumented: Instrumented,
}

impl ScriptUnit {
    pub fn build(unit: UnitId, source: &str, symbols: &BTreeSet<String>) -> Result<Self, CompileError> {
        let preprocessed = parser::preprocess(source, symbols)?;
        let program = parser::parse(&preprocessed.text)?;
        let instrumented = instrument::instrument(&program)?;
        tracing::info!(
            %unit,
            points = instrumented.table.points.len(),
            blanked = preprocessed.blanked_lines.len(),
            "script built"
        );
        Ok(Self {
            unit,
            source: source.to_string(),
            instrumented,
        })
    }

    pub fn instrumented(&self) -> &Instrumented {
        &self.instrumented
    }

    fn interpreter<'i>(&self, invocation: Invocation<'i>) -> Interpreter<'_, 'i> {
        Interpreter::new(
            self.unit,
            &self.instrumented.program,
            &self.instrumented.table,
            invocation.context,
            invocation.tracker,
            invocation.observer,
        )
    }
}

fn exec_fault(fault: Fault) -> ExecFault {
    match fault {
        Fault::Thrown {
            message, position, ..
        } => ExecFault::Error {
            message,
            position: Some(position),
        },
        Fault::Stopped { position } => ExecFault::Stopped { position },
    }
}

impl CompiledUnit for ScriptUnit {
    fn unit(&self) -> UnitId {
        self.unit
    }

    fn instrumented_source(&self) -> String {
        instrument::render(&self.source, &self.instrumented.table)
    }

    fn scope_of_line(&self, line: u32) -> Option<ScopeId> {
        self.instrumented.table.scope_of_line(line)
    }

    fn execute(&self, invocation: Invocation<'_>) -> Result<(), ExecFault> {
        let mut interpreter = self.interpreter(invocation);
        interpreter.run_module().map_err(exec_fault)?;
        interpreter.copy_outputs();
        Ok(())
    }

    fn call(
        &self,
        invocation: Invocation<'_>,
        function: &str,
        args: Vec<Value>,
    ) -> Result<Value, ExecFault> {
        let mut interpreter = self.interpreter(invocation);
        interpreter.run_module().map_err(exec_fault)?;
        let value = interpreter.call_global(function, args).map_err(exec_fault)?;
        interpreter.copy_outputs();
        Ok(value)
    }
}
