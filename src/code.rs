//! Source code handle: build cache, attached collaborators and the
//! Build/Run/Debug/Profile entry points.

use crate::context::{ContextKind, ContextTracker, ExecutionContext, GroupInfo};
use crate::debugger::{Breakpoint, DebugControls, DebugSession, SharedControls};
use crate::error::{CompileError, ExecuteError, RunError, RunResult};
use crate::frame::{FrameObserver, UnitId};
use crate::language::{CompiledUnit, Invocation, Language, ScriptLanguage};
use crate::profiler::{LineProfiler, ProfileObserver, SharedProfiler};
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type UnitCache = HashMap<BTreeSet<String>, Arc<dyn CompiledUnit>>;

/// A piece of source text in one language.
///
/// The compiled unit is built lazily, once per set of preprocessor symbols,
/// and shared by every invocation until [`Code::expire_cache`]. All entry
/// points take `&self`, so one handle can be run from many threads.
pub struct Code {
    id: UnitId,
    language: Arc<dyn Language>,
    text: String,
    cache: Mutex<UnitCache>,
    controls: Mutex<Option<SharedControls>>,
    profiler: Mutex<Option<SharedProfiler>>,
    tracker: ContextTracker,
}

impl Code {
    pub fn new(language: Arc<dyn Language>, text: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(),
            language,
            text: text.into(),
            cache: Mutex::new(HashMap::new()),
            controls: Mutex::new(None),
            profiler: Mutex::new(Some(crate::profiler::shared(LineProfiler::new()))),
            tracker: ContextTracker::new(),
        }
    }

    /// Code in the built-in script language.
    pub fn script(text: impl Into<String>) -> Self {
        Self::new(Arc::new(ScriptLanguage::new()), text)
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &dyn Language {
        self.language.as_ref()
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    /// Breakpoint on `line` of this code.
    pub fn breakpoint(&self, line: u32) -> Breakpoint {
        Breakpoint::new(self.id, line)
    }

    /// Breakpoint on `line`, narrowed to the lexical branch that line sits
    /// in. Builds the code if needed.
    pub fn branch_breakpoint(&self, context: &mut ExecutionContext, line: u32) -> RunResult<Breakpoint> {
        let unit = self.unit_for(context)?;
        let breakpoint = self.breakpoint(line);
        Ok(match unit.scope_of_line(line) {
            Some(scope) => breakpoint.in_scope(scope),
            None => breakpoint,
        })
    }

    fn apply_text_flags(&self, context: &mut ExecutionContext) {
        for flag in self.language.text_flags(&self.text) {
            context.options_mut().set(flag, true);
        }
    }

    fn unit_for(&self, context: &mut ExecutionContext) -> Result<Arc<dyn CompiledUnit>, CompileError> {
        self.apply_text_flags(context);
        let symbols = context.options().symbols();
        // held across the build so one handle never builds the same variant twice
        let mut cache = self.cache.lock();
        if let Some(unit) = cache.get(&symbols) {
            return Ok(unit.clone());
        }
        tracing::info!(language = self.language.name(), symbols = ?symbols, "building code");
        let unit = self.language.build(self.id, &self.text, &symbols)?;
        cache.insert(symbols, unit.clone());
        Ok(unit)
    }

    /// A build failure met on the way to executing is reported as an
    /// execution error wrapping the diagnostics.
    fn unit_for_execution(&self, context: &mut ExecutionContext) -> RunResult<Arc<dyn CompiledUnit>> {
        self.unit_for(context)
            .map_err(|err| RunError::Execute(ExecuteError::from_build(err)))
    }

    pub fn is_cached(&self) -> bool {
        !self.cache.lock().is_empty()
    }

    pub fn expire_cache(&self) {
        let mut cache = self.cache.lock();
        tracing::debug!(variants = cache.len(), "build cache expired");
        cache.clear();
    }

    pub fn set_debug_controls(&self, controls: Option<SharedControls>) {
        *self.controls.lock() = controls;
    }

    pub fn debug_controls(&self) -> Option<SharedControls> {
        self.controls.lock().clone()
    }

    pub fn set_profiler(&self, profiler: Option<SharedProfiler>) {
        *self.profiler.lock() = profiler;
    }

    pub fn profiler(&self) -> Option<SharedProfiler> {
        self.profiler.lock().clone()
    }

    pub fn build(&self, context: &mut ExecutionContext) -> RunResult<Arc<dyn CompiledUnit>> {
        let _tracked = self.tracker.enter(context.id());
        Ok(self.unit_for(context)?)
    }

    /// Render the instrumented source of the variant `context` selects.
    pub fn instrumented_source(&self, context: &mut ExecutionContext) -> RunResult<String> {
        Ok(self.build(context)?.instrumented_source())
    }

    fn execute<'a>(
        &'a self,
        unit: &dyn CompiledUnit,
        context: &'a mut ExecutionContext,
        observer: Option<&'a mut dyn FrameObserver>,
    ) -> RunResult<()> {
        let _tracked = self.tracker.enter(context.id());
        tracing::info!(context = %context.id(), kind = ?context.kind(), "execution started");
        let result = unit.execute(Invocation {
            context,
            tracker: &self.tracker,
            observer,
        });
        tracing::info!(ok = result.is_ok(), "execution finished");
        result.map_err(RunError::from)
    }

    pub fn run(&self, context: &mut ExecutionContext) -> RunResult<()> {
        let unit = self.unit_for_execution(context)?;
        self.execute(unit.as_ref(), context, None)
    }

    /// Debug with the controls attached to this handle.
    pub fn debug(&self, context: &mut ExecutionContext) -> RunResult<()> {
        self.tracker.ensure_no_run_group()?;
        let controls = self.debug_controls().ok_or(RunError::NoDebugControls)?;
        let unit = self.unit_for_execution(context)?;
        let mut session = DebugSession::shared(controls);
        let result = self.execute(unit.as_ref(), context, Some(&mut session));
        session.finish();
        result
    }

    /// Debug with controls owned by the caller, independent of anything
    /// attached to this handle.
    pub fn debug_with_controls(
        &self,
        context: &mut ExecutionContext,
        controls: &mut dyn DebugControls,
    ) -> RunResult<()> {
        self.tracker.ensure_no_run_group()?;
        let unit = self.unit_for_execution(context)?;
        let mut session = DebugSession::borrowed(controls);
        let result = self.execute(unit.as_ref(), context, Some(&mut session));
        session.finish();
        result
    }

    pub fn profile(&self, context: &mut ExecutionContext) -> RunResult<()> {
        self.tracker.ensure_no_run_group()?;
        let profiler = self.profiler().ok_or(RunError::NoProfiler)?;
        let unit = self.unit_for_execution(context)?;
        let id = context.id();
        profiler.lock().begin(self.id, id);
        let mut observer = ProfileObserver::new(profiler.clone(), id);
        let result = self.execute(unit.as_ref(), context, Some(&mut observer));
        profiler.lock().end(id);
        result
    }

    /// Run the top level, then call `function` with `args`. Inside a debug
    /// group the call runs under the attached controls.
    pub fn invoke(&self, context: &mut ExecutionContext, function: &str, args: Vec<Value>) -> RunResult<Value> {
        let unit = self.unit_for_execution(context)?;
        let group = self.tracker.group();
        let controls = match &group {
            Some(group) if group.kind == ContextKind::Debug => self.debug_controls(),
            _ => None,
        };
        let _tracked = self.tracker.enter(context.id());
        tracing::debug!(function, group = ?group.as_ref().map(|g| &g.name), "invoking");
        let result = match controls {
            Some(controls) => {
                let mut session = DebugSession::shared(controls);
                let result = unit.call(
                    Invocation {
                        context,
                        tracker: &self.tracker,
                        observer: Some(&mut session),
                    },
                    function,
                    args,
                );
                session.finish();
                result
            }
            None => unit.call(
                Invocation {
                    context,
                    tracker: &self.tracker,
                    observer: None,
                },
                function,
                args,
            ),
        };
        result.map_err(RunError::from)
    }

    /// Open a run group: invocations until the guard drops report one
    /// shared parent context.
    pub fn run_with(&self, name: &str) -> RunResult<GroupGuard<'_>> {
        let info = self.tracker.begin_group(ContextKind::Run, name)?;
        Ok(GroupGuard { code: self, info })
    }

    /// Open a debug group parented on `context`.
    pub fn debug_with(&self, context: &ExecutionContext) -> RunResult<GroupGuard<'_>> {
        self.tracker.ensure_no_run_group()?;
        if self.debug_controls().is_none() {
            return Err(RunError::NoDebugControls);
        }
        let info = self
            .tracker
            .begin_group_under(ContextKind::Debug, "debug", context.id())?;
        Ok(GroupGuard { code: self, info })
    }

    pub fn profile_with(&self, name: &str) -> RunResult<GroupGuard<'_>> {
        self.tracker.ensure_no_run_group()?;
        let profiler = self.profiler().ok_or(RunError::NoProfiler)?;
        let info = self.tracker.begin_group(ContextKind::Profile, name)?;
        profiler.lock().begin_context_group(info.parent, name);
        Ok(GroupGuard { code: self, info })
    }
}

/// Ends its group when dropped.
pub struct GroupGuard<'c> {
    code: &'c Code,
    info: GroupInfo,
}

impl GroupGuard<'_> {
    pub fn info(&self) -> &GroupInfo {
        &self.info
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        if self.info.kind == ContextKind::Profile {
            if let Some(profiler) = self.code.profiler() {
                profiler.lock().end_context_group(self.info.parent);
            }
        }
        self.code.tracker.end_group(self.info.parent);
    }
}
