//! Profiling hooks and the default per-line profiler.

use crate::context::ContextIdentity;
use crate::frame::{Bindings, ExecEvent, ExecFrame, FrameObserver, Halt, UnitId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Receives the lifecycle of profiled invocations and every frame they emit.
/// Invocations of one code handle may be profiled concurrently; every call
/// names the context it belongs to.
pub trait Profiler: Send {
    fn begin(&mut self, unit: UnitId, context: ContextIdentity);

    fn begin_context_group(&mut self, _parent: ContextIdentity, _name: &str) {}

    fn end_context_group(&mut self, _parent: ContextIdentity) {}

    fn frame(&mut self, context: ContextIdentity, frame: &ExecFrame);

    fn end(&mut self, context: ContextIdentity);

    fn reset(&mut self) {}
}

pub type SharedProfiler = Arc<Mutex<dyn Profiler>>;

pub fn shared(profiler: impl Profiler + 'static) -> SharedProfiler {
    Arc::new(Mutex::new(profiler))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileRun {
    pub unit: Option<UnitId>,
    pub context: ContextIdentity,
    pub group: Option<String>,
    /// Line events per source line.
    pub lines: BTreeMap<u32, u64>,
    /// Call events per function name.
    pub calls: BTreeMap<String, u64>,
    pub exceptions: u64,
}

/// Counts line hits and calls for each profiled run.
#[derive(Debug, Default, Serialize)]
pub struct LineProfiler {
    runs: Vec<ProfileRun>,
    #[serde(skip)]
    active: HashMap<ContextIdentity, ProfileRun>,
    #[serde(skip)]
    group: Option<String>,
}

impl LineProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished runs, in the order they ended.
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn runs(&self) -> &[ProfileRun] {
        &self.runs
    }

    pub fn last_run(&self) -> Option<&ProfileRun> {
        self.runs.last()
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Profiler for LineProfiler {
    fn begin(&mut self, unit: UnitId, context: ContextIdentity) {
        let run = ProfileRun {
            unit: Some(unit),
            context,
            group: self.group.clone(),
            ..ProfileRun::default()
        };
        self.active.insert(context, run);
    }

    fn begin_context_group(&mut self, _parent: ContextIdentity, name: &str) {
        self.group = Some(name.to_string());
    }

    fn end_context_group(&mut self, _parent: ContextIdentity) {
        self.group = None;
    }

    fn frame(&mut self, context: ContextIdentity, frame: &ExecFrame) {
        let Some(run) = self.active.get_mut(&context) else {
            return;
        };
        match frame.event {
            ExecEvent::Line => *run.lines.entry(frame.line()).or_insert(0) += 1,
            ExecEvent::Call => *run.calls.entry(frame.function.clone()).or_insert(0) += 1,
            ExecEvent::Exception => run.exceptions += 1,
            ExecEvent::Return => {}
        }
    }

    fn end(&mut self, context: ContextIdentity) {
        if let Some(run) = self.active.remove(&context) {
            tracing::debug!(%context, lines = run.lines.len(), calls = run.calls.len(), "profile run recorded");
            self.runs.push(run);
        }
    }

    fn reset(&mut self) {
        self.runs.clear();
        self.active.clear();
        self.group = None;
    }
}

/// Feeds every pushed and swapped frame of one invocation to a profiler.
pub struct ProfileObserver {
    profiler: SharedProfiler,
    context: ContextIdentity,
}

impl ProfileObserver {
    pub fn new(profiler: SharedProfiler, context: ContextIdentity) -> Self {
        Self { profiler, context }
    }
}

impl FrameObserver for ProfileObserver {
    fn pushed(&mut self, stack: &[ExecFrame], _bindings: &dyn Bindings) -> Result<(), Halt> {
        if let Some(frame) = stack.last() {
            self.profiler.lock().frame(self.context, frame);
        }
        Ok(())
    }

    fn swapped(&mut self, _previous: &ExecFrame, stack: &[ExecFrame], _bindings: &dyn Bindings) -> Result<(), Halt> {
        if let Some(frame) = stack.last() {
            self.profiler.lock().frame(self.context, frame);
        }
        Ok(())
    }

    fn completed(&mut self, _previous: &ExecFrame, _stack: &[ExecFrame]) {}

    fn popped(&mut self, _frame: &ExecFrame, _stack: &[ExecFrame]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameStream, Location, NoBindings};

    #[test]
    fn test_line_hits_are_counted_per_run() {
        let profiler = Arc::new(Mutex::new(LineProfiler::new()));
        let unit = UnitId::new();
        let context = ContextIdentity::new();
        profiler.lock().begin(unit, context);
        {
            let mut observer = ProfileObserver::new(profiler.clone(), context);
            let mut stream = FrameStream::observed(unit, &mut observer);
            stream.enter("<module>", Location::new(1, 1, 0), &NoBindings).unwrap();
            stream.line(Location::new(1, 1, 1), None, &NoBindings).unwrap();
            stream.line(Location::new(2, 1, 1), None, &NoBindings).unwrap();
            stream.line(Location::new(1, 1, 1), None, &NoBindings).unwrap();
            stream.leave(&NoBindings).unwrap();
        }
        profiler.lock().end(context);

        let profiler = profiler.lock();
        assert_eq!(profiler.run_count(), 1);
        assert_eq!(profiler.in_flight(), 0);
        let run = profiler.last_run().unwrap();
        assert_eq!(run.context, context);
        assert_eq!(run.lines.get(&1), Some(&2));
        assert_eq!(run.lines.get(&2), Some(&1));
        assert_eq!(run.calls.get("<module>"), Some(&1));
    }

    #[test]
    fn test_interleaved_runs_are_kept_apart() {
        let mut profiler = LineProfiler::new();
        let unit = UnitId::new();
        let (first, second) = (ContextIdentity::new(), ContextIdentity::new());
        let line = |n: u32| ExecFrame {
            event: ExecEvent::Line,
            source: crate::frame::SourceRef { unit, line: n, column: 1 },
            sub: 1,
            depth: 0,
            scope: None,
            function: "<module>".to_string(),
            exception: None,
        };
        profiler.begin(unit, first);
        profiler.begin(unit, second);
        profiler.frame(first, &line(1));
        profiler.frame(second, &line(2));
        profiler.frame(second, &line(2));
        profiler.end(second);
        profiler.frame(first, &line(3));
        profiler.end(first);

        assert_eq!(profiler.run_count(), 2);
        let runs = profiler.runs();
        assert_eq!(runs[0].context, second);
        assert_eq!(runs[0].lines, BTreeMap::from([(2, 2)]));
        assert_eq!(runs[1].context, first);
        assert_eq!(runs[1].lines, BTreeMap::from([(1, 1), (3, 1)]));
    }
}
