#![allow(dead_code)]

use runcode::debugger::{
    Breakpoints, DebugAction, DebugControls, ExceptionPolicy, PauseReason, PausedFrame, Variable,
};
use runcode::{Code, ExecEvent, ExecutionContext, RunResult, Value};
use std::collections::VecDeque;

/// One pause as the controls saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Pause {
    pub event: ExecEvent,
    pub line: u32,
    pub depth: usize,
    pub function: String,
    pub reason: PauseReason,
    pub handled: Option<bool>,
    pub variables: Vec<Variable>,
}

impl Pause {
    pub fn at(&self) -> (ExecEvent, u32, usize) {
        (self.event, self.line, self.depth)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.variable(name).map(|v| v.value.clone())
    }

    pub fn modified(&self, name: &str) -> Option<bool> {
        self.variable(name).map(|v| v.modified)
    }
}

/// Answers pauses from a queue of actions, then with a fallback action.
pub struct ScriptedControls {
    breakpoints: Breakpoints,
    policy: ExceptionPolicy,
    actions: VecDeque<DebugAction>,
    fallback: DebugAction,
    pub pauses: Vec<Pause>,
    pub attached: usize,
    pub detached: usize,
}

impl ScriptedControls {
    pub fn new(actions: impl IntoIterator<Item = DebugAction>) -> Self {
        Self {
            breakpoints: Breakpoints::new(),
            policy: ExceptionPolicy::default(),
            actions: actions.into_iter().collect(),
            fallback: DebugAction::Continue,
            pauses: Vec::new(),
            attached: 0,
            detached: 0,
        }
    }

    /// Answer every pause with `action`.
    pub fn always(action: DebugAction) -> Self {
        Self::new([]).with_fallback(action)
    }

    pub fn with_fallback(mut self, action: DebugAction) -> Self {
        self.fallback = action;
        self
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn break_at(mut self, code: &Code, lines: &[u32]) -> Self {
        for line in lines {
            self.breakpoints.add(code.breakpoint(*line));
        }
        self
    }

    pub fn lines(&self) -> Vec<u32> {
        self.pauses.iter().map(|p| p.line).collect()
    }

    pub fn steps(&self) -> Vec<(ExecEvent, u32, usize)> {
        self.pauses.iter().map(Pause::at).collect()
    }
}

impl DebugControls for ScriptedControls {
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
        let frame = paused.frame;
        self.pauses.push(Pause {
            event: frame.event,
            line: frame.line(),
            depth: frame.depth,
            function: frame.function.clone(),
            reason: paused.reason,
            handled: frame.exception.as_ref().map(|e| e.handled),
            variables: paused.variables.to_vec(),
        });
        self.actions.pop_front().unwrap_or(self.fallback)
    }

    fn on_attached(&mut self) {
        self.attached += 1;
    }

    fn on_detached(&mut self) {
        self.detached += 1;
    }
}

/// Debug `code` once in a fresh debug context.
pub fn debug(code: &Code, controls: &mut ScriptedControls) -> RunResult<()> {
    let mut context = ExecutionContext::debug();
    code.debug_with_controls(&mut context, controls)
}

/// Debug `code` with one breakpoint and a fallback action for every pause.
pub fn pauses(source: &str, breakpoints: &[u32], action: DebugAction) -> Vec<Pause> {
    let code = Code::script(source);
    let mut controls = ScriptedControls::always(action).break_at(&code, breakpoints);
    debug(&code, &mut controls).expect("debug run");
    controls.pauses
}

/// Run `source` and read one output back.
pub fn run_for(source: &str, output: &str) -> Value {
    let code = Code::script(source);
    let mut context = ExecutionContext::run().with_output(output);
    code.run(&mut context).expect("run");
    context.output(output).cloned().unwrap_or_default()
}
