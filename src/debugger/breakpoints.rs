use crate::frame::{ExecFrame, ScopeId, UnitId};
use serde::Serialize;
use std::collections::HashSet;

/// A source-line predicate, optionally narrowed to one lexical branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Breakpoint {
    pub unit: UnitId,
    pub line: u32,
    pub scope: Option<ScopeId>,
}

impl Breakpoint {
    pub fn new(unit: UnitId, line: u32) -> Self {
        Self {
            unit,
            line,
            scope: None,
        }
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn matches(&self, frame: &ExecFrame) -> bool {
        frame.is_pausable_kind()
            && frame.source.unit == self.unit
            && frame.line() == self.line
            && self.scope.map_or(true, |scope| frame.scope == Some(scope))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    points: HashSet<Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, breakpoint: Breakpoint) -> bool {
        tracing::debug!(line = breakpoint.line, scope = ?breakpoint.scope, "breakpoint set");
        self.points.insert(breakpoint)
    }

    pub fn remove(&mut self, breakpoint: &Breakpoint) -> bool {
        tracing::debug!(line = breakpoint.line, "breakpoint removed");
        self.points.remove(breakpoint)
    }

    /// Remove every breakpoint on `line`, scoped or not. Returns how many
    /// were removed.
    pub fn remove_line(&mut self, unit: UnitId, line: u32) -> usize {
        let before = self.points.len();
        self.points.retain(|b| !(b.unit == unit && b.line == line));
        before - self.points.len()
    }

    pub fn contains(&self, breakpoint: &Breakpoint) -> bool {
        self.points.contains(breakpoint)
    }

    pub fn matches(&self, frame: &ExecFrame) -> bool {
        self.points.iter().any(|b| b.matches(frame))
    }

    /// Breakpoints ordered by line.
    pub fn sorted(&self) -> Vec<Breakpoint> {
        let mut points: Vec<Breakpoint> = self.points.iter().copied().collect();
        points.sort_by_key(|b| (b.line, b.scope));
        points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ExceptionInfo, ExecEvent, SourceRef};

    fn frame(unit: UnitId, event: ExecEvent, line: u32, scope: u32) -> ExecFrame {
        ExecFrame {
            event,
            source: SourceRef {
                unit,
                line,
                column: 1,
            },
            sub: 1,
            depth: 0,
            scope: Some(ScopeId(scope)),
            function: "<module>".to_string(),
            exception: (event == ExecEvent::Exception).then(|| ExceptionInfo {
                message: "boom".to_string(),
                handled: false,
            }),
        }
    }

    #[test]
    fn test_matches_line_and_exception_frames_only() {
        let unit = UnitId::new();
        let bp = Breakpoint::new(unit, 4);
        assert!(bp.matches(&frame(unit, ExecEvent::Line, 4, 0)));
        assert!(bp.matches(&frame(unit, ExecEvent::Exception, 4, 0)));
        assert!(!bp.matches(&frame(unit, ExecEvent::Call, 4, 0)));
        assert!(!bp.matches(&frame(unit, ExecEvent::Return, 4, 0)));
        assert!(!bp.matches(&frame(UnitId::new(), ExecEvent::Line, 4, 0)));
    }

    #[test]
    fn test_scoped_breakpoint_needs_the_exact_branch() {
        let unit = UnitId::new();
        let bp = Breakpoint::new(unit, 2).in_scope(ScopeId(3));
        assert!(bp.matches(&frame(unit, ExecEvent::Line, 2, 3)));
        assert!(!bp.matches(&frame(unit, ExecEvent::Line, 2, 1)));
    }

    #[test]
    fn test_remove_line_drops_all_scopes() {
        let unit = UnitId::new();
        let mut points = Breakpoints::new();
        points.add(Breakpoint::new(unit, 2));
        points.add(Breakpoint::new(unit, 2).in_scope(ScopeId(1)));
        points.add(Breakpoint::new(unit, 5));
        assert_eq!(points.remove_line(unit, 2), 2);
        assert_eq!(points.sorted(), vec![Breakpoint::new(unit, 5)]);
    }
}
