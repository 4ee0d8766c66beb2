use super::{ContextIdentity, ContextKind};
use crate::error::RunError;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub kind: ContextKind,
    pub parent: ContextIdentity,
    pub name: String,
}

#[derive(Default)]
struct TrackerState {
    live: Vec<ContextIdentity>,
    current: Option<ContextIdentity>,
    group: Option<GroupInfo>,
}

impl TrackerState {
    fn ambient_for(&self, id: ContextIdentity) -> ContextIdentity {
        self.group.as_ref().map(|g| g.parent).unwrap_or(id)
    }
}

/// Live contexts of one code handle plus a best-effort ambient "current"
/// context.
///
/// The ambient value is whichever context entered most recently. With many
/// concurrent invocations it is only guaranteed to be one of the live
/// contexts, not the caller's own; code that needs its exact identity gets
/// it from its `ExecutionContext`.
#[derive(Default)]
pub struct ContextTracker {
    state: Mutex<TrackerState>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, id: ContextIdentity) -> TrackedContext<'_> {
        let mut state = self.state.lock();
        state.live.push(id);
        state.current = Some(state.ambient_for(id));
        tracing::trace!(context = %id, live = state.live.len(), "context entered");
        TrackedContext { tracker: self, id }
    }

    fn leave(&self, id: ContextIdentity) {
        let mut state = self.state.lock();
        if let Some(index) = state.live.iter().rposition(|c| *c == id) {
            state.live.remove(index);
        }
        state.current = match state.live.last().copied() {
            Some(last) => Some(state.ambient_for(last)),
            None => state.group.as_ref().map(|g| g.parent),
        };
        tracing::trace!(context = %id, live = state.live.len(), "context left");
    }

    pub fn current(&self) -> ContextIdentity {
        self.state
            .lock()
            .current
            .unwrap_or_else(ContextIdentity::unknown)
    }

    pub fn live(&self) -> Vec<ContextIdentity> {
        let state = self.state.lock();
        let mut live = state.live.clone();
        if let Some(group) = &state.group {
            live.push(group.parent);
        }
        live
    }

    pub fn is_live(&self, id: ContextIdentity) -> bool {
        let state = self.state.lock();
        state.live.contains(&id) || state.group.as_ref().is_some_and(|g| g.parent == id)
    }

    pub fn group(&self) -> Option<GroupInfo> {
        self.state.lock().group.clone()
    }

    /// Start a group under a fresh parent identity. Only one group may be
    /// active per code handle.
    pub fn begin_group(&self, kind: ContextKind, name: &str) -> Result<GroupInfo, RunError> {
        self.begin_group_under(kind, name, ContextIdentity::new())
    }

    /// Start a group whose children report `parent` as their ambient context.
    pub fn begin_group_under(
        &self,
        kind: ContextKind,
        name: &str,
        parent: ContextIdentity,
    ) -> Result<GroupInfo, RunError> {
        let mut state = self.state.lock();
        if let Some(existing) = &state.group {
            return Err(RunError::RunGroupExists {
                existing: existing.kind,
            });
        }
        let group = GroupInfo {
            kind,
            parent,
            name: name.to_string(),
        };
        state.group = Some(group.clone());
        tracing::debug!(kind = ?kind, name, parent = %group.parent, "group started");
        Ok(group)
    }

    pub fn end_group(&self, parent: ContextIdentity) {
        let mut state = self.state.lock();
        if state.group.as_ref().is_some_and(|g| g.parent == parent) {
            state.group = None;
            if state.current == Some(parent) {
                state.current = state.live.last().copied();
            }
            tracing::debug!(parent = %parent, "group ended");
        }
    }

    /// Debugging and profiling cannot start while a run group is active.
    pub fn ensure_no_run_group(&self) -> Result<(), RunError> {
        match &self.state.lock().group {
            Some(group) if group.kind == ContextKind::Run => Err(RunError::RunGroupExists {
                existing: ContextKind::Run,
            }),
            _ => Ok(()),
        }
    }
}

/// Keeps a context live until dropped.
pub struct TrackedContext<'t> {
    tracker: &'t ContextTracker,
    id: ContextIdentity,
}

impl Drop for TrackedContext<'_> {
    fn drop(&mut self) {
        self.tracker.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_follows_most_recent_entry() {
        let tracker = ContextTracker::new();
        assert!(tracker.current().is_unknown());
        let a = ContextIdentity::new();
        let b = ContextIdentity::new();
        let guard_a = tracker.enter(a);
        assert_eq!(tracker.current(), a);
        {
            let _guard_b = tracker.enter(b);
            assert_eq!(tracker.current(), b);
        }
        assert_eq!(tracker.current(), a);
        drop(guard_a);
        assert!(tracker.current().is_unknown());
        assert!(tracker.live().is_empty());
    }

    #[test]
    fn test_group_reports_parent_identity() {
        let tracker = ContextTracker::new();
        let group = tracker.begin_group(ContextKind::Debug, "fanout").expect("group");
        let _child = tracker.enter(ContextIdentity::new());
        assert_eq!(tracker.current(), group.parent);
        assert!(tracker.is_live(group.parent));
        assert_eq!(
            tracker.begin_group(ContextKind::Run, "second"),
            Err(RunError::RunGroupExists {
                existing: ContextKind::Debug
            })
        );
        tracker.end_group(group.parent);
        assert!(tracker.group().is_none());
    }

    #[test]
    fn test_run_group_blocks_debugging() {
        let tracker = ContextTracker::new();
        let group = tracker.begin_group(ContextKind::Run, "test").expect("group");
        assert!(tracker.ensure_no_run_group().is_err());
        tracker.end_group(group.parent);
        assert!(tracker.ensure_no_run_group().is_ok());
    }
}
