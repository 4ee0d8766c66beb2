use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    Global,
    Function,
    Block,
}

/// One level of the runtime scope chain. Bindings keep declaration order so
/// evaluation lists them the way they were introduced.
pub struct Scope {
    vars: Mutex<Vec<(String, Value)>>,
    parent: Option<Arc<Scope>>,
    role: ScopeRole,
}

impl Scope {
    fn with(parent: Option<Arc<Scope>>, role: ScopeRole) -> Arc<Scope> {
        Arc::new(Scope {
            vars: Mutex::new(Vec::new()),
            parent,
            role,
        })
    }

    pub fn global() -> Arc<Scope> {
        Self::with(None, ScopeRole::Global)
    }

    pub fn function(parent: Arc<Scope>) -> Arc<Scope> {
        Self::with(Some(parent), ScopeRole::Function)
    }

    pub fn block(parent: &Arc<Scope>) -> Arc<Scope> {
        Self::with(Some(parent.clone()), ScopeRole::Block)
    }

    pub fn role(&self) -> ScopeRole {
        self.role
    }

    pub fn declare(&self, name: &str, value: Value) {
        let mut vars = self.vars.lock();
        match vars.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => vars.push((name.to_string(), value)),
        }
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars
            .lock()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(value) = s.get_local(name) {
                return Some(value);
            }
            scope = s.parent.as_deref();
        }
        None
    }

    /// Overwrite the nearest existing binding. Returns false when the name is
    /// not bound anywhere in the chain.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut scope = Some(self);
        while let Some(s) = scope {
            let mut vars = s.vars.lock();
            if let Some(slot) = vars.iter_mut().find(|(k, _)| k == name) {
                slot.1 = value;
                return true;
            }
            drop(vars);
            scope = s.parent.as_deref();
        }
        false
    }

    /// Nearest enclosing function or global scope.
    pub fn function_scope(self: &Arc<Self>) -> Arc<Scope> {
        let mut scope = self.clone();
        while scope.role == ScopeRole::Block {
            match &scope.parent {
                Some(parent) => scope = parent.clone(),
                None => break,
            }
        }
        scope
    }

    /// Bindings visible from this scope up to and including the enclosing
    /// function (or global) scope, innermost first, shadowed names removed.
    pub fn visible(&self) -> Vec<(String, Value)> {
        let mut out: Vec<(String, Value)> = Vec::new();
        let mut scope = Some(self);
        while let Some(s) = scope {
            for (name, value) in s.vars.lock().iter() {
                if !out.iter().any(|(n, _)| n == name) {
                    out.push((name.clone(), value.clone()));
                }
            }
            if s.role != ScopeRole::Block {
                break;
            }
            scope = s.parent.as_deref();
        }
        out
    }
}
