use crate::frame::Binding;
use crate::value::Value;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub modified: bool,
}

/// Diffs the bindings of consecutive pauses. Loop control variables are
/// compared against their loop's cached value instead.
#[derive(Debug, Default)]
pub struct Evaluator {
    previous: HashMap<String, Value>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, bindings: &[Binding]) -> Vec<Variable> {
        let variables = bindings
            .iter()
            .map(|binding| {
                let modified = match &binding.loop_cache {
                    Some(cache) => cache.entered && cache.cached.as_ref() != Some(&binding.value),
                    None => self
                        .previous
                        .get(&binding.name)
                        .map_or(false, |previous| *previous != binding.value),
                };
                Variable {
                    name: binding.name.clone(),
                    value: binding.value.clone(),
                    modified,
                }
            })
            .collect();
        self.previous = bindings
            .iter()
            .map(|b| (b.name.clone(), b.value.clone()))
            .collect();
        variables
    }
}
