mod tracker;

pub use tracker::{ContextTracker, GroupInfo, TrackedContext};

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Process-unique identity of one execution context. Never reused; the nil
/// identity stands for "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextIdentity(Uuid);

impl ContextIdentity {
    pub fn new() -> Self {
        ContextIdentity(Uuid::new_v4())
    }

    pub fn unknown() -> Self {
        ContextIdentity(Uuid::nil())
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ContextIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    Build,
    Run,
    Debug,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

/// Typed options bag scoped to one context. Boolean options that are `true`
/// double as preprocessor symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    values: BTreeMap<String, OptionValue>,
}

impl Options {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.values.remove(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(OptionValue::Bool(true)))
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(OptionValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.values
            .iter()
            .filter(|(_, v)| **v == OptionValue::Bool(true))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.values.iter()
    }
}

/// Environment for one Build/Run/Debug/Profile call.
pub struct ExecutionContext {
    id: ContextIdentity,
    kind: ContextKind,
    inputs: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    options: Options,
    printed: Vec<String>,
    echo: bool,
}

impl ExecutionContext {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            id: ContextIdentity::new(),
            kind,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            options: Options::default(),
            printed: Vec::new(),
            echo: false,
        }
    }

    pub fn build() -> Self {
        Self::new(ContextKind::Build)
    }

    pub fn run() -> Self {
        Self::new(ContextKind::Run)
    }

    pub fn debug() -> Self {
        Self::new(ContextKind::Debug)
    }

    pub fn profile() -> Self {
        Self::new(ContextKind::Profile)
    }

    pub fn id(&self) -> ContextIdentity {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_input(name, value);
        self
    }

    /// Declare an output; after a successful run it holds the script's
    /// binding of the same name.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.expect_output(name);
        self
    }

    pub fn set_input(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.inputs.insert(name.into(), value.into());
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    pub fn expect_output(&mut self, name: impl Into<String>) {
        self.outputs.entry(name.into()).or_insert(Value::Null);
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn print(&mut self, line: String) {
        if self.echo {
            println!("{}", line);
        }
        self.printed.push(line);
    }

    pub fn printed(&self) -> &[String] {
        &self.printed
    }
}
