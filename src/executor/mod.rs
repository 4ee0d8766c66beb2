//! Runtime for instrumented `rcs` programs.

pub mod builtins;
pub mod env;
mod interpreter;

pub use interpreter::{Fault, Interpreter, MAX_CALL_DEPTH};
