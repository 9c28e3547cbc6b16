//! Embedded interpreter for takeoff scripts.
//!
//! Scripts are written in a JavaScript subset. The interpreter exposes no file, network,
//! clock or randomness primitives; everything a script can reach beyond pure computation
//! comes through a [`HostBridge`].

pub mod ast;
mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod source;
pub mod value;

use std::time::Duration;
use thiserror::Error;

pub use value::{ConsoleLevel, ErrorKind, HostRef, Value};

/// Why a script did not run to completion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Uncaught {message}{}", .line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
    Uncaught { message: String, line: Option<usize> },

    #[error("Script execution timed out after {limit_ms} ms")]
    Timeout { limit_ms: u64 },
}

impl ScriptError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax",
            Self::Uncaught { .. } => "uncaught",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// A name the host installs in the script's global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostGlobal {
    Function(&'static str),
    /// Usable with `new` and `instanceof`.
    Class(&'static str),
}

/// A host failure; surfaces in the script as a thrown error of the given kind.
#[derive(Debug, Clone, PartialEq)]
pub struct HostError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HostError {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TypeError,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Error,
            message: message.into(),
        }
    }
}

/// Capabilities a script can call into.
///
/// Host objects are opaque [`HostRef`] handles; the host owns their state and answers
/// member reads and writes for them.
pub trait HostBridge {
    fn globals(&self) -> Vec<HostGlobal>;

    /// Calls a global host function (`this` is `None`) or a method of a host object.
    fn call(&mut self, name: &str, this: Option<HostRef>, args: &[Value]) -> Result<Value, HostError>;

    fn construct(&mut self, class: &str, args: &[Value]) -> Result<Value, HostError>;

    fn get_member(&mut self, target: HostRef, key: &str) -> Option<Value>;

    fn set_member(&mut self, target: HostRef, key: &str, _value: Value) -> Result<(), HostError> {
        Err(HostError::type_error(format!(
            "Cannot assign to read only property '{}' of {}",
            key, target.class
        )))
    }

    /// Enumerable own keys, for `Object.keys` and `for...in`.
    fn keys(&self, _target: HostRef) -> Vec<String> {
        Vec::new()
    }

    fn console(&mut self, level: ConsoleLevel, message: &str);
}

/// Stack size for threads that run scripts; the evaluator recurses once per nested call.
pub const SCRIPT_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Limits {
    pub timeout: Duration,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            max_call_depth: 256,
        }
    }
}

/// Parses without running.
pub fn check_syntax(source: &str) -> Result<(), ScriptError> {
    parser::parse_program(source).map(|_| ())
}

/// Parses and runs `source` to completion against `host`.
///
/// Nothing runs when the source does not parse.
pub fn run_script(
    source: &str,
    host: &mut dyn HostBridge,
    limits: &Limits,
) -> Result<(), ScriptError> {
    let program = parser::parse_program(source)?;
    interpreter::Interpreter::new(host, limits).run(&program)
}
