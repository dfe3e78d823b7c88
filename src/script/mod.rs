//! Sandboxed script interpreter.
//!
//! Scripts are written in a small Python subset: indentation blocks, `def`,
//! `if`/`elif`/`else`, `for`, `while`, `try`/`except`/`finally`, `raise`,
//! `assert`, comprehensions, f-strings and conditional expressions. Names that
//! a [`Program`] declares as external are resolved by the host at call time;
//! everything else the script touches lives inside the interpreter.
//!
//! Heap values are single-threaded. Data crosses the host boundary as
//! [`Object`], which is owned and `Send`.

mod ast;
mod builtins;
mod format;
mod interp;
mod lexer;
mod ops;
mod parser;
mod value;

/// Exception types visible to scripts.
pub mod exception;
/// Values exchanged with the host.
pub mod object;
/// Programs, limits and the pause/resume protocol.
pub mod run;

pub use exception::{ExcType, ScriptException};
pub use object::Object;
pub use parser::ParseError;
pub use run::{
    CollectPrint, ExternalCaller, ExternalResult, INTERPRETER_STACK_SIZE, NoPrint, PrintWriter,
    Program, ResourceLimits, RunError, RunProgress, RunResult, Snapshot,
};
