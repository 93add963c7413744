//! Script interpreter for driving a running tree.
//!
//! Scripts are line-oriented command lists. A word naming a control turns the
//! line into a call; the interpreter suspends until the answer arrives and
//! then carries on with the next line. Suspension is explicit: evaluation
//! state lives in a stack of [`frame::StackFrame`]s, so no thread is ever
//! parked waiting on a reply.

/// Parsed script structure.
pub mod ast;
/// Built-in commands.
pub mod commands;
/// The `core:script` component.
pub mod executor;
/// Frames and the frame stack.
pub mod frame;
/// Variable and command scopes.
pub mod namespace;
/// Script text parser.
pub mod parser;
/// Line-by-line script evaluation.
pub mod script;

pub use ast::{Line, Script, Word};
pub use commands::{Command, CommandContext, install_builtins};
pub use executor::{EvalConfig, SCRIPT_SERVICE, SCRIPT_TYPE, ScriptExecutor, add_executor, register};
pub use frame::{FrameStack, ScriptEnv, StackFrame, StackOutcome, State};
pub use namespace::Namespace;
pub use parser::parse_script;
pub use script::ScriptFrame;

use thiserror::Error;

/// Convenience result alias for interpreter operations.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors surfaced before a script runs.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Parsing failed due to invalid syntax.
    #[error("invalid script syntax: {0}")]
    Syntax(String),
}
