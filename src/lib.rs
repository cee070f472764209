//! A native command-shell engine.
//!
//! The engine takes one line of user input, decides whether it names a built-in or an
//! external executable, and runs it: simple commands, multi-stage pipelines, output
//! redirection and detached background jobs. No other shell interpreter is involved;
//! quoting, variable expansion, process wiring and job bookkeeping all live here.
//!
//! The main entry point is [`Interpreter`], whose
//! [`execute_command`](Interpreter::execute_command) returns a [`CommandResult`] for
//! every line. Front ends observe streamed process output through [`ShellEvent`]s and
//! must honour the sentinel strings described in [`sentinel`].

pub mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
mod external;
mod interpreter;
pub mod parser;
pub mod process;
mod registry;
pub mod sentinel;

pub use command::{Builtin, BuiltinContext, CommandResult, ExitCode};
pub use config::EngineConfig;
pub use error::ShellError;
pub use events::{EventSink, ShellEvent};
pub use external::{EXECUTABLE_EXTENSIONS, resolve_executable};
/// Just a convenient re-export of the command engine.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
pub use registry::{JobInfo, ProcessState};

/// Cancellation token accepted by every potentially blocking engine call.
pub use tokio_util::sync::CancellationToken;
