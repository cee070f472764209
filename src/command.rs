use crate::config::EngineConfig;
use crate::env::Environment;
use crate::process::ProcessOrchestrator;
use std::time::Duration;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Engine-level failures use 1 (parse/resolution), -1 (spawn or stream I/O) and
/// 130 (cancelled wait).
pub type ExitCode = i32;

/// Uniform outcome of every execution path, built-in or external.
///
/// `output` and `error` hold the captured text; for external processes each captured
/// line is terminated by `\n`. Built-ins produce their text verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: ExitCode,
    pub execution_time: Duration,
}

impl Default for CommandResult {
    fn default() -> Self {
        Self {
            success: true,
            output: String::new(),
            error: String::new(),
            exit_code: 0,
            execution_time: Duration::ZERO,
        }
    }
}

impl CommandResult {
    /// Successful result carrying `output`.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// Failed result carrying `error` and `exit_code`.
    pub fn failure(error: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            success: false,
            error: error.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// Result of a finished process: success is derived from the exit code.
    pub fn from_exit(exit_code: ExitCode, output: String, error: String) -> Self {
        Self {
            success: exit_code == 0,
            output,
            error,
            exit_code,
            execution_time: Duration::ZERO,
        }
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }
}

/// State a built-in may read or mutate while it runs.
pub struct BuiltinContext<'a> {
    pub env: &'a mut Environment,
    pub processes: &'a ProcessOrchestrator,
    pub config: &'a EngineConfig,
}

/// A command implemented in-process by the engine.
///
/// The engine keeps a name → capability table of these; lookups are
/// case-insensitive. Implementations trap their own faults and encode them into the
/// returned [`CommandResult`].
pub trait Builtin: Send + Sync {
    /// Name the user types, e.g. `cd`.
    fn name(&self) -> &str;

    /// One-line description.
    fn describe(&self) -> &str;

    /// Runs the command with the literal argument tokens.
    fn execute(&self, args: &[String], ctx: &mut BuiltinContext<'_>) -> CommandResult;
}
