//! Error taxonomy of the engine.
//!
//! Nothing in here ever escapes [`crate::Interpreter::execute_command`]: every variant is
//! folded into a failed [`CommandResult`] at the boundary of the operation that hit it.

use crate::command::{CommandResult, ExitCode};
use std::io;

/// Exit code reported when a wait was abandoned through the cancellation token.
pub const CANCELLED_EXIT_CODE: ExitCode = 130;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Malformed pipeline or redirection.
    #[error("{0}")]
    Parse(String),

    /// Neither a built-in nor an executable found by resolution.
    #[error("'{0}' is not recognized as an internal or external command.")]
    NotRecognized(String),

    /// Spawn or stream failure for an already-resolved executable.
    #[error("{0}")]
    Execution(#[from] io::Error),

    /// The command succeeded but its output could not be written to the target file.
    #[error("Redirection failed: {0}")]
    Redirection(#[source] io::Error),

    /// The caller stopped waiting. The child keeps running until killed.
    #[error("Command cancelled")]
    Cancelled,
}

impl ShellError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::Parse(_) | ShellError::NotRecognized(_) | ShellError::Redirection(_) => 1,
            ShellError::Execution(_) => -1,
            ShellError::Cancelled => CANCELLED_EXIT_CODE,
        }
    }
}

impl From<ShellError> for CommandResult {
    fn from(err: ShellError) -> Self {
        CommandResult::failure(err.to_string(), err.exit_code())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_recognized_message() {
        let r: CommandResult = ShellError::NotRecognized("doesnotexist123".into()).into();
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
        assert_eq!(
            r.error,
            "'doesnotexist123' is not recognized as an internal or external command."
        );
    }

    #[test]
    fn execution_errors_use_minus_one() {
        let r: CommandResult = ShellError::Execution(io::Error::other("spawn failed")).into();
        assert_eq!(r.exit_code, -1);
        assert_eq!(r.error, "spawn failed");
    }

    #[test]
    fn redirection_error_prefix() {
        let err = ShellError::Redirection(io::Error::new(io::ErrorKind::NotFound, "no dir"));
        assert_eq!(err.to_string(), "Redirection failed: no dir");
        assert_eq!(err.exit_code(), 1);
    }
}
