//! Observational notifications emitted while external processes run.

use crate::command::ExitCode;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// One line read from a child's standard output, without its terminator.
    OutputLine { pid: u32, line: String },
    /// One line read from a child's standard error, without its terminator.
    ErrorLine { pid: u32, line: String },
    /// A job started in the background has ended. Raised once per job.
    JobCompleted { pid: u32, exit_code: ExitCode },
}

impl fmt::Display for ShellEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellEvent::OutputLine { line, .. } | ShellEvent::ErrorLine { line, .. } => {
                f.write_str(line)
            }
            ShellEvent::JobCompleted { pid, exit_code } => write!(
                f,
                "[Background job {pid} completed with exit code: {exit_code}]"
            ),
        }
    }
}

/// Where events go. A sink without a channel discards everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ShellEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ShellEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Deliver one event. Never blocks; a closed receiver is ignored.
    pub fn emit(&self, event: ShellEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_message() {
        let event = ShellEvent::JobCompleted {
            pid: 1234,
            exit_code: 0,
        };
        assert_eq!(
            event.to_string(),
            "[Background job 1234 completed with exit code: 0]"
        );
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(ShellEvent::OutputLine {
            pid: 1,
            line: "x".into(),
        });
        EventSink::default().emit(ShellEvent::ErrorLine {
            pid: 1,
            line: "y".into(),
        });
    }

    #[test]
    fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ShellEvent::OutputLine { pid: 1, line: "a".into() });
        sink.emit(ShellEvent::OutputLine { pid: 1, line: "b".into() });
        assert_eq!(rx.try_recv().unwrap().to_string(), "a");
        assert_eq!(rx.try_recv().unwrap().to_string(), "b");
        assert!(rx.try_recv().is_err());
    }
}
