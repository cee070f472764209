use crate::builtin::BuiltinTable;
use crate::command::{Builtin, BuiltinContext, CommandResult};
use crate::config::EngineConfig;
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::events::EventSink;
use crate::parser::{self, ParsedCommand, Pipeline, PipelineStage, unquote};
use crate::process::ProcessOrchestrator;
use futures::FutureExt;
use std::any::Any;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const BACKGROUND_COMBINED: &str = "Background execution cannot be combined with pipes or redirection";

/// How a raw line is executed. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    /// Contains ` | `.
    Pipeline,
    /// Ends with ` &`; holds the line without the marker.
    Background(&'a str),
    /// Contains ` > `, ` >> ` or ` < `.
    Redirection,
    Simple,
}

fn classify(line: &str) -> LineKind<'_> {
    if line.contains(" | ") {
        return LineKind::Pipeline;
    }
    let trimmed = line.trim_end();
    if trimmed.ends_with(" &") {
        return LineKind::Background(trimmed.trim_end_matches('&').trim());
    }
    if [" > ", " >> ", " < "].iter().any(|op| line.contains(op)) {
        return LineKind::Redirection;
    }
    LineKind::Simple
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectKind {
    Input,
    Output,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Redirection<'a> {
    command: &'a str,
    target: &'a str,
    kind: RedirectKind,
}

/// Split a redirection line at its single operator: ` < ` first, then ` >> `, then ` > `.
fn split_redirection(line: &str) -> Result<Redirection<'_>> {
    let operators = [
        (" < ", RedirectKind::Input, "Invalid input redirection syntax"),
        (" >> ", RedirectKind::Append, "Invalid output redirection syntax"),
        (" > ", RedirectKind::Output, "Invalid output redirection syntax"),
    ];
    for (op, kind, malformed) in operators {
        if !line.contains(op) {
            continue;
        }
        let parts: Vec<&str> = line.split(op).map(str::trim).collect();
        return match parts.as_slice() {
            &[command, target] if !command.is_empty() && !target.is_empty() => Ok(Redirection {
                command,
                target,
                kind,
            }),
            _ => Err(ShellError::Parse(malformed.to_string())),
        };
    }
    Err(ShellError::Parse("No redirection operator found".to_string()))
}

fn write_output(path: &Path, text: &str, append: bool) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    file.write_all(text.as_bytes())
}

/// Await `fut`, folding errors and panics into a failed result.
async fn contained<F>(fut: F) -> CommandResult
where
    F: Future<Output = Result<CommandResult>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.unwrap_or_else(CommandResult::from),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("command panicked: {message}");
            CommandResult::failure(format!("internal error: {message}"), 1)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// The command engine: one line in, one [`CommandResult`] out.
///
/// The interpreter owns the [`Environment`], the built-in table and the
/// [`ProcessOrchestrator`]. Call [`shutdown`](Self::shutdown) when the session ends;
/// dropping it without doing so still kills every tracked process.
///
/// Example
/// ```
/// use nativesh::{CancellationToken, EngineConfig, Interpreter};
///
/// # async fn demo() {
/// let mut sh = Interpreter::new(EngineConfig::default());
/// let result = sh.execute_command("echo hello world", &CancellationToken::new()).await;
/// assert_eq!(result.output, "hello world\n");
/// sh.shutdown().await;
/// # }
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: BuiltinTable,
    processes: ProcessOrchestrator,
    config: EngineConfig,
}

impl Interpreter {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_events(config, EventSink::default())
    }

    /// An interpreter whose process output and job notifications go to `events`.
    pub fn with_events(config: EngineConfig, events: EventSink) -> Self {
        Self {
            env: Environment::new(&config),
            builtins: BuiltinTable::standard(),
            processes: ProcessOrchestrator::new(events),
            config,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn processes(&self) -> &ProcessOrchestrator {
        &self.processes
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a built-in, replacing any command with the same name.
    pub fn register_builtin(&mut self, builtin: Arc<dyn Builtin>) {
        self.builtins.register(builtin);
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    /// Prompt rendered from the current `PROMPT` template.
    pub fn prompt(&self) -> String {
        self.env.render_prompt()
    }

    /// Execute one line of input.
    ///
    /// Never fails: every error becomes an unsuccessful result. Blank input is a no-op
    /// success and is not recorded in history.
    pub async fn execute_command(&mut self, input: &str, cancel: &CancellationToken) -> CommandResult {
        if input.trim().is_empty() {
            return CommandResult::default();
        }
        let started = Instant::now();
        self.env.add_to_history(input);

        let kind = classify(input);
        log::debug!("{kind:?}: {input}");
        let result = contained(async {
            match kind {
                LineKind::Pipeline => self.run_pipeline(input, cancel).await,
                LineKind::Background(line) => self.run_background(line).await,
                LineKind::Redirection => self.run_redirection(input, cancel).await,
                LineKind::Simple => self.run_simple(input, cancel).await,
            }
        })
        .await;
        result.with_execution_time(started.elapsed())
    }

    fn parse(&self, line: &str) -> Result<ParsedCommand> {
        parser::parse(line, &self.env)
            .ok_or_else(|| ShellError::Parse("Failed to parse command".to_string()))
    }

    async fn run_simple(&mut self, line: &str, cancel: &CancellationToken) -> Result<CommandResult> {
        let cmd = self.parse(line)?;
        Ok(self.dispatch(&cmd.command, &cmd.arguments, cancel).await)
    }

    /// Run a built-in in-process, anything else through the orchestrator.
    async fn dispatch(&mut self, command: &str, args: &[String], cancel: &CancellationToken) -> CommandResult {
        match self.builtins.lookup(command) {
            Some(builtin) => self.invoke_builtin(builtin.as_ref(), args),
            None => self.processes.execute(command, args, &self.env, cancel).await,
        }
    }

    fn invoke_builtin(&mut self, builtin: &dyn Builtin, args: &[String]) -> CommandResult {
        let mut ctx = BuiltinContext {
            env: &mut self.env,
            processes: &self.processes,
            config: &self.config,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| builtin.execute(args, &mut ctx))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("built-in {} panicked: {message}", builtin.name());
                CommandResult::failure(format!("{}: internal error: {message}", builtin.name()), 1)
            }
        }
    }

    async fn run_pipeline(&mut self, line: &str, cancel: &CancellationToken) -> Result<CommandResult> {
        if line.trim_end().ends_with(" &") {
            return Err(ShellError::Parse(BACKGROUND_COMBINED.to_string()));
        }
        let parsed: Vec<ParsedCommand> = line
            .split(" | ")
            .filter_map(|segment| parser::parse(segment.trim(), &self.env))
            .collect();
        let output_redirect = parsed
            .last()
            .and_then(|last| last.output_redirect.clone().map(|target| (target, last.append)));
        let stages = parsed
            .into_iter()
            .map(|cmd| PipelineStage {
                builtin: self.builtins.contains(&cmd.command),
                command: cmd.command,
                arguments: cmd.arguments,
            })
            .collect();
        let pipeline = Pipeline::new(stages)?;

        let mut result = if pipeline.stages()[0].builtin {
            let mut rest = pipeline.into_stages();
            let first = rest.remove(0);
            let head = self.dispatch(&first.command, &first.arguments, cancel).await;
            if !head.success || rest.is_empty() {
                return Ok(head);
            }
            self.processes
                .execute_pipeline_with_input(&rest, head.output, &self.env, cancel)
                .await
        } else {
            self.processes.execute_pipeline(&pipeline, &self.env, cancel).await
        };

        if let Some((target, append)) = output_redirect {
            if result.success {
                self.redirect_output(&mut result, &target, append)?;
            }
        }
        Ok(result)
    }

    async fn run_background(&mut self, line: &str) -> Result<CommandResult> {
        let cmd = self.parse(line)?;
        if cmd.is_piped() || cmd.output_redirect.is_some() || cmd.input_redirect.is_some() {
            return Err(ShellError::Parse(BACKGROUND_COMBINED.to_string()));
        }
        Ok(self
            .processes
            .execute_background(&cmd.command, &cmd.arguments, &self.env)
            .await)
    }

    async fn run_redirection(&mut self, line: &str, cancel: &CancellationToken) -> Result<CommandResult> {
        let redirection = split_redirection(line)?;
        let cmd = self.parse(redirection.command)?;
        if redirection.kind == RedirectKind::Input {
            log::debug!(
                "input redirection from {} is not wired; {} runs with empty stdin",
                redirection.target,
                cmd.command
            );
        }

        let mut result = self.dispatch(&cmd.command, &cmd.arguments, cancel).await;
        if result.success && redirection.kind != RedirectKind::Input {
            let append = redirection.kind == RedirectKind::Append;
            self.redirect_output(&mut result, redirection.target, append)?;
        }
        Ok(result)
    }

    /// Move the captured output of `result` into `target`.
    fn redirect_output(&self, result: &mut CommandResult, target: &str, append: bool) -> Result<()> {
        let target = unquote(&parser::expand_variables(target, &self.env));
        let path = self.env.resolve(&target);
        log::debug!("writing output to {} (append: {append})", path.display());
        write_output(&path, &result.output, append).map_err(ShellError::Redirection)?;
        result.output.clear();
        Ok(())
    }

    /// Kill every tracked process and wait for supervised tasks to finish.
    pub async fn shutdown(self) {
        self.processes.shutdown(self.config.shutdown_grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_precedence() {
        assert_eq!(classify("dir | sort"), LineKind::Pipeline);
        assert_eq!(classify("dir | sort &"), LineKind::Pipeline);
        assert_eq!(classify("sleep 10 &"), LineKind::Background("sleep 10"));
        assert_eq!(classify("sleep 10 &   "), LineKind::Background("sleep 10"));
        assert_eq!(classify("echo a > b &"), LineKind::Background("echo a > b"));
        assert_eq!(classify("echo a > b"), LineKind::Redirection);
        assert_eq!(classify("echo a >> b"), LineKind::Redirection);
        assert_eq!(classify("sort < b"), LineKind::Redirection);
        assert_eq!(classify("echo a>b"), LineKind::Simple);
        assert_eq!(classify("echo a&"), LineKind::Simple);
        assert_eq!(classify("a|b"), LineKind::Simple);
    }

    #[test]
    fn redirection_split() {
        assert_eq!(
            split_redirection("echo hi > out.txt").unwrap(),
            Redirection {
                command: "echo hi",
                target: "out.txt",
                kind: RedirectKind::Output
            }
        );
        assert_eq!(
            split_redirection("echo hi >> out.txt").unwrap().kind,
            RedirectKind::Append
        );
        let input = split_redirection("sort < in.txt").unwrap();
        assert_eq!(input.kind, RedirectKind::Input);
        assert_eq!(input.target, "in.txt");
    }

    #[test]
    fn input_operator_wins() {
        let r = split_redirection("sort < in.txt > out.txt").unwrap();
        assert_eq!(r.kind, RedirectKind::Input);
        assert_eq!(r.command, "sort");
    }

    #[test]
    fn malformed_redirection() {
        let err = split_redirection("echo a > b > c").unwrap_err();
        assert_eq!(err.to_string(), "Invalid output redirection syntax");
        assert_eq!(err.exit_code(), 1);
        let err = split_redirection("sort < a < b").unwrap_err();
        assert_eq!(err.to_string(), "Invalid input redirection syntax");
        assert!(split_redirection(" > out.txt").is_err());
    }

    #[tokio::test]
    async fn panics_and_errors_become_failures() {
        let broken = true;
        let r = contained(async move {
            if broken {
                panic!("pipeline wiring broke");
            }
            Ok(CommandResult::default())
        })
        .await;
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.error, "internal error: pipeline wiring broke");

        let r = contained(async { Err(ShellError::Cancelled) }).await;
        assert_eq!(r.exit_code, 130);
        assert_eq!(r.error, "Command cancelled");

        let r = contained(async { Ok(CommandResult::ok("fine")) }).await;
        assert!(r.success);
        assert_eq!(r.output, "fine");
    }

    #[test]
    fn panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
