//! Spawning, wiring and tracking of OS processes.
//!
//! Every child is owned by one supervisor task that waits for it to exit or for an
//! explicit kill request. Supervisors and output drains run in a [`JoinSet`] owned by
//! the orchestrator and are joined by [`ProcessOrchestrator::shutdown`].

use crate::command::{CommandResult, ExitCode};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::events::{EventSink, ShellEvent};
use crate::external::{exit_code_of, resolve_executable};
use crate::parser::{Pipeline, PipelineStage, unquote};
use crate::registry::{Foreground, JobInfo, Placement, Registry};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use crate::registry::ProcessState;

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Exit {
    state: ProcessState,
    code: ExitCode,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn event(self, pid: u32, line: String) -> ShellEvent {
        match self {
            Stream::Stdout => ShellEvent::OutputLine { pid, line },
            Stream::Stderr => ShellEvent::ErrorLine { pid, line },
        }
    }
}

#[derive(Debug)]
struct Inner {
    registry: Registry,
    events: EventSink,
    tasks: Mutex<JoinSet<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registry.drain_all();
    }
}

/// Runs external commands: simple, piped and in the background.
#[derive(Debug, Clone)]
pub struct ProcessOrchestrator {
    inner: Arc<Inner>,
}

impl Default for ProcessOrchestrator {
    fn default() -> Self {
        Self::new(EventSink::default())
    }
}

impl ProcessOrchestrator {
    pub fn new(events: EventSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::default(),
                events,
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `fut` into the tracked task set, reaping whatever already finished.
    fn track<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                if e.is_panic() {
                    log::warn!("supervised task panicked: {e}");
                }
            }
        }
        tasks.spawn(fut);
    }

    fn resolve(&self, command: &str, env: &Environment) -> Result<PathBuf> {
        resolve_executable(command, env.current_dir(), env.get_var("PATH"))
            .ok_or_else(|| ShellError::NotRecognized(command.to_string()))
    }

    /// Read `reader` line by line, emitting events; the text is returned if `capture`.
    fn spawn_drain<R>(
        &self,
        reader: Option<R>,
        pid: u32,
        stream: Stream,
        capture: bool,
    ) -> oneshot::Receiver<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let events = self.inner.events.clone();
        self.track(async move {
            let text = match reader {
                Some(reader) => drain(reader, pid, stream, &events, capture).await,
                None => String::new(),
            };
            let _ = tx.send(text);
        });
        rx
    }

    /// Hand `child` to a supervisor task and register it under `placement`.
    fn supervise(
        &self,
        mut child: Child,
        pid: u32,
        name: &str,
        placement: Placement,
    ) -> oneshot::Receiver<Exit> {
        let kill = CancellationToken::new();
        let serial = self.inner.registry.insert(pid, name, placement, kill.clone());
        let registry = self.inner.registry.clone();
        let events = self.inner.events.clone();
        let started_in_background = placement == Placement::Background;
        let (tx, rx) = oneshot::channel();

        self.track(async move {
            let exit = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => {
                        let code = exit_code_of(status);
                        Exit { state: ProcessState::Exited(code), code }
                    }
                    Err(e) => {
                        log::warn!("waiting for pid {pid} failed: {e}");
                        Exit { state: ProcessState::Exited(-1), code: -1 }
                    }
                },
                _ = kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        log::warn!("failed to kill pid {pid}: {e}");
                    }
                    let code = match child.wait().await {
                        Ok(status) => exit_code_of(status),
                        Err(_) => -1,
                    };
                    Exit { state: ProcessState::Killed, code }
                }
            };
            log::debug!("pid {pid} finished: {:?}", exit.state);
            registry.finish(pid, serial, exit.state);
            registry.remove(pid, serial);
            if started_in_background {
                log::info!("background job {pid} completed with exit code {}", exit.code);
                events.emit(ShellEvent::JobCompleted {
                    pid,
                    exit_code: exit.code,
                });
            }
            let _ = tx.send(exit);
        });
        rx
    }

    /// Run one external command and wait for it.
    ///
    /// Cancelling `cancel` stops the wait; the child keeps running until killed.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        env: &Environment,
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.run(command, args, env, cancel)
            .await
            .unwrap_or_else(CommandResult::from)
    }

    async fn run(
        &self,
        command: &str,
        args: &[String],
        env: &Environment,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let program = self.resolve(command, env)?;
        let mut child = command_for(&program, args, env).spawn()?;
        let pid = child.id().unwrap_or_default();
        log::debug!("spawned {} as pid {pid}", program.display());

        let stdout = self.spawn_drain(child.stdout.take(), pid, Stream::Stdout, true);
        let stderr = self.spawn_drain(child.stderr.take(), pid, Stream::Stderr, true);
        let exit = self.supervise(child, pid, command, Placement::Running);

        let wait = async move {
            let code = exit.await.map_or(-1, |e| e.code);
            let output = stdout.await.unwrap_or_default();
            let error = stderr.await.unwrap_or_default();
            CommandResult::from_exit(code, output, error)
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("stopped waiting for pid {pid}");
                Err(ShellError::Cancelled)
            }
            result = wait => Ok(result),
        }
    }

    /// Run a pipeline of external commands.
    pub async fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        env: &Environment,
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.run_pipeline(pipeline.stages(), None, env, cancel)
            .await
            .unwrap_or_else(CommandResult::from)
    }

    /// Like [`execute_pipeline`](Self::execute_pipeline), with `input` written to the
    /// first stage's standard input. A single stage is allowed here.
    pub async fn execute_pipeline_with_input(
        &self,
        stages: &[PipelineStage],
        input: String,
        env: &Environment,
        cancel: &CancellationToken,
    ) -> CommandResult {
        self.run_pipeline(stages, Some(input), env, cancel)
            .await
            .unwrap_or_else(CommandResult::from)
    }

    async fn run_pipeline(
        &self,
        stages: &[PipelineStage],
        input: Option<String>,
        env: &Environment,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        if stages.is_empty() {
            return Err(ShellError::Parse(
                "Invalid pipeline - at least two commands required".to_string(),
            ));
        }

        // All stages start before any wiring.
        let mut children: Vec<Child> = Vec::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            let spawned = self.resolve(&stage.command, env).and_then(|program| {
                let mut cmd = command_for(&program, &stage.arguments, env);
                if i > 0 || input.is_some() {
                    cmd.stdin(Stdio::piped());
                }
                Ok(cmd.spawn()?)
            });
            match spawned {
                Ok(child) => children.push(child),
                Err(e) => {
                    log::debug!("pipeline stage {i} ({}) failed to start: {e}", stage.command);
                    for mut started in children {
                        let _ = started.start_kill();
                        let _ = started.wait().await;
                    }
                    return Err(e);
                }
            }
        }

        let mut wiring = JoinSet::new();
        if let Some(text) = input {
            if let Some(mut stdin) = children[0].stdin.take() {
                wiring.spawn(async move {
                    if let Err(e) = stdin.write_all(text.as_bytes()).await {
                        if e.kind() != io::ErrorKind::BrokenPipe {
                            log::warn!("writing pipeline input failed: {e}");
                        }
                    }
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let last = children.len() - 1;
        let pids: Vec<u32> = children
            .iter()
            .map(|c| c.id().unwrap_or_default())
            .collect();
        for i in 0..last {
            let upstream = children[i].stdout.take();
            let downstream = children[i + 1].stdin.take();
            if let (Some(mut from), Some(mut to)) = (upstream, downstream) {
                let (src, dst) = (pids[i], pids[i + 1]);
                log::debug!("wiring pid {src} -> pid {dst}");
                wiring.spawn(async move {
                    if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
                        if e.kind() != io::ErrorKind::BrokenPipe {
                            log::warn!("pipe {src} -> {dst} failed: {e}");
                        }
                    }
                    let _ = to.shutdown().await;
                });
            }
            // Never read back, but a full stderr pipe would stall the stage.
            drop(self.spawn_drain(children[i].stderr.take(), pids[i], Stream::Stderr, false));
        }

        let stdout = self.spawn_drain(children[last].stdout.take(), pids[last], Stream::Stdout, true);
        let stderr = self.spawn_drain(children[last].stderr.take(), pids[last], Stream::Stderr, true);

        let exits: Vec<_> = children
            .into_iter()
            .zip(stages)
            .zip(&pids)
            .map(|((child, stage), &pid)| {
                self.supervise(child, pid, &stage.command, Placement::Running)
            })
            .collect();

        let wait = async move {
            let mut code = -1;
            for exit in exits {
                code = exit.await.map_or(-1, |e| e.code);
            }
            while wiring.join_next().await.is_some() {}
            let output = stdout.await.unwrap_or_default();
            let error = stderr.await.unwrap_or_default();
            CommandResult::from_exit(code, output, error)
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("stopped waiting for pipeline {pids:?}");
                Err(ShellError::Cancelled)
            }
            result = wait => Ok(result),
        }
    }

    /// Start a command without waiting for it. Its output goes to events only.
    pub async fn execute_background(
        &self,
        command: &str,
        args: &[String],
        env: &Environment,
    ) -> CommandResult {
        let spawned = self
            .resolve(command, env)
            .and_then(|program| Ok(command_for(&program, args, env).spawn()?));
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return e.into(),
        };
        let pid = child.id().unwrap_or_default();
        drop(self.spawn_drain(child.stdout.take(), pid, Stream::Stdout, false));
        drop(self.spawn_drain(child.stderr.take(), pid, Stream::Stderr, false));
        drop(self.supervise(child, pid, command, Placement::Background));
        log::info!("background job {pid} started: {command}");
        CommandResult::ok(format!("[Background job started with PID: {pid}]\n"))
    }

    /// Kill a process: tracked running, then tracked background, then any OS process.
    ///
    /// Returns whether a termination request was delivered.
    pub fn kill(&self, pid: u32) -> bool {
        if self.inner.registry.kill(pid) {
            return true;
        }
        kill_os_process(pid)
    }

    /// Kill every foreground-tracked process.
    pub fn kill_running(&self) -> usize {
        self.inner
            .registry
            .running_pids()
            .into_iter()
            .filter(|&pid| self.inner.registry.kill(pid))
            .count()
    }

    /// Move a background job to the foreground map. Never blocks.
    pub fn bring_to_foreground(&self, pid: u32) -> CommandResult {
        match self.inner.registry.to_foreground(pid) {
            Foreground::Moved(name) => {
                CommandResult::ok(format!("[{pid}] {name} moved to foreground\n"))
            }
            Foreground::AlreadyExited(code) => CommandResult::ok(format!(
                "Job {pid} has already completed with exit code: {code}\n"
            )),
            Foreground::NotFound => {
                CommandResult::failure(format!("No background job found with PID: {pid}"), 1)
            }
        }
    }

    pub fn background_jobs(&self) -> Vec<JobInfo> {
        self.inner.registry.background_jobs()
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.inner.registry.running_pids()
    }

    pub fn is_background(&self, pid: u32) -> bool {
        self.inner.registry.contains(pid, Placement::Background)
    }

    /// Kill every tracked process and join all supervised tasks.
    ///
    /// Tasks still running after `grace` are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let killed = self.inner.registry.drain_all();
        if killed > 0 {
            log::debug!("shutdown: killing {killed} tracked process(es)");
        }
        let mut tasks = std::mem::take(&mut *self.tasks());
        let joined = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            log::warn!("shutdown: {} task(s) still running, aborting", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

fn command_for(program: &Path, args: &[String], env: &Environment) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|arg| unquote(arg)))
        .env_clear()
        .envs(env.vars())
        .current_dir(env.current_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn drain<R>(reader: R, pid: u32, stream: Stream, events: &EventSink, capture: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if capture {
                    captured.push_str(&line);
                    captured.push('\n');
                }
                events.emit(stream.event(pid, line));
            }
            Err(e) => {
                log::warn!("reading {stream:?} of pid {pid} failed: {e}");
                break;
            }
        }
    }
    captured
}

#[cfg(unix)]
fn kill_os_process(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            log::debug!("sent SIGKILL to untracked pid {pid}");
            true
        }
        Err(e) => {
            log::warn!("failed to kill pid {pid}: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_os_process(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match std::process::Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            log::warn!("failed to kill pid {pid}: {e}");
            false
        }
    }
}
