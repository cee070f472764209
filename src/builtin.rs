use crate::command::{Builtin, BuiltinContext, CommandResult, ExitCode};
use crate::parser::unquote;
use crate::registry::ProcessState;
use crate::sentinel;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. Arguments reach them with quotes
/// already removed.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Switches the command declares. Only a leading run of these is parsed as
    /// options; every other word is a positional, even when it starts with `-`.
    const SWITCHES: &'static [&'static str] = &[];

    /// Whether a lone `--help` prints usage instead of reaching the command.
    const HELP_FLAG: bool = true;

    /// One-line description shown by `help`.
    fn describe() -> &'static str;

    /// Executes the command, writing to `out` and `err`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    /// An `Err` becomes exit code 1 with its message on the error stream.
    fn execute(
        self,
        out: &mut dyn Write,
        err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode>;
}

/// Adapts a [`BuiltinCommand`] type to the [`Builtin`] table interface under a name.
pub(crate) struct Factory<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Factory<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> Builtin for Factory<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn describe(&self) -> &str {
        T::describe()
    }

    fn execute(&self, args: &[String], ctx: &mut BuiltinContext<'_>) -> CommandResult {
        let args = argv::<T>(args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let cmd = match T::from_args(&[self.name], &args) {
            Ok(cmd) => cmd,
            Err(EarlyExit { output, status }) => {
                return match status {
                    Ok(()) => CommandResult::ok(output),
                    Err(()) => CommandResult::failure(output.trim_end(), 1),
                };
            }
        };

        let mut out = Vec::new();
        let mut err = Vec::new();
        match cmd.execute(&mut out, &mut err, ctx) {
            Ok(code) => CommandResult::from_exit(code, lossy(out), lossy(err)),
            Err(e) => {
                log::debug!("{} failed: {e:#}", self.name);
                let mut error = lossy(err);
                error.push_str(&format!("{e:#}"));
                CommandResult {
                    output: lossy(out),
                    ..CommandResult::failure(error, 1)
                }
            }
        }
    }
}

/// Unquoted arguments with `--` after the leading switches, so argh never reads
/// user text as a flag or a help request.
fn argv<T: BuiltinCommand>(args: &[String]) -> Vec<String> {
    if T::HELP_FLAG && matches!(args, [only] if only == "--help") {
        return vec!["--help".to_string()];
    }
    let switches = args
        .iter()
        .take_while(|arg| T::SWITCHES.contains(&arg.as_str()))
        .count();
    let mut argv: Vec<String> = args.iter().map(|arg| unquote(arg)).collect();
    argv.insert(switches, "--".to_string());
    argv
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Name → capability table. Lookups are case-insensitive.
#[derive(Clone, Default)]
pub struct BuiltinTable {
    commands: HashMap<String, Arc<dyn Builtin>>,
}

impl BuiltinTable {
    /// Every command the shell ships with.
    pub fn standard() -> Self {
        let mut table = Self::default();
        table.add::<Cd>(&["cd", "chdir"]);
        table.add::<Dir>(&["dir", "ls"]);
        table.add::<Pwd>(&["pwd"]);
        table.add::<Echo>(&["echo"]);
        table.add::<Set>(&["set"]);
        table.add::<Env>(&["env"]);
        table.add::<Clear>(&["cls", "clear"]);
        table.add::<Exit>(&["exit"]);
        table.add::<Help>(&["help"]);
        table.add::<History>(&["history"]);
        table.add::<Pushd>(&["pushd"]);
        table.add::<Popd>(&["popd"]);
        table.add::<Mkdir>(&["mkdir"]);
        table.add::<Rmdir>(&["rmdir"]);
        table.add::<Del>(&["del", "rm"]);
        table.add::<CopyFile>(&["copy", "cp"]);
        table.add::<MoveFile>(&["move", "mv"]);
        table.add::<Type>(&["type", "cat"]);
        table.add::<Prompt>(&["prompt"]);
        table.add::<Jobs>(&["jobs"]);
        table.add::<Fg>(&["fg"]);
        table.add::<Bg>(&["bg"]);
        table.add::<Kill>(&["kill"]);
        for (name, describe) in ART_COMMANDS {
            table.register(Arc::new(AsciiArt { name, describe }));
        }
        table
    }

    fn add<T: BuiltinCommand + 'static>(&mut self, names: &[&'static str]) {
        for &name in names {
            self.register(Arc::new(Factory::<T>::new(name)));
        }
    }

    /// Add or replace a command.
    pub fn register(&mut self, builtin: Arc<dyn Builtin>) {
        self.commands
            .insert(builtin.name().to_ascii_lowercase(), builtin);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Builtin>> {
        self.commands.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_ascii_lowercase())
    }

    /// All names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(FromArgs)]
/// change the current directory, or print it when no path is given.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to; absolute or relative to the current directory.
    pub path: Vec<String>,
}

impl BuiltinCommand for Cd {
    fn describe() -> &'static str {
        "Change directory"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.path.is_empty() {
            writeln!(out, "{}", ctx.env.current_dir().display())?;
            return Ok(0);
        }
        let path = self.path.join(" ");
        if !ctx.env.change_directory(&path) {
            bail!("Cannot find path: {path}");
        }
        writeln!(out, "Changed directory to: {}", ctx.env.current_dir().display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// list directory contents.
pub struct Dir {
    #[argh(positional, greedy)]
    /// directory to list; defaults to the current directory.
    pub path: Vec<String>,
}

impl BuiltinCommand for Dir {
    fn describe() -> &'static str {
        "List directory contents"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let dir = if self.path.is_empty() {
            ctx.env.current_dir().to_path_buf()
        } else {
            ctx.env.resolve(self.path.join(" "))
        };
        let dir = fs::canonicalize(&dir)
            .with_context(|| format!("Cannot find path: {}", dir.display()))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("dir: {}", dir.display()))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let modified = meta
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            if meta.is_dir() {
                dirs.push((name, modified));
            } else {
                files.push((name, modified, meta.len()));
            }
        }
        dirs.sort();
        files.sort();

        writeln!(out, "\n Directory of {}\n", dir.display())?;
        writeln!(out, "{:<7} {:<20} {:>10} Name", "Mode", "LastWriteTime", "Length")?;
        writeln!(out, "{}", "-".repeat(70))?;
        for (name, modified) in dirs {
            writeln!(out, "{:<7} {:<20} {:>10} {}", "d-----", modified, "<DIR>", name)?;
        }
        for (name, modified, len) in files {
            writeln!(out, "{:<7} {:<20} {:>10} {}", "-a----", modified, len, name)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn describe() -> &'static str {
        "Print working directory"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        writeln!(out, "{}", ctx.env.current_dir().display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    const SWITCHES: &'static [&'static str] = &["-n"];
    const HELP_FLAG: bool = false;

    fn describe() -> &'static str {
        "Display text"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(out, "{}", s)?;
        } else {
            writeln!(out, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// list all variables, or set one with NAME=VALUE.
pub struct Set {
    #[argh(positional, greedy)]
    /// assignment in the form NAME=VALUE.
    pub assignment: Vec<String>,
}

impl BuiltinCommand for Set {
    fn describe() -> &'static str {
        "Set/display environment variables"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.assignment.is_empty() {
            for (name, value) in ctx.env.sorted_vars() {
                writeln!(out, "{name}={value}")?;
            }
            return Ok(0);
        }
        let assignment = self.assignment.join(" ");
        let Some((name, value)) = assignment.split_once('=') else {
            bail!("Invalid syntax. Use: set VARIABLE=VALUE");
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            bail!("Invalid syntax. Use: set VARIABLE=VALUE");
        }
        ctx.env.set_var(name, value);
        writeln!(out, "Set {name}={value}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// show session identity and every variable.
pub struct Env {}

impl BuiltinCommand for Env {
    fn describe() -> &'static str {
        "Display environment info"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let env = &*ctx.env;
        writeln!(out, "\n=== Environment ===")?;
        writeln!(out, "Current Directory: {}", env.current_dir().display())?;
        writeln!(out, "User: {}", env.user_name())?;
        writeln!(out, "Machine: {}", env.machine_name())?;
        writeln!(out, "Home: {}", env.home_dir().display())?;
        writeln!(out, "Version: {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "\n=== Variables ===")?;
        for (name, value) in env.sorted_vars() {
            writeln!(out, "{name}={value}")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// clear the screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn describe() -> &'static str {
        "Clear screen"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        write!(out, "{}", sentinel::CLEAR_SCREEN)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// exit the shell process.
pub struct Exit {
    #[argh(positional)]
    /// exit code, 0 when omitted.
    pub code: Option<i32>,
}

impl BuiltinCommand for Exit {
    fn describe() -> &'static str {
        "Exit the shell"
    }

    fn execute(
        self,
        _out: &mut dyn Write,
        _err: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        std::process::exit(self.code.unwrap_or(0))
    }
}

#[derive(FromArgs)]
/// show the list of built-in commands and operators.
pub struct Help {}

const HELP: &str = "
=== Built-in Commands ===

File & Directory:
  cd/chdir [path]     - Change directory
  dir/ls [path]       - List directory contents
  pwd                 - Print working directory
  mkdir [path]        - Create directory
  rmdir [path]        - Remove directory
  del/rm [file...]    - Delete files
  copy/cp [src] [dst] - Copy file
  move/mv [src] [dst] - Move file
  type/cat [file]     - Display file contents

Environment & Display:
  echo [text]         - Display text
  set [var=value]     - Set/display environment variables
  env                 - Display environment info
  cls/clear           - Clear screen
  prompt [template]   - Set prompt template (WS$G, $P$G, etc.)

Navigation & History:
  pushd [path]        - Push directory to stack
  popd                - Pop directory from stack
  history             - Show command history

Process Management:
  jobs                - List background jobs
  fg [pid]            - Bring background job to foreground
  bg [pid]            - Report a background job
  kill [pid...]       - Terminate processes by PID

Operators:
  command | command   - Pipe output between commands
  command > file      - Redirect output to file (overwrite)
  command >> file     - Redirect output to file (append)
  command < file      - Input redirection (parsed, not wired)
  command &           - Run command in background

ASCII Art:
  logo                - Display the shell logo
  banner              - Display the banner
  splash              - Display the splash screen

System:
  help                - Show this help
  exit [code]         - Exit the shell
";

impl BuiltinCommand for Help {
    fn describe() -> &'static str {
        "Show this help"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        _ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        write!(out, "{HELP}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// show the command history, oldest first.
pub struct History {}

impl BuiltinCommand for History {
    fn describe() -> &'static str {
        "Show command history"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        for (i, line) in ctx.env.history().enumerate() {
            writeln!(out, "{:>4}: {}", i + 1, line)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// remember the current directory and change to another one.
pub struct Pushd {
    #[argh(positional, greedy)]
    /// directory to switch to; defaults to the home directory.
    pub path: Vec<String>,
}

impl BuiltinCommand for Pushd {
    fn describe() -> &'static str {
        "Push directory to stack"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let path = if self.path.is_empty() {
            ctx.env.home_dir().to_path_buf()
        } else {
            self.path.join(" ").into()
        };
        if !ctx.env.push_directory(&path) {
            bail!("Cannot find path: {}", path.display());
        }
        writeln!(out, "{}", ctx.env.current_dir().display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// return to the most recently pushed directory.
pub struct Popd {}

impl BuiltinCommand for Popd {
    fn describe() -> &'static str {
        "Pop directory from stack"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let dir = ctx.env.pop_directory()?;
        writeln!(out, "{}", dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// create a directory and any missing parents.
pub struct Mkdir {
    #[argh(positional, greedy)]
    /// directory to create.
    pub path: Vec<String>,
}

impl BuiltinCommand for Mkdir {
    fn describe() -> &'static str {
        "Create directory"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.path.is_empty() {
            bail!("Missing directory name");
        }
        let path = self.path.join(" ");
        fs::create_dir_all(ctx.env.resolve(&path))
            .with_context(|| format!("mkdir: {path}"))?;
        writeln!(out, "Directory created: {path}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// remove a directory and everything in it.
pub struct Rmdir {
    #[argh(positional, greedy)]
    /// directory to remove.
    pub path: Vec<String>,
}

impl BuiltinCommand for Rmdir {
    fn describe() -> &'static str {
        "Remove directory"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.path.is_empty() {
            bail!("Missing directory name");
        }
        let path = self.path.join(" ");
        fs::remove_dir_all(ctx.env.resolve(&path))
            .with_context(|| format!("rmdir: {path}"))?;
        writeln!(out, "Directory removed: {path}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// delete files.
pub struct Del {
    #[argh(positional, greedy)]
    /// files to delete.
    pub files: Vec<String>,
}

impl BuiltinCommand for Del {
    fn describe() -> &'static str {
        "Delete files"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.files.is_empty() {
            bail!("Missing file name");
        }
        for file in &self.files {
            fs::remove_file(ctx.env.resolve(file)).with_context(|| format!("del: {file}"))?;
        }
        writeln!(out, "Deleted {} file(s)", self.files.len())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// copy a file, overwriting the destination.
pub struct CopyFile {
    #[argh(positional)]
    /// file to copy.
    pub source: String,
    #[argh(positional)]
    /// target file or directory.
    pub destination: String,
}

impl BuiltinCommand for CopyFile {
    fn describe() -> &'static str {
        "Copy file"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let source = ctx.env.resolve(&self.source);
        let mut target = ctx.env.resolve(&self.destination);
        if target.is_dir() {
            if let Some(name) = source.file_name() {
                target.push(name);
            }
        }
        fs::copy(&source, &target)
            .with_context(|| format!("copy: {} -> {}", self.source, self.destination))?;
        writeln!(out, "Copied {} to {}", self.source, self.destination)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// move or rename a file.
pub struct MoveFile {
    #[argh(positional)]
    /// file to move.
    pub source: String,
    #[argh(positional)]
    /// new path.
    pub destination: String,
}

impl BuiltinCommand for MoveFile {
    fn describe() -> &'static str {
        "Move file"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        fs::rename(ctx.env.resolve(&self.source), ctx.env.resolve(&self.destination))
            .with_context(|| format!("move: {} -> {}", self.source, self.destination))?;
        writeln!(out, "Moved {} to {}", self.source, self.destination)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// print a file to standard output.
pub struct Type {
    #[argh(positional, greedy)]
    /// file to print.
    pub file: Vec<String>,
}

impl BuiltinCommand for Type {
    fn describe() -> &'static str {
        "Display file contents"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.file.is_empty() {
            bail!("Missing file name");
        }
        let file = self.file.join(" ");
        let contents =
            fs::read(ctx.env.resolve(&file)).with_context(|| format!("type: {file}"))?;
        out.write_all(&contents)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// show or set the prompt template.
pub struct Prompt {
    #[argh(positional, greedy)]
    /// new template, e.g. $P$G.
    pub template: Vec<String>,
}

impl BuiltinCommand for Prompt {
    fn describe() -> &'static str {
        "Set prompt template"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.template.is_empty() {
            writeln!(out, "Current prompt template: {}\n", ctx.env.prompt_template())?;
            writeln!(out, "Available prompt variables:")?;
            writeln!(out, "  $P - Current directory path")?;
            writeln!(out, "  $G - Greater than symbol (>)")?;
            writeln!(out, "  $D - Current date")?;
            writeln!(out, "  $T - Current time")?;
            writeln!(out, "  $U - Username")?;
            writeln!(out, "  $M - Machine name")?;
            writeln!(out, "  WS - Shell brand (shows as 'WS [folder]>')\n")?;
            writeln!(out, "Examples:")?;
            writeln!(out, "  prompt WS$G        - WS [folder]> (default)")?;
            writeln!(out, "  prompt $P$G        - Full path>")?;
            writeln!(out, "  prompt $U@$M$G     - user@machine>")?;
            writeln!(out, "  prompt [$T] $G     - [time] >")?;
            return Ok(0);
        }
        let template = self.template.join(" ");
        ctx.env.set_var("PROMPT", template.as_str());
        writeln!(out, "Prompt updated to: {template}")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// list background jobs.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn describe() -> &'static str {
        "List background jobs"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let jobs = ctx.processes.background_jobs();
        if jobs.is_empty() {
            writeln!(out, "No background jobs running.")?;
            return Ok(0);
        }
        writeln!(out, "\n=== Background Jobs ===\n")?;
        writeln!(out, "{:<10} {:<30} Status", "PID", "Process Name")?;
        writeln!(out, "{}", "-".repeat(60))?;
        for job in jobs {
            let status = match job.state {
                ProcessState::Running => "Running",
                // Killed jobs are evicted by the kill itself and never listed.
                ProcessState::Exited(_) | ProcessState::Killed => "Completed",
            };
            writeln!(out, "{:<10} {:<30} {}", job.pid, job.name, status)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// bring a background job to the foreground.
pub struct Fg {
    #[argh(positional)]
    /// process id of the job.
    pub pid: u32,
}

impl BuiltinCommand for Fg {
    fn describe() -> &'static str {
        "Bring background job to foreground"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        let result = ctx.processes.bring_to_foreground(self.pid);
        out.write_all(result.output.as_bytes())?;
        err.write_all(result.error.as_bytes())?;
        Ok(result.exit_code)
    }
}

#[derive(FromArgs)]
/// report on a background job; jobs cannot be stopped, so there is nothing to resume.
pub struct Bg {
    #[argh(positional)]
    /// process id of the job.
    pub pid: u32,
}

impl BuiltinCommand for Bg {
    fn describe() -> &'static str {
        "Report a background job"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        _err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if !ctx.processes.is_background(self.pid) {
            bail!("No background job found with PID: {}", self.pid);
        }
        writeln!(out, "Job {} is already running in background.", self.pid)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// terminate one or more processes.
pub struct Kill {
    #[argh(positional, greedy)]
    /// process ids to terminate.
    pub pids: Vec<String>,
}

impl BuiltinCommand for Kill {
    fn describe() -> &'static str {
        "Terminate processes by PID"
    }

    fn execute(
        self,
        out: &mut dyn Write,
        err: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> Result<ExitCode> {
        if self.pids.is_empty() {
            bail!("Usage: kill <PID> [PID2] [PID3] ...\nTerminate one or more processes.");
        }
        let mut killed = Vec::new();
        let mut failed = Vec::new();
        for arg in &self.pids {
            match arg.parse::<u32>() {
                Ok(pid) if ctx.processes.kill(pid) => killed.push(pid.to_string()),
                Ok(pid) => failed.push(format!("PID {pid}: no such process")),
                Err(_) => failed.push(format!("Invalid PID: {arg}")),
            }
        }
        if !killed.is_empty() {
            writeln!(
                out,
                "Successfully killed {} process(es): {}",
                killed.len(),
                killed.join(", ")
            )?;
        }
        if failed.is_empty() {
            return Ok(0);
        }
        writeln!(err, "Failed to kill {} process(es):", failed.len())?;
        for reason in &failed {
            writeln!(err, "  - {reason}")?;
        }
        Ok(1)
    }
}

const ART_COMMANDS: [(&str, &str); 3] = [
    ("logo", "Display the shell logo"),
    ("banner", "Display the banner"),
    ("splash", "Display the splash screen"),
];

/// Shows `<asset_dir>/ascii/<name>.txt`, tagged with its image when
/// `<asset_dir>/ascii/gui_pics/<name>.png` exists.
struct AsciiArt {
    name: &'static str,
    describe: &'static str,
}

impl AsciiArt {
    fn render(&self, asset_dir: &Path) -> Result<String> {
        let file = format!("{}.txt", self.name);
        let text_path = asset_dir.join("ascii").join(&file);
        if !text_path.is_file() {
            bail!("ASCII art file not found: {file}");
        }
        let text = fs::read_to_string(&text_path)
            .with_context(|| format!("Error loading ASCII art: {}", text_path.display()))?;
        let image = asset_dir
            .join("ascii")
            .join("gui_pics")
            .join(format!("{}.png", self.name));
        if !image.is_file() {
            return Ok(text);
        }
        let image = fs::canonicalize(&image).unwrap_or(image);
        Ok(sentinel::art_image_marker(&image, &text))
    }
}

impl Builtin for AsciiArt {
    fn name(&self) -> &str {
        self.name
    }

    fn describe(&self) -> &str {
        self.describe
    }

    fn execute(&self, args: &[String], ctx: &mut BuiltinContext<'_>) -> CommandResult {
        if let Some(arg) = args.first() {
            return CommandResult::failure(format!("Unrecognized argument: {arg}"), 1);
        }
        match self.render(&ctx.config.asset_dir) {
            Ok(output) => CommandResult::ok(output),
            Err(e) => CommandResult::failure(e.to_string(), 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::env::Environment;
    use crate::process::ProcessOrchestrator;

    struct Fixture {
        env: Environment,
        processes: ProcessOrchestrator,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig::default();
            Self {
                env: Environment::new(&config),
                processes: ProcessOrchestrator::default(),
                config,
            }
        }

        fn run(&mut self, name: &str, args: &[&str]) -> CommandResult {
            let table = BuiltinTable::standard();
            let builtin = table.lookup(name).unwrap();
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let mut ctx = BuiltinContext {
                env: &mut self.env,
                processes: &self.processes,
                config: &self.config,
            };
            builtin.execute(&args, &mut ctx)
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = BuiltinTable::standard();
        assert!(table.contains("CD"));
        assert!(table.contains("Echo"));
        assert!(table.lookup("LS").is_some());
        assert!(!table.contains("doesnotexist123"));
    }

    #[test]
    fn commands_without_operands_reject_extra_words() {
        let mut fx = Fixture::new();
        for name in ["pwd", "env", "cls", "help", "history", "popd", "jobs", "logo"] {
            let r = fx.run(name, &["-x"]);
            assert!(!r.success, "{name} accepted an extra word");
            assert_eq!(r.exit_code, 1, "{name}");
            assert!(!r.error.is_empty(), "{name}");
        }
    }

    #[test]
    fn lone_help_flag_prints_usage() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new();
        assert!(fx.env.change_directory(tmp.path()));
        let r = fx.run("mkdir", &["--help"]);
        assert!(r.success);
        assert!(r.output.contains("Usage: mkdir"));
        assert!(!tmp.path().join("--help").exists());
    }

    #[test]
    fn echo_prints_dashes_and_help_words() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("echo", &["-5"]).output, "-5\n");
        assert_eq!(fx.run("echo", &["---", "done", "---"]).output, "--- done ---\n");
        assert_eq!(fx.run("echo", &["help"]).output, "help\n");
        assert_eq!(fx.run("echo", &["--help"]).output, "--help\n");
        assert_eq!(fx.run("echo", &["\"-n\"", "x"]).output, "-n x\n");
    }

    #[test]
    fn word_help_is_a_path_operand() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut fx = Fixture::new();
        assert!(fx.env.change_directory(tmp.path()));
        let r = fx.run("mkdir", &["help"]);
        assert_eq!(r.output, "Directory created: help\n");
        assert!(tmp.path().join("help").is_dir());

        let r = fx.run("mkdir", &["-p"]);
        assert!(r.success, "{r:?}");
        assert!(tmp.path().join("-p").is_dir());
        Ok(())
    }

    #[test]
    fn set_accepts_negative_values() {
        let mut fx = Fixture::new();
        let r = fx.run("set", &["X=-1"]);
        assert!(r.success, "{r:?}");
        assert_eq!(fx.env.get_var("X"), Some("-1"));
    }

    #[test]
    fn test_echo_joins_arguments() {
        let r = Fixture::new().run("echo", &["hello", "\"big   world\""]);
        assert!(r.success);
        assert_eq!(r.output, "hello big   world\n");
    }

    #[test]
    fn test_echo_no_newline() {
        let r = Fixture::new().run("echo", &["-n", "x"]);
        assert_eq!(r.output, "x");
    }

    #[test]
    fn set_and_list_variables() {
        let mut fx = Fixture::new();
        let r = fx.run("set", &["GREETING=hello"]);
        assert!(r.success);
        assert_eq!(r.output, "Set GREETING=hello\n");
        assert_eq!(fx.env.get_var("greeting"), Some("hello"));

        let listed = fx.run("set", &[]);
        assert!(listed.output.lines().any(|l| l == "GREETING=hello"));
    }

    #[test]
    fn set_without_equals_is_an_error() {
        let r = Fixture::new().run("set", &["oops"]);
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
        assert_eq!(r.error, "Invalid syntax. Use: set VARIABLE=VALUE");
    }

    #[test]
    fn cd_and_pwd() {
        let tmp = tempfile::tempdir().unwrap();
        let canonical = fs::canonicalize(tmp.path()).unwrap();
        let mut fx = Fixture::new();
        let r = fx.run("cd", &[tmp.path().to_str().unwrap()]);
        assert!(r.success, "{r:?}");
        assert_eq!(
            r.output,
            format!("Changed directory to: {}\n", canonical.display())
        );
        let r = fx.run("pwd", &[]);
        assert_eq!(r.output, format!("{}\n", canonical.display()));
    }

    #[test]
    fn cd_to_missing_path_fails() {
        let r = Fixture::new().run("chdir", &["no_such_dir_12345"]);
        assert!(!r.success);
        assert_eq!(r.error, "Cannot find path: no_such_dir_12345");
    }

    #[test]
    fn popd_on_empty_stack() {
        let r = Fixture::new().run("popd", &[]);
        assert!(!r.success);
        assert_eq!(r.error, "Directory stack is empty");
    }

    #[test]
    fn file_commands_work_relative_to_current_dir() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut fx = Fixture::new();
        assert!(fx.env.change_directory(tmp.path()));

        assert!(fx.run("mkdir", &["a/b"]).success);
        assert!(tmp.path().join("a/b").is_dir());

        fs::write(tmp.path().join("note.txt"), "hello\nworld\n")?;
        let r = fx.run("type", &["note.txt"]);
        assert_eq!(r.output, "hello\nworld\n");

        assert!(fx.run("copy", &["note.txt", "a"]).success);
        assert!(tmp.path().join("a/note.txt").is_file());

        assert!(fx.run("mv", &["note.txt", "moved.txt"]).success);
        assert!(tmp.path().join("moved.txt").is_file());

        let r = fx.run("del", &["moved.txt", "a/note.txt"]);
        assert_eq!(r.output, "Deleted 2 file(s)\n");

        assert!(fx.run("rmdir", &["a"]).success);
        assert!(!tmp.path().join("a").exists());
        Ok(())
    }

    #[test]
    fn copy_requires_two_operands() {
        let r = Fixture::new().run("cp", &["only-one"]);
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
        assert!(!r.error.is_empty());
    }

    #[test]
    fn dir_lists_directories_first() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        fs::create_dir(tmp.path().join("zdir"))?;
        fs::write(tmp.path().join("afile.txt"), "12345")?;
        let r = Fixture::new().run("dir", &[tmp.path().to_str().unwrap()]);
        assert!(r.success, "{r:?}");

        let lines: Vec<_> = r.output.lines().collect();
        assert_eq!(lines[0], "");
        assert!(lines[1].starts_with(" Directory of "));
        assert!(lines[3].starts_with("Mode"));
        assert_eq!(lines[4], "-".repeat(70));
        assert!(lines[5].starts_with("d-----") && lines[5].ends_with(" zdir"));
        assert!(lines[5].contains("<DIR>"));
        assert!(lines[6].starts_with("-a----") && lines[6].ends_with(" afile.txt"));
        assert!(lines[6].contains("         5 "));
        Ok(())
    }

    #[test]
    fn history_is_numbered() {
        let mut fx = Fixture::new();
        fx.env.add_to_history("first");
        fx.env.add_to_history("second");
        let r = fx.run("history", &[]);
        assert_eq!(r.output, "   1: first\n   2: second\n");
    }

    #[test]
    fn cls_returns_sentinel() {
        let r = Fixture::new().run("cls", &[]);
        assert_eq!(r.output, "[CLEAR_SCREEN]");
    }

    #[test]
    fn prompt_sets_template() {
        let mut fx = Fixture::new();
        let r = fx.run("prompt", &["$P$G"]);
        assert_eq!(r.output, "Prompt updated to: $P$G\n");
        assert_eq!(fx.env.prompt_template(), "$P$G");
        let r = fx.run("prompt", &[]);
        assert!(r.output.starts_with("Current prompt template: $P$G"));
    }

    #[test]
    fn jobs_without_background_work() {
        let r = Fixture::new().run("jobs", &[]);
        assert_eq!(r.output, "No background jobs running.\n");
    }

    #[test]
    fn fg_and_bg_unknown_pid() {
        let mut fx = Fixture::new();
        let r = fx.run("fg", &["999999"]);
        assert!(!r.success);
        assert_eq!(r.error, "No background job found with PID: 999999");
        let r = fx.run("bg", &["999999"]);
        assert!(!r.success);
        assert_eq!(r.error, "No background job found with PID: 999999");
        let r = fx.run("fg", &["abc"]);
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
    }

    #[test]
    fn kill_reports_failures() {
        let mut fx = Fixture::new();
        let r = fx.run("kill", &[]);
        assert!(!r.success);
        assert!(r.error.starts_with("Usage: kill"));

        let r = fx.run("kill", &["abc", "0"]);
        assert!(!r.success);
        assert_eq!(r.exit_code, 1);
        assert!(r.output.is_empty());
        assert_eq!(
            r.error,
            "Failed to kill 2 process(es):\n  - Invalid PID: abc\n  - PID 0: no such process\n"
        );
    }

    #[test]
    fn ascii_art_reads_assets() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let ascii = tmp.path().join("ascii");
        fs::create_dir_all(ascii.join("gui_pics"))?;
        fs::write(ascii.join("logo.txt"), "<logo>\n")?;
        fs::write(ascii.join("banner.txt"), "<banner>\n")?;
        fs::write(ascii.join("gui_pics").join("logo.png"), [0u8; 4])?;

        let mut fx = Fixture::new();
        fx.config.asset_dir = tmp.path().to_path_buf();

        let r = fx.run("banner", &[]);
        assert_eq!(r.output, "<banner>\n");

        let r = fx.run("logo", &[]);
        match sentinel::interpret(&r.output) {
            sentinel::Rendered::ArtImage { image, text } => {
                assert!(image.ends_with("logo.png"));
                assert_eq!(text, "<logo>\n");
            }
            other => panic!("unexpected {other:?}"),
        }

        let r = fx.run("splash", &[]);
        assert!(!r.success);
        assert_eq!(r.error, "ASCII art file not found: splash.txt");

        let r = fx.run("logo", &["extra"]);
        assert!(!r.success);
        Ok(())
    }
}
