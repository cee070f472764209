use anyhow::Context;
use argh::FromArgs;
use nativesh::sentinel::{self, Rendered};
use nativesh::{
    CancellationToken, CommandResult, EngineConfig, EventSink, ExitCode, Interpreter, ShellEvent,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::path::PathBuf;
use tokio::runtime::Runtime;

#[derive(FromArgs)]
/// a native command shell.
struct Args {
    #[argh(option, short = 'c')]
    /// run one command line and exit with its exit code.
    command: Option<String>,

    #[argh(option)]
    /// directory holding the ascii/ art assets.
    assets: Option<PathBuf>,

    #[argh(option)]
    /// initial prompt template, e.g. $P$G.
    prompt: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args: Args = argh::from_env();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("nativesh: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = EngineConfig::from_env();
    if let Some(assets) = args.assets {
        config.asset_dir = assets;
    }
    if let Some(prompt) = args.prompt {
        config.prompt_template = prompt;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let (events, mut rx) = EventSink::channel();
    let mut sh = Interpreter::with_events(config, events);
    rt.spawn(async move {
        while let Some(event) = rx.recv().await {
            if let ShellEvent::JobCompleted { .. } = event {
                println!("\n{event}");
            }
        }
    });

    let code = match args.command {
        Some(line) => {
            let result = execute(&rt, &mut sh, &line);
            render(&result);
            Ok(result.exit_code)
        }
        None => repl(&rt, &mut sh),
    };
    rt.block_on(sh.shutdown());
    code
}

/// Run one line; Ctrl-C while it runs stops the wait and kills foreground processes.
fn execute(rt: &Runtime, sh: &mut Interpreter, line: &str) -> CommandResult {
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            let processes = sh.processes().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                    let killed = processes.kill_running();
                    log::debug!("interrupted, killed {killed} process(es)");
                }
            })
        };
        let result = sh.execute_command(line, &cancel).await;
        watcher.abort();
        result
    })
}

fn repl(rt: &Runtime, sh: &mut Interpreter) -> anyhow::Result<ExitCode> {
    let mut rl = DefaultEditor::new()?;
    print_banner();

    loop {
        match rl.readline(&sh.prompt()) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                if let Some(code) = exit_request(&line) {
                    return Ok(code);
                }
                let result = execute(rt, sh, &line);
                render(&result);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(0),
            Err(err) => return Err(err.into()),
        }
    }
}

/// `exit [code]` or `quit` typed at the prompt ends the session gracefully.
fn exit_request(line: &str) -> Option<ExitCode> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    if first.eq_ignore_ascii_case("quit") {
        return Some(0);
    }
    if !first.eq_ignore_ascii_case("exit") {
        return None;
    }
    match (words.next(), words.next()) {
        (None, _) => Some(0),
        (Some(code), None) => code.parse().ok(),
        _ => None,
    }
}

fn print_banner() {
    println!(
        "nativesh {} - type 'help' for a list of commands",
        env!("CARGO_PKG_VERSION")
    );
}

fn render(result: &CommandResult) {
    let text = match sentinel::interpret(&result.output) {
        Rendered::ClearScreen => {
            print!("\x1B[2J\x1B[1;1H");
            print_banner();
            ""
        }
        Rendered::ArtImage { text, .. } => text,
        Rendered::Text(text) => text,
    };
    print!("{text}");
    if !text.is_empty() && !text.ends_with('\n') {
        println!();
    }
    let _ = std::io::stdout().flush();

    if !result.error.is_empty() {
        eprint!("{}", result.error);
        if !result.error.ends_with('\n') {
            eprintln!();
        }
    }
    if !result.success {
        eprintln!("Command exited with code: {}", result.exit_code);
    }
}
