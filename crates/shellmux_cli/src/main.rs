use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use shellmux_core::{Engine, EngineConfig};
use shellmux_logging::{init_logging, LogConfig};
use shellmux_protocol::adapter::{EchoAdapter, PythonAdapter};
use shellmux_protocol::InterpreterAdapter;

#[derive(Parser, Debug)]
#[command(name = "shellmux", about = "Embed a foreign command interpreter and multiplex commands over its stdio")]
struct Cli {
    /// Path to the interpreter executable.
    #[arg(long, global = true, default_value = "/bin/sh")]
    interpreter: PathBuf,

    /// Extra arguments passed to the interpreter on spawn.
    #[arg(long = "interpreter-arg", global = true)]
    interpreter_args: Vec<String>,

    /// How to make the interpreter print a literal marker to stdout.
    #[arg(long, global = true, value_enum, default_value_t = AdapterKind::Echo)]
    adapter: AdapterKind,

    /// Per-command timeout in seconds.
    #[arg(long, global = true, default_value_t = 30.0)]
    timeout: f64,

    /// Restart the interpreter automatically after a command times out.
    #[arg(long, global = true)]
    auto_restart: bool,

    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AdapterKind {
    Echo,
    Python,
}

impl AdapterKind {
    fn build(self) -> Box<dyn InterpreterAdapter + Send + Sync> {
        match self {
            AdapterKind::Echo => Box::new(EchoAdapter),
            AdapterKind::Python => Box::new(PythonAdapter),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single command and print its result.
    Run {
        /// The command text to submit to the interpreter.
        command: String,
    },
    /// Read commands from stdin, one per line, printing each result.
    Repl,
    /// Submit `count` copies of `command` concurrently and report timing.
    Bench {
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,
        command: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "shellmux",
        verbose: cli.verbose,
        quiet_console: matches!(cli.command, Command::Repl),
    })
    .context("failed to initialize logging")?;

    let config = EngineConfig {
        interpreter_path: cli.interpreter.clone(),
        interpreter_args: cli.interpreter_args.clone(),
        default_timeout: Some(Duration::from_secs_f64(cli.timeout)),
        auto_restart: cli.auto_restart,
        ..Default::default()
    };
    let engine = Engine::start(config, cli.adapter.build()).context("failed to start interpreter")?;

    let result = match cli.command {
        Command::Run { command } => run_once(&engine, &command),
        Command::Repl => repl(&engine),
        Command::Bench { count, command } => bench(&engine, count, &command),
    };

    engine.stop(false);
    result
}

fn run_once(engine: &Engine, command: &str) -> Result<()> {
    let result = engine.execute(command, None).map_err(|err| anyhow::anyhow!(err))?;
    print_result(command, &result);
    if !result.success {
        bail!("command failed");
    }
    Ok(())
}

fn print_result(command: &str, result: &shellmux_core::CommandResult) {
    let stdout = String::from_utf8_lossy(&result.stdout);
    let stderr = String::from_utf8_lossy(&result.stderr);
    println!(
        "> {command}\nexit_code={} success={} elapsed={:.3}s\n{stdout}",
        result.exit_code, result.success, result.execution_seconds
    );
    if !stderr.is_empty() {
        eprint!("{stderr}");
    }
}

fn repl(engine: &Engine) -> Result<()> {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }
        match engine.execute(&line, None) {
            Ok(result) => print_result(&line, &result),
            Err(err) => eprintln!("error: {err}"),
        }
        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn bench(engine: &Engine, count: usize, command: &str) -> Result<()> {
    let start = std::time::Instant::now();
    let handles: Vec<_> = (0..count)
        .map(|_| engine.submit(command, None, None))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| anyhow::anyhow!(err))?;

    let mut failures = 0usize;
    for handle in handles {
        let result = handle.wait();
        if !result.success {
            failures += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "{count} commands in {:.3}s ({:.1}/s), {failures} failed",
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
