// Skein CLI - Command Line Interface
// Usage: skein [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use skein_core::{Engine, EngineConfig, ScriptError, ThreadStatus, Value};

/// Skein - an embeddable scripting language with pausable threads
#[derive(Parser)]
#[command(name = "skein")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Skein scripts as pausable threads", long_about = None)]
struct Cli {
    /// Script file to run
    file: Option<PathBuf>,

    /// Evaluate a single expression instead of a file
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Trace every action the script executes
    #[arg(long = "trace")]
    trace: bool,

    /// Print the compiled program instead of running it
    #[arg(long = "disassemble")]
    disassemble: bool,

    /// Engine configuration (JSON)
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("SKEIN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(if cli.trace { "trace" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if cli.trace {
        config.trace_by_default = true;
    }
    let mut engine = Engine::new(config);

    if let Some(expr) = cli.eval {
        let program = engine.compile_expression(&expr).map_err(|e| e.format())?;
        if cli.disassemble {
            print!("{}", program.disassemble("<eval>"));
            return Ok(());
        }
        let value = engine.execute(&program, &[]).map_err(|e| e.format())?;
        print_result(&value);
        return Ok(());
    }

    let Some(path) = cli.file else {
        return Err(format!("{} No script given (pass a file or -e <expr>)", "!".yellow()));
    };
    let source = fs::read_to_string(&path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;

    let program = engine
        .compile_script(&source)
        .map_err(|e| e.with_source(&source).format())?;
    if cli.disassemble {
        print!("{}", program.disassemble(&path.display().to_string()));
        return Ok(());
    }

    run_thread(&mut engine, &program).map_err(|e| e.with_source(&source).format())
}

/// Run the script as a thread, sleeping through its waits
fn run_thread(engine: &mut Engine, program: &skein_core::Program) -> Result<(), ScriptError> {
    let mut thread = engine.create_thread(program, &[])?;

    if engine.resume(&mut thread) == ThreadStatus::Paused {
        if let Err(unparked) = engine.park(thread) {
            thread = unparked;
        } else {
            thread = loop {
                let Some(deadline) = engine.next_deadline() else {
                    return Ok(());
                };
                let delay = deadline.saturating_sub(engine.now()).max(0) as u64;
                std::thread::sleep(Duration::from_millis(delay));
                if let Some(done) = engine.poll().pop() {
                    break done;
                }
            };
        }
    }

    match thread.error() {
        Some(err) => Err(err.clone()),
        None => {
            print_result(thread.result());
            Ok(())
        }
    }
}

fn print_result(value: &Value) {
    if *value != Value::Int(0) {
        println!("{} {}", "=>".green(), value.repr());
    }
}
