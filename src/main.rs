//! Viper - IL execution engine
//!
//! # Usage
//!
//! ```bash
//! # Run a module serialized as JSON (entry point `main`)
//! viper run module.json
//!
//! # Run a bundled demo with a forced switch backend
//! viper demo switch --switch-mode dense --stats
//!
//! # Write a demo module as JSON
//! viper dump bounds > bounds.json
//! ```

mod demos;

use clap::{Args, Parser, Subcommand};
use demos::Demo;
use il::Module;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::process;
use viper_runtime::Console;
use vm::{ExecError, SwitchMode, Vm, VmConfig};

#[derive(Parser)]
#[command(name = "viper")]
#[command(version = "0.1.0")]
#[command(about = "Viper - IL interpreter with structured trap handling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON-serialized IL module
    Run {
        /// Path to the module file
        file: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run one of the bundled demo modules
    Demo {
        #[arg(value_enum)]
        name: Demo,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print a bundled demo module as JSON
    Dump {
        #[arg(value_enum)]
        name: Demo,

        /// Compact output instead of pretty-printed JSON
        #[arg(long)]
        compact: bool,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Function to run
    #[arg(long, default_value = "main")]
    entry: String,

    /// switch.i32 backend: auto, dense, sorted, hashed or linear
    #[arg(long)]
    switch_mode: Option<SwitchMode>,

    /// Abort after this many instructions
    #[arg(long)]
    max_steps: Option<u64>,

    /// TOML engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log engine activity (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log every executed instruction
    #[arg(long)]
    trace: bool,

    /// Print execution statistics as JSON
    #[arg(long)]
    stats: bool,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, engine } => load_module(&file).and_then(|module| execute(&module, &engine)),
        Commands::Demo { name, engine } => execute(&demos::build(name), &engine),
        Commands::Dump { name, compact } => dump(name, compact),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_module(file: &Path) -> Result<Module, String> {
    let text = std::fs::read_to_string(file).map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid module {}: {}", file.display(), e))
}

fn engine_config(args: &EngineArgs) -> Result<VmConfig, String> {
    let mut config = match &args.config {
        Some(path) => VmConfig::from_file(path).map_err(|e| e.to_string())?,
        None => VmConfig::from_env().map_err(|e| e.to_string())?,
    };
    if let Some(mode) = args.switch_mode {
        config = config.with_switch_mode(mode);
    }
    if let Some(limit) = args.max_steps {
        config = config.with_max_steps(limit);
    }
    config.trace |= args.trace;
    Ok(config)
}

/// Run the entry function; returns the process exit status
fn execute(module: &Module, args: &EngineArgs) -> Result<i32, String> {
    // RUST_LOG applies only when no verbosity flag was given
    match (args.verbose, args.trace) {
        (2.., _) => vm::logging::init_with_level(LevelFilter::Trace),
        (1, _) => vm::logging::init_with_level(LevelFilter::Debug),
        (_, true) => vm::logging::init_with_level(LevelFilter::Info),
        _ => vm::logging::init_from_env(),
    }

    let config = engine_config(args)?;
    log::info!("running {} in module '{}' ({} switch mode)", args.entry, module.name, config.switch_mode);
    let mut engine = Vm::new(module, config).with_console(Console::stdout());
    let outcome = engine.call(&args.entry, &[]);

    if args.stats {
        let stats = serde_json::to_string_pretty(engine.stats()).map_err(|e| e.to_string())?;
        eprintln!("{}", stats);
    }

    match outcome {
        Ok(value) => {
            println!("{}", value);
            Ok(0)
        }
        Err(ExecError::Trap(trap)) => {
            eprintln!("{}", trap);
            Ok(1)
        }
        Err(e) => Err(e.to_string()),
    }
}

fn dump(demo: Demo, compact: bool) -> Result<i32, String> {
    let module = demos::build(demo);
    let json = if compact {
        serde_json::to_string(&module)
    } else {
        serde_json::to_string_pretty(&module)
    }
    .map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(0)
}
