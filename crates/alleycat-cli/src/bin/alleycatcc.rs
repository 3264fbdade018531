//! Alleycat compiler driver
//!
//! Runs BSP (device) and host sources through compile, analyze, transform
//! and link stages by invoking the LLVM toolchain.
//!
//! # Usage
//!
//! ```bash
//! # Compile, analyze, transform and link two kernels
//! alleycatcc --bsp-in a.cl b.cl --bsp-out kernels.bc --db app.db
//!
//! # Compile the host side only, printing the commands
//! alleycatcc --host-in main.cpp --host-out main.bc -S --dry-run
//! ```

use alleycat_cli::{
    cli::CliConfig,
    commands::{self, compile::CompileArgs},
    diagnostics::{render_cli_error, setup_error_reporting},
    CliError, Result,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "alleycatcc",
    version = env!("CARGO_PKG_VERSION"),
    about = "alleycatcc: compiler driver for Alleycat BSP and host pipelines",
    long_about = r#"
alleycatcc drives clang, opt and llvm-link through the compile, analyze,
transform and link stages of the BSP (device) and host pipelines.

ENVIRONMENT:
    LLVM_TOOLS_BINARY_DIR    directory holding clang, opt, llvm-link, ...
    LIBCLC_INC, LIBCLC_LIB   libclc include and library directories
    CUDA_INC, CUDA_LIB       CUDA include and library directories
    ALLEYCAT_DB              analysis database
    "#
)]
struct Cli {
    #[command(flatten)]
    compile: CompileArgs,

    /// Enable verbose output (use multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Set log level (overrides --verbose/--quiet)
    #[arg(long, value_enum)]
    log: Option<LogLevel>,

    /// Set log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory
    #[arg(short = 'C', long)]
    directory: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_error_reporting()?;
    setup_logging(cli.verbose, cli.quiet, cli.log, cli.log_format);

    if let Err(e) = run(cli.compile, cli.config, cli.directory, cli.verbose).await {
        if !render_cli_error(&e) {
            error!("{}", e);
        }
        if cli.verbose > 0 {
            error!(?e, "detailed error context");
        }
        std::process::exit(1);
    }
    Ok(())
}

// Temporaries are dropped before this returns, so exiting afterwards
// leaves nothing behind.
async fn run(
    args: CompileArgs,
    config_path: Option<PathBuf>,
    directory: Option<PathBuf>,
    verbose: u8,
) -> Result<()> {
    if let Some(dir) = &directory {
        std::env::set_current_dir(dir).map_err(CliError::Io)?;
    }
    let config = CliConfig::load(config_path.as_deref())?;
    commands::compile_command(args, &config, verbose).await?;
    if verbose > 0 {
        info!("Command completed successfully");
    }
    Ok(())
}

/// Default level is `warn`; each `-v` raises it one step (info, debug,
/// trace). Output goes to stderr.
fn setup_logging(verbose: u8, quiet: bool, log_level: Option<LogLevel>, log_format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // stdout carries the dry-run command listing
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    match log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(formatter)
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(formatter.json())
                .with(filter)
                .init();
        }
    }
}
