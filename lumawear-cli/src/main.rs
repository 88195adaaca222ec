//! lumawear CLI - Command-line tool for LumaWear badges.
//!
//! ## Features
//!
//! - Flash raw firmware images
//! - Push and pull mode payloads by slot
//! - Watch badge session transitions
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;

mod commands;
mod config;
mod serial;

use config::Config;

/// Set by the Ctrl-C handler; checked by library transfer loops.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// lumawear - drive LumaWear badges from the command line.
///
/// Environment variables:
///   LUMAWEAR_PORT              - Default endpoint (serial path or pipe:<path>)
///   LUMAWEAR_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "lumawear")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/lumawear/lumawear-host")]
struct Cli {
    /// Endpoint to use: a serial port path, or `pipe:<path>` for the badge
    /// simulator. Auto-detected if not specified.
    #[arg(short, long, global = true, env = "LUMAWEAR_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "LUMAWEAR_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected serial ports.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Flash a raw firmware image onto the badge.
    Flash {
        /// Firmware image file (.bin).
        image: PathBuf,
    },
    /// Push mode payload files into badge slots.
    Push {
        /// One payload file per slot, pushed in order.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Slot index the first file lands in.
        #[arg(long, default_value_t = 0)]
        start_slot: u8,
    },
    /// Pull mode payloads out of badge slots into files.
    Pull {
        /// Slot indices to pull, e.g. `0,1,2`.
        #[arg(long, value_delimiter = ',', default_value = "0")]
        slots: Vec<u8>,
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Watch badge session transitions until interrupted.
    Watch,
    /// Generate shell completions.
    Completions {
        /// Target shell (auto-detected when omitted).
        shell: Option<Shell>,
    },
}

/// CLI error classes that map to distinct exit codes.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Usage/setup problems (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("failed to install Ctrl-C handler: {e}");
    }
    lumawear::set_interrupt_checker(was_interrupted);

    let mut config = Config::load(cli.config_path.as_deref());

    match run(&cli, &mut config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            match err.downcast_ref::<CliError>() {
                Some(CliError::Usage(_)) => ExitCode::from(2),
                Some(CliError::Cancelled(_)) => ExitCode::from(130),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: &Cli, config: &mut Config) -> Result<()> {
    match &cli.command {
        Commands::List { json } => commands::list::cmd_list(*json),
        Commands::Flash { image } => commands::flash::cmd_flash(cli, config, image),
        Commands::Push { files, start_slot } => {
            commands::modes::cmd_push(cli, config, files, *start_slot)
        }
        Commands::Pull { slots, out } => commands::modes::cmd_pull(cli, config, slots, out),
        Commands::Watch => commands::watch::cmd_watch(cli, config),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}
