//! Binary entry point for itemtrace.
//!
//! This binary provides the CLI interface for the itemtrace engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use itemtrace::EngineConfig;
use itemtrace::commands::{self, OutputFormat};
use itemtrace::observability;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Itemtrace - persistent identity and duplicate detection for content objects.
#[derive(Parser)]
#[command(name = "itemtrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "ITEMTRACE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Register an item read from a JSON file.
    Register {
        /// Path to the item JSON.
        item: PathBuf,

        /// Action being performed.
        #[arg(short, long, default_value = "REGISTER")]
        action: String,

        /// Who performed the action.
        #[arg(long, default_value = "console")]
        actor: String,

        /// Write the tagged item back to the file.
        #[arg(short, long)]
        write: bool,
    },

    /// Check a held item, registering it if it has no id yet.
    Check {
        /// Path to the item JSON.
        item: PathBuf,

        /// Who is checking.
        #[arg(long, default_value = "console")]
        actor: String,

        /// Write the tagged item back to the file.
        #[arg(short, long)]
        write: bool,
    },

    /// Look up an item by id.
    Lookup {
        /// The item id.
        id: String,
    },

    /// Scan an inventory JSON array for duplicated items.
    Scan {
        /// Path to the inventory JSON.
        inventory: PathBuf,
    },

    /// Show the action history of an item.
    History {
        /// The item id.
        id: String,

        /// Show only the latest entries.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show statistics.
    Stats {
        /// Number of content types to list.
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Manage configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },

    /// Serve newline-delimited JSON requests on stdin.
    Serve,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match EngineConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let logging = config.logging.clone().with_verbose(cli.verbose);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config, cli.config.as_deref(), cli.format).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    command: Commands,
    config: &EngineConfig,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Commands::Register {
            item,
            action,
            actor,
            write,
        } => commands::cmd_register(config, &item, &action, &actor, write, format).await,

        Commands::Check { item, actor, write } => {
            commands::cmd_check(config, &item, &actor, write, format).await
        },

        Commands::Lookup { id } => commands::cmd_lookup(config, &id, format).await,

        Commands::Scan { inventory } => commands::cmd_scan(config, &inventory, format).await,

        Commands::History { id, limit } => commands::cmd_history(config, &id, limit, format).await,

        Commands::Stats { top } => commands::cmd_stats(config, top, format).await,

        Commands::Config { show } => commands::cmd_config(config, show),

        Commands::Serve => commands::cmd_serve(config, config_path).await,
    }
}
