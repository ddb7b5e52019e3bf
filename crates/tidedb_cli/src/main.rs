//! TideDB CLI
//!
//! Command-line tools for inspecting and maintaining TideDB engines.
//!
//! # Commands
//!
//! - `inspect` - Display engine statistics
//! - `verify` - Verify every record checksum and the snapshot
//! - `get` - Print one value as JSON
//! - `dump` - List live keys and payload sizes
//! - `compact` - Rewrite live records and drop dead ones
//! - `prune` - Compact, then rebuild the index from every segment

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TideDB command-line engine tools.
#[derive(Parser)]
#[command(name = "tidedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root directory holding the engines
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Engine name (a directory under the root)
    #[arg(global = true, short, long)]
    name: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display engine statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify record checksums and the snapshot without opening the engine
    Verify,

    /// Print the value stored under an id as JSON
    Get {
        /// Record id
        id: String,
    },

    /// List live keys with their payload sizes
    Dump {
        /// Maximum number of keys to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Number of reader threads
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Compact segments to reclaim space
    Compact,

    /// Compact, then rebuild the index from every segment
    Prune,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("TideDB CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("TideDB Core v{}", tidedb_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Root path required (--path)")?;
    let name = cli.name.ok_or("Engine name required (--name)")?;
    let target = commands::Target {
        path,
        name,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&target, &format)?,
        Commands::Verify => commands::verify::run(&target)?,
        Commands::Get { id } => commands::get::run(&target, &id)?,
        Commands::Dump { limit, workers } => commands::dump::run(&target, limit, workers)?,
        Commands::Compact => commands::compact::run(&target)?,
        Commands::Prune => commands::prune::run(&target)?,
        Commands::Version => {}
    }

    Ok(())
}
