//! patchsync CLI
//!
//! Command-line tools for inspecting patch logs offline.
//!
//! # Commands
//!
//! - `replay` - Apply an update file on top of a dump and print the result
//! - `verify` - Check that a replay converges to an expected dump
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline tools for patchsync dumps and update logs.
#[derive(Parser)]
#[command(name = "patchsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply updates on top of a dump and print the resulting state
    Replay {
        /// Dump file (`{"id": <sequence>, "value": <tree>}`)
        #[arg(short, long)]
        dump: PathBuf,

        /// Update file: a JSON array of batches or tagged updates
        #[arg(short, long)]
        updates: Option<PathBuf>,

        /// JSON pointer to print instead of the whole tree
        #[arg(short, long)]
        path: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that replaying updates over a dump matches an expected dump
    Verify {
        /// Starting dump file
        #[arg(short, long)]
        dump: PathBuf,

        /// Update file
        #[arg(short, long)]
        updates: PathBuf,

        /// Dump the replay must converge to
        #[arg(short, long)]
        expected: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so json output stays parseable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            dump,
            updates,
            path,
            format,
        } => {
            commands::replay::run(&dump, updates.as_deref(), path.as_deref(), &format)?;
        }
        Commands::Verify {
            dump,
            updates,
            expected,
        } => {
            commands::verify::run(&dump, &updates, &expected)?;
        }
        Commands::Version => {
            println!("patchsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("patchsync client v{}", patchsync_client::VERSION);
        }
    }

    Ok(())
}
