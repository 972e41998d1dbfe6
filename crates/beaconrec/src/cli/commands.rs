//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Stop after this many loop iterations (runs until interrupted if omitted)
    #[arg(short, long, value_name = "N")]
    pub ticks: Option<u64>,
}

/// Faults command arguments.
#[derive(Debug, Args)]
pub struct FaultsCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Recording command arguments.
#[derive(Debug, Args)]
pub struct RecordingCommand {
    /// Recording file to decode
    pub path: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration file
    Validate {
        /// Path to config file to validate (uses default if not specified)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
