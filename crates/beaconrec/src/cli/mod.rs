//! Command-line interface for the `beaconrec` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{ConfigCommand, FaultsCommand, RecordingCommand, RunCommand};

/// beaconrec - UWB position recorder with a persistent fault log
///
/// Runs the recorder firmware against simulated hardware and reads back the
/// fault log and position recordings it leaves behind.
#[derive(Debug, Parser)]
#[command(name = "beaconrec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Boot the recorder and run the ranging loop
    Run(RunCommand),

    /// Print both fault rings, oldest record first
    Faults(FaultsCommand),

    /// Decode a position recording
    Recording(RecordingCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Verbosity selected by `-v` and `-q`.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "beaconrec");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_forever() {
        let cli = Cli::try_parse_from(["beaconrec", "run"]).unwrap();
        assert!(matches!(cli.command, Command::Run(RunCommand { ticks: None })));
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn test_parse_run_with_ticks() {
        let cli = Cli::try_parse_from(["beaconrec", "run", "--ticks", "50"]).unwrap();
        assert!(matches!(cli.command, Command::Run(RunCommand { ticks: Some(50) })));
    }

    #[test]
    fn test_parse_faults_json() {
        let cli = Cli::try_parse_from(["beaconrec", "faults", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Faults(FaultsCommand { json: true })));
    }

    #[test]
    fn test_parse_recording() {
        let cli = Cli::try_parse_from(["beaconrec", "recording", "REC004.DAT"]).unwrap();
        let Command::Recording(cmd) = cli.command else {
            panic!("expected recording command");
        };
        assert_eq!(cmd.path, PathBuf::from("REC004.DAT"));
        assert!(!cmd.json);
    }

    #[test]
    fn test_parse_recording_requires_path() {
        assert!(Cli::try_parse_from(["beaconrec", "recording"]).is_err());
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["beaconrec", "config", "validate", "--file", "x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["beaconrec", "faults", "-c", "/custom/config.toml", "-vv"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_quiet() {
        let cli = Cli::try_parse_from(["beaconrec", "-q", "run"]).unwrap();
        assert_eq!(cli.verbosity(), Verbosity::Quiet);
    }
}
