//! CLI module for Netforge.
//!
//! Argument parsing and subcommand handling. The CLI is a thin layer:
//! it loads the topology or state document, wires up the provider, the
//! state store and the orchestration components, and maps errors onto
//! distinct exit codes (see [`netforge::error::Error::exit_code`]).

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Netforge - declarative AWS network provisioning
///
/// Turns a YAML network topology into an ordered sequence of cloud
/// operations, records what it created, and can tear it all down again.
#[derive(Parser, Debug, Clone)]
#[command(name = "netforge")]
#[command(author = "Netforge Contributors")]
#[command(version)]
#[command(about = "Declarative AWS network provisioning and teardown", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory for deployment state documents
    #[arg(
        long,
        global = true,
        env = "NETFORGE_STATE_DIR",
        default_value = "output"
    )]
    pub state_dir: PathBuf,

    /// Remote call timeout in seconds
    #[arg(long, global = true, default_value = "600")]
    pub timeout: u64,

    /// Maximum retries for transient remote failures
    #[arg(long, global = true, default_value = "3")]
    pub max_retries: u32,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Provision the network described by a topology document
    Apply(ApplyArgs),

    /// Validate a topology and print its execution plan without issuing
    /// any remote calls
    #[command(name = "dry-run")]
    DryRun(DryRunArgs),

    /// Delete every resource recorded in a state document, in reverse
    /// creation order
    Teardown(TeardownArgs),
}

/// Arguments for the apply command
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Path to the YAML topology document
    pub topology: PathBuf,
}

/// Arguments for the dry-run command
#[derive(Parser, Debug, Clone)]
pub struct DryRunArgs {
    /// Path to the YAML topology document
    pub topology: PathBuf,
}

/// Arguments for the teardown command
#[derive(Parser, Debug, Clone)]
pub struct TeardownArgs {
    /// Path to the state document produced by a previous apply
    pub state_file: PathBuf,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apply() {
        let cli = Cli::try_parse_from(["netforge", "apply", "network.yml"]).unwrap();
        assert!(matches!(cli.command, Commands::Apply(_)));
        assert_eq!(cli.state_dir, PathBuf::from("output"));
        assert_eq!(cli.max_retries, 3);
    }

    #[test]
    fn parses_dry_run_with_globals() {
        let cli = Cli::try_parse_from([
            "netforge",
            "dry-run",
            "network.yml",
            "-vv",
            "--state-dir",
            "/tmp/state",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::DryRun(_)));
        assert_eq!(cli.verbosity(), 2);
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/state"));
    }

    #[test]
    fn parses_teardown() {
        let cli =
            Cli::try_parse_from(["netforge", "teardown", "output/prod-state.json"]).unwrap();
        match cli.command {
            Commands::Teardown(args) => {
                assert_eq!(args.state_file, PathBuf::from("output/prod-state.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn teardown_requires_state_file() {
        assert!(Cli::try_parse_from(["netforge", "teardown"]).is_err());
    }
}
