use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-strategy yield vault engine: validate and replay vault scenarios,
/// then inspect the settled state.
#[derive(Parser)]
#[command(name = "vault-flow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Output the JSON schema for scenario files
    Schema,

    /// Validate a scenario JSON file
    Validate {
        /// Path to the scenario JSON file
        file: PathBuf,
    },

    /// Output an example scenario JSON to stdout
    Example,

    /// Replay a scenario against simulated yield sources
    Simulate {
        /// Path to the scenario JSON file
        file: PathBuf,

        /// State database (default: $VAULT_FLOW_DB or ~/.vault-flow/state.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Replay without writing the final state
        #[arg(long)]
        dry_run: bool,

        /// Write step records as JSON to this file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Print every step as it runs
        #[arg(long)]
        verbose: bool,
    },

    /// Show vaults and strategies from a state database
    Inspect {
        /// State database (default: $VAULT_FLOW_DB or ~/.vault-flow/state.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Only show this vault
        #[arg(long)]
        vault: Option<String>,
    },

    /// Export a strategy's APY history as CSV
    History {
        /// Strategy name
        #[arg(long)]
        strategy: String,

        /// State database (default: $VAULT_FLOW_DB or ~/.vault-flow/state.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output CSV file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}
