//! Defines the CLI application

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(name = "strata", version, about = "Versioned schema migration engine")]
pub enum Cli {
    /// Apply pending migrations up to the target version
    Migrate(CommandArgs),
    /// Show the status of available and applied migrations
    Info(CommandArgs),
    /// Check applied migrations against the resolved scripts
    Validate(CommandArgs),
    /// Baseline an existing schema at the configured init version
    Init(CommandArgs),
    /// Remove failed ledger rows and realign checksums
    Repair(CommandArgs),
    /// Drop every object in the configured schemas
    Clean(CommandArgs),
}

#[derive(clap::Args)]
pub struct CommandArgs {
    /// Location of the configuration file
    #[clap(short, long, default_value = "strata.toml")]
    pub config: PathBuf,

    /// Migrate up to this version instead of the configured target
    #[clap(short, long)]
    pub target: Option<String>,
}
