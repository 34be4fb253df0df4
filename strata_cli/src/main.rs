//! Main entry point for the strata cli tool

mod cli;
mod commands;
mod config;

use anyhow::Error;
use clap::Parser;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

use cli::Cli;

fn main() -> Result<(), Error> {
    human_panic::setup_panic!();

    let mut builder = Builder::new();
    builder
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter(Some("strata_core"), LevelFilter::Info)
        .target(Target::Stdout)
        .init();

    match Cli::parse() {
        Cli::Migrate(args) => commands::migrate(&args)?,
        Cli::Info(args) => commands::info(&args)?,
        Cli::Validate(args) => commands::validate(&args)?,
        Cli::Init(args) => commands::init(&args)?,
        Cli::Repair(args) => commands::repair(&args)?,
        Cli::Clean(args) => commands::clean(&args)?,
    }

    Ok(())
}
