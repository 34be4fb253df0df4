//! One handler per subcommand, each building an engine from the loaded
//! configuration and printing a short human-readable result.

use anyhow::Context;
use strata_core::{Engine, MigrationInfo, SqliteConnectionFactory};

use crate::cli::CommandArgs;
use crate::config;

fn engine_for(args: &CommandArgs) -> anyhow::Result<Engine<SqliteConnectionFactory>> {
    let loaded = config::load(&args.config, args.target.as_deref())?;
    Ok(Engine::new(
        loaded.config,
        SqliteConnectionFactory::new(&loaded.db_path),
    ))
}

pub fn migrate(args: &CommandArgs) -> anyhow::Result<()> {
    let report = engine_for(args)?.migrate().context("migrate failed")?;
    println!(
        "successfully applied {} migration(s)",
        report.applied_migrations().len()
    );
    Ok(())
}

pub fn info(args: &CommandArgs) -> anyhow::Result<()> {
    let infos = engine_for(args)?.info().context("info failed")?;
    if infos.is_empty() {
        println!("no migrations found");
        return Ok(());
    }
    print_info_table(&infos);
    Ok(())
}

pub fn validate(args: &CommandArgs) -> anyhow::Result<()> {
    engine_for(args)?.validate().context("validation failed")?;
    println!("validation passed");
    Ok(())
}

pub fn init(args: &CommandArgs) -> anyhow::Result<()> {
    engine_for(args)?.init().context("init failed")?;
    println!("schema baselined");
    Ok(())
}

pub fn repair(args: &CommandArgs) -> anyhow::Result<()> {
    engine_for(args)?.repair().context("repair failed")?;
    println!("ledger repaired");
    Ok(())
}

pub fn clean(args: &CommandArgs) -> anyhow::Result<()> {
    engine_for(args)?.clean().context("clean failed")?;
    println!("schemas cleaned");
    Ok(())
}

fn print_info_table(infos: &[MigrationInfo]) {
    let rows: Vec<[String; 5]> = infos
        .iter()
        .map(|info| {
            [
                info.version.to_string(),
                info.description.clone(),
                info.migration_type.to_string(),
                info.state.to_string(),
                info.installed_on
                    .map(|on| on.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();

    let headers = ["Version", "Description", "Type", "State", "Installed on"];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let print_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect();
        println!("| {} |", line.join(" | "));
    };

    print_row(&headers);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("|-{}-|", separator.join("-|-"));
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        print_row(&cells);
    }
}
