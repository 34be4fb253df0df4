//! Maps the strata.toml file onto the engine configuration.
//!
//! Relative paths in the file are resolved against the file's own directory,
//! so a project can be migrated from any working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use strata_core::{Config, Target, Version};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database: DatabaseSection,
    #[serde(default)]
    migrations: MigrationsSection,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    /// Path of the sqlite database file
    path: PathBuf,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct MigrationsSection {
    locations: Option<Vec<PathBuf>>,
    schemas: Option<Vec<String>>,
    table: Option<String>,
    target: Option<String>,
    placeholders: BTreeMap<String, String>,
    placeholder_prefix: Option<String>,
    placeholder_suffix: Option<String>,
    sql_migration_prefix: Option<String>,
    sql_migration_suffix: Option<String>,
    encoding: Option<String>,
    validate_on_migrate: Option<bool>,
    clean_on_validation_error: Option<bool>,
    init_version: Option<String>,
    init_description: Option<String>,
    init_on_migrate: Option<bool>,
    ignore_failed_future_migration: Option<bool>,
    out_of_order: Option<bool>,
    installed_by: Option<String>,
}

pub struct LoadedConfig {
    pub db_path: PathBuf,
    pub config: Config,
}

pub fn load(location: &Path, target_override: Option<&str>) -> anyhow::Result<LoadedConfig> {
    let raw = std::fs::read_to_string(location)
        .with_context(|| format!("could not open config file {}", location.display()))?;
    let file: FileConfig = toml::from_str(&raw).context("could not parse the config file")?;

    let base = location.parent().unwrap_or_else(|| Path::new("."));
    let db_path = resolve_path(base, file.database.path);

    let section = file.migrations;
    let mut config = Config::new();

    let locations = section
        .locations
        .unwrap_or_else(|| vec![PathBuf::from("migrations")]);
    config = config.set_locations(
        locations
            .into_iter()
            .map(|location| resolve_path(base, location))
            .collect(),
    );

    if let Some(schemas) = section.schemas {
        config = config.set_schemas(schemas);
    }
    if let Some(table) = &section.table {
        config = config.set_table(table);
    }
    if let Some(encoding) = &section.encoding {
        config = config.set_encoding(encoding);
    }
    config = config.set_placeholders(section.placeholders);
    if let Some(prefix) = &section.placeholder_prefix {
        config = config.set_placeholder_prefix(prefix);
    }
    if let Some(suffix) = &section.placeholder_suffix {
        config = config.set_placeholder_suffix(suffix);
    }
    if let Some(prefix) = &section.sql_migration_prefix {
        config = config.set_sql_migration_prefix(prefix);
    }
    if let Some(suffix) = &section.sql_migration_suffix {
        config = config.set_sql_migration_suffix(suffix);
    }
    if let Some(validate_on_migrate) = section.validate_on_migrate {
        config = config.set_validate_on_migrate(validate_on_migrate);
    }
    if let Some(clean_on_validation_error) = section.clean_on_validation_error {
        config = config.set_clean_on_validation_error(clean_on_validation_error);
    }
    if let Some(init_version) = &section.init_version {
        let version = Version::parse(init_version).context("invalid init_version")?;
        config = config.set_init_version(version);
    }
    if let Some(init_description) = &section.init_description {
        config = config.set_init_description(init_description);
    }
    if let Some(init_on_migrate) = section.init_on_migrate {
        config = config.set_init_on_migrate(init_on_migrate);
    }
    if let Some(ignore) = section.ignore_failed_future_migration {
        config = config.set_ignore_failed_future_migration(ignore);
    }
    if let Some(out_of_order) = section.out_of_order {
        config = config.set_out_of_order(out_of_order);
    }
    if let Some(installed_by) = &section.installed_by {
        config = config.set_installed_by(installed_by);
    }

    if let Some(target) = target_override.or(section.target.as_deref()) {
        config = config.set_target(parse_target(target)?);
    }

    Ok(LoadedConfig { db_path, config })
}

fn resolve_path(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path
    }
}

fn parse_target(text: &str) -> anyhow::Result<Target> {
    let version = Version::parse(text).context("invalid target version")?;
    if version.is_latest() {
        return Ok(Target::Latest);
    }
    if version.is_empty() {
        bail!("target version cannot be empty");
    }
    Ok(Target::Version(version))
}

#[cfg(test)]
mod tests {
    use super::load;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolves_relative_paths_against_the_config_file() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("strata.toml");
        fs::write(
            &location,
            "[database]\npath = \"data/app.db\"\n\n[migrations]\nlocations = [\"sql\"]\n",
        )
        .unwrap();

        let loaded = load(&location, None).unwrap();
        assert_eq!(dir.path().join("data/app.db"), loaded.db_path);
        assert_eq!(dir.path().join("sql"), loaded.config.locations()[0]);
    }

    #[test]
    fn target_override_wins_over_the_file() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("strata.toml");
        fs::write(
            &location,
            "[database]\npath = \"app.db\"\n\n[migrations]\ntarget = \"2\"\n",
        )
        .unwrap();

        let loaded = load(&location, Some("latest")).unwrap();
        assert_eq!(&strata_core::Target::Latest, loaded.config.target());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let location = dir.path().join("strata.toml");
        fs::write(
            &location,
            "[database]\npath = \"app.db\"\n\n[migrations]\nno_such_option = true\n",
        )
        .unwrap();

        assert!(load(&location, None).is_err());
    }
}
