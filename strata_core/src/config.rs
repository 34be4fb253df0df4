use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::version::Version;

/// The version up to which the engine should migrate. `Latest` migrates to
/// the highest resolved version, `Version` caps the run at a user provided
/// version; resolved migrations above the cap stay pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Latest,
    Version(Version),
}

impl Target {
    /// Whether a migration at `version` is within this target.
    pub(crate) fn includes(&self, version: &Version) -> bool {
        match self {
            Target::Latest => true,
            Target::Version(cap) => version <= cap,
        }
    }
}

/// Immutable configuration snapshot for an [`Engine`].
///
/// Built once from defaults plus `set_*` overrides and passed by value into
/// the engine; property-file loading and deprecated aliases are the concern
/// of the host or the CLI, never of the core.
///
/// [`Engine`]: crate::engine::Engine
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) locations: Vec<PathBuf>,
    pub(crate) encoding: String,
    pub(crate) schemas: Vec<String>,
    pub(crate) table: String,
    pub(crate) target: Target,
    pub(crate) placeholders: BTreeMap<String, String>,
    pub(crate) placeholder_prefix: String,
    pub(crate) placeholder_suffix: String,
    pub(crate) sql_migration_prefix: String,
    pub(crate) sql_migration_suffix: String,
    pub(crate) validate_on_migrate: bool,
    pub(crate) clean_on_validation_error: bool,
    pub(crate) init_version: Version,
    pub(crate) init_description: String,
    pub(crate) init_on_migrate: bool,
    pub(crate) ignore_failed_future_migration: bool,
    pub(crate) out_of_order: bool,
    pub(crate) installed_by: Option<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            locations: vec![PathBuf::from("migrations")],
            encoding: "UTF-8".into(),
            schemas: Vec::new(),
            table: "schema_version".into(),
            target: Target::Latest,
            placeholders: BTreeMap::new(),
            placeholder_prefix: "${".into(),
            placeholder_suffix: "}".into(),
            sql_migration_prefix: "V".into(),
            sql_migration_suffix: ".sql".into(),
            validate_on_migrate: false,
            clean_on_validation_error: false,
            // version 1 marks the baseline unless overridden
            init_version: Version::parse("1").expect("static version"),
            init_description: "<< Init >>".into(),
            init_on_migrate: false,
            ignore_failed_future_migration: false,
            out_of_order: false,
            installed_by: None,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Set the locations scanned for migration scripts.
    pub fn set_locations<P: Into<PathBuf>>(self, locations: Vec<P>) -> Config {
        Config {
            locations: locations.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Set the script charset, UTF-8 by default.
    pub fn set_encoding(self, encoding: &str) -> Config {
        Config {
            encoding: encoding.into(),
            ..self
        }
    }

    /// Set the managed schemas. The first is the default schema and holds the
    /// ledger; when none is given the connection's current schema is used.
    pub fn set_schemas(self, schemas: Vec<String>) -> Config {
        Config { schemas, ..self }
    }

    /// Set the name of the schema history ledger table.
    pub fn set_table(self, table: &str) -> Config {
        Config {
            table: table.into(),
            ..self
        }
    }

    /// Set the target version up to which the engine should migrate,
    /// by default this is set to Latest.
    pub fn set_target(self, target: Target) -> Config {
        Config { target, ..self }
    }

    /// Add a placeholder replaced in scripts before execution.
    pub fn add_placeholder(mut self, name: &str, value: &str) -> Config {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    pub fn set_placeholders(self, placeholders: BTreeMap<String, String>) -> Config {
        Config {
            placeholders,
            ..self
        }
    }

    pub fn set_placeholder_prefix(self, prefix: &str) -> Config {
        Config {
            placeholder_prefix: prefix.into(),
            ..self
        }
    }

    pub fn set_placeholder_suffix(self, suffix: &str) -> Config {
        Config {
            placeholder_suffix: suffix.into(),
            ..self
        }
    }

    pub fn set_sql_migration_prefix(self, prefix: &str) -> Config {
        Config {
            sql_migration_prefix: prefix.into(),
            ..self
        }
    }

    pub fn set_sql_migration_suffix(self, suffix: &str) -> Config {
        Config {
            sql_migration_suffix: suffix.into(),
            ..self
        }
    }

    /// Set true to validate the catalog against the ledger before migrating.
    pub fn set_validate_on_migrate(self, validate_on_migrate: bool) -> Config {
        Config {
            validate_on_migrate,
            ..self
        }
    }

    /// Set true to clean the configured schemas when validation fails
    /// instead of raising. A development convenience, never for production.
    pub fn set_clean_on_validation_error(self, clean_on_validation_error: bool) -> Config {
        Config {
            clean_on_validation_error,
            ..self
        }
    }

    /// Set the version a baseline init row is recorded at.
    pub fn set_init_version(self, init_version: Version) -> Config {
        Config {
            init_version,
            ..self
        }
    }

    pub fn set_init_description(self, init_description: &str) -> Config {
        Config {
            init_description: init_description.into(),
            ..self
        }
    }

    /// Set true to baseline a non-empty schema automatically when migrate
    /// finds no ledger there.
    pub fn set_init_on_migrate(self, init_on_migrate: bool) -> Config {
        Config {
            init_on_migrate,
            ..self
        }
    }

    /// Set true to warn instead of failing when the ledger holds a failed
    /// migration above the highest resolved version.
    pub fn set_ignore_failed_future_migration(self, ignore: bool) -> Config {
        Config {
            ignore_failed_future_migration: ignore,
            ..self
        }
    }

    /// Set true to allow applying resolved migrations whose version is below
    /// the current head.
    pub fn set_out_of_order(self, out_of_order: bool) -> Config {
        Config {
            out_of_order,
            ..self
        }
    }

    /// Override the user identity recorded in the ledger; the connection's
    /// reported username is used when unset.
    pub fn set_installed_by(self, installed_by: &str) -> Config {
        Config {
            installed_by: Some(installed_by.into()),
            ..self
        }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn out_of_order(&self) -> bool {
        self.out_of_order
    }
}
