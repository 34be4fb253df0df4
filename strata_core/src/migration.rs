use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::{Error, Kind};
use crate::traits::{BoxDynError, UserObjects};
use crate::version::Version;

/// An enum set that represents the type of a Migration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationType {
    /// A script-based migration resolved from a location
    Sql,
    /// A programmatic migration registered by the host
    Code,
    /// Synthetic ledger entry recording schemas created by the engine
    Schema,
    /// Synthetic ledger entry recording a baseline
    Init,
}

impl MigrationType {
    /// Synthetic entries are written by the engine itself and never resolved
    /// from a location.
    pub fn is_synthetic(self) -> bool {
        matches!(self, MigrationType::Schema | MigrationType::Init)
    }
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationType::Sql => "SQL",
            MigrationType::Code => "CODE",
            MigrationType::Schema => "SCHEMA",
            MigrationType::Init => "INIT",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MigrationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<MigrationType, Error> {
        match s {
            "SQL" => Ok(MigrationType::Sql),
            "CODE" => Ok(MigrationType::Code),
            "SCHEMA" => Ok(MigrationType::Schema),
            "INIT" => Ok(MigrationType::Init),
            other => Err(Error::new(Kind::UnexpectedState(format!(
                "unknown migration type {other:?} in the ledger"
            )))),
        }
    }
}

/// A programmatic migration supplied by the host at engine construction time.
///
/// Code migrations are registered under a script name following the same
/// `<prefix><version>__<description>` convention as script files, minus the
/// file suffix, and are merged into the catalog by the resolver.
pub trait CodeMigration: Send + Sync {
    /// Stable checksum recorded in the ledger; `None` skips checksum
    /// validation for this migration.
    fn checksum(&self) -> Option<i32> {
        None
    }

    /// Apply the migration against the user-objects connection.
    fn migrate(&self, conn: &mut dyn UserObjects) -> Result<(), BoxDynError>;
}

/// How a resolved migration is applied.
#[derive(Clone)]
pub enum MigrationKind {
    /// A SQL script, already normalized and placeholder-substituted
    Sql { sql: String },
    /// A registered code migration
    Code { migration: Arc<dyn CodeMigration> },
}

impl fmt::Debug for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationKind::Sql { .. } => write!(f, "Sql"),
            MigrationKind::Code { .. } => write!(f, "Code"),
        }
    }
}

/// An available migration produced by the resolver, waiting to be applied.
#[derive(Clone, Debug)]
pub struct ResolvedMigration {
    version: Version,
    description: String,
    script: String,
    checksum: Option<i32>,
    kind: MigrationKind,
}

impl ResolvedMigration {
    pub(crate) fn new(
        version: Version,
        description: String,
        script: String,
        checksum: Option<i32>,
        kind: MigrationKind,
    ) -> ResolvedMigration {
        ResolvedMigration {
            version,
            description,
            script,
            checksum,
            kind,
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The script identifier: file name for SQL, registered name for code.
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn checksum(&self) -> Option<i32> {
        self.checksum
    }

    pub fn migration_type(&self) -> MigrationType {
        match self.kind {
            MigrationKind::Sql { .. } => MigrationType::Sql,
            MigrationKind::Code { .. } => MigrationType::Code,
        }
    }

    pub(crate) fn kind(&self) -> &MigrationKind {
        &self.kind
    }
}

impl fmt::Display for ResolvedMigration {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.script)
    }
}

/// A row of the schema history ledger.
#[derive(Clone, Debug)]
pub struct AppliedMigration {
    pub installed_rank: i32,
    pub version: Version,
    pub description: String,
    pub migration_type: MigrationType,
    pub script: String,
    pub checksum: Option<i32>,
    pub installed_by: String,
    pub installed_on: OffsetDateTime,
    pub execution_time: i32,
    pub success: bool,
    pub current: bool,
}
