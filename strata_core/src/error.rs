use crate::engine::Report;
use crate::version::Version;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error as TError;

/// An Error occurred during a migration command
#[derive(Debug)]
pub struct Error {
    kind: Box<Kind>,
    report: Option<Report>,
}

impl Error {
    /// Instantiate a new Error
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            kind: Box::new(kind),
            report: None,
        }
    }

    pub(crate) fn with_report(kind: Kind, report: Report) -> Error {
        Error {
            kind: Box::new(kind),
            report: Some(report),
        }
    }

    /// Return the Report of the migration cycle if any
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Return the kind of error occurred
    pub fn kind(&self) -> &Kind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

/// Enum listing possible errors from Strata.
#[derive(Debug, TError)]
pub enum Kind {
    /// An Error from invalid or missing configuration
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An Error from a migration name that does not follow the naming convention
    #[error("migration name {0} must be in the format <prefix><version>__<description>")]
    InvalidName(String),
    /// An Error from an invalid version string
    #[error("invalid migration version {0:?}, versions are dot or underscore separated numbers")]
    InvalidVersion(String),
    /// An Error from a migration script that cannot be read
    #[error("unable to read migration {0}: {1}")]
    ResolveFailed(PathBuf, #[source] std::io::Error),
    /// An Error from a repeated version, migration version numbers must be unique
    #[error("migration version {0} is repeated by {1} and {2}, versions must be unique")]
    RepeatedVersion(Version, String, String),
    /// An Error from a script referencing a placeholder with no configured value
    #[error("unresolved placeholder {name} in migration {script}")]
    PlaceholderUnresolved { name: String, script: String },
    /// An Error from an underlying database connection Error
    #[error("`{0}`: {1}")]
    Connection(String, #[source] Box<dyn std::error::Error + Sync + Send>),
    /// An Error reading, writing or locking the schema history ledger
    #[error("ledger unavailable, `{0}`: {1}")]
    LedgerUnavailable(String, #[source] Box<dyn std::error::Error + Sync + Send>),
    /// An Error from a command that found the schema or ledger in a state it cannot work with
    #[error("unexpected schema state: {0}")]
    UnexpectedState(String),
    /// An Error from a failed validation of applied vs resolved migrations
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    /// An Error from a migration that raised while being applied
    #[error("migration {script} failed: {source}")]
    MigrationFailed {
        version: Version,
        script: String,
        #[source]
        source: Box<dyn std::error::Error + Sync + Send>,
    },
    /// An Error from a failed ledger row above the highest resolved version
    #[error("ledger contains a failed migration {0} above the highest resolved version")]
    FailedFuture(Version),
}

// Helper trait for adding context messages to driver errors.
pub(crate) trait WrapMigrationError<T, E> {
    fn connection_err(self, msg: &str) -> Result<T, Error>;
    fn ledger_err(self, msg: &str) -> Result<T, Error>;
}

impl<T, E> WrapMigrationError<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn connection_err(self, msg: &str) -> Result<T, Error> {
        self.map_err(|err| Error::new(Kind::Connection(msg.into(), Box::new(err))))
    }

    fn ledger_err(self, msg: &str) -> Result<T, Error> {
        self.map_err(|err| Error::new(Kind::LedgerUnavailable(msg.into(), Box::new(err))))
    }
}
