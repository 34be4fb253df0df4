pub mod config;
mod drivers;
mod engine;
pub mod error;
mod executor;
mod info;
mod ledger;
mod migration;
mod resolver;
mod traits;
mod version;

pub use crate::config::{Config, Target};
pub use crate::engine::{Engine, Report};
pub use crate::error::Error;
pub use crate::info::{InfoService, MigrationInfo, MigrationState};
pub use crate::ledger::Ledger;
pub use crate::migration::{AppliedMigration, CodeMigration, MigrationType, ResolvedMigration};
pub use crate::resolver::resolve_migrations;
pub use crate::traits::{BoxDynError, ConnectionFactory, DatabaseConnection, UserObjects};
pub use crate::version::Version;

#[cfg(feature = "rusqlite")]
pub use crate::drivers::rusqlite::SqliteConnectionFactory;

#[cfg(feature = "rusqlite")]
pub use rusqlite;
