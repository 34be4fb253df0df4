/*!
Versioned schema migration engine for SQL databases.

`strata` brings a database schema from its current recorded state to a desired
state by applying an ordered set of migration scripts, recording every attempt
in an on-database ledger so that runs are idempotent, auditable and safe under
partial failure.

## Usage

- Script migrations are files named `V{1}__{2}.sql` where `{1}` is the version
  and `{2}` the description, discovered from the configured locations.
- Programmatic migrations implement [`CodeMigration`] and are registered on
  the [`Engine`] under the same naming convention.
- Commands: `migrate`, `info`, `validate`, `init` (baseline), `repair` and
  `clean`, also available through the `strata` binary.

### Example
```rust,ignore
use strata::{Config, Engine, SqliteConnectionFactory};

let config = Config::new().set_locations(vec!["migrations"]);
let factory = SqliteConnectionFactory::new("app.db");
let report = Engine::new(config, factory).migrate()?;
println!("applied {} migrations", report.applied_migrations().len());
```
*/

pub use strata_core::config;
pub use strata_core::error;
pub use strata_core::{
    resolve_migrations, AppliedMigration, BoxDynError, CodeMigration, Config, ConnectionFactory,
    DatabaseConnection, Engine, Error, InfoService, MigrationInfo, MigrationState, MigrationType,
    Report, ResolvedMigration, Target, UserObjects, Version,
};

#[cfg(feature = "rusqlite")]
pub use strata_core::{rusqlite, SqliteConnectionFactory};
