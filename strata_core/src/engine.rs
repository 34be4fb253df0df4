use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Kind, WrapMigrationError};
use crate::executor;
use crate::info::{InfoService, MigrationInfo};
use crate::ledger::Ledger;
use crate::migration::{AppliedMigration, CodeMigration, ResolvedMigration};
use crate::resolver;
use crate::traits::{ConnectionFactory, DatabaseConnection};

/// The report of a migration cycle, returned by [`Engine::migrate`]. When a
/// migration fails the report of everything applied before the failure is
/// available through [`Error::report`].
///
/// [`Error::report`]: crate::error::Error::report
#[derive(Clone, Debug)]
pub struct Report {
    applied_migrations: Vec<AppliedMigration>,
}

impl Report {
    pub(crate) fn new(applied_migrations: Vec<AppliedMigration>) -> Report {
        Report { applied_migrations }
    }

    /// The ledger rows recorded for the migrations applied in this cycle.
    pub fn applied_migrations(&self) -> &[AppliedMigration] {
        &self.applied_migrations
    }
}

/// The entry point for running migration commands against a database.
///
/// An engine is built from an immutable [`Config`] snapshot and a connection
/// factory; each command opens two connections, one for the ledger and one
/// for user objects, and drops both on every exit path. Mutating commands
/// serialize across processes through the ledger lock.
pub struct Engine<F: ConnectionFactory> {
    config: Config,
    factory: F,
    code_migrations: Vec<(String, Arc<dyn CodeMigration>)>,
}

impl<F: ConnectionFactory> Engine<F> {
    pub fn new(config: Config, factory: F) -> Engine<F> {
        Engine {
            config,
            factory,
            code_migrations: Vec::new(),
        }
    }

    /// Register a programmatic migration under a script name following the
    /// `<prefix><version>__<description>` convention, e.g. `V7__seed_admin`.
    /// The resolver merges registrations with script files into one catalog.
    pub fn register_code_migration(
        &mut self,
        script: &str,
        migration: Arc<dyn CodeMigration>,
    ) -> &mut Engine<F> {
        self.code_migrations.push((script.to_owned(), migration));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the schema to the target version, applying every pending
    /// migration in version order. Returns the report of applied migrations;
    /// an empty report means the schema was already up to date.
    pub fn migrate(&mut self) -> Result<Report, Error> {
        let (mut meta, mut user) = self.open_connections()?;
        log::debug!("starting migrate on {}", meta.product_name());

        let schemas = self.resolve_schemas(&mut meta)?;
        let installed_by = self.installed_by(&mut meta)?;
        let catalog = resolver::resolve_migrations(&self.config, &self.code_migrations)?;

        // create managed schemas that are missing, remembering which ones so
        // the ledger can record the creation
        let mut created = Vec::new();
        for schema in &schemas {
            let exists = user
                .schema_exists(schema)
                .connection_err("unable to check whether a schema exists")?;
            if !exists {
                user.create_schema(schema)
                    .connection_err("unable to create a managed schema")?;
                log::info!("created schema {}", schema);
                created.push(schema.clone());
            }
        }

        let ledger_exists = meta
            .table_exists(&schemas[0], &self.config.table)
            .ledger_err("error checking whether the ledger table exists")?;
        let mut schemas_non_empty = false;
        if !ledger_exists {
            for schema in &schemas {
                if created.contains(schema) {
                    continue;
                }
                let empty = user
                    .schema_empty(schema)
                    .connection_err("unable to inspect schema contents")?;
                if !empty {
                    schemas_non_empty = true;
                }
            }
        }

        let mut ledger = Ledger::new(&mut meta, &schemas[0], &self.config.table);
        if ledger_exists {
            ledger.lock()?;
        } else {
            if schemas_non_empty && !self.config.init_on_migrate {
                return Err(Error::new(Kind::UnexpectedState(format!(
                    "found non-empty schema {} without a ledger, baseline it with init or \
                     enable init on migrate",
                    schemas[0]
                ))));
            }
            ledger.create_if_not_exists()?;
            ledger.lock()?;
            if schemas_non_empty {
                ledger.init(
                    &self.config.init_version,
                    &self.config.init_description,
                    &installed_by,
                )?;
                log::info!(
                    "baselined non-empty schema {} at version {}",
                    schemas[0],
                    self.config.init_version
                );
            }
        }
        if !created.is_empty() {
            ledger.schemas_created(&created, &installed_by)?;
        }

        if self.config.validate_on_migrate {
            let applied = ledger.all_applied()?;
            let service = InfoService::new(&catalog, applied, self.config.out_of_order);
            if let Some(diagnostic) = service.validate() {
                if self.config.clean_on_validation_error {
                    log::warn!(
                        "validation failed ({}), cleaning the configured schemas",
                        diagnostic
                    );
                    for schema in schemas.iter().rev() {
                        user.drop_schema_objects(schema)
                            .connection_err("unable to clean a schema")?;
                    }
                    ledger.create_if_not_exists()?;
                    ledger.lock()?;
                } else {
                    return Err(Error::new(Kind::ValidationFailed(diagnostic)));
                }
            }
        }

        let applied = ledger.all_applied()?;
        let pending = executor::pending_migrations(
            &catalog,
            &applied,
            &self.config.target,
            self.config.out_of_order,
            self.config.ignore_failed_future_migration,
        )?;
        if pending.is_empty() {
            log::info!("no migrations to apply, schema is up to date");
        }

        let report = executor::apply_all(&mut user, &mut ledger, &pending, &installed_by)?;
        if !report.applied_migrations().is_empty() {
            log::info!(
                "successfully applied {} migration(s)",
                report.applied_migrations().len()
            );
        }
        Ok(report)
    }

    /// The unified status view of available and applied migrations.
    pub fn info(&mut self) -> Result<Vec<MigrationInfo>, Error> {
        let (_, catalog, applied, _user) = self.read_state()?;
        Ok(InfoService::new(&catalog, applied, self.config.out_of_order).all())
    }

    /// The entry for the ledger's current head row, `None` on a fresh schema.
    pub fn current(&mut self) -> Result<Option<MigrationInfo>, Error> {
        let (_, catalog, applied, _user) = self.read_state()?;
        Ok(InfoService::new(&catalog, applied, self.config.out_of_order).current())
    }

    /// Check the ledger against the resolved catalog and fail on drift. With
    /// clean-on-validation-error set the configured schemas are cleaned
    /// instead and the command succeeds.
    pub fn validate(&mut self) -> Result<(), Error> {
        let (schemas, catalog, applied, mut user) = self.read_state()?;
        let diagnostic =
            InfoService::new(&catalog, applied, self.config.out_of_order).validate();
        match diagnostic {
            None => Ok(()),
            Some(diagnostic) if self.config.clean_on_validation_error => {
                log::warn!(
                    "validation failed ({}), cleaning the configured schemas",
                    diagnostic
                );
                for schema in schemas.iter().rev() {
                    user.drop_schema_objects(schema)
                        .connection_err("unable to clean a schema")?;
                }
                Ok(())
            }
            Some(diagnostic) => Err(Error::new(Kind::ValidationFailed(diagnostic))),
        }
    }

    /// Create the ledger and record a baseline row at the configured init
    /// version. Fails when the ledger already holds rows.
    pub fn init(&mut self) -> Result<(), Error> {
        // the user-objects connection stays idle, init only touches the ledger
        let (mut meta, _user) = self.open_connections()?;
        let schemas = self.resolve_schemas(&mut meta)?;
        let installed_by = self.installed_by(&mut meta)?;

        let mut ledger = Ledger::new(&mut meta, &schemas[0], &self.config.table);
        ledger.create_if_not_exists()?;
        ledger.lock()?;
        ledger.init(
            &self.config.init_version,
            &self.config.init_description,
            &installed_by,
        )?;
        log::info!(
            "baselined schema {} at version {}",
            schemas[0],
            self.config.init_version
        );
        Ok(())
    }

    /// Restore the ledger invariants after a failed migration: remove the
    /// failed tail and align recorded checksums with the currently resolved
    /// scripts.
    pub fn repair(&mut self) -> Result<(), Error> {
        // the user-objects connection stays idle, repair only touches the ledger
        let (mut meta, _user) = self.open_connections()?;
        let schemas = self.resolve_schemas(&mut meta)?;
        let catalog = resolver::resolve_migrations(&self.config, &self.code_migrations)?;

        let mut ledger = Ledger::new(&mut meta, &schemas[0], &self.config.table);
        if !ledger.exists()? {
            log::info!("no ledger table found, nothing to repair");
            return Ok(());
        }
        ledger.lock()?;

        let removed = ledger.repair()?;
        if removed > 0 {
            log::info!("removed {} failed row(s) from the ledger", removed);
        }

        for row in ledger.all_applied()? {
            if !row.success || row.migration_type.is_synthetic() {
                continue;
            }
            let resolved = catalog.iter().find(|m| m.version() == &row.version);
            if let Some(resolved) = resolved {
                if resolved.checksum() != row.checksum {
                    ledger.update_checksum(&row.version, resolved.checksum())?;
                    log::info!(
                        "aligned checksum of migration {} with resolved script {}",
                        row.version,
                        resolved.script()
                    );
                }
            }
        }
        Ok(())
    }

    /// Drop every user object in the configured schemas, in reverse order.
    pub fn clean(&mut self) -> Result<(), Error> {
        let (mut meta, mut user) = self.open_connections()?;
        let schemas = self.resolve_schemas(&mut meta)?;

        // the lock lives on the metadata connection for the whole command,
        // the drops run on the user-objects connection
        {
            let mut ledger = Ledger::new(&mut meta, &schemas[0], &self.config.table);
            if ledger.exists()? {
                ledger.lock()?;
            }
        }

        for schema in schemas.iter().rev() {
            user.drop_schema_objects(schema)
                .connection_err("unable to drop the objects in a schema")?;
            log::info!("cleaned schema {}", schema);
        }
        Ok(())
    }

    /// Open the two connections every command works with: `meta` owns ledger
    /// reads, writes and locking, `user` owns schema and user-object DDL.
    /// The roles are never mixed on one connection.
    fn open_connections(&mut self) -> Result<(F::Conn, F::Conn), Error> {
        let meta = self.factory.connect()?;
        let user = self.factory.connect()?;
        Ok((meta, user))
    }

    fn resolve_schemas(&self, conn: &mut F::Conn) -> Result<Vec<String>, Error> {
        if self.config.schemas.is_empty() {
            let schema = conn
                .current_schema()
                .connection_err("unable to determine the current schema")?;
            Ok(vec![schema])
        } else {
            Ok(self.config.schemas.clone())
        }
    }

    fn installed_by(&self, conn: &mut F::Conn) -> Result<String, Error> {
        match &self.config.installed_by {
            Some(user) => Ok(user.clone()),
            None => conn
                .username()
                .connection_err("unable to determine the database user"),
        }
    }

    /// Shared read path for the non-mutating commands: the ledger is read on
    /// the metadata connection, which is then dropped; the returned
    /// connection is the user-objects one.
    #[allow(clippy::type_complexity)]
    fn read_state(
        &mut self,
    ) -> Result<(Vec<String>, Vec<ResolvedMigration>, Vec<AppliedMigration>, F::Conn), Error> {
        let (mut meta, user) = self.open_connections()?;
        let schemas = self.resolve_schemas(&mut meta)?;
        let catalog = resolver::resolve_migrations(&self.config, &self.code_migrations)?;

        let applied = {
            let mut ledger = Ledger::new(&mut meta, &schemas[0], &self.config.table);
            if ledger.exists()? {
                ledger.all_applied()?
            } else {
                Vec::new()
            }
        };
        Ok((schemas, catalog, applied, user))
    }
}
