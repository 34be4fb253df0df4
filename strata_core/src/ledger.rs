use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, Kind, WrapMigrationError};
use crate::migration::{AppliedMigration, MigrationType, ResolvedMigration};
use crate::traits::DatabaseConnection;
use crate::version::Version;

// "current" and "type" are quoted because some vendors treat them as keywords
const CREATE_LEDGER_QUERY: &str = "CREATE TABLE IF NOT EXISTS %LEDGER% (
    version_rank INT NOT NULL,
    installed_rank INT NOT NULL,
    version VARCHAR(50) NOT NULL PRIMARY KEY,
    description VARCHAR(200) NOT NULL,
    \"type\" VARCHAR(20) NOT NULL,
    script VARCHAR(1000) NOT NULL,
    checksum INT,
    installed_by VARCHAR(100) NOT NULL,
    installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    execution_time INT NOT NULL,
    success BOOLEAN NOT NULL,
    \"current\" BOOLEAN NOT NULL
)";

const CREATE_LEDGER_INDEX_QUERY: &str =
    "CREATE INDEX IF NOT EXISTS %SCHEMA%.%TABLE%_ir_idx ON %TABLE% (installed_rank)";

const GET_APPLIED_MIGRATIONS_QUERY: &str = "SELECT version_rank, installed_rank, version, \
    description, \"type\", script, checksum, installed_by, installed_on, execution_time, \
    success, \"current\" FROM %LEDGER% ORDER BY installed_rank ASC";

/// The on-database ledger of applied migrations: every install attempt is a
/// row, rows are never deleted outside of [`repair`], and the `current` flag
/// marks the head.
///
/// Every mutating operation runs inside its own transaction on the metadata
/// connection; callers take [`lock`] first so concurrent engine processes
/// serialize on the database.
///
/// [`repair`]: Ledger::repair
/// [`lock`]: Ledger::lock
pub struct Ledger<'a, C> {
    conn: &'a mut C,
    schema: String,
    table: String,
}

impl<'a, C: DatabaseConnection> Ledger<'a, C> {
    pub fn new(conn: &'a mut C, schema: &str, table: &str) -> Ledger<'a, C> {
        Ledger {
            conn,
            schema: schema.to_owned(),
            table: table.to_owned(),
        }
    }

    fn query(&self, template: &str) -> String {
        template
            .replace("%LEDGER%", &format!("{}.{}", self.schema, self.table))
            .replace("%SCHEMA%", &self.schema)
            .replace("%TABLE%", &self.table)
    }

    pub fn exists(&mut self) -> Result<bool, Error> {
        self.conn
            .table_exists(&self.schema, &self.table)
            .ledger_err("error checking whether the ledger table exists")
    }

    /// Create the ledger table and its rank index. Idempotent.
    pub fn create_if_not_exists(&mut self) -> Result<(), Error> {
        log::debug!("ensuring ledger table {}.{}", self.schema, self.table);
        self.conn
            .execute(&[
                &self.query(CREATE_LEDGER_QUERY),
                &self.query(CREATE_LEDGER_INDEX_QUERY),
            ])
            .ledger_err("error creating the ledger table")?;
        Ok(())
    }

    /// Take the exclusive cross-process lock on the ledger, released when the
    /// connection scope ends.
    pub fn lock(&mut self) -> Result<(), Error> {
        self.conn
            .lock_table(&self.schema, &self.table)
            .ledger_err("unable to lock the ledger table")
    }

    /// All ledger rows, ordered by installed rank.
    pub fn all_applied(&mut self) -> Result<Vec<AppliedMigration>, Error> {
        self.conn
            .query_ledger(&self.query(GET_APPLIED_MIGRATIONS_QUERY))
            .ledger_err("error querying applied migrations")
    }

    /// Record an install attempt for a resolved migration.
    pub fn add_applied(
        &mut self,
        migration: &ResolvedMigration,
        installed_by: &str,
        execution_time: i32,
        success: bool,
    ) -> Result<AppliedMigration, Error> {
        self.insert(
            migration.version().clone(),
            migration.description().to_owned(),
            migration.migration_type(),
            migration.script().to_owned(),
            migration.checksum(),
            installed_by,
            execution_time,
            success,
        )
    }

    /// Record a baseline at the given version. Fails when the ledger already
    /// holds rows.
    pub fn init(
        &mut self,
        version: &Version,
        description: &str,
        installed_by: &str,
    ) -> Result<(), Error> {
        if !self.all_applied()?.is_empty() {
            return Err(Error::new(Kind::UnexpectedState(format!(
                "unable to baseline {}.{}: the ledger is not empty",
                self.schema, self.table
            ))));
        }
        self.insert(
            version.clone(),
            description.to_owned(),
            MigrationType::Init,
            description.to_owned(),
            None,
            installed_by,
            0,
            true,
        )?;
        Ok(())
    }

    /// Record that the engine created the named schemas, which authorizes a
    /// later clean to drop them.
    ///
    /// The row lives at the empty pseudo-version, below every real version:
    /// the version column is the table's primary key and a catalog may
    /// legally contain a `V0` migration, so no numeric version is safe here.
    pub fn schemas_created(&mut self, schemas: &[String], installed_by: &str) -> Result<(), Error> {
        let already_recorded = self
            .all_applied()?
            .iter()
            .any(|a| a.migration_type == MigrationType::Schema);
        if already_recorded {
            log::debug!("schema creation is already recorded in the ledger");
            return Ok(());
        }
        self.insert(
            Version::empty(),
            "<< Schema Creation >>".to_owned(),
            MigrationType::Schema,
            schemas.join(","),
            None,
            installed_by,
            0,
            true,
        )?;
        Ok(())
    }

    /// Remove the failed tail so migrate can resume, and re-establish the
    /// current flag over the remaining rows. Returns the number of rows
    /// removed.
    pub fn repair(&mut self) -> Result<usize, Error> {
        let applied = self.all_applied()?;
        let failed: Vec<&AppliedMigration> = applied.iter().filter(|a| !a.success).collect();
        if failed.is_empty() {
            return Ok(0);
        }

        let max_success_rank = applied
            .iter()
            .filter(|a| a.success)
            .map(|a| a.installed_rank)
            .max();
        if let Some(max_success_rank) = max_success_rank {
            if failed.iter().any(|a| a.installed_rank < max_success_rank) {
                return Err(Error::new(Kind::UnexpectedState(format!(
                    "ledger {}.{} holds failed rows below successful ones and cannot be repaired",
                    self.schema, self.table
                ))));
            }
        }

        let head = applied
            .iter()
            .filter(|a| a.success)
            .map(|a| a.version.clone())
            .max();

        let ledger = self.query("%LEDGER%");
        let mut statements = vec![
            format!("DELETE FROM {ledger} WHERE success = 0"),
            format!("UPDATE {ledger} SET \"current\" = 0"),
        ];
        if let Some(head) = &head {
            statements.push(format!(
                "UPDATE {ledger} SET \"current\" = 1 WHERE version = {}",
                sql_str(&head.to_string())
            ));
        }
        let statements: Vec<&str> = statements.iter().map(AsRef::as_ref).collect();
        self.conn
            .execute_in_transaction(&statements)
            .ledger_err("error repairing the ledger")?;

        for row in &failed {
            log::info!("removed failed ledger row for version {}", row.version);
        }
        Ok(failed.len())
    }

    /// Rewrite the recorded checksum for a version, used by repair to
    /// reconcile a resolved-migration checksum change.
    pub fn update_checksum(
        &mut self,
        version: &Version,
        checksum: Option<i32>,
    ) -> Result<(), Error> {
        let update = format!(
            "UPDATE {} SET checksum = {} WHERE version = {}",
            self.query("%LEDGER%"),
            sql_checksum(checksum),
            sql_str(&version.to_string())
        );
        self.conn
            .execute_in_transaction(&[&update])
            .ledger_err("error updating a ledger checksum")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        version: Version,
        description: String,
        migration_type: MigrationType,
        script: String,
        checksum: Option<i32>,
        installed_by: &str,
        execution_time: i32,
        success: bool,
    ) -> Result<AppliedMigration, Error> {
        let applied = self.all_applied()?;
        let rank = applied
            .iter()
            .map(|a| a.installed_rank)
            .max()
            .unwrap_or(0)
            + 1;

        // the current flag tracks the head, so an out-of-order or failed
        // install leaves it on the highest successfully applied version
        let prior_head = applied
            .iter()
            .filter(|a| a.success)
            .map(|a| a.version.clone())
            .max();
        let current_version = match &prior_head {
            Some(head) if !(success && version > *head) => head.clone(),
            _ => version.clone(),
        };

        let installed_on = OffsetDateTime::now_utc();
        let ledger = self.query("%LEDGER%");
        let insert = format!(
            "INSERT INTO {ledger} (version_rank, installed_rank, version, description, \"type\", \
             script, checksum, installed_by, installed_on, execution_time, success, \"current\") \
             VALUES ({rank}, {rank}, {version}, {description}, {migration_type}, {script}, \
             {checksum}, {installed_by}, {installed_on}, {execution_time}, {success}, 0)",
            version = sql_str(&version.to_string()),
            description = sql_str(&description),
            migration_type = sql_str(&migration_type.to_string()),
            script = sql_str(&script),
            checksum = sql_checksum(checksum),
            installed_by = sql_str(installed_by),
            // safe to call unwrap, a UTC timestamp always formats as RFC 3339
            installed_on = sql_str(&installed_on.format(&Rfc3339).unwrap()),
            success = sql_bool(success),
        );
        let statements = vec![
            format!("UPDATE {ledger} SET \"current\" = 0"),
            insert,
            format!(
                "UPDATE {ledger} SET \"current\" = 1 WHERE version = {}",
                sql_str(&current_version.to_string())
            ),
        ];
        let statements: Vec<&str> = statements.iter().map(AsRef::as_ref).collect();
        self.conn
            .execute_in_transaction(&statements)
            .ledger_err("error recording an applied migration")?;

        Ok(AppliedMigration {
            installed_rank: rank,
            current: current_version == version,
            version,
            description,
            migration_type,
            script,
            checksum,
            installed_by: installed_by.to_owned(),
            installed_on,
            execution_time,
            success,
        })
    }
}

fn sql_str(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn sql_checksum(checksum: Option<i32>) -> String {
    match checksum {
        Some(value) => value.to_string(),
        None => "NULL".to_owned(),
    }
}

fn sql_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(all(test, feature = "rusqlite"))]
mod tests {
    use super::Ledger;
    use crate::error::Kind;
    use crate::migration::{MigrationKind, ResolvedMigration};
    use crate::version::Version;
    use rusqlite::Connection;

    fn resolved(version: &str, script: &str) -> ResolvedMigration {
        ResolvedMigration::new(
            Version::parse(version).unwrap(),
            "test".into(),
            script.into(),
            Some(7),
            MigrationKind::Sql {
                sql: "SELECT 1;".into(),
            },
        )
    }

    fn ledger(conn: &mut Connection) -> Ledger<'_, Connection> {
        let mut ledger = Ledger::new(conn, "main", "schema_version");
        ledger.create_if_not_exists().unwrap();
        ledger
    }

    #[test]
    fn create_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);
        ledger.create_if_not_exists().unwrap();
        assert!(ledger.exists().unwrap());
    }

    #[test]
    fn add_applied_assigns_increasing_ranks_and_moves_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .add_applied(&resolved("1", "V1__a.sql"), "tester", 3, true)
            .unwrap();
        ledger
            .add_applied(&resolved("2", "V2__b.sql"), "tester", 4, true)
            .unwrap();

        let applied = ledger.all_applied().unwrap();
        assert_eq!(vec![1, 2], applied.iter().map(|a| a.installed_rank).collect::<Vec<_>>());
        assert!(!applied[0].current);
        assert!(applied[1].current);
        assert_eq!("2", applied[1].version.to_string());
    }

    #[test]
    fn failed_install_leaves_current_on_the_head() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .add_applied(&resolved("1", "V1__a.sql"), "tester", 3, true)
            .unwrap();
        ledger
            .add_applied(&resolved("2", "V2__b.sql"), "tester", 4, false)
            .unwrap();

        let applied = ledger.all_applied().unwrap();
        assert!(applied[0].current);
        assert!(!applied[1].current);
        assert!(!applied[1].success);
    }

    #[test]
    fn out_of_order_install_leaves_current_on_the_head() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .add_applied(&resolved("1", "V1__a.sql"), "tester", 1, true)
            .unwrap();
        ledger
            .add_applied(&resolved("3", "V3__c.sql"), "tester", 1, true)
            .unwrap();
        ledger
            .add_applied(&resolved("2", "V2__b.sql"), "tester", 1, true)
            .unwrap();

        let applied = ledger.all_applied().unwrap();
        let current: Vec<&str> = applied
            .iter()
            .filter(|a| a.current)
            .map(|a| a.script.as_str())
            .collect();
        assert_eq!(vec!["V3__c.sql"], current);
    }

    #[test]
    fn schemas_created_records_a_synthetic_row_below_real_versions() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .schemas_created(&["reporting".into(), "audit".into()], "tester")
            .unwrap();

        let applied = ledger.all_applied().unwrap();
        assert_eq!(1, applied.len());
        assert_eq!(crate::migration::MigrationType::Schema, applied[0].migration_type);
        assert!(applied[0].version.is_empty());
        assert_eq!("reporting,audit", applied[0].script);
        assert!(applied[0].success);

        // a migration named V0 cannot collide with the pseudo-version
        ledger
            .add_applied(&resolved("0", "V0__bootstrap.sql"), "tester", 1, true)
            .unwrap();

        // a second creation event does not try to insert a duplicate key
        ledger.schemas_created(&["later".into()], "tester").unwrap();
        let applied = ledger.all_applied().unwrap();
        assert_eq!(2, applied.len());
    }

    #[test]
    fn init_refuses_a_non_empty_ledger() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        let five = Version::parse("5").unwrap();
        ledger.init(&five, "<< Init >>", "tester").unwrap();
        let err = ledger.init(&five, "<< Init >>", "tester").unwrap_err();
        assert!(matches!(err.kind(), Kind::UnexpectedState(_)));
    }

    #[test]
    fn repair_removes_the_failed_tail_and_restores_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .add_applied(&resolved("1", "V1__a.sql"), "tester", 1, true)
            .unwrap();
        ledger
            .add_applied(&resolved("2", "V2__b.sql"), "tester", 1, false)
            .unwrap();

        assert_eq!(1, ledger.repair().unwrap());
        let applied = ledger.all_applied().unwrap();
        assert_eq!(1, applied.len());
        assert!(applied[0].current);
        assert_eq!("1", applied[0].version.to_string());

        // nothing left to repair
        assert_eq!(0, ledger.repair().unwrap());
    }

    #[test]
    fn update_checksum_rewrites_the_stored_value() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut ledger = ledger(&mut conn);

        ledger
            .add_applied(&resolved("1", "V1__a.sql"), "tester", 1, true)
            .unwrap();
        ledger
            .update_checksum(&Version::parse("1").unwrap(), Some(99))
            .unwrap();

        let applied = ledger.all_applied().unwrap();
        assert_eq!(Some(99), applied[0].checksum);
    }
}
