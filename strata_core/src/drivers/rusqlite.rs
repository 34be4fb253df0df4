use std::path::{Path, PathBuf};

use rusqlite::{Connection as RqlConnection, Error as RqlError, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, WrapMigrationError};
use crate::migration::AppliedMigration;
use crate::traits::{ConnectionFactory, DatabaseConnection};
use crate::version::Version;

/// Opens connections against a single SQLite database file. Commands that
/// need separate metadata and user-objects connections call it twice.
pub struct SqliteConnectionFactory {
    path: PathBuf,
}

impl SqliteConnectionFactory {
    pub fn new(path: impl AsRef<Path>) -> SqliteConnectionFactory {
        SqliteConnectionFactory {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    type Conn = RqlConnection;

    fn connect(&mut self) -> Result<RqlConnection, Error> {
        RqlConnection::open(&self.path).connection_err("unable to open the sqlite database")
    }
}

fn query_applied_migrations(
    conn: &RqlConnection,
    query: &str,
) -> Result<Vec<AppliedMigration>, RqlError> {
    let mut stmt = conn.prepare(query)?;
    let mut rows = stmt.query([])?;
    let mut applied = Vec::new();
    while let Some(row) = rows.next()? {
        let version: String = row.get(2)?;
        let type_name: String = row.get(4)?;
        let installed_on: String = row.get(8)?;
        applied.push(AppliedMigration {
            installed_rank: row.get(1)?,
            // safe to unwrap, the engine wrote these columns in canonical form
            version: Version::parse(&version).expect("ledger version must parse"),
            description: row.get(3)?,
            migration_type: type_name.parse().expect("ledger type must be known"),
            script: row.get(5)?,
            checksum: row.get(6)?,
            installed_by: row.get(7)?,
            installed_on: OffsetDateTime::parse(&installed_on, &Rfc3339)
                .expect("ledger timestamp must be RFC 3339"),
            execution_time: row.get(9)?,
            success: row.get(10)?,
            current: row.get(11)?,
        });
    }
    Ok(applied)
}

impl DatabaseConnection for RqlConnection {
    type Error = RqlError;

    fn product_name(&self) -> &'static str {
        "SQLite"
    }

    fn supports_ddl_transactions(&self) -> bool {
        true
    }

    fn execute(&mut self, scripts: &[&str]) -> Result<usize, Self::Error> {
        let mut count = 0;
        for script in scripts {
            self.execute_batch(script)?;
            count += 1;
        }
        Ok(count)
    }

    fn execute_in_transaction(&mut self, scripts: &[&str]) -> Result<usize, Self::Error> {
        let tx = self.transaction()?;
        let mut count = 0;
        for script in scripts {
            tx.execute_batch(script)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    fn query_ledger(&mut self, query: &str) -> Result<Vec<AppliedMigration>, Self::Error> {
        query_applied_migrations(self, query)
    }

    fn current_schema(&mut self) -> Result<String, Self::Error> {
        Ok("main".to_owned())
    }

    fn schema_exists(&mut self, schema: &str) -> Result<bool, Self::Error> {
        let mut stmt = self.prepare("SELECT name FROM pragma_database_list WHERE name = ?1")?;
        let found = stmt
            .query_row([schema], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn schema_empty(&mut self, schema: &str) -> Result<bool, Self::Error> {
        let count: i64 = self.query_row(
            &format!("SELECT COUNT(*) FROM {schema}.sqlite_master WHERE name NOT LIKE 'sqlite_%'"),
            [],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }

    fn create_schema(&mut self, _schema: &str) -> Result<(), Self::Error> {
        // schemas map to attached database files here, they cannot be created
        // through DDL
        Err(RqlError::ModuleError(
            "SQLite cannot create schemas, attach a database instead".to_owned(),
        ))
    }

    fn drop_schema_objects(&mut self, schema: &str) -> Result<(), Self::Error> {
        let objects: Vec<(String, String)> = {
            let mut stmt = self.prepare(&format!(
                "SELECT \"type\", name FROM {schema}.sqlite_master \
                 WHERE name NOT LIKE 'sqlite_%' AND \"type\" IN ('table', 'view')"
            ))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        self.execute_batch("PRAGMA foreign_keys = OFF")?;
        for (kind, name) in objects {
            let drop = match kind.as_str() {
                "table" => format!("DROP TABLE IF EXISTS {schema}.\"{name}\""),
                _ => format!("DROP VIEW IF EXISTS {schema}.\"{name}\""),
            };
            self.execute_batch(&drop)?;
        }
        self.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(())
    }

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, Self::Error> {
        let mut stmt = self.prepare(&format!(
            "SELECT name FROM {schema}.sqlite_master WHERE \"type\" = 'table' AND name = ?1"
        ))?;
        let found = stmt
            .query_row([table], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn lock_table(&mut self, _schema: &str, _table: &str) -> Result<(), Self::Error> {
        // sqlite's database-level write locking already serializes concurrent
        // writers, there is no finer lock to take
        Ok(())
    }

    fn username(&mut self) -> Result<String, Self::Error> {
        // sqlite has no database users
        Ok("unknown".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use crate::traits::DatabaseConnection;
    use rusqlite::Connection;

    #[test]
    fn execute_in_transaction_rolls_back_on_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INT)").unwrap();

        let result =
            conn.execute_in_transaction(&["INSERT INTO t VALUES (1)", "INSERT INTO nope VALUES (1)"]);
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(0, count);
    }

    #[test]
    fn table_exists_sees_only_real_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(!conn.table_exists(Some("main"), "t").unwrap());
        conn.execute_batch("CREATE TABLE t (id INT)").unwrap();
        assert!(conn.table_exists(Some("main"), "t").unwrap());
    }

    #[test]
    fn schema_empty_reflects_user_objects() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(conn.schema_empty("main").unwrap());
        conn.execute_batch("CREATE TABLE t (id INT)").unwrap();
        assert!(!conn.schema_empty("main").unwrap());
    }

    #[test]
    fn drop_schema_objects_empties_the_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE a (id INT);
             CREATE TABLE b (a_id INT REFERENCES a(id));
             CREATE VIEW v AS SELECT id FROM a;",
        )
        .unwrap();

        conn.drop_schema_objects("main").unwrap();
        assert!(conn.schema_empty("main").unwrap());
    }

    #[test]
    fn schema_exists_knows_the_main_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(conn.schema_exists("main").unwrap());
        assert!(!conn.schema_exists("reporting").unwrap());
    }
}
