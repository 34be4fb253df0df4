use crate::error::Error;
use crate::migration::AppliedMigration;

pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The capability the engine requires from a database driver: statement
/// execution plus the vendor-specific pieces of the migration protocol
/// (schema introspection, DDL transaction support, ledger locking).
///
/// Drivers implement this directly on their connection type, the way the
/// sqlite driver does for [`rusqlite::Connection`].
pub trait DatabaseConnection {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Vendor name, used for log messages only.
    fn product_name(&self) -> &'static str;

    /// Whether DDL statements participate in transactions on this database.
    /// When true, each migration runs inside a transaction and is rolled
    /// back on failure.
    fn supports_ddl_transactions(&self) -> bool;

    /// Execute scripts sequentially on the connection without opening a
    /// transaction. Each script may contain multiple statements separated by
    /// the vendor's statement delimiter.
    fn execute(&mut self, scripts: &[&str]) -> Result<usize, Self::Error>;

    /// Execute scripts inside a single transaction, committing on success and
    /// rolling back on the first error.
    fn execute_in_transaction(&mut self, scripts: &[&str]) -> Result<usize, Self::Error>;

    /// Run a ledger query and map the result rows to [`AppliedMigration`].
    fn query_ledger(&mut self, query: &str) -> Result<Vec<AppliedMigration>, Self::Error>;

    fn begin(&mut self) -> Result<(), Self::Error> {
        self.execute(&["BEGIN"]).map(|_| ())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        self.execute(&["COMMIT"]).map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), Self::Error> {
        self.execute(&["ROLLBACK"]).map(|_| ())
    }

    /// The schema migrations run against when none is configured.
    fn current_schema(&mut self) -> Result<String, Self::Error>;

    fn schema_exists(&mut self, schema: &str) -> Result<bool, Self::Error>;

    /// Whether the schema contains no user objects.
    fn schema_empty(&mut self, schema: &str) -> Result<bool, Self::Error>;

    fn create_schema(&mut self, schema: &str) -> Result<(), Self::Error>;

    /// Drop every user object in the schema, leaving the schema itself.
    fn drop_schema_objects(&mut self, schema: &str) -> Result<(), Self::Error>;

    fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, Self::Error>;

    /// Take an exclusive lock on the ledger table, blocking other engine
    /// instances until the enclosing connection scope ends. Databases whose
    /// write transactions already serialize writers may implement this as a
    /// no-op.
    fn lock_table(&mut self, schema: &str, table: &str) -> Result<(), Self::Error>;

    /// The user identity recorded in the ledger's installed_by column.
    fn username(&mut self) -> Result<String, Self::Error>;
}

/// Produces the two connections a command needs, both pointing at the same
/// database. Connections are closed by dropping them, on every exit path.
pub trait ConnectionFactory {
    type Conn: DatabaseConnection;

    fn connect(&mut self) -> Result<Self::Conn, Error>;
}

/// The narrow, object-safe surface a [`CodeMigration`] gets to touch user
/// objects with.
///
/// [`CodeMigration`]: crate::migration::CodeMigration
pub trait UserObjects {
    /// Run a script against the user-objects connection.
    fn run(&mut self, sql: &str) -> Result<(), BoxDynError>;
}

impl<C: DatabaseConnection> UserObjects for C {
    fn run(&mut self, sql: &str) -> Result<(), BoxDynError> {
        self.execute(&[sql]).map(|_| ()).map_err(Into::into)
    }
}
