use std::collections::HashSet;
use std::time::Instant;

use crate::config::Target;
use crate::engine::Report;
use crate::error::{Error, Kind};
use crate::ledger::Ledger;
use crate::migration::{AppliedMigration, MigrationKind, ResolvedMigration};
use crate::traits::{BoxDynError, DatabaseConnection};
use crate::version::Version;

/// Compute the migrations to apply, in ascending version order.
///
/// The head is the highest successfully applied version. Resolved migrations
/// above it are always pending; migrations below it are pending only when
/// out-of-order execution is allowed, and are otherwise skipped with a
/// warning. A failed ledger row blocks the run: below the catalog maximum it
/// demands a repair, above it it is a failed future migration.
pub(crate) fn pending_migrations<'c>(
    catalog: &'c [ResolvedMigration],
    applied: &[AppliedMigration],
    target: &Target,
    out_of_order: bool,
    ignore_failed_future: bool,
) -> Result<Vec<&'c ResolvedMigration>, Error> {
    let max_resolved = catalog.last().map(|m| m.version().clone());
    let beyond_catalog =
        |version: &Version| max_resolved.as_ref().map_or(true, |max| version > max);

    for row in applied.iter().filter(|a| !a.success) {
        if beyond_catalog(&row.version) {
            if ignore_failed_future {
                log::warn!(
                    "ignoring failed future migration {} above the highest resolved version",
                    row.version
                );
                return Ok(Vec::new());
            }
            return Err(Error::new(Kind::FailedFuture(row.version.clone())));
        }
        return Err(Error::new(Kind::UnexpectedState(format!(
            "migration {} previously failed, repair the ledger before migrating",
            row.version
        ))));
    }

    let head = applied
        .iter()
        .filter(|a| a.success)
        .map(|a| a.version.clone())
        .max()
        .unwrap_or_else(Version::empty);
    let applied_versions: HashSet<&Version> = applied
        .iter()
        .filter(|a| a.success)
        .map(|a| &a.version)
        .collect();

    let mut pending = Vec::new();
    for migration in catalog {
        if !target.includes(migration.version()) {
            // the catalog is sorted, everything from here on is above target
            break;
        }
        if applied_versions.contains(migration.version()) {
            continue;
        }
        if *migration.version() > head {
            pending.push(migration);
        } else if out_of_order {
            log::info!(
                "applying migration {} below the current head {} out of order",
                migration,
                head
            );
            pending.push(migration);
        } else {
            log::warn!(
                "ignoring resolved migration {} below the current head {}, \
                 enable out of order execution to apply it",
                migration,
                head
            );
        }
    }

    Ok(pending)
}

/// Apply the pending migrations in order, recording every attempt in the
/// ledger on the metadata connection so that each record commits
/// independently of the user-objects work.
///
/// The first failure halts the loop: the attempt is recorded with
/// success=false and the error is raised with the partial report attached.
pub(crate) fn apply_all<C, M>(
    user_conn: &mut C,
    ledger: &mut Ledger<'_, M>,
    pending: &[&ResolvedMigration],
    installed_by: &str,
) -> Result<Report, Error>
where
    C: DatabaseConnection,
    M: DatabaseConnection,
{
    let mut applied = Vec::new();

    for migration in pending {
        log::info!("applying migration {}", migration);
        let started = Instant::now();
        let outcome = apply_one(user_conn, migration);
        let execution_time = started.elapsed().as_millis() as i32;

        match outcome {
            Ok(()) => {
                let row = ledger.add_applied(migration, installed_by, execution_time, true)?;
                applied.push(row);
            }
            Err(cause) => {
                if let Err(record_err) =
                    ledger.add_applied(migration, installed_by, execution_time, false)
                {
                    log::error!(
                        "failed migration {} could not be recorded in the ledger: {}",
                        migration,
                        record_err
                    );
                }
                return Err(Error::with_report(
                    Kind::MigrationFailed {
                        version: migration.version().clone(),
                        script: migration.script().to_owned(),
                        source: cause,
                    },
                    Report::new(applied),
                ));
            }
        }
    }

    Ok(Report::new(applied))
}

fn apply_one<C: DatabaseConnection>(
    conn: &mut C,
    migration: &ResolvedMigration,
) -> Result<(), BoxDynError> {
    if conn.supports_ddl_transactions() {
        conn.begin()?;
        match run_capability(conn, migration) {
            Ok(()) => conn.commit().map_err(Into::into),
            Err(err) => {
                if let Err(rollback_err) = conn.rollback() {
                    log::error!(
                        "rollback after failed migration {} also failed: {}",
                        migration,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    } else {
        run_capability(conn, migration)
    }
}

fn run_capability<C: DatabaseConnection>(
    conn: &mut C,
    migration: &ResolvedMigration,
) -> Result<(), BoxDynError> {
    match migration.kind() {
        MigrationKind::Sql { sql } => conn.execute(&[sql.as_str()]).map(|_| ()).map_err(Into::into),
        MigrationKind::Code { migration } => migration.migrate(conn),
    }
}

#[cfg(test)]
mod tests {
    use super::pending_migrations;
    use crate::config::Target;
    use crate::error::Kind;
    use crate::migration::{AppliedMigration, MigrationKind, MigrationType, ResolvedMigration};
    use crate::version::Version;
    use time::OffsetDateTime;

    fn resolved(version: &str) -> ResolvedMigration {
        ResolvedMigration::new(
            Version::parse(version).unwrap(),
            "test".into(),
            format!("V{version}__test.sql"),
            Some(1),
            MigrationKind::Sql {
                sql: "SELECT 1;".into(),
            },
        )
    }

    fn applied(version: &str, rank: i32, success: bool) -> AppliedMigration {
        AppliedMigration {
            installed_rank: rank,
            version: Version::parse(version).unwrap(),
            description: "test".into(),
            migration_type: MigrationType::Sql,
            script: format!("V{version}__test.sql"),
            checksum: Some(1),
            installed_by: "tester".into(),
            installed_on: OffsetDateTime::UNIX_EPOCH,
            execution_time: 1,
            success,
            current: false,
        }
    }

    fn versions(pending: &[&ResolvedMigration]) -> Vec<String> {
        pending.iter().map(|m| m.version().to_string()).collect()
    }

    #[test]
    fn everything_is_pending_on_an_empty_ledger() {
        let catalog = vec![resolved("1"), resolved("2")];
        let pending =
            pending_migrations(&catalog, &[], &Target::Latest, false, false).unwrap();
        assert_eq!(vec!["1", "2"], versions(&pending));
    }

    #[test]
    fn applied_versions_are_not_pending() {
        let catalog = vec![resolved("1"), resolved("2")];
        let ledger = vec![applied("1", 1, true)];
        let pending =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, false).unwrap();
        assert_eq!(vec!["2"], versions(&pending));
    }

    #[test]
    fn below_head_is_skipped_unless_out_of_order() {
        let catalog = vec![resolved("1"), resolved("2"), resolved("3")];
        let ledger = vec![applied("1", 1, true), applied("3", 2, true)];

        let strict =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, false).unwrap();
        assert!(strict.is_empty());

        let relaxed =
            pending_migrations(&catalog, &ledger, &Target::Latest, true, false).unwrap();
        assert_eq!(vec!["2"], versions(&relaxed));
    }

    #[test]
    fn target_caps_the_pending_set() {
        let catalog = vec![resolved("1"), resolved("2"), resolved("3")];
        let target = Target::Version(Version::parse("2").unwrap());
        let pending = pending_migrations(&catalog, &[], &target, false, false).unwrap();
        assert_eq!(vec!["1", "2"], versions(&pending));
    }

    #[test]
    fn failed_row_below_catalog_head_demands_repair() {
        let catalog = vec![resolved("1"), resolved("2")];
        let ledger = vec![applied("1", 1, true), applied("2", 2, false)];
        let err =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, false).unwrap_err();
        assert!(matches!(err.kind(), Kind::UnexpectedState(_)));
    }

    #[test]
    fn failed_future_row_raises_unless_ignored() {
        let catalog = vec![resolved("1")];
        let ledger = vec![applied("1", 1, true), applied("9", 2, false)];

        let err =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, false).unwrap_err();
        match err.kind() {
            Kind::FailedFuture(version) => assert_eq!("9", version.to_string()),
            other => panic!("unexpected error kind {other:?}"),
        }

        let ignored =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, true).unwrap();
        assert!(ignored.is_empty());
    }

    #[test]
    fn successful_future_rows_block_lower_migrations_in_strict_mode() {
        let catalog = vec![resolved("1"), resolved("2")];
        let ledger = vec![applied("9", 1, true)];

        let strict =
            pending_migrations(&catalog, &ledger, &Target::Latest, false, false).unwrap();
        assert!(strict.is_empty());

        let relaxed =
            pending_migrations(&catalog, &ledger, &Target::Latest, true, false).unwrap();
        assert_eq!(vec!["1", "2"], versions(&relaxed));
    }
}
