use std::collections::{HashMap, HashSet};
use std::fmt;

use time::OffsetDateTime;

use crate::migration::{AppliedMigration, MigrationType, ResolvedMigration};
use crate::version::Version;

/// The state of a migration in the joined available/applied view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationState {
    /// Resolved but not yet applied
    Pending,
    /// Applied successfully
    Success,
    /// Application was attempted and failed
    Failed,
    /// In the ledger but no longer resolved from any location
    Missing,
    /// In the ledger at a version above every resolved migration
    Future,
    /// Resolved at a version below the current head, not applied
    OutOfOrder,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Pending => "Pending",
            MigrationState::Success => "Success",
            MigrationState::Failed => "Failed",
            MigrationState::Missing => "Missing",
            MigrationState::Future => "Future",
            MigrationState::OutOfOrder => "Out of Order",
        };
        write!(f, "{}", name)
    }
}

/// One row of the unified migration status view, combining what the resolver
/// found with what the ledger recorded for a version.
#[derive(Clone, Debug)]
pub struct MigrationInfo {
    pub version: Version,
    pub description: String,
    pub migration_type: MigrationType,
    pub script: String,
    pub checksum: Option<i32>,
    pub installed_rank: Option<i32>,
    pub installed_on: Option<OffsetDateTime>,
    pub execution_time: Option<i32>,
    pub state: MigrationState,
}

/// Joins the catalog with the ledger into a unified status view and detects
/// drift between them.
pub struct InfoService<'a> {
    catalog: &'a [ResolvedMigration],
    applied: Vec<AppliedMigration>,
    out_of_order: bool,
}

impl<'a> InfoService<'a> {
    pub fn new(
        catalog: &'a [ResolvedMigration],
        applied: Vec<AppliedMigration>,
        out_of_order: bool,
    ) -> InfoService<'a> {
        InfoService {
            catalog,
            applied,
            out_of_order,
        }
    }

    /// The highest successfully applied version, `None` on a fresh ledger.
    fn head(&self) -> Option<Version> {
        self.applied
            .iter()
            .filter(|a| a.success)
            .map(|a| a.version.clone())
            .max()
    }

    fn max_resolved(&self) -> Option<&Version> {
        self.catalog.last().map(ResolvedMigration::version)
    }

    fn resolved_by_version(&self) -> HashMap<&Version, &ResolvedMigration> {
        self.catalog.iter().map(|m| (m.version(), m)).collect()
    }

    fn ledger_versions(&self) -> HashSet<&Version> {
        self.applied.iter().map(|a| &a.version).collect()
    }

    fn applied_info(&self, row: &AppliedMigration) -> MigrationInfo {
        let in_catalog = self
            .catalog
            .iter()
            .any(|m| m.version() == &row.version);
        let beyond_catalog = self
            .max_resolved()
            .map_or(true, |max| &row.version > max);

        let state = if row.migration_type.is_synthetic() {
            MigrationState::Success
        } else if in_catalog {
            if row.success {
                MigrationState::Success
            } else {
                MigrationState::Failed
            }
        } else if beyond_catalog {
            MigrationState::Future
        } else if row.success {
            MigrationState::Missing
        } else {
            MigrationState::Failed
        };

        MigrationInfo {
            version: row.version.clone(),
            description: row.description.clone(),
            migration_type: row.migration_type,
            script: row.script.clone(),
            checksum: row.checksum,
            installed_rank: Some(row.installed_rank),
            installed_on: Some(row.installed_on),
            execution_time: Some(row.execution_time),
            state,
        }
    }

    fn resolved_info(&self, migration: &ResolvedMigration, head: Option<&Version>) -> MigrationInfo {
        let state = if head.map_or(false, |h| migration.version() < h) {
            MigrationState::OutOfOrder
        } else {
            MigrationState::Pending
        };
        MigrationInfo {
            version: migration.version().clone(),
            description: migration.description().to_owned(),
            migration_type: migration.migration_type(),
            script: migration.script().to_owned(),
            checksum: migration.checksum(),
            installed_rank: None,
            installed_on: None,
            execution_time: None,
            state,
        }
    }

    /// The full joined view, ascending by version; entries sharing a version
    /// are ordered by installed rank, with unapplied entries last.
    pub fn all(&self) -> Vec<MigrationInfo> {
        let head = self.head();
        let ledger_versions = self.ledger_versions();

        let mut infos: Vec<MigrationInfo> =
            self.applied.iter().map(|row| self.applied_info(row)).collect();
        infos.extend(
            self.catalog
                .iter()
                .filter(|m| !ledger_versions.contains(m.version()))
                .map(|m| self.resolved_info(m, head.as_ref())),
        );

        infos.sort_by(|a, b| {
            a.version.cmp(&b.version).then_with(|| {
                a.installed_rank
                    .unwrap_or(i32::MAX)
                    .cmp(&b.installed_rank.unwrap_or(i32::MAX))
            })
        });
        infos
    }

    /// The entry for the ledger's current head row, if any.
    pub fn current(&self) -> Option<MigrationInfo> {
        self.applied
            .iter()
            .find(|a| a.current)
            .map(|row| self.applied_info(row))
    }

    /// All ledger entries, ordered by installed rank.
    pub fn applied(&self) -> Vec<MigrationInfo> {
        self.applied.iter().map(|row| self.applied_info(row)).collect()
    }

    /// Resolved migrations not yet in the ledger, honoring the out-of-order
    /// policy.
    pub fn pending(&self) -> Vec<&ResolvedMigration> {
        let head = self.head();
        let ledger_versions = self.ledger_versions();
        self.catalog
            .iter()
            .filter(|m| !ledger_versions.contains(m.version()))
            .filter(|m| self.out_of_order || head.as_ref().map_or(true, |h| m.version() > h))
            .collect()
    }

    /// Detect drift between ledger and catalog. Returns a diagnostic when a
    /// successfully applied migration disagrees with its resolved counterpart
    /// (checksum, then type, then description), or when a resolved migration
    /// at or below the head was never applied.
    pub fn validate(&self) -> Option<String> {
        let resolved_by_version = self.resolved_by_version();

        for row in self
            .applied
            .iter()
            .filter(|a| a.success && !a.migration_type.is_synthetic())
        {
            let Some(resolved) = resolved_by_version.get(&row.version) else {
                continue;
            };
            if resolved.checksum() != row.checksum {
                return Some(format!(
                    "checksum mismatch for migration {}: ledger recorded {}, resolved script {} \
                     has {}",
                    row.version,
                    fmt_checksum(row.checksum),
                    resolved.script(),
                    fmt_checksum(resolved.checksum()),
                ));
            }
            if resolved.migration_type() != row.migration_type {
                return Some(format!(
                    "type mismatch for migration {}: ledger recorded {}, resolved as {}",
                    row.version,
                    row.migration_type,
                    resolved.migration_type(),
                ));
            }
            if resolved.description() != row.description {
                return Some(format!(
                    "description mismatch for migration {}: ledger recorded {:?}, resolved as {:?}",
                    row.version,
                    row.description,
                    resolved.description(),
                ));
            }
        }

        let head = self.head();
        let ledger_versions = self.ledger_versions();
        if let Some(head) = head {
            for migration in self.catalog {
                if migration.version() <= &head && !ledger_versions.contains(migration.version()) {
                    return Some(format!(
                        "resolved migration {} at or below the current head {} has never been \
                         applied",
                        migration, head,
                    ));
                }
            }
        }

        None
    }
}

fn fmt_checksum(checksum: Option<i32>) -> String {
    match checksum {
        Some(value) => value.to_string(),
        None => "none".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::{InfoService, MigrationState};
    use crate::migration::{AppliedMigration, MigrationKind, MigrationType, ResolvedMigration};
    use crate::version::Version;
    use time::OffsetDateTime;

    fn resolved(version: &str, description: &str, checksum: i32) -> ResolvedMigration {
        ResolvedMigration::new(
            Version::parse(version).unwrap(),
            description.into(),
            format!("V{version}__{}.sql", description.replace(' ', "_")),
            Some(checksum),
            MigrationKind::Sql {
                sql: "SELECT 1;".into(),
            },
        )
    }

    fn applied(version: &str, rank: i32, success: bool, checksum: i32) -> AppliedMigration {
        applied_typed(version, rank, success, checksum, MigrationType::Sql)
    }

    fn applied_typed(
        version: &str,
        rank: i32,
        success: bool,
        checksum: i32,
        migration_type: MigrationType,
    ) -> AppliedMigration {
        AppliedMigration {
            installed_rank: rank,
            version: Version::parse(version).unwrap(),
            description: "test".into(),
            migration_type,
            script: format!("V{version}__test.sql"),
            checksum: Some(checksum),
            installed_by: "tester".into(),
            installed_on: OffsetDateTime::UNIX_EPOCH,
            execution_time: 1,
            success,
            current: false,
        }
    }

    fn state_of(service: &InfoService<'_>, version: &str) -> MigrationState {
        let wanted = Version::parse(version).unwrap();
        service
            .all()
            .into_iter()
            .find(|info| info.version == wanted)
            .map(|info| info.state)
            .unwrap()
    }

    #[test]
    fn derives_states_from_the_join() {
        let catalog = vec![
            resolved("1", "test", 1),
            resolved("2", "test", 2),
            resolved("3", "test", 3),
        ];
        // ledger: V1 ok, V2 failed, V4 applied but unresolved, V9 future
        let ledger = vec![
            applied("1", 1, true, 1),
            applied("2", 2, false, 2),
            applied("4", 3, true, 4),
            applied("9", 4, true, 9),
        ];
        let service = InfoService::new(&catalog, ledger, false);

        assert_eq!(MigrationState::Success, state_of(&service, "1"));
        assert_eq!(MigrationState::Failed, state_of(&service, "2"));
        assert_eq!(MigrationState::OutOfOrder, state_of(&service, "3"));
        assert_eq!(MigrationState::Missing, state_of(&service, "4"));
        assert_eq!(MigrationState::Future, state_of(&service, "9"));
    }

    #[test]
    fn synthetic_rows_count_as_success_and_set_the_head() {
        let catalog = vec![resolved("4", "test", 4), resolved("6", "test", 6)];
        let ledger = vec![applied_typed("5", 1, true, 0, MigrationType::Init)];
        let service = InfoService::new(&catalog, ledger, false);

        assert_eq!(MigrationState::Success, state_of(&service, "5"));
        assert_eq!(MigrationState::OutOfOrder, state_of(&service, "4"));
        assert_eq!(MigrationState::Pending, state_of(&service, "6"));

        let pending: Vec<String> = service
            .pending()
            .iter()
            .map(|m| m.version().to_string())
            .collect();
        assert_eq!(vec!["6"], pending);
    }

    #[test]
    fn current_returns_the_flagged_row() {
        let catalog = vec![resolved("1", "test", 1)];
        let mut row = applied("1", 1, true, 1);
        row.current = true;
        let service = InfoService::new(&catalog, vec![row], false);

        let current = service.current().unwrap();
        assert_eq!("1", current.version.to_string());
        assert_eq!(MigrationState::Success, current.state);
    }

    #[test]
    fn view_is_sorted_by_version_then_rank() {
        let catalog = vec![resolved("2", "test", 2)];
        let ledger = vec![
            applied_typed("3", 1, true, 0, MigrationType::Init),
            applied("1", 2, true, 1),
        ];
        let service = InfoService::new(&catalog, ledger, true);

        let versions: Vec<String> = service
            .all()
            .iter()
            .map(|info| info.version.to_string())
            .collect();
        assert_eq!(vec!["1", "2", "3"], versions);
    }

    #[test]
    fn validate_passes_on_a_faithful_ledger() {
        let catalog = vec![resolved("1", "test", 1), resolved("2", "test", 2)];
        let ledger = vec![applied("1", 1, true, 1)];
        let service = InfoService::new(&catalog, ledger, false);
        assert_eq!(None, service.validate());
    }

    #[test]
    fn validate_reports_checksum_drift_first() {
        // description drifts as well, the checksum diagnostic must win
        let catalog = vec![resolved("1", "renamed", 99)];
        let ledger = vec![applied("1", 1, true, 1)];
        let service = InfoService::new(&catalog, ledger, false);

        let diagnostic = service.validate().unwrap();
        assert!(diagnostic.contains("checksum mismatch"), "{diagnostic}");
        assert!(diagnostic.contains('1'), "{diagnostic}");
    }

    #[test]
    fn validate_reports_description_drift() {
        let catalog = vec![resolved("1", "renamed", 1)];
        let ledger = vec![applied("1", 1, true, 1)];
        let service = InfoService::new(&catalog, ledger, false);

        let diagnostic = service.validate().unwrap();
        assert!(diagnostic.contains("description mismatch"), "{diagnostic}");
    }

    #[test]
    fn validate_reports_unapplied_migrations_below_the_head() {
        let catalog = vec![resolved("1", "test", 1), resolved("2", "test", 2)];
        let ledger = vec![applied("2", 1, true, 2)];
        let service = InfoService::new(&catalog, ledger, false);

        let diagnostic = service.validate().unwrap();
        assert!(diagnostic.contains("never been applied"), "{diagnostic}");
    }

    #[test]
    fn validate_ignores_synthetic_and_failed_rows() {
        let catalog = vec![resolved("2", "test", 2)];
        let ledger = vec![
            applied_typed("1", 1, true, 0, MigrationType::Init),
            applied("2", 2, false, 77),
        ];
        let service = InfoService::new(&catalog, ledger, false);
        assert_eq!(None, service.validate());
    }
}
