use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use siphasher::sip::SipHasher13;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Kind};
use crate::migration::{CodeMigration, MigrationKind, ResolvedMigration};
use crate::version::Version;

/// Discover the available migrations and produce the catalog: script files
/// from the configured locations merged with the host's registered code
/// migrations, sorted ascending by version.
///
/// Fails when two migrations share a version, when a candidate name cannot be
/// parsed, or when a script references an unknown placeholder.
pub fn resolve_migrations(
    config: &Config,
    code_migrations: &[(String, Arc<dyn CodeMigration>)],
) -> Result<Vec<ResolvedMigration>, Error> {
    if !config.encoding.eq_ignore_ascii_case("utf-8") && !config.encoding.eq_ignore_ascii_case("utf8")
    {
        return Err(Error::new(Kind::Config(format!(
            "unsupported script encoding {:?}, only UTF-8 is available",
            config.encoding
        ))));
    }

    let token_re = placeholder_token_re(config)?;
    let mut catalog = Vec::new();

    for location in &config.locations {
        if !location.is_dir() {
            log::warn!(
                "migration location {} does not exist, skipping",
                location.display()
            );
            continue;
        }

        for entry in WalkDir::new(location)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !file_name.ends_with(&config.sql_migration_suffix) {
                continue;
            }
            if !file_name.starts_with(&config.sql_migration_prefix) {
                log::warn!(
                    "file {} does not adhere to the migration naming convention \
                     {}<version>__<description>{}, skipping",
                    file_name,
                    config.sql_migration_prefix,
                    config.sql_migration_suffix
                );
                continue;
            }

            let stem = &file_name[..file_name.len() - config.sql_migration_suffix.len()];
            let (version, description) = parse_script_name(stem, &config.sql_migration_prefix)?;

            let sql = read_script(entry.path())?;
            // checksum covers the normalized script before placeholder
            // substitution, so changing placeholder values never invalidates
            // rows already recorded in the ledger
            let checksum = checksum_of(&sql);
            let sql = substitute_placeholders(sql, file_name, config, &token_re)?;

            catalog.push(ResolvedMigration::new(
                version,
                description,
                file_name.to_owned(),
                Some(checksum),
                MigrationKind::Sql { sql },
            ));
        }
    }

    for (script, migration) in code_migrations {
        let (version, description) = parse_script_name(script, &config.sql_migration_prefix)?;
        catalog.push(ResolvedMigration::new(
            version,
            description,
            script.clone(),
            migration.checksum(),
            MigrationKind::Code {
                migration: Arc::clone(migration),
            },
        ));
    }

    catalog.sort_by(|a, b| a.version().cmp(b.version()));

    for pair in catalog.windows(2) {
        if pair[0].version() == pair[1].version() {
            return Err(Error::new(Kind::RepeatedVersion(
                pair[0].version().clone(),
                pair[0].script().to_owned(),
                pair[1].script().to_owned(),
            )));
        }
    }

    Ok(catalog)
}

/// Parse `<prefix><version>__<description>` into version and description.
/// The split is on the first `__`; the description is optional and has its
/// underscores replaced by spaces.
pub(crate) fn parse_script_name(stem: &str, prefix: &str) -> Result<(Version, String), Error> {
    let rest = stem
        .strip_prefix(prefix)
        .ok_or_else(|| Error::new(Kind::InvalidName(stem.to_owned())))?;

    let (version_text, description) = match rest.split_once("__") {
        Some((version_text, description)) => (version_text, description.replace('_', " ")),
        None => (rest, String::new()),
    };

    let version = Version::parse(version_text)?;
    if version.is_empty() || version.is_latest() {
        return Err(Error::new(Kind::InvalidVersion(version_text.to_owned())));
    }

    Ok((version, description))
}

fn read_script(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| Error::new(Kind::ResolveFailed(path.to_path_buf(), err)))?;
    Ok(raw.replace("\r\n", "\n"))
}

// SipHasher13 is used instead of DefaultHasher because the standard library
// does not guarantee DefaultHasher's algorithm across releases, and the
// checksum must stay comparable with rows recorded by earlier builds. The
// ledger column is 32 bits wide, so the hash is truncated.
fn checksum_of(normalized_sql: &str) -> i32 {
    let mut hasher = SipHasher13::new();
    normalized_sql.hash(&mut hasher);
    hasher.finish() as u32 as i32
}

fn placeholder_token_re(config: &Config) -> Result<Regex, Error> {
    Regex::new(&format!(
        "{}([A-Za-z0-9_]+){}",
        regex::escape(&config.placeholder_prefix),
        regex::escape(&config.placeholder_suffix)
    ))
    .map_err(|err| Error::new(Kind::Config(format!("invalid placeholder delimiters: {err}"))))
}

fn substitute_placeholders(
    sql: String,
    script: &str,
    config: &Config,
    token_re: &Regex,
) -> Result<String, Error> {
    let mut substituted = sql;
    for (name, value) in &config.placeholders {
        let token = format!(
            "{}{}{}",
            config.placeholder_prefix, name, config.placeholder_suffix
        );
        substituted = substituted.replace(&token, value);
    }

    if let Some(captures) = token_re.captures(&substituted) {
        return Err(Error::new(Kind::PlaceholderUnresolved {
            name: captures[1].to_owned(),
            script: script.to_owned(),
        }));
    }

    Ok(substituted)
}
