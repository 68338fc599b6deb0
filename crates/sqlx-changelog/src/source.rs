//! Loading migrations from the migrations directory and the changelog table.

use itertools::{EitherOrBoth, Itertools};
use std::{fs, io, path::Path};

use crate::{
    db::{Changelog, ChangelogEntry},
    migration::{Migration, MigrationSet},
    Error,
};

/// Read all migration files in the given directory.
///
/// Hidden entries and directories are skipped, every other file
/// must be a valid migration file.
///
/// # Errors
///
/// IO errors, malformed file names and duplicate ids are returned.
pub fn load_local(migrations_dir: &Path) -> Result<MigrationSet, Error> {
    let io_err = |source: io::Error| Error::Io {
        path: migrations_dir.to_path_buf(),
        source,
    };

    let mut migrations = MigrationSet::new();

    for entry in fs::read_dir(migrations_dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();

        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        if file_name.starts_with('.') || !path.is_file() {
            continue;
        }

        let content = fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        let migration = Migration::from_file(&file_name, &content)?;

        if let Some(existing) = migrations.get(migration.id()) {
            return Err(Error::MalformedMigrationFile {
                file: file_name.into_owned(),
                reason: format!(
                    "id {} is already used by `{}`",
                    migration.id(),
                    existing.display_file()
                )
                .into(),
            });
        }

        tracing::trace!(id = %migration.id(), file = %file_name, "found migration file");
        migrations.insert(migration);
    }

    Ok(migrations)
}

/// Read the changelog table and match every row with its local file.
///
/// Rows are matched by id, rows without a local file are remote-only.
///
/// # Errors
///
/// [`Error::ChangelogUnavailable`] if the table cannot be queried.
pub async fn load_remote<C>(
    conn: &mut C,
    table_name: &str,
    local: &MigrationSet,
) -> Result<MigrationSet, Error>
where
    C: Changelog,
{
    let entries = conn
        .list_changelog(table_name)
        .await
        .map_err(|source| Error::ChangelogUnavailable {
            table: table_name.to_string(),
            source,
        })?;

    Ok(from_changelog(entries, local))
}

/// Build the remote migration set from changelog rows.
#[must_use]
pub fn from_changelog(
    entries: impl IntoIterator<Item = ChangelogEntry>,
    local: &MigrationSet,
) -> MigrationSet {
    entries
        .into_iter()
        .map(|entry| {
            let local_mig = local.get(entry.id);

            match local_mig {
                Some(l) if l.description() != entry.description => {
                    tracing::warn!(
                        id = %entry.id,
                        changelog = %entry.description,
                        local = %l.description(),
                        "description in the changelog differs from the local file"
                    );
                }
                None => {
                    tracing::debug!(id = %entry.id, "migration only exists in the changelog");
                }
                _ => {}
            }

            Migration::from_changelog(entry, local_mig)
        })
        .collect()
}

/// All known migrations, remote entries replacing local ones with the same id.
///
/// This is only meant for displaying the status.
#[must_use]
pub fn merge(local: &MigrationSet, remote: &MigrationSet) -> MigrationSet {
    local
        .iter()
        .merge_join_by(remote.iter(), |l, r| l.id().cmp(&r.id()))
        .map(|pair| match pair {
            EitherOrBoth::Both(_, remote) | EitherOrBoth::Right(remote) => remote.clone(),
            EitherOrBoth::Left(local) => local.clone(),
        })
        .collect()
}
