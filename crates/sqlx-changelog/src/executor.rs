//! Applying and reverting single migrations.
//!
//! Every migration runs in its own transaction together with its changelog
//! update. A failure rolls back that migration only, migrations committed
//! before it stay applied.

use sqlx::{Connection, Database};
use std::time::Instant;
use time::{macros::format_description, OffsetDateTime};

use crate::{
    db::{Changelog, ChangelogEntry},
    migration::{Migration, MigrationId},
    reconcile::Direction,
    Error,
};

/// Summary of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub direction: Direction,
    /// Migrations that were applied or reverted, in execution order.
    pub migrations: Vec<MigrationId>,
}

impl MigrationSummary {
    #[must_use]
    pub fn count(&self) -> usize {
        self.migrations.len()
    }

    /// Whether nothing had to be done.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Run the given migrations one by one, stopping at the first failure.
///
/// # Errors
///
/// The error of the first failing migration is returned.
pub async fn execute<Db>(
    conn: &mut Db::Connection,
    table_name: &str,
    direction: Direction,
    migrations: &[Migration],
    changelog_only: bool,
) -> Result<MigrationSummary, Error>
where
    Db: Database,
    Db::Connection: Changelog + Connection<Database = Db>,
{
    let mut summary = MigrationSummary {
        direction,
        migrations: Vec::with_capacity(migrations.len()),
    };

    for mig in migrations {
        match direction {
            Direction::Up => apply_up::<Db>(conn, table_name, mig, changelog_only).await?,
            Direction::Down => apply_down::<Db>(conn, table_name, mig, changelog_only).await?,
        }
        summary.migrations.push(mig.id());
    }

    Ok(summary)
}

/// Run the up script of a migration and record it in the changelog.
///
/// With `changelog_only` the script is skipped and only the changelog is updated.
///
/// # Errors
///
/// Remote-only migrations are rejected, script and changelog errors are
/// returned after the transaction was rolled back.
pub async fn apply_up<Db>(
    conn: &mut Db::Connection,
    table_name: &str,
    migration: &Migration,
    changelog_only: bool,
) -> Result<(), Error>
where
    Db: Database,
    Db::Connection: Changelog + Connection<Database = Db>,
{
    let script = runnable_script(migration, Direction::Up, changelog_only)?;

    let entry = ChangelogEntry {
        id: migration.id(),
        version: migration.version().map(str::to_string),
        applied_at: now()?,
        description: migration.description().to_string(),
    };

    let start = Instant::now();

    tracing::info!(
        id = %migration.id(),
        description = migration.description(),
        changelog_only,
        "applying migration"
    );

    let mut tx = conn
        .begin()
        .await
        .map_err(|source| execution_failed(migration, source))?;

    if let Some(script) = script {
        let result = tx.run_script(script).await;
        if let Err(source) = result {
            rollback(tx, migration.id()).await;
            return Err(execution_failed(migration, source));
        }
    }

    let inserted = tx.insert_changelog_entry(table_name, &entry).await;
    if let Err(source) = inserted {
        rollback(tx, migration.id()).await;
        return Err(Error::ChangelogWriteFailed {
            id: migration.id(),
            source,
        });
    }

    tx.commit()
        .await
        .map_err(|source| execution_failed(migration, source))?;

    tracing::info!(
        id = %migration.id(),
        description = migration.description(),
        execution_time = %humantime::Duration::from(start.elapsed()),
        "migration applied"
    );

    Ok(())
}

/// Run the down script of a migration and remove it from the changelog.
///
/// # Errors
///
/// Same as [`apply_up`], and a missing changelog row is a
/// [`Error::ChangelogWriteFailed`].
pub async fn apply_down<Db>(
    conn: &mut Db::Connection,
    table_name: &str,
    migration: &Migration,
    changelog_only: bool,
) -> Result<(), Error>
where
    Db: Database,
    Db::Connection: Changelog + Connection<Database = Db>,
{
    let script = runnable_script(migration, Direction::Down, changelog_only)?;

    let start = Instant::now();

    tracing::info!(
        id = %migration.id(),
        description = migration.description(),
        changelog_only,
        "reverting migration"
    );

    let mut tx = conn
        .begin()
        .await
        .map_err(|source| execution_failed(migration, source))?;

    if let Some(script) = script {
        let result = tx.run_script(script).await;
        if let Err(source) = result {
            rollback(tx, migration.id()).await;
            return Err(execution_failed(migration, source));
        }
    }

    let deleted = tx.delete_changelog_entry(table_name, migration.id()).await;
    match deleted {
        Ok(0) => {
            rollback(tx, migration.id()).await;
            return Err(Error::ChangelogWriteFailed {
                id: migration.id(),
                source: sqlx::Error::RowNotFound,
            });
        }
        Ok(_) => {}
        Err(source) => {
            rollback(tx, migration.id()).await;
            return Err(Error::ChangelogWriteFailed {
                id: migration.id(),
                source,
            });
        }
    }

    tx.commit()
        .await
        .map_err(|source| execution_failed(migration, source))?;

    tracing::info!(
        id = %migration.id(),
        description = migration.description(),
        execution_time = %humantime::Duration::from(start.elapsed()),
        "migration reverted"
    );

    Ok(())
}

/// The script that has to be sent to the database, if any.
fn runnable_script(
    migration: &Migration,
    direction: Direction,
    changelog_only: bool,
) -> Result<Option<&str>, Error> {
    if migration.is_remote_only() {
        return Err(Error::RemoteOnlyMigrationBlocking { id: migration.id() });
    }

    if changelog_only {
        return Ok(None);
    }

    let script = match direction {
        Direction::Up => migration.up_script(),
        Direction::Down => Some(migration.down_script().ok_or_else(|| {
            Error::IrreversibleMigration {
                id: migration.id(),
                file: migration.display_file(),
            }
        })?),
    };

    Ok(script.filter(|s| !s.trim().is_empty()))
}

/// Script, `BEGIN` and `COMMIT` failures all belong to the migration.
fn execution_failed(migration: &Migration, source: sqlx::Error) -> Error {
    Error::MigrationExecutionFailed {
        id: migration.id(),
        file: migration.display_file(),
        source,
    }
}

async fn rollback<Db: Database>(tx: sqlx::Transaction<'_, Db>, id: MigrationId) {
    if let Err(error) = tx.rollback().await {
        tracing::error!(%id, %error, "failed to roll back migration");
    }
}

fn now() -> Result<String, Error> {
    Ok(OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))?)
}
