use std::{borrow::Cow, io, path::PathBuf};

use thiserror::Error;

use crate::{migration::MigrationId, reconcile::Direction};

/// An aggregated error type for the [`Migrator`](crate::Migrator).
///
/// Everything up to and including [`Error::RemoteOnlyMigrationBlocking`] is
/// raised before the database is touched. The execution variants are only
/// returned after the transaction of the failing migration was rolled back.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Database(sqlx::Error),
    #[error("failed to read {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed migration file `{file}`: {reason}")]
    MalformedMigrationFile {
        file: String,
        reason: Cow<'static, str>,
    },
    #[error("changelog table `{table}` is unavailable: {source}")]
    ChangelogUnavailable { table: String, source: sqlx::Error },
    #[error("migration {id} is not available for {direction}")]
    UnknownMigrationTarget { id: MigrationId, direction: Direction },
    #[error("migration {id} only exists in the changelog and cannot be targeted")]
    RemoteOnlyTargetRejected { id: MigrationId },
    #[error(
        "migration {id} only exists in the changelog and has no script to run \
         (use `--remote-only skip` or `--remote-only upto`)"
    )]
    RemoteOnlyMigrationBlocking { id: MigrationId },
    #[error("migration {id} ({file}) has no down script")]
    IrreversibleMigration { id: MigrationId, file: String },
    #[error("error executing migration {id} ({file}): {source}")]
    MigrationExecutionFailed {
        id: MigrationId,
        file: String,
        source: sqlx::Error,
    },
    #[error("error updating the changelog for migration {id}: {source}")]
    ChangelogWriteFailed { id: MigrationId, source: sqlx::Error },
    #[error("failed to format the applied timestamp: {0}")]
    Timestamp(time::error::Format),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

impl From<time::error::Format> for Error {
    fn from(err: time::error::Format) -> Self {
        Self::Timestamp(err)
    }
}
