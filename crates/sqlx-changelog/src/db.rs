//! Database-specific items.

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

use async_trait::async_trait;
use sqlx::Connection;

use crate::migration::MigrationId;

/// A row of the changelog table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub id: MigrationId,
    pub version: Option<String>,
    pub applied_at: String,
    pub description: String,
}

/// Changelog bookkeeping for a database connection.
///
/// The table name is used as-is in queries, **DO NOT USE UNTRUSTED STRINGS**.
///
/// No locking is done, running multiple migrators against the same
/// changelog table at the same time is not supported.
#[async_trait(?Send)]
pub trait Changelog: Connection {
    /// Create the changelog table if it does not exist yet.
    async fn ensure_changelog_table(&mut self, table_name: &str) -> Result<(), sqlx::Error>;

    /// Return all changelog rows ordered by id.
    async fn list_changelog(
        &mut self,
        table_name: &str,
    ) -> Result<Vec<ChangelogEntry>, sqlx::Error>;

    /// Execute a script that may contain multiple statements.
    async fn run_script(&mut self, script: &str) -> Result<(), sqlx::Error>;

    async fn insert_changelog_entry(
        &mut self,
        table_name: &str,
        entry: &ChangelogEntry,
    ) -> Result<(), sqlx::Error>;

    /// Delete the row of the given migration, returning the number of deleted rows.
    async fn delete_changelog_entry(
        &mut self,
        table_name: &str,
        id: MigrationId,
    ) -> Result<u64, sqlx::Error>;
}

/// Ids are stored as `BIGINT`.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn encode_id(id: MigrationId) -> Result<i64, sqlx::Error> {
    i64::try_from(id.get()).map_err(|err| sqlx::Error::Encode(Box::new(err)))
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
fn decode_id(id: i64) -> Result<MigrationId, sqlx::Error> {
    u64::try_from(id)
        .map(MigrationId::new)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}
