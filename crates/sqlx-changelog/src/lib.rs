//! # SQLx Changelog
//!
//! SQL migrations driven by a changelog table, using [SQLx](https://github.com/launchbadge/sqlx).
//!
//! Migrations are plain SQL files named `{id}_{description}.sql`. The up script
//! comes first, followed by an optional `-- @UNDO` line and the down script.
//! Applied migrations are recorded in a changelog table, one row per migration.
//!
#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::unreadable_literal,
    clippy::doc_markdown,
    clippy::module_name_repetitions
)]

use sqlx::{ConnectOptions, Connection, Database, Pool};
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

pub mod db;
pub mod error;
pub mod executor;
pub mod migration;
pub mod reconcile;
pub mod source;
pub mod status;

pub use db::Changelog;
pub use error::Error;
pub use executor::MigrationSummary;
pub use migration::{Migration, MigrationId, MigrationSet, MigrationStatus};
pub use reconcile::{Direction, RemoteOnlyPolicy, Selection};
pub use status::StatusRow;

#[cfg(feature = "cli")]
pub mod cli;

/// The default changelog table used by all migrators.
pub const DEFAULT_CHANGELOG_TABLE: &str = "changelog";

/// The default directory containing the migration files.
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Commonly used types and functions.
pub mod prelude {
    pub use super::Direction;
    pub use super::Migration;
    pub use super::MigrationId;
    pub use super::MigrationStatus;
    pub use super::MigrationSummary;
    pub use super::Migrator;
    pub use super::MigratorOptions;
    pub use super::RemoteOnlyPolicy;
    pub use super::Selection;
}

/// Options for a [`Migrator`].
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    /// The changelog table name.
    ///
    /// The table name is used as-is in queries, **DO NOT USE UNTRUSTED STRINGS**.
    pub changelog_table: Cow<'static, str>,
    /// Directory of the migration files.
    pub migrations_dir: PathBuf,
}

impl MigratorOptions {
    #[must_use]
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_changelog_table(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.changelog_table = name.into();
        self
    }
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            changelog_table: Cow::Borrowed(DEFAULT_CHANGELOG_TABLE),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
        }
    }
}

/// A Migrator that applies and reverts the migrations of one directory
/// against one database.
///
/// Local files and the changelog are read again on every call.
///
/// # Example
///
/// ```no_run
/// use sqlx::{Connection, SqliteConnection};
/// use sqlx_changelog::prelude::*;
///
/// async fn migrate() -> Result<(), sqlx_changelog::Error> {
///     let conn = SqliteConnection::connect("sqlite://app.db").await?;
///     let mut migrator = Migrator::<sqlx::Sqlite>::new(conn, MigratorOptions::new("migrations"));
///
///     migrator.init().await?;
///
///     // Apply everything that is pending.
///     let summary = migrator.up(&Selection::default(), false).await?;
///     println!("applied {} migrations", summary.count());
///
///     // Revert the last one.
///     migrator.down(&Selection::default(), false).await?;
///
///     Ok(())
/// }
/// ```
#[must_use]
pub struct Migrator<Db>
where
    Db: Database,
    Db::Connection: Changelog,
{
    options: MigratorOptions,
    conn: Db::Connection,
}

impl<Db> Migrator<Db>
where
    Db: Database,
    Db::Connection: Changelog + Connection<Database = Db>,
{
    /// Create a new migrator that uses an existing connection.
    pub fn new(conn: Db::Connection, options: MigratorOptions) -> Self {
        Self { options, conn }
    }

    /// Connect to a database given in the URL.
    ///
    /// If this method is used, `SQLx` statement logging is explicitly disabled.
    /// To customize the connection, use [`Migrator::connect_with`].
    ///
    /// # Errors
    ///
    /// An error is returned on connection failure.
    pub async fn connect(url: &str, options: MigratorOptions) -> Result<Self, sqlx::Error> {
        let opts: <Db::Connection as Connection>::Options = url.parse()?;
        let opts = opts.disable_statement_logging();

        Self::connect_with(&opts, options).await
    }

    /// Connect to a database with the given connection options.
    ///
    /// # Errors
    ///
    /// An error is returned on connection failure.
    pub async fn connect_with(
        connect_options: &<Db::Connection as Connection>::Options,
        options: MigratorOptions,
    ) -> Result<Self, sqlx::Error> {
        let conn = Db::Connection::connect_with(connect_options).await?;
        Ok(Self::new(conn, options))
    }

    /// Use a connection from an existing connection pool.
    ///
    /// **note**: A connection will be detached from the pool.
    ///
    /// # Errors
    ///
    /// An error is returned on connection failure.
    pub async fn connect_with_pool(
        pool: &Pool<Db>,
        options: MigratorOptions,
    ) -> Result<Self, sqlx::Error> {
        let conn = pool.acquire().await?;
        Ok(Self::new(conn.detach(), options))
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    /// The underlying connection.
    pub fn connection(&mut self) -> &mut Db::Connection {
        &mut self.conn
    }

    fn table(&self) -> &str {
        &self.options.changelog_table
    }

    fn migrations_dir(&self) -> &Path {
        &self.options.migrations_dir
    }

    /// Create the changelog table if it does not exist.
    ///
    /// # Errors
    ///
    /// Connection and database errors are returned.
    pub async fn init(&mut self) -> Result<(), Error> {
        let table = self.options.changelog_table.clone();
        self.conn.ensure_changelog_table(&table).await?;
        tracing::info!(table = %table, "changelog table ready");
        Ok(())
    }

    /// List all migration files.
    ///
    /// # Errors
    ///
    /// See [`source::load_local`].
    pub fn local_migrations(&self) -> Result<MigrationSet, Error> {
        source::load_local(self.migrations_dir())
    }

    /// List all migrations recorded in the changelog.
    ///
    /// # Errors
    ///
    /// See [`source::load_local`] and [`source::load_remote`].
    pub async fn remote_migrations(&mut self) -> Result<MigrationSet, Error> {
        Ok(self.load().await?.1)
    }

    /// List all local and applied migrations.
    ///
    /// # Errors
    ///
    /// See [`source::load_local`] and [`source::load_remote`].
    pub async fn merged_migrations(&mut self) -> Result<MigrationSet, Error> {
        let (local, remote) = self.load().await?;
        Ok(source::merge(&local, &remote))
    }

    /// Status rows of all local and applied migrations.
    ///
    /// # Errors
    ///
    /// Errors are returned when the migrations cannot be loaded.
    pub async fn status(&mut self) -> Result<Vec<StatusRow>, Error> {
        Ok(status::render(&self.merged_migrations().await?))
    }

    /// The migrations that would be run, without running them.
    ///
    /// # Errors
    ///
    /// See [`reconcile::plan`].
    pub async fn plan(
        &mut self,
        direction: Direction,
        selection: &Selection,
    ) -> Result<Vec<Migration>, Error> {
        let (local, remote) = self.load().await?;
        reconcile::plan(&local, &remote, direction, selection)
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Selection errors are returned before any database change.
    /// Whenever a migration fails, it is rolled back and an error is returned,
    /// migrations applied before it stay applied.
    pub async fn up(
        &mut self,
        selection: &Selection,
        changelog_only: bool,
    ) -> Result<MigrationSummary, Error> {
        self.run(Direction::Up, selection, changelog_only).await
    }

    /// Revert applied migrations, only the last one unless `only` or `to` is set.
    ///
    /// # Errors
    ///
    /// Same as [`Migrator::up`].
    pub async fn down(
        &mut self,
        selection: &Selection,
        changelog_only: bool,
    ) -> Result<MigrationSummary, Error> {
        self.run(Direction::Down, selection, changelog_only).await
    }

    /// Plan and run migrations in the given direction.
    ///
    /// # Errors
    ///
    /// Same as [`Migrator::up`].
    pub async fn run(
        &mut self,
        direction: Direction,
        selection: &Selection,
        changelog_only: bool,
    ) -> Result<MigrationSummary, Error> {
        let to_run = self.plan(direction, selection).await?;

        if to_run.is_empty() {
            tracing::info!(%direction, "no migrations to run");
        }

        let table = self.options.changelog_table.clone();

        executor::execute::<Db>(&mut self.conn, &table, direction, &to_run, changelog_only).await
    }

    async fn load(&mut self) -> Result<(MigrationSet, MigrationSet), Error> {
        let local = source::load_local(self.migrations_dir())?;
        let table = self.table().to_string();
        let remote = source::load_remote(&mut self.conn, &table, &local).await?;
        Ok((local, remote))
    }
}
