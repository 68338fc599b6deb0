use sqlx::{Connection, Sqlite, SqliteConnection};
use sqlx_changelog::{
    db::{Changelog, ChangelogEntry},
    executor,
    prelude::*,
    Error, DEFAULT_CHANGELOG_TABLE,
};
use std::fs;
use tempfile::TempDir;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0_migration.sql",
        "CREATE TABLE test (id INTEGER, thevalue TEXT);\n-- @UNDO\nDROP TABLE test;\n",
    ),
    (
        "1_migration.sql",
        "SELECT 1;\n-- @UNDO\nDELETE FROM test WHERE id = 1;\n",
    ),
    (
        "2_migration.sql",
        "INSERT INTO test VALUES (2, 'two');\n-- @UNDO\nDELETE FROM test WHERE id = 2;\n",
    ),
];

async fn setup(files: &[(&str, &str)]) -> (TempDir, Migrator<Sqlite>) {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }

    let conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
    let mut migrator = Migrator::<Sqlite>::new(conn, MigratorOptions::new(dir.path()));
    migrator.init().await.unwrap();

    (dir, migrator)
}

async fn applied(migrator: &mut Migrator<Sqlite>) -> Vec<u64> {
    migrator
        .remote_migrations()
        .await
        .unwrap()
        .ids()
        .map(MigrationId::get)
        .collect()
}

async fn table_exists(migrator: &mut Migrator<Sqlite>, name: &str) -> bool {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1")
            .bind(name)
            .fetch_one(migrator.connection())
            .await
            .unwrap();
    count > 0
}

async fn record_remote_only(migrator: &mut Migrator<Sqlite>, id: u64) {
    migrator
        .connection()
        .insert_changelog_entry(
            DEFAULT_CHANGELOG_TABLE,
            &ChangelogEntry {
                id: MigrationId::new(id),
                version: None,
                applied_at: "2021-12-15 16:22:20".into(),
                description: "deleted migration".into(),
            },
        )
        .await
        .unwrap();
}

async fn count_rows(migrator: &mut Migrator<Sqlite>, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(migrator.connection())
        .await
        .unwrap()
}

fn local(migrator: &Migrator<Sqlite>, id: u64) -> Migration {
    migrator
        .local_migrations()
        .unwrap()
        .get(MigrationId::new(id))
        .unwrap()
        .clone()
}

fn ids(summary: &MigrationSummary) -> Vec<u64> {
    summary.migrations.iter().map(|id| id.get()).collect()
}

#[tokio::test]
async fn up_applies_all_pending_in_order() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;

    let summary = migrator.up(&Selection::default(), false).await.unwrap();
    assert_eq!(summary.direction, Direction::Up);
    assert_eq!(ids(&summary), [0, 1, 2]);
    assert_eq!(applied(&mut migrator).await, [0, 1, 2]);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test")
        .fetch_one(migrator.connection())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let again = migrator.up(&Selection::default(), false).await.unwrap();
    assert!(again.is_up_to_date());
    assert_eq!(again.count(), 0);
}

#[tokio::test]
async fn down_reverts_only_the_last_migration() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::default(), false).await.unwrap();

    let summary = migrator.down(&Selection::default(), false).await.unwrap();
    assert_eq!(summary.direction, Direction::Down);
    assert_eq!(ids(&summary), [2]);
    assert_eq!(applied(&mut migrator).await, [0, 1]);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test")
        .fetch_one(migrator.connection())
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn remote_only_migration_blocks_down() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::default(), false).await.unwrap();
    record_remote_only(&mut migrator, 3).await;

    let err = migrator.down(&Selection::to(0), false).await.unwrap_err();
    assert!(
        matches!(err, Error::RemoteOnlyMigrationBlocking { id } if id.get() == 3),
        "{err}"
    );

    assert_eq!(applied(&mut migrator).await, [0, 1, 2, 3]);
    assert!(table_exists(&mut migrator, "test").await);
}

#[tokio::test]
async fn remote_only_migration_can_be_skipped() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::default(), false).await.unwrap();
    record_remote_only(&mut migrator, 3).await;

    let selection = Selection::to(0).remote_only(RemoteOnlyPolicy::Skip);
    let summary = migrator.down(&selection, false).await.unwrap();

    assert_eq!(ids(&summary), [2, 1, 0]);
    assert_eq!(applied(&mut migrator).await, [3]);
    assert!(!table_exists(&mut migrator, "test").await);
}

#[tokio::test]
async fn remote_only_upto_stops_before_it() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::to(1), false).await.unwrap();
    record_remote_only(&mut migrator, 3).await;

    // Applied: 0, 1, 3 (remote-only). Walking down hits 3 first.
    let selection = Selection::to(0).remote_only(RemoteOnlyPolicy::Upto);
    let summary = migrator.down(&selection, false).await.unwrap();

    assert!(summary.is_up_to_date());
    assert_eq!(applied(&mut migrator).await, [0, 1, 3]);
}

#[tokio::test]
async fn up_then_down_restores_previous_state() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;

    migrator.up(&Selection::only(0), false).await.unwrap();
    assert_eq!(applied(&mut migrator).await, [0]);
    assert!(table_exists(&mut migrator, "test").await);

    migrator.down(&Selection::only(0), false).await.unwrap();
    assert!(applied(&mut migrator).await.is_empty());
    assert!(!table_exists(&mut migrator, "test").await);
}

#[tokio::test]
async fn failing_migration_stops_the_run() {
    let (_dir, mut migrator) = setup(&[
        MIGRATIONS[0],
        (
            "1_broken.sql",
            "CREATE TABLE other (id INTEGER);\nSELECT ;\n-- @UNDO\nDROP TABLE other;\n",
        ),
        MIGRATIONS[2],
    ])
    .await;

    let err = migrator.up(&Selection::default(), false).await.unwrap_err();
    assert!(
        matches!(
            &err,
            Error::MigrationExecutionFailed { id, file, .. } if id.get() == 1 && file == "1_broken.sql"
        ),
        "{err}"
    );

    // 0 stays committed, 1 is rolled back as a whole, 2 never runs.
    assert_eq!(applied(&mut migrator).await, [0]);
    assert!(table_exists(&mut migrator, "test").await);
    assert!(!table_exists(&mut migrator, "other").await);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test")
        .fetch_one(migrator.connection())
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn failing_down_script_keeps_changelog_row() {
    let (_dir, mut migrator) = setup(&[
        MIGRATIONS[0],
        ("1_bad-revert.sql", "SELECT 1;\n-- @UNDO\nSELECT ;\n"),
    ])
    .await;
    migrator.up(&Selection::default(), false).await.unwrap();

    let err = migrator.down(&Selection::default(), false).await.unwrap_err();
    assert!(matches!(err, Error::MigrationExecutionFailed { id, .. } if id.get() == 1));
    assert_eq!(applied(&mut migrator).await, [0, 1]);
}

#[tokio::test]
async fn changelog_only_skips_scripts() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;

    let summary = migrator.up(&Selection::default(), true).await.unwrap();
    assert_eq!(ids(&summary), [0, 1, 2]);
    assert_eq!(applied(&mut migrator).await, [0, 1, 2]);
    assert!(!table_exists(&mut migrator, "test").await);

    migrator.down(&Selection::to(0), true).await.unwrap();
    assert!(applied(&mut migrator).await.is_empty());
}

#[tokio::test]
async fn irreversible_migration_cannot_be_reverted() {
    let (_dir, mut migrator) = setup(&[("0_seed.sql", "CREATE TABLE seed (id INTEGER);\n")]).await;
    migrator.up(&Selection::default(), false).await.unwrap();

    let err = migrator.down(&Selection::default(), false).await.unwrap_err();
    assert!(matches!(err, Error::IrreversibleMigration { id, .. } if id.get() == 0));
    assert_eq!(applied(&mut migrator).await, [0]);

    migrator.down(&Selection::default(), true).await.unwrap();
    assert!(applied(&mut migrator).await.is_empty());
    assert!(table_exists(&mut migrator, "seed").await);
}

#[tokio::test]
async fn unknown_target_changes_nothing() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;

    let err = migrator.up(&Selection::to(9), false).await.unwrap_err();
    assert!(matches!(err, Error::UnknownMigrationTarget { id, direction: Direction::Up } if id.get() == 9));
    assert!(applied(&mut migrator).await.is_empty());
}

#[tokio::test]
async fn status_lists_local_and_remote() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::only(1), false).await.unwrap();
    record_remote_only(&mut migrator, 5).await;

    let status = migrator.status().await.unwrap();

    let summary = status
        .iter()
        .map(|row| (row.id.get(), row.status))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        [
            (0, MigrationStatus::Pending),
            (1, MigrationStatus::Migrated),
            (2, MigrationStatus::Pending),
            (5, MigrationStatus::RemoteOnly),
        ]
    );

    assert!(status[0].applied_at.is_none());
    assert!(status[1].applied_at.is_some());
    assert_eq!(status[1].description, "migration");
    assert_eq!(status[3].description, "deleted migration");
}

#[tokio::test]
async fn missing_changelog_table_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(MIGRATIONS[0].0), MIGRATIONS[0].1).unwrap();

    let conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
    let mut migrator = Migrator::<Sqlite>::new(
        conn,
        MigratorOptions::new(dir.path()).with_changelog_table("missing_changelog"),
    );

    let err = migrator.up(&Selection::default(), false).await.unwrap_err();
    assert!(
        matches!(&err, Error::ChangelogUnavailable { table, .. } if table == "missing_changelog"),
        "{err}"
    );
}

#[tokio::test]
async fn empty_changelog_is_not_an_error() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;

    let plan = migrator
        .plan(Direction::Down, &Selection::default())
        .await
        .unwrap();
    assert!(plan.is_empty());

    let summary = migrator.down(&Selection::default(), false).await.unwrap();
    assert!(summary.is_up_to_date());
}

#[tokio::test]
async fn duplicate_changelog_row_rolls_back_the_script() {
    let (_dir, mut migrator) = setup(&MIGRATIONS[..1]).await;
    migrator.up(&Selection::default(), true).await.unwrap();

    let migration = local(&migrator, 0);
    let err = executor::apply_up::<Sqlite>(
        migrator.connection(),
        DEFAULT_CHANGELOG_TABLE,
        &migration,
        false,
    )
    .await
    .unwrap_err();

    assert!(
        matches!(&err, Error::ChangelogWriteFailed { id, .. } if id.get() == 0),
        "{err}"
    );
    assert!(!table_exists(&mut migrator, "test").await);
    assert_eq!(applied(&mut migrator).await, [0]);
}

#[tokio::test]
async fn missing_changelog_row_rolls_back_the_down_script() {
    let (_dir, mut migrator) = setup(MIGRATIONS).await;
    migrator.up(&Selection::default(), false).await.unwrap();

    let deleted = migrator
        .connection()
        .delete_changelog_entry(DEFAULT_CHANGELOG_TABLE, MigrationId::new(2))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let migration = local(&migrator, 2);
    let err = executor::apply_down::<Sqlite>(
        migrator.connection(),
        DEFAULT_CHANGELOG_TABLE,
        &migration,
        false,
    )
    .await
    .unwrap_err();

    assert!(
        matches!(
            &err,
            Error::ChangelogWriteFailed { id, source: sqlx::Error::RowNotFound } if id.get() == 2
        ),
        "{err}"
    );
    assert_eq!(count_rows(&mut migrator, "test").await, 1);
    assert_eq!(applied(&mut migrator).await, [0, 1]);
}

#[tokio::test]
async fn failing_commit_names_the_migration() {
    // Deferred foreign keys are only checked on COMMIT.
    let (_dir, mut migrator) = setup(&[
        (
            "0_tables.sql",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);\n\
             CREATE TABLE child (parent_id INTEGER REFERENCES parent (id) DEFERRABLE INITIALLY DEFERRED);\n\
             -- @UNDO\n\
             DROP TABLE child;\nDROP TABLE parent;\n",
        ),
        (
            "1_orphan.sql",
            "INSERT INTO child VALUES (42);\n-- @UNDO\nDELETE FROM child;\n",
        ),
    ])
    .await;

    let err = migrator.up(&Selection::default(), false).await.unwrap_err();
    assert!(
        matches!(
            &err,
            Error::MigrationExecutionFailed { id, file, .. } if id.get() == 1 && file == "1_orphan.sql"
        ),
        "{err}"
    );

    assert_eq!(applied(&mut migrator).await, [0]);
    assert_eq!(count_rows(&mut migrator, "child").await, 0);
}
