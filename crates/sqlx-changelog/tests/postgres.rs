#![cfg(feature = "postgres")]

use sqlx::{Connection, PgConnection};
use sqlx_changelog::db::Changelog;

async fn client_min_messages(conn: &mut PgConnection) -> String {
    sqlx::query_scalar("SHOW client_min_messages")
        .fetch_one(conn)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server in DATABASE_URL"]
async fn ensure_changelog_table_keeps_session_settings() {
    let url = std::env::var("DATABASE_URL").unwrap();
    let mut conn = PgConnection::connect(&url).await.unwrap();

    let before = client_min_messages(&mut conn).await;

    conn.ensure_changelog_table("changelog_settings_check")
        .await
        .unwrap();
    conn.ensure_changelog_table("changelog_settings_check")
        .await
        .unwrap();

    assert_eq!(client_min_messages(&mut conn).await, before);

    sqlx::query("DROP TABLE changelog_settings_check")
        .execute(&mut conn)
        .await
        .unwrap();
}
