use async_trait::async_trait;
use sqlx::{query, query_as, raw_sql, Connection, PgConnection};

use super::ChangelogEntry;
use crate::migration::MigrationId;

#[async_trait(?Send)]
impl super::Changelog for PgConnection {
    async fn ensure_changelog_table(&mut self, table_name: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.begin().await?;

        // Keep notices about an already existing table out of the logs,
        // for this transaction only.
        query("SET LOCAL client_min_messages TO WARNING")
            .execute(&mut *tx)
            .await?;

        query(&format!(
            r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGINT PRIMARY KEY,
                    version TEXT,
                    applied_at TEXT NOT NULL,
                    description TEXT NOT NULL
                );
                "#,
            table_name
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    async fn list_changelog(
        &mut self,
        table_name: &str,
    ) -> Result<Vec<ChangelogEntry>, sqlx::Error> {
        let rows: Vec<(i64, Option<String>, String, String)> = query_as(&format!(
            r#"
            SELECT
                id,
                version,
                applied_at,
                description
            FROM
                {}
            ORDER BY id
            "#,
            table_name
        ))
        .fetch_all(self)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<_, sqlx::Error> {
                Ok(ChangelogEntry {
                    id: super::decode_id(row.0)?,
                    version: row.1,
                    applied_at: row.2,
                    description: row.3,
                })
            })
            .collect()
    }

    async fn run_script(&mut self, script: &str) -> Result<(), sqlx::Error> {
        raw_sql(script).execute(self).await?;
        Ok(())
    }

    async fn insert_changelog_entry(
        &mut self,
        table_name: &str,
        entry: &ChangelogEntry,
    ) -> Result<(), sqlx::Error> {
        query(&format!(
            r#"
                INSERT INTO {} ( id, version, applied_at, description )
                VALUES ( $1, $2, $3, $4 )
            "#,
            table_name
        ))
        .bind(super::encode_id(entry.id)?)
        .bind(entry.version.clone())
        .bind(entry.applied_at.clone())
        .bind(entry.description.clone())
        .execute(self)
        .await?;

        Ok(())
    }

    async fn delete_changelog_entry(
        &mut self,
        table_name: &str,
        id: MigrationId,
    ) -> Result<u64, sqlx::Error> {
        let result = query(&format!(r#"DELETE FROM {} WHERE id = $1"#, table_name))
            .bind(super::encode_id(id)?)
            .execute(self)
            .await?;

        Ok(result.rows_affected())
    }
}
