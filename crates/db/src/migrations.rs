use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "workflow",
        "stage",
        "stage_assignee",
        "delegation",
        "submission",
        "approval_history",
        "document_series",
        "series_counter",
        "number_audit",
        "blocking_rule",
        "blocking_evaluation_log",
    ];

    async fn table_count(pool: &sqlx::SqlitePool, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("check table")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        for table in MANAGED_TABLES {
            assert_eq!(table_count(&pool, table).await, 0, "table `{table}` should be dropped");
        }
    }

    #[tokio::test]
    async fn duplicate_numbers_per_series_are_rejected_by_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let insert = "INSERT INTO number_audit (id, submission_id, series_id, number, template,
                      sequence_value, period_key, trigger_event, actor, generated_at)
                      VALUES (?, ?, 'ser-1', 'PRJ-2025-001', 't', 1, '2025', 'submit', 'u', '2025-01-01')";

        sqlx::query(insert).bind("na-1").bind("sub-1").execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert).bind("na-2").bind("sub-2").execute(&pool).await;
        assert!(duplicate.is_err(), "unique (series_id, number) index must reject duplicates");
    }
}
