use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Executor;

use formflow_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Session settings applied to every pooled connection. SQLite ships with
/// foreign keys off; WAL keeps readers from stalling the single writer.
const SESSION_PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "PRAGMA journal_mode = WAL",
    "PRAGMA busy_timeout = 5000",
];

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Builds the pool from the loaded application configuration.
pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                for pragma in SESSION_PRAGMAS {
                    (&mut *conn).execute(*pragma).await?;
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use formflow_core::config::DatabaseConfig;
    use sqlx::Row;

    use super::connect_from_config;

    #[tokio::test]
    async fn pool_from_config_applies_session_pragmas() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        };
        let pool = connect_from_config(&config).await.expect("connect");

        let row = sqlx::query("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(row.get::<i64, _>(0), 1);
    }
}
