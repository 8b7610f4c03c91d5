//! Durable sequence counter backing document numbering.
//!
//! Each (series, period) pair owns one row in `series_counter`. Draws run
//! inside a single write transaction so two concurrent callers can never
//! observe the same current value.

use sqlx::Row;

use formflow_core::domain::series::{SeriesCounter, SeriesId};

use crate::repositories::{RepositoryError, SequenceCounterStore};
use crate::DbPool;

pub struct SqlSequenceCounterStore {
    pool: DbPool,
}

impl SqlSequenceCounterStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Reads the counter row without advancing it; used by diagnostics.
    pub async fn current(
        &self,
        series_id: &SeriesId,
        period_key: &str,
    ) -> Result<Option<SeriesCounter>, RepositoryError> {
        let row = sqlx::query(
            "SELECT series_id, period_key, current_number FROM series_counter
             WHERE series_id = ? AND period_key = ?",
        )
        .bind(&series_id.0)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SeriesCounter {
                series_id: SeriesId(row.try_get("series_id").map_err(decode)?),
                period_key: row.try_get("period_key").map_err(decode)?,
                current_number: row.try_get("current_number").map_err(decode)?,
            })
        })
        .transpose()
    }
}

fn decode(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(e.to_string())
}

#[async_trait::async_trait]
impl SequenceCounterStore for SqlSequenceCounterStore {
    async fn next_number(
        &self,
        series_id: &SeriesId,
        period_key: &str,
        sequence_start: i64,
    ) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Seed the row one below the configured start so the first draw
        // lands exactly on `sequence_start`.
        sqlx::query(
            "INSERT INTO series_counter (series_id, period_key, current_number)
             VALUES (?, ?, ?)
             ON CONFLICT(series_id, period_key) DO NOTHING",
        )
        .bind(&series_id.0)
        .bind(period_key)
        .bind(sequence_start - 1)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT current_number FROM series_counter
             WHERE series_id = ? AND period_key = ?",
        )
        .bind(&series_id.0)
        .bind(period_key)
        .fetch_one(&mut *tx)
        .await?;
        let current: i64 = row.try_get("current_number").map_err(decode)?;

        let next = current + 1;
        sqlx::query(
            "UPDATE series_counter SET current_number = ?
             WHERE series_id = ? AND period_key = ?",
        )
        .bind(next)
        .bind(&series_id.0)
        .bind(period_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }
}
