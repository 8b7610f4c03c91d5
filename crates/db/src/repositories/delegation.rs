use chrono::{DateTime, Utc};
use sqlx::Row;

use formflow_core::domain::delegation::{Delegation, DelegationId, DelegationScope};
use formflow_core::domain::submission::SubmissionId;
use formflow_core::domain::workflow::{UserId, WorkflowId};

use super::{DelegationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDelegationRepository {
    pool: DbPool,
}

impl SqlDelegationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn scope_columns(scope: &DelegationScope) -> (&'static str, Option<&str>) {
    match scope {
        DelegationScope::Global => ("global", None),
        DelegationScope::Workflow(id) => ("workflow", Some(id.0.as_str())),
        DelegationScope::Document(id) => ("document", Some(id.0.as_str())),
    }
}

fn parse_scope(
    scope_type: &str,
    scope_id: Option<String>,
) -> Result<DelegationScope, RepositoryError> {
    match (scope_type, scope_id) {
        ("global", _) => Ok(DelegationScope::Global),
        ("workflow", Some(id)) => Ok(DelegationScope::Workflow(WorkflowId(id))),
        ("document", Some(id)) => Ok(DelegationScope::Document(SubmissionId(id))),
        (other, _) => {
            Err(RepositoryError::Decode(format!("invalid delegation scope `{other}` or missing id")))
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp `{raw}`")))
}

fn row_to_delegation(row: &sqlx::sqlite::SqliteRow) -> Result<Delegation, RepositoryError> {
    let seq: i64 = row.try_get("seq").map_err(decode)?;
    let id: String = row.try_get("id").map_err(decode)?;
    let from_user: String = row.try_get("from_user").map_err(decode)?;
    let to_user: String = row.try_get("to_user").map_err(decode)?;
    let scope_type: String = row.try_get("scope_type").map_err(decode)?;
    let scope_id: Option<String> = row.try_get("scope_id").map_err(decode)?;
    let start_date: String = row.try_get("start_date").map_err(decode)?;
    let end_date: String = row.try_get("end_date").map_err(decode)?;
    let active: bool = row.try_get("active").map_err(decode)?;
    let deleted: bool = row.try_get("deleted").map_err(decode)?;

    Ok(Delegation {
        id: DelegationId(id),
        seq,
        from_user: UserId(from_user),
        to_user: UserId(to_user),
        scope: parse_scope(&scope_type, scope_id)?,
        start_date: parse_timestamp(&start_date)?,
        end_date: parse_timestamp(&end_date)?,
        active,
        deleted,
    })
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[async_trait::async_trait]
impl DelegationRepository for SqlDelegationRepository {
    async fn list_for_user(&self, from_user: &UserId) -> Result<Vec<Delegation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, id, from_user, to_user, scope_type, scope_id, start_date, end_date,
                    active, deleted
             FROM delegation WHERE from_user = ? ORDER BY seq ASC",
        )
        .bind(&from_user.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delegation).collect()
    }

    async fn save(&self, delegation: Delegation) -> Result<Delegation, RepositoryError> {
        let (scope_type, scope_id) = scope_columns(&delegation.scope);

        let result = sqlx::query(
            "INSERT INTO delegation (id, from_user, to_user, scope_type, scope_id, start_date,
                                     end_date, active, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.from_user.0)
        .bind(&delegation.to_user.0)
        .bind(scope_type)
        .bind(scope_id)
        .bind(delegation.start_date.to_rfc3339())
        .bind(delegation.end_date.to_rfc3339())
        .bind(delegation.active)
        .bind(delegation.deleted)
        .execute(&self.pool)
        .await?;

        Ok(Delegation { seq: result.last_insert_rowid(), ..delegation })
    }
}
