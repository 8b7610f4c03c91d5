use chrono::{DateTime, Utc};
use sqlx::Row;

use formflow_core::domain::series::ProjectId;
use formflow_core::domain::submission::{Submission, SubmissionId, SubmissionStatus};
use formflow_core::domain::workflow::{DocumentTypeId, StageId, UserId, WorkflowId};

use super::{RepositoryError, SubmissionRepository};
use crate::DbPool;

pub struct SqlSubmissionRepository {
    pool: DbPool,
}

impl SqlSubmissionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<SubmissionStatus, RepositoryError> {
    match raw {
        "draft" => Ok(SubmissionStatus::Draft),
        "in_approval" => Ok(SubmissionStatus::InApproval),
        "approved" => Ok(SubmissionStatus::Approved),
        "rejected" => Ok(SubmissionStatus::Rejected),
        "returned" => Ok(SubmissionStatus::Returned),
        other => Err(RepositoryError::Decode(format!("unknown submission status `{other}`"))),
    }
}

pub fn status_as_str(status: SubmissionStatus) -> &'static str {
    match status {
        SubmissionStatus::Draft => "draft",
        SubmissionStatus::InApproval => "in_approval",
        SubmissionStatus::Approved => "approved",
        SubmissionStatus::Rejected => "rejected",
        SubmissionStatus::Returned => "returned",
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp `{raw}`")))
}

fn row_to_submission(row: &sqlx::sqlite::SqliteRow) -> Result<Submission, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let document_type_id: String = row.try_get("document_type_id").map_err(decode)?;
    let project_id: String = row.try_get("project_id").map_err(decode)?;
    let workflow_id: Option<String> = row.try_get("workflow_id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let current_stage_id: Option<String> = row.try_get("current_stage_id").map_err(decode)?;
    let document_number: Option<String> = row.try_get("document_number").map_err(decode)?;
    let row_version: i64 = row.try_get("row_version").map_err(decode)?;
    let created_by: String = row.try_get("created_by").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(Submission {
        id: SubmissionId(id),
        document_type_id: DocumentTypeId(document_type_id),
        project_id: ProjectId(project_id),
        workflow_id: workflow_id.map(WorkflowId),
        status: parse_status(&status)?,
        current_stage_id: current_stage_id.map(StageId),
        document_number,
        version: row_version,
        created_by: UserId(created_by),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

const SELECT_COLUMNS: &str =
    "id, document_type_id, project_id, workflow_id, status, current_stage_id,
     document_number, row_version, created_by, created_at, updated_at";

#[async_trait::async_trait]
impl SubmissionRepository for SqlSubmissionRepository {
    async fn find_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM submission WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_submission(row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, submission: Submission) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO submission (id, document_type_id, project_id, workflow_id, status,
                                     current_stage_id, document_number, row_version, created_by,
                                     created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&submission.id.0)
        .bind(&submission.document_type_id.0)
        .bind(&submission.project_id.0)
        .bind(submission.workflow_id.as_ref().map(|id| id.0.as_str()))
        .bind(status_as_str(submission.status))
        .bind(submission.current_stage_id.as_ref().map(|id| id.0.as_str()))
        .bind(&submission.document_number)
        .bind(submission.version)
        .bind(&submission.created_by.0)
        .bind(submission.created_at.to_rfc3339())
        .bind(submission.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_versioned(
        &self,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let next_version = submission.version + 1;
        let result = sqlx::query(
            "UPDATE submission
             SET status = ?, current_stage_id = ?, document_number = ?, row_version = ?,
                 updated_at = ?
             WHERE id = ? AND row_version = ?",
        )
        .bind(status_as_str(submission.status))
        .bind(submission.current_stage_id.as_ref().map(|id| id.0.as_str()))
        .bind(&submission.document_number)
        .bind(next_version)
        .bind(submission.updated_at.to_rfc3339())
        .bind(&submission.id.0)
        .bind(submission.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict {
                entity: "submission".to_string(),
                id: submission.id.0.clone(),
            });
        }

        Ok(Submission { version: next_version, ..submission })
    }

    async fn list_in_approval(&self) -> Result<Vec<Submission>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM submission
             WHERE status IN ('in_approval', 'returned')
             ORDER BY updated_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_submission).collect()
    }
}
