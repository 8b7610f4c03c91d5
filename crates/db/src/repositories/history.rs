use chrono::{DateTime, Utc};
use sqlx::Row;

use formflow_core::domain::delegation::DelegationId;
use formflow_core::domain::history::{ApprovalAction, ApprovalHistory, HistoryId};
use formflow_core::domain::submission::SubmissionId;
use formflow_core::domain::workflow::{StageId, UserId};

use super::{HistoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHistoryRepository {
    pool: DbPool,
}

impl SqlHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_action(raw: &str) -> Result<ApprovalAction, RepositoryError> {
    match raw {
        "approved" => Ok(ApprovalAction::Approved),
        "rejected" => Ok(ApprovalAction::Rejected),
        "returned" => Ok(ApprovalAction::Returned),
        other => Err(RepositoryError::Decode(format!("unknown approval action `{other}`"))),
    }
}

pub fn action_as_str(action: ApprovalAction) -> &'static str {
    match action {
        ApprovalAction::Approved => "approved",
        ApprovalAction::Rejected => "rejected",
        ApprovalAction::Returned => "returned",
    }
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalHistory, RepositoryError> {
    let seq: i64 = row.try_get("seq").map_err(decode)?;
    let id: String = row.try_get("id").map_err(decode)?;
    let submission_id: String = row.try_get("submission_id").map_err(decode)?;
    let stage_id: String = row.try_get("stage_id").map_err(decode)?;
    let action: String = row.try_get("action").map_err(decode)?;
    let acting_user: String = row.try_get("acting_user").map_err(decode)?;
    let original_approver: Option<String> = row.try_get("original_approver").map_err(decode)?;
    let delegation_id: Option<String> = row.try_get("delegation_id").map_err(decode)?;
    let return_target_stage_id: Option<String> =
        row.try_get("return_target_stage_id").map_err(decode)?;
    let comments: Option<String> = row.try_get("comments").map_err(decode)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(decode)?;
    let hidden: bool = row.try_get("hidden").map_err(decode)?;

    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp `{recorded_at}`")))?;

    Ok(ApprovalHistory {
        id: HistoryId(id),
        seq,
        submission_id: SubmissionId(submission_id),
        stage_id: StageId(stage_id),
        action: parse_action(&action)?,
        acting_user: UserId(acting_user),
        original_approver: original_approver.map(UserId),
        delegation_id: delegation_id.map(DelegationId),
        return_target_stage_id: return_target_stage_id.map(StageId),
        comments,
        recorded_at,
        hidden,
    })
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[async_trait::async_trait]
impl HistoryRepository for SqlHistoryRepository {
    async fn append(&self, entry: ApprovalHistory) -> Result<ApprovalHistory, RepositoryError> {
        // No upsert: the log is immutable, a duplicate id is a bug.
        let result = sqlx::query(
            "INSERT INTO approval_history (id, submission_id, stage_id, action, acting_user,
                                           original_approver, delegation_id,
                                           return_target_stage_id, comments, recorded_at, hidden)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.submission_id.0)
        .bind(&entry.stage_id.0)
        .bind(action_as_str(entry.action))
        .bind(&entry.acting_user.0)
        .bind(entry.original_approver.as_ref().map(|u| u.0.as_str()))
        .bind(entry.delegation_id.as_ref().map(|d| d.0.as_str()))
        .bind(entry.return_target_stage_id.as_ref().map(|s| s.0.as_str()))
        .bind(&entry.comments)
        .bind(entry.recorded_at.to_rfc3339())
        .bind(entry.hidden)
        .execute(&self.pool)
        .await?;

        Ok(ApprovalHistory { seq: result.last_insert_rowid(), ..entry })
    }

    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
        include_hidden: bool,
    ) -> Result<Vec<ApprovalHistory>, RepositoryError> {
        let query = if include_hidden {
            "SELECT seq, id, submission_id, stage_id, action, acting_user, original_approver,
                    delegation_id, return_target_stage_id, comments, recorded_at, hidden
             FROM approval_history WHERE submission_id = ? ORDER BY seq ASC"
        } else {
            "SELECT seq, id, submission_id, stage_id, action, acting_user, original_approver,
                    delegation_id, return_target_stage_id, comments, recorded_at, hidden
             FROM approval_history WHERE submission_id = ? AND hidden = 0
             ORDER BY seq ASC"
        };

        let rows = sqlx::query(query).bind(&submission_id.0).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_history).collect()
    }

    async fn hide(&self, id: &HistoryId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE approval_history SET hidden = 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use formflow_core::domain::history::{ApprovalAction, ApprovalHistory, HistoryId};
    use formflow_core::domain::series::ProjectId;
    use formflow_core::domain::submission::{Submission, SubmissionId, SubmissionStatus};
    use formflow_core::domain::workflow::{DocumentTypeId, StageId, UserId};

    use super::SqlHistoryRepository;
    use crate::repositories::{HistoryRepository, SqlSubmissionRepository, SubmissionRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> (SqlHistoryRepository, sqlx::SqlitePool) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        (SqlHistoryRepository::new(pool.clone()), pool)
    }

    async fn insert_submission(pool: &sqlx::SqlitePool, id: &str) {
        let now = Utc::now();
        SqlSubmissionRepository::new(pool.clone())
            .insert(Submission {
                id: SubmissionId(id.to_string()),
                document_type_id: DocumentTypeId("purchase".to_string()),
                project_id: ProjectId("proj-1".to_string()),
                workflow_id: None,
                status: SubmissionStatus::InApproval,
                current_stage_id: Some(StageId("s-1".to_string())),
                document_number: None,
                version: 1,
                created_by: UserId("u-author".to_string()),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("insert parent submission");
    }

    fn entry(id: &str, submission: &str, action: ApprovalAction) -> ApprovalHistory {
        ApprovalHistory {
            id: HistoryId(id.to_string()),
            seq: 0,
            submission_id: SubmissionId(submission.to_string()),
            stage_id: StageId("s-1".to_string()),
            action,
            acting_user: UserId("u-approver".to_string()),
            original_approver: None,
            delegation_id: None,
            return_target_stage_id: None,
            comments: Some("ok".to_string()),
            recorded_at: Utc::now(),
            hidden: false,
        }
    }

    #[tokio::test]
    async fn append_and_list_preserve_order() {
        let (repo, pool) = setup().await;
        insert_submission(&pool, "sub-1").await;

        repo.append(entry("h-1", "sub-1", ApprovalAction::Approved)).await.expect("append 1");
        repo.append(entry("h-2", "sub-1", ApprovalAction::Returned)).await.expect("append 2");

        let listed = repo
            .list_for_submission(&SubmissionId("sub-1".to_string()), false)
            .await
            .expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id.0, "h-1");
        assert_eq!(listed[1].action, ApprovalAction::Returned);
    }

    #[tokio::test]
    async fn identical_timestamps_keep_insertion_order() {
        let (repo, pool) = setup().await;
        insert_submission(&pool, "sub-1").await;

        // Ids chosen so lexicographic order inverts insertion order.
        let at = Utc::now();
        let mut returned = entry("h-z", "sub-1", ApprovalAction::Returned);
        returned.recorded_at = at;
        let mut reapproval = entry("h-a", "sub-1", ApprovalAction::Approved);
        reapproval.recorded_at = at;

        let first = repo.append(returned).await.expect("append return");
        let second = repo.append(reapproval).await.expect("append re-approval");
        assert!(second.seq > first.seq);

        let listed = repo
            .list_for_submission(&SubmissionId("sub-1".to_string()), false)
            .await
            .expect("list");
        let ids: Vec<&str> = listed.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(ids, vec!["h-z", "h-a"], "a re-approval never sorts before its return");
    }

    #[tokio::test]
    async fn duplicate_entry_id_is_rejected() {
        let (repo, pool) = setup().await;
        insert_submission(&pool, "sub-1").await;

        repo.append(entry("h-1", "sub-1", ApprovalAction::Approved)).await.expect("append");
        let duplicate = repo.append(entry("h-1", "sub-1", ApprovalAction::Rejected)).await;
        assert!(duplicate.is_err(), "history rows are write-once");
    }

    #[tokio::test]
    async fn hidden_entries_stay_in_the_permanent_log() {
        let (repo, pool) = setup().await;
        insert_submission(&pool, "sub-1").await;

        repo.append(entry("h-1", "sub-1", ApprovalAction::Approved)).await.expect("append");
        repo.hide(&HistoryId("h-1".to_string())).await.expect("hide");

        let visible = repo
            .list_for_submission(&SubmissionId("sub-1".to_string()), false)
            .await
            .expect("list visible");
        assert!(visible.is_empty());

        let full = repo
            .list_for_submission(&SubmissionId("sub-1".to_string()), true)
            .await
            .expect("list full");
        assert_eq!(full.len(), 1);
        assert!(full[0].hidden);
        assert_eq!(full[0].action, ApprovalAction::Approved, "the fact itself is unchanged");
    }
}
