use chrono::{DateTime, Utc};
use sqlx::Row;

use formflow_core::domain::series::{
    DocumentSeries, GenerateOn, NumberAudit, ProjectId, ResetPolicy, SeriesId,
};
use formflow_core::domain::submission::SubmissionId;
use formflow_core::domain::workflow::{DocumentTypeId, UserId};

use super::{NumberAuditRepository, RepositoryError, SeriesRepository};
use crate::DbPool;

pub struct SqlSeriesRepository {
    pool: DbPool,
}

impl SqlSeriesRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_reset_policy(raw: &str) -> Result<ResetPolicy, RepositoryError> {
    match raw {
        "none" => Ok(ResetPolicy::None),
        "yearly" => Ok(ResetPolicy::Yearly),
        "monthly" => Ok(ResetPolicy::Monthly),
        "daily" => Ok(ResetPolicy::Daily),
        other => Err(RepositoryError::Decode(format!("unknown reset policy `{other}`"))),
    }
}

pub fn reset_policy_as_str(policy: ResetPolicy) -> &'static str {
    match policy {
        ResetPolicy::None => "none",
        ResetPolicy::Yearly => "yearly",
        ResetPolicy::Monthly => "monthly",
        ResetPolicy::Daily => "daily",
    }
}

fn parse_generate_on(raw: &str) -> Result<GenerateOn, RepositoryError> {
    match raw {
        "submit" => Ok(GenerateOn::Submit),
        "approval" => Ok(GenerateOn::Approval),
        other => Err(RepositoryError::Decode(format!("unknown generation trigger `{other}`"))),
    }
}

pub fn generate_on_as_str(trigger: GenerateOn) -> &'static str {
    match trigger {
        GenerateOn::Submit => "submit",
        GenerateOn::Approval => "approval",
    }
}

fn row_to_series(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentSeries, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let project_id: String = row.try_get("project_id").map_err(decode)?;
    let document_type_id: String = row.try_get("document_type_id").map_err(decode)?;
    let code: String = row.try_get("code").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let template: String = row.try_get("template").map_err(decode)?;
    let sequence_start: i64 = row.try_get("sequence_start").map_err(decode)?;
    let sequence_padding: i64 = row.try_get("sequence_padding").map_err(decode)?;
    let reset_policy: String = row.try_get("reset_policy").map_err(decode)?;
    let generate_on: String = row.try_get("generate_on").map_err(decode)?;
    let is_default: bool = row.try_get("is_default").map_err(decode)?;
    let active: bool = row.try_get("active").map_err(decode)?;

    Ok(DocumentSeries {
        id: SeriesId(id),
        project_id: ProjectId(project_id),
        document_type_id: DocumentTypeId(document_type_id),
        code,
        name,
        template,
        sequence_start,
        sequence_padding: sequence_padding as u32,
        reset_policy: parse_reset_policy(&reset_policy)?,
        generate_on: parse_generate_on(&generate_on)?,
        is_default,
        active,
    })
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

const SERIES_COLUMNS: &str = "id, project_id, document_type_id, code, name, template,
                              sequence_start, sequence_padding, reset_policy, generate_on,
                              is_default, active";

#[async_trait::async_trait]
impl SeriesRepository for SqlSeriesRepository {
    async fn find_by_id(&self, id: &SeriesId) -> Result<Option<DocumentSeries>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {SERIES_COLUMNS} FROM document_series WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_series(row)?)),
            None => Ok(None),
        }
    }

    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentSeries>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SERIES_COLUMNS} FROM document_series
             WHERE document_type_id = ? AND project_id = ? ORDER BY code ASC"
        ))
        .bind(&document_type_id.0)
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_series).collect()
    }

    async fn save(&self, series: DocumentSeries) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO document_series (id, project_id, document_type_id, code, name, template,
                                          sequence_start, sequence_padding, reset_policy,
                                          generate_on, is_default, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 project_id = excluded.project_id,
                 document_type_id = excluded.document_type_id,
                 code = excluded.code,
                 name = excluded.name,
                 template = excluded.template,
                 sequence_start = excluded.sequence_start,
                 sequence_padding = excluded.sequence_padding,
                 reset_policy = excluded.reset_policy,
                 generate_on = excluded.generate_on,
                 is_default = excluded.is_default,
                 active = excluded.active",
        )
        .bind(&series.id.0)
        .bind(&series.project_id.0)
        .bind(&series.document_type_id.0)
        .bind(&series.code)
        .bind(&series.name)
        .bind(&series.template)
        .bind(series.sequence_start)
        .bind(series.sequence_padding as i64)
        .bind(reset_policy_as_str(series.reset_policy))
        .bind(generate_on_as_str(series.generate_on))
        .bind(series.is_default)
        .bind(series.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SqlNumberAuditRepository {
    pool: DbPool,
}

impl SqlNumberAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Result<NumberAudit, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let submission_id: String = row.try_get("submission_id").map_err(decode)?;
    let series_id: String = row.try_get("series_id").map_err(decode)?;
    let number: String = row.try_get("number").map_err(decode)?;
    let template: String = row.try_get("template").map_err(decode)?;
    let sequence_value: i64 = row.try_get("sequence_value").map_err(decode)?;
    let period_key: String = row.try_get("period_key").map_err(decode)?;
    let trigger_event: String = row.try_get("trigger_event").map_err(decode)?;
    let actor: String = row.try_get("actor").map_err(decode)?;
    let generated_at: String = row.try_get("generated_at").map_err(decode)?;

    let generated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&generated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp `{generated_at}`")))?;

    Ok(NumberAudit {
        id,
        submission_id: SubmissionId(submission_id),
        series_id: SeriesId(series_id),
        number,
        template,
        sequence: sequence_value,
        period_key,
        trigger: parse_generate_on(&trigger_event)?,
        actor: UserId(actor),
        generated_at,
    })
}

#[async_trait::async_trait]
impl NumberAuditRepository for SqlNumberAuditRepository {
    async fn append(&self, audit: NumberAudit) -> Result<(), RepositoryError> {
        // Write-once: the unique (series_id, number) index backs the
        // no-duplicate invariant at the storage level.
        sqlx::query(
            "INSERT INTO number_audit (id, submission_id, series_id, number, template,
                                       sequence_value, period_key, trigger_event, actor,
                                       generated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&audit.id)
        .bind(&audit.submission_id.0)
        .bind(&audit.series_id.0)
        .bind(&audit.number)
        .bind(&audit.template)
        .bind(audit.sequence)
        .bind(&audit.period_key)
        .bind(generate_on_as_str(audit.trigger))
        .bind(&audit.actor.0)
        .bind(audit.generated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<NumberAudit>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, submission_id, series_id, number, template, sequence_value, period_key,
                    trigger_event, actor, generated_at
             FROM number_audit WHERE submission_id = ? ORDER BY generated_at ASC",
        )
        .bind(&submission_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_audit).collect()
    }

    async fn number_exists(
        &self,
        series_id: &SeriesId,
        number: &str,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM number_audit WHERE series_id = ? AND number = ?",
        )
        .bind(&series_id.0)
        .bind(number)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count").map_err(decode)?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use formflow_core::domain::series::{
        DocumentSeries, GenerateOn, NumberAudit, ProjectId, ResetPolicy, SeriesId,
    };
    use formflow_core::domain::submission::SubmissionId;
    use formflow_core::domain::workflow::{DocumentTypeId, UserId};

    use super::{SqlNumberAuditRepository, SqlSeriesRepository};
    use crate::repositories::{NumberAuditRepository, SeriesRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn series(id: &str, code: &str) -> DocumentSeries {
        DocumentSeries {
            id: SeriesId(id.to_string()),
            project_id: ProjectId("proj-1".to_string()),
            document_type_id: DocumentTypeId("purchase".to_string()),
            code: code.to_string(),
            name: format!("{code} series"),
            template: "{SERIES}-{YYYY}-{SEQ:000}".to_string(),
            sequence_start: 1,
            sequence_padding: 3,
            reset_policy: ResetPolicy::Yearly,
            generate_on: GenerateOn::Submit,
            is_default: false,
            active: true,
        }
    }

    #[tokio::test]
    async fn series_round_trip_preserves_policy_fields() {
        let pool = setup().await;
        let repo = SqlSeriesRepository::new(pool);
        let original = series("ser-1", "PRJ");

        repo.save(original.clone()).await.expect("save");
        let found = repo
            .find_by_id(&SeriesId("ser-1".to_string()))
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found, original);
    }

    #[tokio::test]
    async fn list_for_scopes_by_document_type_and_project() {
        let pool = setup().await;
        let repo = SqlSeriesRepository::new(pool);

        repo.save(series("ser-1", "PRJ")).await.expect("save 1");
        let mut other_project = series("ser-2", "OTH");
        other_project.project_id = ProjectId("proj-2".to_string());
        repo.save(other_project).await.expect("save 2");

        let listed = repo
            .list_for(
                &DocumentTypeId("purchase".to_string()),
                &ProjectId("proj-1".to_string()),
            )
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, "PRJ");
    }

    fn audit(id: &str, submission: &str, number: &str) -> NumberAudit {
        NumberAudit {
            id: id.to_string(),
            submission_id: SubmissionId(submission.to_string()),
            series_id: SeriesId("ser-1".to_string()),
            number: number.to_string(),
            template: "{SERIES}-{YYYY}-{SEQ:000}".to_string(),
            sequence: 1,
            period_key: "2025".to_string(),
            trigger: GenerateOn::Submit,
            actor: UserId("u-author".to_string()),
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn number_audit_probes_existing_numbers() {
        let pool = setup().await;
        let repo = SqlNumberAuditRepository::new(pool);

        repo.append(audit("na-1", "sub-1", "PRJ-2025-001")).await.expect("append");

        let series_id = SeriesId("ser-1".to_string());
        assert!(repo.number_exists(&series_id, "PRJ-2025-001").await.expect("probe hit"));
        assert!(!repo.number_exists(&series_id, "PRJ-2025-002").await.expect("probe miss"));

        let for_submission = repo
            .list_for_submission(&SubmissionId("sub-1".to_string()))
            .await
            .expect("list");
        assert_eq!(for_submission.len(), 1);
        assert_eq!(for_submission[0].trigger, GenerateOn::Submit);
    }

    #[tokio::test]
    async fn duplicate_number_for_a_series_is_rejected() {
        let pool = setup().await;
        let repo = SqlNumberAuditRepository::new(pool);

        repo.append(audit("na-1", "sub-1", "PRJ-2025-001")).await.expect("append");
        let duplicate = repo.append(audit("na-2", "sub-2", "PRJ-2025-001")).await;
        assert!(duplicate.is_err());
    }
}
