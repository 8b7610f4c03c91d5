use rust_decimal::Decimal;
use sqlx::Row;

use formflow_core::domain::workflow::{
    Assignee, DocumentTypeId, RoleId, Stage, StageId, UserId, Workflow, WorkflowId,
};

use super::{RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_stages(&self, workflow_id: &WorkflowId) -> Result<Vec<Stage>, RepositoryError> {
        let stage_rows = sqlx::query(
            "SELECT id, workflow_id, stage_order, amount_field_code, min_amount, max_amount,
                    is_final, minimum_required_assignees, requires_signature
             FROM stage WHERE workflow_id = ? ORDER BY stage_order ASC",
        )
        .bind(&workflow_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut stages = Vec::with_capacity(stage_rows.len());
        for row in &stage_rows {
            let mut stage = row_to_stage(row)?;
            stage.assignees = self.load_assignees(&stage.id).await?;
            stages.push(stage);
        }

        Ok(stages)
    }

    async fn load_assignees(&self, stage_id: &StageId) -> Result<Vec<Assignee>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT kind, role_id, user_id FROM stage_assignee WHERE stage_id = ? ORDER BY id ASC",
        )
        .bind(&stage_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignee).collect()
    }
}

fn row_to_stage(row: &sqlx::sqlite::SqliteRow) -> Result<Stage, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(decode)?;
    let order: i64 = row.try_get("stage_order").map_err(decode)?;
    let amount_field_code: Option<String> = row.try_get("amount_field_code").map_err(decode)?;
    let min_amount: Option<String> = row.try_get("min_amount").map_err(decode)?;
    let max_amount: Option<String> = row.try_get("max_amount").map_err(decode)?;
    let is_final: bool = row.try_get("is_final").map_err(decode)?;
    let minimum_required_assignees: Option<i64> =
        row.try_get("minimum_required_assignees").map_err(decode)?;
    let requires_signature: bool = row.try_get("requires_signature").map_err(decode)?;

    Ok(Stage {
        id: StageId(id),
        workflow_id: WorkflowId(workflow_id),
        order: order as u32,
        amount_field_code,
        min_amount: parse_amount(min_amount)?,
        max_amount: parse_amount(max_amount)?,
        is_final,
        minimum_required_assignees: minimum_required_assignees.map(|n| n as u32),
        requires_signature,
        assignees: Vec::new(),
    })
}

fn parse_amount(raw: Option<String>) -> Result<Option<Decimal>, RepositoryError> {
    raw.map(|text| {
        text.parse().map_err(|_| RepositoryError::Decode(format!("invalid amount `{text}`")))
    })
    .transpose()
}

fn row_to_assignee(row: &sqlx::sqlite::SqliteRow) -> Result<Assignee, RepositoryError> {
    let kind: String = row.try_get("kind").map_err(decode)?;
    match kind.as_str() {
        "role" => {
            let role_id: String = row.try_get("role_id").map_err(decode)?;
            Ok(Assignee::Role(RoleId(role_id)))
        }
        "user" => {
            let user_id: String = row.try_get("user_id").map_err(decode)?;
            Ok(Assignee::User(UserId(user_id)))
        }
        other => Err(RepositoryError::Decode(format!("unknown assignee kind `{other}`"))),
    }
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, document_type_id, active
             FROM workflow WHERE id = ? AND deleted = 0",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut workflow = row_to_workflow(&row)?;
        workflow.stages = self.load_stages(&workflow.id).await?;
        Ok(Some(workflow))
    }

    async fn find_active_by_document_type(
        &self,
        document_type_id: &DocumentTypeId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, document_type_id, active
             FROM workflow WHERE document_type_id = ? AND active = 1 AND deleted = 0",
        )
        .bind(&document_type_id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            return Err(RepositoryError::Integrity(format!(
                "document type `{}` has {} active workflows, expected at most one",
                document_type_id.0,
                rows.len()
            )));
        }

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let mut workflow = row_to_workflow(row)?;
        workflow.stages = self.load_stages(&workflow.id).await?;
        Ok(Some(workflow))
    }

    async fn save(&self, workflow: Workflow) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workflow (id, name, document_type_id, active)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 document_type_id = excluded.document_type_id,
                 active = excluded.active",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(&workflow.document_type_id.0)
        .bind(workflow.active)
        .execute(&self.pool)
        .await?;

        for stage in &workflow.stages {
            sqlx::query(
                "INSERT INTO stage (id, workflow_id, stage_order, amount_field_code, min_amount,
                                    max_amount, is_final, minimum_required_assignees,
                                    requires_signature)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     stage_order = excluded.stage_order,
                     amount_field_code = excluded.amount_field_code,
                     min_amount = excluded.min_amount,
                     max_amount = excluded.max_amount,
                     is_final = excluded.is_final,
                     minimum_required_assignees = excluded.minimum_required_assignees,
                     requires_signature = excluded.requires_signature",
            )
            .bind(&stage.id.0)
            .bind(&workflow.id.0)
            .bind(stage.order as i64)
            .bind(&stage.amount_field_code)
            .bind(stage.min_amount.map(|amount| amount.to_string()))
            .bind(stage.max_amount.map(|amount| amount.to_string()))
            .bind(stage.is_final)
            .bind(stage.minimum_required_assignees.map(|n| n as i64))
            .bind(stage.requires_signature)
            .execute(&self.pool)
            .await?;

            sqlx::query("DELETE FROM stage_assignee WHERE stage_id = ?")
                .bind(&stage.id.0)
                .execute(&self.pool)
                .await?;

            for assignee in &stage.assignees {
                let (kind, role_id, user_id) = match assignee {
                    Assignee::Role(role) => ("role", Some(role.0.as_str()), None),
                    Assignee::User(user) => ("user", None, Some(user.0.as_str())),
                };
                sqlx::query(
                    "INSERT INTO stage_assignee (stage_id, kind, role_id, user_id)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&stage.id.0)
                .bind(kind)
                .bind(role_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let name: String = row.try_get("name").map_err(decode)?;
    let document_type_id: String = row.try_get("document_type_id").map_err(decode)?;
    let active: bool = row.try_get("active").map_err(decode)?;

    Ok(Workflow {
        id: WorkflowId(id),
        name,
        document_type_id: DocumentTypeId(document_type_id),
        active,
        stages: Vec::new(),
    })
}
