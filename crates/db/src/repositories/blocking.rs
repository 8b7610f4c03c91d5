use sqlx::Row;

use formflow_core::blocking::{
    BlockingEvaluation, BlockingOutcome, BlockingPhase, BlockingRule, BlockingRuleId,
    RuleCondition, RuleSource,
};
use formflow_core::domain::workflow::DocumentTypeId;

use super::{BlockingLogRepository, BlockingRuleRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBlockingRuleRepository {
    pool: DbPool,
}

impl SqlBlockingRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_phase(raw: &str) -> Result<BlockingPhase, RepositoryError> {
    match raw {
        "pre_open" => Ok(BlockingPhase::PreOpen),
        "pre_submit" => Ok(BlockingPhase::PreSubmit),
        other => Err(RepositoryError::Decode(format!("unknown blocking phase `{other}`"))),
    }
}

pub fn phase_as_str(phase: BlockingPhase) -> &'static str {
    match phase {
        BlockingPhase::PreOpen => "pre_open",
        BlockingPhase::PreSubmit => "pre_submit",
    }
}

fn source_columns(source: &RuleSource) -> (&'static str, &str) {
    match source {
        RuleSource::Database { lookup_key } => ("database", lookup_key.as_str()),
        RuleSource::Submission { field_code } => ("submission", field_code.as_str()),
    }
}

fn parse_source(source_type: &str, source_key: String) -> Result<RuleSource, RepositoryError> {
    match source_type {
        "database" => Ok(RuleSource::Database { lookup_key: source_key }),
        "submission" => Ok(RuleSource::Submission { field_code: source_key }),
        other => Err(RepositoryError::Decode(format!("unknown rule source `{other}`"))),
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<BlockingRule, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let document_type_id: String = row.try_get("document_type_id").map_err(decode)?;
    let phase: String = row.try_get("phase").map_err(decode)?;
    let source_type: String = row.try_get("source_type").map_err(decode)?;
    let source_key: String = row.try_get("source_key").map_err(decode)?;
    let condition_json: String = row.try_get("condition_json").map_err(decode)?;
    let message: String = row.try_get("message").map_err(decode)?;
    let priority: i64 = row.try_get("priority").map_err(decode)?;
    let active: bool = row.try_get("active").map_err(decode)?;

    let condition: RuleCondition = serde_json::from_str(&condition_json)
        .map_err(|e| RepositoryError::Decode(format!("invalid rule condition: {e}")))?;

    Ok(BlockingRule {
        id: BlockingRuleId(id),
        document_type_id: DocumentTypeId(document_type_id),
        phase: parse_phase(&phase)?,
        source: parse_source(&source_type, source_key)?,
        condition,
        message,
        priority: priority as i32,
        active,
    })
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[async_trait::async_trait]
impl BlockingRuleRepository for SqlBlockingRuleRepository {
    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        phase: BlockingPhase,
    ) -> Result<Vec<BlockingRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, document_type_id, phase, source_type, source_key, condition_json,
                    message, priority, active
             FROM blocking_rule
             WHERE document_type_id = ? AND phase = ? AND active = 1
             ORDER BY priority DESC, id ASC",
        )
        .bind(&document_type_id.0)
        .bind(phase_as_str(phase))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn save(&self, rule: BlockingRule) -> Result<(), RepositoryError> {
        let (source_type, source_key) = source_columns(&rule.source);
        let condition_json = serde_json::to_string(&rule.condition)
            .map_err(|e| RepositoryError::Decode(format!("unserializable condition: {e}")))?;

        sqlx::query(
            "INSERT INTO blocking_rule (id, document_type_id, phase, source_type, source_key,
                                        condition_json, message, priority, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 document_type_id = excluded.document_type_id,
                 phase = excluded.phase,
                 source_type = excluded.source_type,
                 source_key = excluded.source_key,
                 condition_json = excluded.condition_json,
                 message = excluded.message,
                 priority = excluded.priority,
                 active = excluded.active",
        )
        .bind(&rule.id.0)
        .bind(&rule.document_type_id.0)
        .bind(phase_as_str(rule.phase))
        .bind(source_type)
        .bind(source_key)
        .bind(condition_json)
        .bind(&rule.message)
        .bind(rule.priority as i64)
        .bind(rule.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SqlBlockingLogRepository {
    pool: DbPool,
}

impl SqlBlockingLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BlockingLogRepository for SqlBlockingLogRepository {
    async fn append(&self, evaluation: BlockingEvaluation) -> Result<(), RepositoryError> {
        let (outcome, rule_id, message) = match &evaluation.outcome {
            BlockingOutcome::Allow => ("allow", None, None),
            BlockingOutcome::Block { rule_id, message } => {
                ("block", Some(rule_id.0.as_str()), Some(message.as_str()))
            }
        };

        // The rule id on the row favors the blocking rule when both are set.
        let rule_id = rule_id.or(evaluation.rule_id.as_ref().map(|id| id.0.as_str()));

        sqlx::query(
            "INSERT INTO blocking_evaluation_log (id, document_type_id, phase, submission_id,
                                                  rule_id, outcome, message, resolved_input,
                                                  evaluated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&evaluation.id)
        .bind(&evaluation.document_type_id.0)
        .bind(phase_as_str(evaluation.phase))
        .bind(evaluation.submission_id.as_ref().map(|id| id.0.as_str()))
        .bind(rule_id)
        .bind(outcome)
        .bind(message)
        .bind(&evaluation.resolved_input)
        .bind(evaluation.evaluated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
