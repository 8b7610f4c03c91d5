use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use formflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use formflow_core::blocking::{
    condition_matches, order_rules, BlockingEvaluation, BlockingOutcome, BlockingPhase,
    BlockingRuleId, RuleSource,
};
use formflow_core::domain::submission::SubmissionId;
use formflow_core::domain::workflow::DocumentTypeId;
use formflow_core::{DatabaseValueSource, FieldValue, SubmissionFieldReader};
use formflow_db::repositories::{BlockingLogRepository, BlockingRuleRepository};

use crate::errors::EngineError;

/// Evaluates the blocking rules of a document type for one lifecycle phase.
/// Rules run in priority order and the first match wins; every run appends
/// one row to the evaluation log, whether it allowed or blocked.
pub struct BlockingService {
    rules: Arc<dyn BlockingRuleRepository>,
    log: Arc<dyn BlockingLogRepository>,
    fields: Arc<dyn SubmissionFieldReader>,
    lookups: Arc<dyn DatabaseValueSource>,
    audit_sink: Arc<dyn AuditSink>,
}

impl BlockingService {
    pub fn new(
        rules: Arc<dyn BlockingRuleRepository>,
        log: Arc<dyn BlockingLogRepository>,
        fields: Arc<dyn SubmissionFieldReader>,
        lookups: Arc<dyn DatabaseValueSource>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self { rules, log, fields, lookups, audit_sink }
    }

    pub async fn evaluate(
        &self,
        document_type_id: &DocumentTypeId,
        phase: BlockingPhase,
        submission_id: Option<&SubmissionId>,
    ) -> Result<BlockingOutcome, EngineError> {
        let mut rules = self.rules.list_for(document_type_id, phase).await?;
        order_rules(&mut rules);

        let mut outcome = BlockingOutcome::Allow;
        let mut matched: Option<BlockingRuleId> = None;
        let mut resolved_input: Option<String> = None;

        for rule in &rules {
            let value = match &rule.source {
                RuleSource::Database { lookup_key } => self.lookups.lookup(lookup_key).await?,
                RuleSource::Submission { field_code } => match submission_id {
                    Some(id) => self.fields.field_value(id, field_code).await?,
                    None => {
                        // PreOpen runs before a submission exists; a rule
                        // reading submission fields cannot apply there.
                        tracing::warn!(
                            rule = %rule.id.0,
                            field = %field_code,
                            "skipping submission-sourced rule without a submission"
                        );
                        continue;
                    }
                },
            };

            if condition_matches(&rule.condition, value.as_ref()) {
                resolved_input = value.as_ref().map(render_value);
                matched = Some(rule.id.clone());
                outcome = BlockingOutcome::Block {
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                };
                break;
            }
        }

        self.log
            .append(BlockingEvaluation {
                id: Uuid::new_v4().to_string(),
                document_type_id: document_type_id.clone(),
                phase,
                submission_id: submission_id.cloned(),
                rule_id: matched.clone(),
                outcome: outcome.clone(),
                resolved_input,
                evaluated_at: Utc::now(),
            })
            .await?;

        let audit_outcome = if outcome.is_blocked() {
            AuditOutcome::Rejected
        } else {
            AuditOutcome::Success
        };
        self.audit_sink.emit(
            AuditEvent::new(
                submission_id.cloned(),
                Uuid::new_v4().to_string(),
                "blocking.evaluated",
                AuditCategory::Blocking,
                "blocking-service",
                audit_outcome,
            )
            .with_metadata("document_type", document_type_id.0.clone())
            .with_metadata(
                "rule",
                matched.map(|id| id.0).unwrap_or_else(|| "none".to_string()),
            ),
        );

        Ok(outcome)
    }
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(number) => number.to_string(),
        FieldValue::Text(text) => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use formflow_core::blocking::{
        BlockingOutcome, BlockingPhase, BlockingRule, BlockingRuleId, RuleCondition, RuleSource,
    };
    use formflow_core::domain::submission::SubmissionId;
    use formflow_core::domain::workflow::DocumentTypeId;
    use formflow_core::FieldValue;
    use formflow_db::repositories::BlockingRuleRepository;

    use crate::support::Harness;

    fn document_type() -> DocumentTypeId {
        DocumentTypeId("purchase".to_string())
    }

    fn rule(
        id: &str,
        priority: i32,
        source: RuleSource,
        condition: RuleCondition,
        message: &str,
    ) -> BlockingRule {
        BlockingRule {
            id: BlockingRuleId(id.to_string()),
            document_type_id: document_type(),
            phase: BlockingPhase::PreSubmit,
            source,
            condition,
            message: message.to_string(),
            priority,
            active: true,
        }
    }

    #[tokio::test]
    async fn highest_priority_match_wins_and_is_logged() {
        let harness = Harness::new();
        harness.fields.set("sub-1", "SUPPLIER_STATUS", FieldValue::Text("closed".into()));
        harness
            .rules
            .save(rule(
                "r-low",
                1,
                RuleSource::Submission { field_code: "SUPPLIER_STATUS".to_string() },
                RuleCondition::NotEmpty,
                "status is set",
            ))
            .await
            .expect("save");
        harness
            .rules
            .save(rule(
                "r-high",
                50,
                RuleSource::Submission { field_code: "SUPPLIER_STATUS".to_string() },
                RuleCondition::Equals { value: "closed".to_string() },
                "supplier account is closed",
            ))
            .await
            .expect("save");

        let outcome = harness
            .engine
            .blocking()
            .evaluate(&document_type(), BlockingPhase::PreSubmit, Some(&SubmissionId("sub-1".into())))
            .await
            .expect("evaluate");

        match outcome {
            BlockingOutcome::Block { rule_id, message } => {
                assert_eq!(rule_id.0, "r-high");
                assert_eq!(message, "supplier account is closed");
            }
            BlockingOutcome::Allow => panic!("the closed supplier must block"),
        }

        let logged = harness.blocking_log.recorded().await;
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].resolved_input.as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn no_match_allows_and_still_logs() {
        let harness = Harness::new();
        harness.fields.set("sub-1", "TOTAL", FieldValue::Number(Decimal::from(50)));
        harness
            .rules
            .save(rule(
                "r-limit",
                1,
                RuleSource::Submission { field_code: "TOTAL".to_string() },
                RuleCondition::GreaterThan { value: Decimal::from(100) },
                "amount exceeds limit",
            ))
            .await
            .expect("save");

        let outcome = harness
            .engine
            .blocking()
            .evaluate(&document_type(), BlockingPhase::PreSubmit, Some(&SubmissionId("sub-1".into())))
            .await
            .expect("evaluate");

        assert_eq!(outcome, BlockingOutcome::Allow);
        let logged = harness.blocking_log.recorded().await;
        assert_eq!(logged.len(), 1);
        assert!(logged[0].rule_id.is_none());
    }

    #[tokio::test]
    async fn database_sourced_rules_read_the_lookup_collaborator() {
        let harness = Harness::new();
        harness.lookups.set("supplier.flag", FieldValue::Text("blocked".into()));
        harness
            .rules
            .save(rule(
                "r-db",
                1,
                RuleSource::Database { lookup_key: "supplier.flag".to_string() },
                RuleCondition::Equals { value: "blocked".to_string() },
                "supplier flagged in master data",
            ))
            .await
            .expect("save");

        let outcome = harness
            .engine
            .blocking()
            .evaluate(&document_type(), BlockingPhase::PreSubmit, Some(&SubmissionId("sub-1".into())))
            .await
            .expect("evaluate");
        assert!(outcome.is_blocked());
    }

    #[tokio::test]
    async fn pre_open_skips_rules_that_need_a_submission() {
        let harness = Harness::new();
        let mut open_rule = rule(
            "r-open",
            1,
            RuleSource::Submission { field_code: "ANY".to_string() },
            RuleCondition::IsEmpty,
            "would always match",
        );
        open_rule.phase = BlockingPhase::PreOpen;
        harness.rules.save(open_rule).await.expect("save");

        let outcome = harness
            .engine
            .blocking()
            .evaluate(&document_type(), BlockingPhase::PreOpen, None)
            .await
            .expect("evaluate");
        assert_eq!(outcome, BlockingOutcome::Allow);
    }
}
