use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::collaborators::FieldValue;
use crate::domain::workflow::DocumentTypeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockingRuleId(pub String);

/// Where in the form lifecycle a rule fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingPhase {
    PreOpen,
    PreSubmit,
}

/// Where the rule's input value comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RuleSource {
    /// A named database lookup resolved by the `DatabaseValueSource`
    /// collaborator.
    Database { lookup_key: String },
    /// A field on the submission being opened or submitted.
    Submission { field_code: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleCondition {
    Equals { value: String },
    NotEquals { value: String },
    GreaterThan { value: Decimal },
    LessThan { value: Decimal },
    IsEmpty,
    NotEmpty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingRule {
    pub id: BlockingRuleId,
    pub document_type_id: DocumentTypeId,
    pub phase: BlockingPhase,
    pub source: RuleSource,
    pub condition: RuleCondition,
    pub message: String,
    pub priority: i32,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingOutcome {
    Allow,
    Block { rule_id: BlockingRuleId, message: String },
}

impl BlockingOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Append-only record of one rule evaluation, written whether the result was
/// Allow or Block, for compliance review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingEvaluation {
    pub id: String,
    pub document_type_id: DocumentTypeId,
    pub phase: BlockingPhase,
    pub submission_id: Option<crate::domain::submission::SubmissionId>,
    pub rule_id: Option<BlockingRuleId>,
    pub outcome: BlockingOutcome,
    /// The resolved condition input, rendered for the audit trail.
    pub resolved_input: Option<String>,
    pub evaluated_at: chrono::DateTime<chrono::Utc>,
}

/// Sorts rules into evaluation order: descending priority, rule id as the
/// deterministic tie-break.
pub fn order_rules(rules: &mut [BlockingRule]) {
    rules.sort_by(|left, right| {
        right.priority.cmp(&left.priority).then_with(|| left.id.0.cmp(&right.id.0))
    });
}

/// Evaluates one condition against a resolved source value. A source that
/// resolved to nothing only satisfies `IsEmpty`.
pub fn condition_matches(condition: &RuleCondition, value: Option<&FieldValue>) -> bool {
    match condition {
        RuleCondition::IsEmpty => match value {
            None => true,
            Some(FieldValue::Text(text)) => text.trim().is_empty(),
            Some(FieldValue::Number(_)) => false,
        },
        RuleCondition::NotEmpty => !condition_matches(&RuleCondition::IsEmpty, value),
        RuleCondition::Equals { value: expected } => match value {
            Some(FieldValue::Text(text)) => text == expected,
            Some(FieldValue::Number(number)) => {
                expected.parse::<Decimal>().is_ok_and(|parsed| parsed == *number)
            }
            None => false,
        },
        RuleCondition::NotEquals { value: expected } => {
            value.is_some()
                && !condition_matches(&RuleCondition::Equals { value: expected.clone() }, value)
        }
        RuleCondition::GreaterThan { value: bound } => {
            numeric(value).is_some_and(|number| number > *bound)
        }
        RuleCondition::LessThan { value: bound } => {
            numeric(value).is_some_and(|number| number < *bound)
        }
    }
}

fn numeric(value: Option<&FieldValue>) -> Option<Decimal> {
    match value {
        Some(FieldValue::Number(number)) => Some(*number),
        Some(FieldValue::Text(text)) => text.trim().parse().ok(),
        None => None,
    }
}
