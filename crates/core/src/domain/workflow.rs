use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentTypeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

/// A stage assignee is either a role (expanded to its members at resolution
/// time) or a single user. A stage may mix both kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignee {
    Role(RoleId),
    User(UserId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub workflow_id: WorkflowId,
    pub order: u32,
    /// Form field the amount window applies to; `None` disables the check.
    pub amount_field_code: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub is_final: bool,
    pub minimum_required_assignees: Option<u32>,
    pub requires_signature: bool,
    pub assignees: Vec<Assignee>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub document_type_id: DocumentTypeId,
    pub active: bool,
    /// Stages sorted by `order` ascending. Use [`Workflow::validate`] after
    /// loading configuration to enforce the ordering invariants.
    pub stages: Vec<Stage>,
}

impl Workflow {
    /// Checks the configuration invariants: stage orders are unique, and the
    /// final-flagged stage (if any) carries the maximal order.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut orders: Vec<u32> = self.stages.iter().map(|stage| stage.order).collect();
        orders.sort_unstable();
        orders.dedup();
        if orders.len() != self.stages.len() {
            return Err(DomainError::InvariantViolation(format!(
                "workflow `{}` has duplicate stage orders",
                self.id.0
            )));
        }

        if let Some(max_order) = orders.last().copied() {
            for stage in &self.stages {
                if stage.is_final && stage.order != max_order {
                    return Err(DomainError::InvariantViolation(format!(
                        "stage `{}` is flagged final but has a successor",
                        stage.id.0
                    )));
                }
            }
        }

        Ok(())
    }

    /// The stage with the minimal order, where submissions enter.
    pub fn entry_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|stage| stage.order)
    }

    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|stage| &stage.id == id)
    }

    /// The next stage in traversal order after `current`, or `None` when
    /// `current` is the last stage.
    pub fn next_stage_after(&self, current: &Stage) -> Option<&Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.order > current.order)
            .min_by_key(|stage| stage.order)
    }

    /// Whether `current` terminates the workflow: either flagged final or
    /// simply the last stage by order.
    pub fn is_terminal_stage(&self, current: &Stage) -> bool {
        current.is_final || self.next_stage_after(current).is_none()
    }
}
