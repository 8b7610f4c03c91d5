use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::submission::SubmissionId;
use crate::domain::workflow::{UserId, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationId(pub String);

/// Where a delegation applies. Scopes are resolved independently; a
/// Document-scoped delegation is never implicitly visible to a Workflow- or
/// Global-scoped lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DelegationScope {
    Global,
    Workflow(WorkflowId),
    Document(SubmissionId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    /// Monotonic insertion sequence, the deterministic tie-break when two
    /// delegations share a `start_date`.
    pub seq: i64,
    pub from_user: UserId,
    pub to_user: UserId,
    pub scope: DelegationScope,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub active: bool,
    pub deleted: bool,
}

impl Delegation {
    pub fn is_active_at(&self, as_of: DateTime<Utc>) -> bool {
        self.active && !self.deleted && self.start_date <= as_of && as_of <= self.end_date
    }
}
