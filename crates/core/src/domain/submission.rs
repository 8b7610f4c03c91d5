use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::series::ProjectId;
use crate::domain::workflow::{DocumentTypeId, StageId, UserId, WorkflowId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Draft,
    InApproval,
    Approved,
    Rejected,
    Returned,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub document_type_id: DocumentTypeId,
    /// Owning project; document series are scoped per project.
    pub project_id: ProjectId,
    pub workflow_id: Option<WorkflowId>,
    pub status: SubmissionStatus,
    /// Stage awaiting action while `status` is `InApproval` or `Returned`.
    pub current_stage_id: Option<StageId>,
    pub document_number: Option<String>,
    /// Optimistic-concurrency token, bumped on every persisted transition.
    pub version: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::{Approved, Draft, InApproval, Rejected, Returned};

        matches!(
            (self.status, next),
            (Draft, InApproval)
                | (Draft, Approved)
                | (InApproval, InApproval)
                | (InApproval, Approved)
                | (InApproval, Rejected)
                | (InApproval, Returned)
                | (Returned, InApproval)
                | (Returned, Approved)
                | (Returned, Rejected)
                | (Returned, Returned)
        )
    }

    pub fn transition_to(&mut self, next: SubmissionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidTransition { from: self.status, to: next })
    }
}
