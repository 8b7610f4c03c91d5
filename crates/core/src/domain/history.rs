use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::delegation::DelegationId;
use crate::domain::submission::SubmissionId;
use crate::domain::workflow::{StageId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
    Returned,
}

/// One immutable entry in the approval log. Entries are appended exactly once
/// per recorded action and never updated; `hidden` only controls visibility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistory {
    pub id: HistoryId,
    /// Insertion sequence assigned by the store on append. Replay and quorum
    /// derivation follow it, so entries sharing a timestamp keep their order.
    pub seq: i64,
    pub submission_id: SubmissionId,
    pub stage_id: StageId,
    pub action: ApprovalAction,
    pub acting_user: UserId,
    /// Set when the action was taken via delegation: the approver whose
    /// authority was exercised.
    pub original_approver: Option<UserId>,
    pub delegation_id: Option<DelegationId>,
    /// For `Returned` entries, the stage the submission was sent back to.
    pub return_target_stage_id: Option<StageId>,
    pub comments: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub hidden: bool,
}
