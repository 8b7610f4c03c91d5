use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::history::ApprovalAction;
use crate::domain::workflow::Stage;

/// E-signature state for a (submission, stage) pair, as reported by the
/// signature provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    NotRequired,
    Pending,
    Completed,
}

/// Submission-side facts the gate needs; resolved by the caller so the gate
/// itself stays pure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateInput {
    /// Value of the stage's `amount_field_code`, when that field is set and
    /// the submission carries a value for it.
    pub amount_value: Option<Decimal>,
    pub signature_status: SignatureStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateBlock {
    AmountMissing {
        field_code: String,
    },
    AmountOutOfRange {
        field_code: String,
        value: Decimal,
        min: Option<Decimal>,
        max: Option<Decimal>,
    },
    SignaturePending,
}

impl GateBlock {
    pub fn reason(&self) -> String {
        match self {
            Self::AmountMissing { field_code } => {
                format!("submission has no value for amount field `{field_code}`")
            }
            Self::AmountOutOfRange { field_code, value, min, max } => {
                let min = min.map_or("-inf".to_string(), |m| m.to_string());
                let max = max.map_or("+inf".to_string(), |m| m.to_string());
                format!("`{field_code}` value {value} is outside stage range [{min}, {max}]")
            }
            Self::SignaturePending => {
                "stage requires a completed e-signature before approval".to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Blocked(GateBlock),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Evaluates a stage's preconditions for recording `action`.
///
/// Both the amount window and the signature requirement gate `Approved`
/// only. A rejection or return needs nothing beyond authorization, so a
/// submission that drifted outside the stage window can still leave the
/// stage.
pub fn can_act(stage: &Stage, action: ApprovalAction, input: &GateInput) -> GateDecision {
    if action != ApprovalAction::Approved {
        return GateDecision::Allowed;
    }

    if let Some(field_code) = &stage.amount_field_code {
        let Some(value) = input.amount_value else {
            return GateDecision::Blocked(GateBlock::AmountMissing {
                field_code: field_code.clone(),
            });
        };

        let below = stage.min_amount.is_some_and(|min| value < min);
        let above = stage.max_amount.is_some_and(|max| value > max);
        if below || above {
            return GateDecision::Blocked(GateBlock::AmountOutOfRange {
                field_code: field_code.clone(),
                value,
                min: stage.min_amount,
                max: stage.max_amount,
            });
        }
    }

    if stage.requires_signature && input.signature_status != SignatureStatus::Completed {
        return GateDecision::Blocked(GateBlock::SignaturePending);
    }

    GateDecision::Allowed
}

/// Whether the count of distinct approving users satisfies the stage quorum.
/// An unset quorum means a single approval suffices.
pub fn quorum_satisfied(stage: &Stage, distinct_approvers: usize) -> bool {
    let required = stage.minimum_required_assignees.unwrap_or(1).max(1) as usize;
    distinct_approvers >= required
}
