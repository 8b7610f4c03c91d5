use std::collections::HashSet;

use crate::domain::history::{ApprovalAction, ApprovalHistory};
use crate::domain::workflow::{Stage, UserId, Workflow};

/// The distinct users whose approval currently counts toward `stage`'s
/// quorum, derived purely from the append-only log.
///
/// A `Returned` entry invalidates earlier `Approved` entries for every stage
/// ordered after its target up to and including the stage the return was
/// issued from; those stages need fresh approvals. The log itself is never
/// rewritten.
///
/// Approvals recorded via delegation credit the approver whose authority was
/// exercised (`original_approver`), so one covering user acting for two
/// absent approvers counts twice.
pub fn distinct_approvers(
    workflow: &Workflow,
    history: &[ApprovalHistory],
    stage: &Stage,
) -> HashSet<UserId> {
    let mut approvers = HashSet::new();

    for entry in history {
        match entry.action {
            ApprovalAction::Approved if entry.stage_id == stage.id => {
                let credited =
                    entry.original_approver.clone().unwrap_or_else(|| entry.acting_user.clone());
                approvers.insert(credited);
            }
            ApprovalAction::Returned => {
                let Some(target_id) = &entry.return_target_stage_id else {
                    continue;
                };
                let (Some(target), Some(acted_from)) =
                    (workflow.stage(target_id), workflow.stage(&entry.stage_id))
                else {
                    continue;
                };
                if target.order < stage.order && stage.order <= acted_from.order {
                    approvers.clear();
                }
            }
            _ => {}
        }
    }

    approvers
}
