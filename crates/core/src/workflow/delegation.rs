use chrono::{DateTime, Utc};

use crate::domain::delegation::{Delegation, DelegationScope};
use crate::domain::submission::SubmissionId;
use crate::domain::workflow::{UserId, WorkflowId};

/// Finds the delegation redirecting `from_user`'s authority within exactly
/// one scope. Scopes are never inherited here; precedence across scopes is
/// owned by [`resolve`].
///
/// When several active delegations match, the latest `start_date` wins; equal
/// start dates fall back to the highest insertion `seq`.
pub fn resolve_within_scope<'a>(
    delegations: &'a [Delegation],
    from_user: &UserId,
    scope: &DelegationScope,
    as_of: DateTime<Utc>,
) -> Option<&'a Delegation> {
    delegations
        .iter()
        .filter(|delegation| {
            &delegation.from_user == from_user
                && &delegation.scope == scope
                && delegation.is_active_at(as_of)
        })
        .max_by_key(|delegation| (delegation.start_date, delegation.seq))
}

/// Chain-of-responsibility across scopes: Document first, then Workflow,
/// then Global, stopping at the first active hit.
pub fn resolve<'a>(
    delegations: &'a [Delegation],
    from_user: &UserId,
    submission_id: &SubmissionId,
    workflow_id: Option<&WorkflowId>,
    as_of: DateTime<Utc>,
) -> Option<&'a Delegation> {
    let document_scope = DelegationScope::Document(submission_id.clone());
    if let Some(hit) = resolve_within_scope(delegations, from_user, &document_scope, as_of) {
        return Some(hit);
    }

    if let Some(workflow_id) = workflow_id {
        let workflow_scope = DelegationScope::Workflow(workflow_id.clone());
        if let Some(hit) = resolve_within_scope(delegations, from_user, &workflow_scope, as_of) {
            return Some(hit);
        }
    }

    resolve_within_scope(delegations, from_user, &DelegationScope::Global, as_of)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::delegation::{Delegation, DelegationId, DelegationScope};
    use crate::domain::submission::SubmissionId;
    use crate::domain::workflow::{UserId, WorkflowId};

    use super::{resolve, resolve_within_scope};

    fn delegation(id: &str, seq: i64, scope: DelegationScope, start_offset_days: i64) -> Delegation {
        let start = Utc::now() - Duration::days(10) + Duration::days(start_offset_days);
        Delegation {
            id: DelegationId(id.to_string()),
            seq,
            from_user: UserId("u-away".to_string()),
            to_user: UserId(format!("u-cover-{id}")),
            scope,
            start_date: start,
            end_date: start + Duration::days(30),
            active: true,
            deleted: false,
        }
    }

    #[test]
    fn inactive_window_never_substitutes_even_when_flagged_active() {
        let mut expired = delegation("d-1", 1, DelegationScope::Global, 0);
        expired.end_date = Utc::now() - Duration::days(1);
        assert!(expired.active);

        let delegations = [expired];
        let hit = resolve_within_scope(
            &delegations,
            &UserId("u-away".to_string()),
            &DelegationScope::Global,
            Utc::now(),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn latest_start_date_wins_within_a_scope() {
        let delegations = vec![
            delegation("d-old", 1, DelegationScope::Global, 0),
            delegation("d-new", 2, DelegationScope::Global, 3),
        ];

        let hit = resolve_within_scope(
            &delegations,
            &UserId("u-away".to_string()),
            &DelegationScope::Global,
            Utc::now(),
        )
        .expect("one delegation should match");
        assert_eq!(hit.id.0, "d-new");
    }

    #[test]
    fn equal_start_dates_break_ties_on_insertion_seq() {
        let first = delegation("d-first", 1, DelegationScope::Global, 2);
        let mut second = delegation("d-second", 2, DelegationScope::Global, 2);
        second.start_date = first.start_date;
        second.end_date = first.end_date;

        let delegations = [first, second];
        let hit = resolve_within_scope(
            &delegations,
            &UserId("u-away".to_string()),
            &DelegationScope::Global,
            Utc::now(),
        )
        .expect("tie should resolve");
        assert_eq!(hit.id.0, "d-second");
    }

    #[test]
    fn document_scope_is_preferred_over_workflow_and_global() {
        let submission = SubmissionId("sub-1".to_string());
        let workflow = WorkflowId("wf-1".to_string());
        let delegations = vec![
            delegation("d-global", 1, DelegationScope::Global, 5),
            delegation("d-wf", 2, DelegationScope::Workflow(workflow.clone()), 4),
            delegation("d-doc", 3, DelegationScope::Document(submission.clone()), 0),
        ];

        let hit = resolve(
            &delegations,
            &UserId("u-away".to_string()),
            &submission,
            Some(&workflow),
            Utc::now(),
        )
        .expect("document scope should win");
        assert_eq!(hit.id.0, "d-doc");
    }

    #[test]
    fn document_scoped_delegation_is_invisible_to_other_documents() {
        let delegations =
            vec![delegation("d-doc", 1, DelegationScope::Document(SubmissionId("sub-1".into())), 0)];

        let hit = resolve(
            &delegations,
            &UserId("u-away".to_string()),
            &SubmissionId("sub-2".to_string()),
            None,
            Utc::now(),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn workflow_scope_falls_back_to_global() {
        let workflow = WorkflowId("wf-1".to_string());
        let delegations = vec![delegation("d-global", 1, DelegationScope::Global, 0)];

        let hit = resolve(
            &delegations,
            &UserId("u-away".to_string()),
            &SubmissionId("sub-1".to_string()),
            Some(&workflow),
            Utc::now(),
        )
        .expect("global fallback");
        assert_eq!(hit.id.0, "d-global");
    }
}
