use std::sync::Arc;

use chrono::{DateTime, Utc};

use formflow_core::domain::delegation::DelegationId;
use formflow_core::domain::submission::SubmissionId;
use formflow_core::domain::workflow::{Assignee, Stage, UserId, Workflow};
use formflow_core::workflow::delegation::resolve;
use formflow_core::IdentityProvider;
use formflow_db::repositories::DelegationRepository;

use crate::errors::EngineError;

/// One seat on a stage's approval bench: the user expected to act and the
/// approver whose authority that action exercises. The two differ only when
/// a delegation is in effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedApprover {
    pub actor: UserId,
    pub acts_for: UserId,
    pub delegation_id: Option<DelegationId>,
}

impl ResolvedApprover {
    pub fn is_delegated(&self) -> bool {
        self.delegation_id.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApproverSet {
    approvers: Vec<ResolvedApprover>,
}

impl ApproverSet {
    /// The grant under which `user` may act on this stage, preferring their
    /// own seat over any delegated one.
    pub fn authorization_for(&self, user: &UserId) -> Option<&ResolvedApprover> {
        self.approvers
            .iter()
            .find(|approver| &approver.actor == user && !approver.is_delegated())
            .or_else(|| self.approvers.iter().find(|approver| &approver.actor == user))
    }

    /// Users to notify, in resolution order, without duplicates.
    pub fn actors(&self) -> Vec<UserId> {
        let mut actors: Vec<UserId> = Vec::with_capacity(self.approvers.len());
        for approver in &self.approvers {
            if !actors.contains(&approver.actor) {
                actors.push(approver.actor.clone());
            }
        }
        actors
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedApprover> {
        self.approvers.iter()
    }

    pub fn len(&self) -> usize {
        self.approvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }
}

/// Expands a stage's assignee rows into the concrete set of users who may
/// act right now, applying per-approver delegation substitution.
pub struct AssigneeResolver {
    identity: Arc<dyn IdentityProvider>,
    delegations: Arc<dyn DelegationRepository>,
}

impl AssigneeResolver {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        delegations: Arc<dyn DelegationRepository>,
    ) -> Self {
        Self { identity, delegations }
    }

    /// Role rows expand through the identity provider (members sorted for
    /// determinism), user rows pass through, the union is deduplicated, and
    /// each approver is substituted by their active delegation if one
    /// applies at `as_of`. An empty result is a configuration error: a stage
    /// nobody can act on would strand the submission.
    pub async fn resolve_approvers(
        &self,
        workflow: &Workflow,
        stage: &Stage,
        submission_id: &SubmissionId,
        as_of: DateTime<Utc>,
    ) -> Result<ApproverSet, EngineError> {
        let mut base: Vec<UserId> = Vec::new();
        for assignee in &stage.assignees {
            match assignee {
                Assignee::User(user) => push_unique(&mut base, user.clone()),
                Assignee::Role(role) => {
                    let mut members: Vec<UserId> =
                        self.identity.resolve_role_members(role).await?.into_iter().collect();
                    members.sort_by(|a, b| a.0.cmp(&b.0));
                    for member in members {
                        push_unique(&mut base, member);
                    }
                }
            }
        }

        if base.is_empty() {
            return Err(EngineError::Configuration(format!(
                "stage `{}` resolves to no approvers",
                stage.id.0
            )));
        }

        let mut approvers = Vec::with_capacity(base.len());
        for user in base {
            let delegations = self.delegations.list_for_user(&user).await?;
            match resolve(&delegations, &user, submission_id, Some(&workflow.id), as_of) {
                Some(delegation) => {
                    tracing::debug!(
                        from = %user.0,
                        to = %delegation.to_user.0,
                        delegation_id = %delegation.id.0,
                        "delegation substitutes stage approver"
                    );
                    approvers.push(ResolvedApprover {
                        actor: delegation.to_user.clone(),
                        acts_for: user,
                        delegation_id: Some(delegation.id.clone()),
                    });
                }
                None => approvers.push(ResolvedApprover {
                    actor: user.clone(),
                    acts_for: user,
                    delegation_id: None,
                }),
            }
        }

        Ok(ApproverSet { approvers })
    }
}

fn push_unique(users: &mut Vec<UserId>, user: UserId) {
    if !users.contains(&user) {
        users.push(user);
    }
}
