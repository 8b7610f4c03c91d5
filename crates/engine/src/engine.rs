use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use formflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use formflow_core::blocking::{BlockingOutcome, BlockingPhase};
use formflow_core::config::RetryConfig;
use formflow_core::domain::history::{ApprovalAction, ApprovalHistory, HistoryId};
use formflow_core::domain::series::GenerateOn;
use formflow_core::domain::submission::{Submission, SubmissionId, SubmissionStatus};
use formflow_core::domain::workflow::{Stage, StageId, UserId, Workflow};
use formflow_core::errors::DomainError;
use formflow_core::workflow::gate::{can_act, quorum_satisfied, GateDecision, GateInput};
use formflow_core::workflow::history::distinct_approvers;
use formflow_core::SignatureStatus;
use formflow_core::{NotificationSender, SignatureProvider, SubmissionFieldReader};
use formflow_db::repositories::{
    HistoryRepository, SubmissionRepository, WorkflowRepository,
};

use crate::assignees::{AssigneeResolver, ResolvedApprover};
use crate::blocking::BlockingService;
use crate::errors::EngineError;
use crate::numbering::NumberingService;

/// Everything the engine orchestrates over. Repositories and collaborators
/// are trait objects so tests wire in-memory doubles.
pub struct EngineServices {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub assignees: Arc<AssigneeResolver>,
    pub numbering: Arc<NumberingService>,
    pub blocking: Arc<BlockingService>,
    pub signatures: Arc<dyn SignatureProvider>,
    pub fields: Arc<dyn SubmissionFieldReader>,
    pub notifications: Arc<dyn NotificationSender>,
    pub audit: Arc<dyn AuditSink>,
    pub retry: RetryConfig,
}

/// Drives submissions through their approval workflow: Submit, Approve,
/// Reject and Return, plus the read-side queries.
///
/// Every verb runs an optimistic-concurrency loop: read, decide, write with
/// the version token, and on a stale token re-read and re-decide from
/// scratch, bounded by the configured retry policy.
pub struct ApprovalWorkflowEngine {
    svc: EngineServices,
}

enum Verb {
    Approve,
    Reject,
    Return(StageId),
}

impl Verb {
    fn action(&self) -> ApprovalAction {
        match self {
            Self::Approve => ApprovalAction::Approved,
            Self::Reject => ApprovalAction::Rejected,
            Self::Return(_) => ApprovalAction::Returned,
        }
    }

    fn target_status(&self) -> SubmissionStatus {
        match self {
            Self::Approve => SubmissionStatus::Approved,
            Self::Reject => SubmissionStatus::Rejected,
            Self::Return(_) => SubmissionStatus::Returned,
        }
    }
}

impl ApprovalWorkflowEngine {
    pub fn new(services: EngineServices) -> Self {
        Self { svc: services }
    }

    pub fn numbering(&self) -> Arc<NumberingService> {
        self.svc.numbering.clone()
    }

    pub fn blocking(&self) -> Arc<BlockingService> {
        self.svc.blocking.clone()
    }

    /// Creates a new draft after the document type's PreOpen blocking rules
    /// allow it.
    pub async fn create_draft(&self, submission: Submission) -> Result<Submission, EngineError> {
        if submission.status != SubmissionStatus::Draft {
            return Err(EngineError::Configuration(format!(
                "new submission `{}` must start in Draft",
                submission.id.0
            )));
        }

        let outcome = self
            .svc
            .blocking
            .evaluate(&submission.document_type_id, BlockingPhase::PreOpen, None)
            .await?;
        ensure_allowed(outcome)?;

        self.svc.submissions.insert(submission.clone()).await?;
        tracing::info!(submission_id = %submission.id.0, "draft created");
        self.svc.audit.emit(AuditEvent::new(
            Some(submission.id.clone()),
            Uuid::new_v4().to_string(),
            "workflow.draft_created",
            AuditCategory::Workflow,
            submission.created_by.0.clone(),
            AuditOutcome::Success,
        ));

        Ok(submission)
    }

    /// Sends a Draft (or a Returned submission being resubmitted) into
    /// approval: PreSubmit blocking rules, workflow binding, Submit-trigger
    /// numbering, entry-stage routing, and approver notification. A workflow
    /// with no stages approves outright.
    pub async fn submit(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        let max_attempts = self.svc.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.try_submit(submission_id, actor, now).await {
                Err(EngineError::Repository(error)) if error.is_conflict() => {
                    if attempt == max_attempts {
                        return Err(EngineError::RetriesExhausted {
                            submission: submission_id.0.clone(),
                            attempts: max_attempts,
                        });
                    }
                    self.backoff(submission_id, attempt).await;
                }
                other => return other,
            }
        }
        unreachable!("retry loop always returns")
    }

    pub async fn approve(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        self.act(submission_id, actor, comments, Verb::Approve, now).await
    }

    pub async fn reject(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        self.act(submission_id, actor, comments, Verb::Reject, now).await
    }

    pub async fn return_to(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        target_stage_id: &StageId,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        self.act(submission_id, actor, comments, Verb::Return(target_stage_id.clone()), now).await
    }

    pub async fn history_for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<ApprovalHistory>, EngineError> {
        Ok(self.svc.history.list_for_submission(submission_id, false).await?)
    }

    /// Submissions awaiting action where `user` sits on the current stage's
    /// resolved approver bench. Submissions whose configuration no longer
    /// resolves are skipped, not fatal, so one broken workflow does not
    /// empty everyone's inbox.
    pub async fn pending_inbox_for_user(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Submission>, EngineError> {
        let mut inbox = Vec::new();
        for submission in self.svc.submissions.list_in_approval().await? {
            let (Some(workflow_id), Some(stage_id)) =
                (&submission.workflow_id, &submission.current_stage_id)
            else {
                continue;
            };
            let Some(workflow) = self.svc.workflows.find_by_id(workflow_id).await? else {
                continue;
            };
            let Some(stage) = workflow.stage(stage_id) else {
                continue;
            };

            match self.svc.assignees.resolve_approvers(&workflow, stage, &submission.id, now).await
            {
                Ok(approvers) if approvers.authorization_for(user).is_some() => {
                    inbox.push(submission);
                }
                Ok(_) => {}
                Err(EngineError::Configuration(reason)) => {
                    tracing::warn!(
                        submission_id = %submission.id.0,
                        %reason,
                        "skipping unresolvable submission in inbox"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(inbox)
    }

    async fn try_submit(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        let Some(mut submission) = self.svc.submissions.find_by_id(submission_id).await? else {
            return Err(EngineError::SubmissionNotFound(submission_id.0.clone()));
        };
        if !matches!(submission.status, SubmissionStatus::Draft | SubmissionStatus::Returned) {
            return Err(DomainError::InvalidTransition {
                from: submission.status,
                to: SubmissionStatus::InApproval,
            }
            .into());
        }

        let outcome = self
            .svc
            .blocking
            .evaluate(&submission.document_type_id, BlockingPhase::PreSubmit, Some(&submission.id))
            .await?;
        ensure_allowed(outcome)?;

        let workflow = match &submission.workflow_id {
            Some(id) => self.svc.workflows.find_by_id(id).await?.ok_or_else(|| {
                EngineError::Configuration(format!("workflow `{}` no longer exists", id.0))
            })?,
            None => self
                .svc
                .workflows
                .find_active_by_document_type(&submission.document_type_id)
                .await?
                .ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "no active workflow for document type `{}`",
                        submission.document_type_id.0
                    ))
                })?,
        };
        submission.workflow_id = Some(workflow.id.clone());

        if let Some(issued) =
            self.svc.numbering.generate(&submission, GenerateOn::Submit, actor, now).await?
        {
            submission.document_number = Some(issued.number);
        }

        let resuming = submission.status == SubmissionStatus::Returned;
        let mut pending_stage: Option<&Stage> = None;
        match workflow.entry_stage() {
            Some(entry) => {
                submission.transition_to(SubmissionStatus::InApproval)?;
                // Resubmission resumes at the return target, not the entry.
                if !resuming || submission.current_stage_id.is_none() {
                    submission.current_stage_id = Some(entry.id.clone());
                }
                let stage_id =
                    submission.current_stage_id.clone().unwrap_or_else(|| entry.id.clone());
                let stage = workflow.stage(&stage_id).ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "stage `{}` is not part of workflow `{}`",
                        stage_id.0, workflow.id.0
                    ))
                })?;
                pending_stage = Some(stage);
            }
            None => {
                submission.transition_to(SubmissionStatus::Approved)?;
                if let Some(issued) = self
                    .svc
                    .numbering
                    .generate(&submission, GenerateOn::Approval, actor, now)
                    .await?
                {
                    submission.document_number = Some(issued.number);
                }
            }
        }
        submission.updated_at = now;

        // A stage nobody can act on must fail before the write, not strand
        // the submission afterwards.
        let approvers = match pending_stage {
            Some(stage) => Some(
                self.svc
                    .assignees
                    .resolve_approvers(&workflow, stage, &submission.id, now)
                    .await?,
            ),
            None => None,
        };

        let saved = self.svc.submissions.update_versioned(submission).await?;

        tracing::info!(
            submission_id = %saved.id.0,
            status = ?saved.status,
            stage = saved.current_stage_id.as_ref().map(|s| s.0.as_str()).unwrap_or("-"),
            "submission entered workflow"
        );
        if let Some(approvers) = &approvers {
            self.notify_quiet(&approvers.actors(), "approval.requested", &saved).await;
        } else {
            self.notify_quiet(
                std::slice::from_ref(&saved.created_by),
                "submission.approved",
                &saved,
            )
            .await;
        }
        self.svc.audit.emit(
            AuditEvent::new(
                Some(saved.id.clone()),
                Uuid::new_v4().to_string(),
                "workflow.submitted",
                AuditCategory::Workflow,
                actor.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("status", format!("{:?}", saved.status)),
        );

        Ok(saved)
    }

    async fn act(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        comments: Option<String>,
        verb: Verb,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        let max_attempts = self.svc.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.try_act(submission_id, actor, &comments, &verb, now).await {
                Err(EngineError::Repository(error)) if error.is_conflict() => {
                    if attempt == max_attempts {
                        return Err(EngineError::RetriesExhausted {
                            submission: submission_id.0.clone(),
                            attempts: max_attempts,
                        });
                    }
                    self.backoff(submission_id, attempt).await;
                }
                other => return other,
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn try_act(
        &self,
        submission_id: &SubmissionId,
        actor: &UserId,
        comments: &Option<String>,
        verb: &Verb,
        now: DateTime<Utc>,
    ) -> Result<Submission, EngineError> {
        let Some(submission) = self.svc.submissions.find_by_id(submission_id).await? else {
            return Err(EngineError::SubmissionNotFound(submission_id.0.clone()));
        };
        if !matches!(
            submission.status,
            SubmissionStatus::InApproval | SubmissionStatus::Returned
        ) {
            return Err(DomainError::InvalidTransition {
                from: submission.status,
                to: verb.target_status(),
            }
            .into());
        }

        let workflow = self.load_workflow(&submission).await?;
        let stage = self.current_stage(&workflow, &submission)?;

        let approvers = self
            .svc
            .assignees
            .resolve_approvers(&workflow, stage, &submission.id, now)
            .await?;
        let Some(grant) = approvers.authorization_for(actor).cloned() else {
            // Authorization failures leave no history trace.
            return Err(EngineError::Unauthorized {
                user: actor.0.clone(),
                submission: submission.id.0.clone(),
            });
        };

        let action = verb.action();
        let input = self.gate_input(&submission, stage).await?;
        if let GateDecision::Blocked(block) = can_act(stage, action, &input) {
            return Err(EngineError::Gated(block));
        }

        let mut updated = submission.clone();
        updated.updated_at = now;
        let mut return_target = None;
        let mut advanced_to: Option<StageId> = None;
        let mut finalized = false;

        match verb {
            Verb::Reject => {
                updated.transition_to(SubmissionStatus::Rejected)?;
            }
            Verb::Return(target_id) => {
                let Some(target) = workflow.stage(target_id) else {
                    return Err(EngineError::InvalidReturnTarget {
                        submission: submission.id.0.clone(),
                        target: target_id.0.clone(),
                    });
                };
                if target.order >= stage.order {
                    return Err(EngineError::InvalidReturnTarget {
                        submission: submission.id.0.clone(),
                        target: target_id.0.clone(),
                    });
                }
                updated.transition_to(SubmissionStatus::Returned)?;
                updated.current_stage_id = Some(target.id.clone());
                return_target = Some(target.id.clone());
            }
            Verb::Approve => {
                let history =
                    self.svc.history.list_for_submission(&submission.id, false).await?;
                let mut credited = distinct_approvers(&workflow, &history, stage);
                credited.insert(grant.acts_for.clone());

                if quorum_satisfied(stage, credited.len()) {
                    if workflow.is_terminal_stage(stage) {
                        updated.transition_to(SubmissionStatus::Approved)?;
                        finalized = true;
                    } else {
                        let next = workflow.next_stage_after(stage).ok_or_else(|| {
                            EngineError::Configuration(format!(
                                "stage `{}` has no successor",
                                stage.id.0
                            ))
                        })?;
                        updated.transition_to(SubmissionStatus::InApproval)?;
                        updated.current_stage_id = Some(next.id.clone());
                        advanced_to = Some(next.id.clone());
                    }
                } else {
                    // Quorum still open; the approval is recorded but the
                    // submission stays at this stage.
                    updated.transition_to(SubmissionStatus::InApproval)?;
                }
            }
        }

        if finalized {
            if let Some(issued) =
                self.svc.numbering.generate(&updated, GenerateOn::Approval, actor, now).await?
            {
                updated.document_number = Some(issued.number);
            }
        }

        // The durable record lands first; the version-checked save is the
        // commit point. A stale token hides the provisional record again, so
        // the retry re-decides against a log the version token kept honest.
        let entry = self
            .svc
            .history
            .append(ApprovalHistory {
                id: HistoryId(Uuid::new_v4().to_string()),
                seq: 0,
                submission_id: submission.id.clone(),
                stage_id: stage.id.clone(),
                action,
                acting_user: actor.clone(),
                original_approver: grant.is_delegated().then(|| grant.acts_for.clone()),
                delegation_id: grant.delegation_id.clone(),
                return_target_stage_id: return_target.clone(),
                comments: comments.clone(),
                recorded_at: now,
                hidden: false,
            })
            .await?;

        let saved = match self.svc.submissions.update_versioned(updated).await {
            Ok(saved) => saved,
            Err(error) => {
                if error.is_conflict() {
                    if let Err(hide_error) = self.svc.history.hide(&entry.id).await {
                        tracing::warn!(
                            submission_id = %submission.id.0,
                            entry = %entry.id.0,
                            %hide_error,
                            "could not discard history row from a conflicted save"
                        );
                    }
                }
                return Err(error.into());
            }
        };

        tracing::info!(
            submission_id = %saved.id.0,
            action = ?action,
            actor = %actor.0,
            stage = %stage.id.0,
            status = ?saved.status,
            "workflow action recorded"
        );
        self.post_action_notifications(&workflow, &saved, verb, &advanced_to, finalized, now)
            .await;
        self.emit_action_audit(&saved, actor, verb, &grant, &advanced_to, finalized);

        Ok(saved)
    }

    async fn load_workflow(&self, submission: &Submission) -> Result<Workflow, EngineError> {
        let workflow_id = submission.workflow_id.as_ref().ok_or_else(|| {
            EngineError::Configuration(format!(
                "submission `{}` is in approval without a workflow",
                submission.id.0
            ))
        })?;
        self.svc.workflows.find_by_id(workflow_id).await?.ok_or_else(|| {
            EngineError::Configuration(format!("workflow `{}` no longer exists", workflow_id.0))
        })
    }

    fn current_stage<'w>(
        &self,
        workflow: &'w Workflow,
        submission: &Submission,
    ) -> Result<&'w Stage, EngineError> {
        let stage_id = submission.current_stage_id.as_ref().ok_or_else(|| {
            EngineError::Configuration(format!(
                "submission `{}` is in approval without a current stage",
                submission.id.0
            ))
        })?;
        workflow.stage(stage_id).ok_or_else(|| {
            EngineError::Configuration(format!(
                "stage `{}` is not part of workflow `{}`",
                stage_id.0, workflow.id.0
            ))
        })
    }

    async fn gate_input(
        &self,
        submission: &Submission,
        stage: &Stage,
    ) -> Result<GateInput, EngineError> {
        let amount_value = match &stage.amount_field_code {
            Some(code) => self
                .svc
                .fields
                .field_value(&submission.id, code)
                .await?
                .and_then(|value| value.as_decimal()),
            None => None,
        };
        let signature_status = if stage.requires_signature {
            self.svc.signatures.signature_status(&submission.id, &stage.id).await?
        } else {
            SignatureStatus::NotRequired
        };
        Ok(GateInput { amount_value, signature_status })
    }

    async fn post_action_notifications(
        &self,
        workflow: &Workflow,
        saved: &Submission,
        verb: &Verb,
        advanced_to: &Option<StageId>,
        finalized: bool,
        now: DateTime<Utc>,
    ) {
        match verb {
            Verb::Approve if finalized => {
                self.notify_quiet(
                    std::slice::from_ref(&saved.created_by),
                    "submission.approved",
                    saved,
                )
                .await;
            }
            Verb::Approve => {
                let Some(next_id) = advanced_to else { return };
                let Some(next_stage) = workflow.stage(next_id) else { return };
                match self
                    .svc
                    .assignees
                    .resolve_approvers(workflow, next_stage, &saved.id, now)
                    .await
                {
                    Ok(approvers) => {
                        self.notify_quiet(&approvers.actors(), "approval.requested", saved).await;
                    }
                    Err(error) => {
                        tracing::warn!(
                            submission_id = %saved.id.0,
                            stage = %next_id.0,
                            %error,
                            "could not resolve next-stage approvers for notification"
                        );
                    }
                }
            }
            Verb::Reject => {
                self.notify_quiet(
                    std::slice::from_ref(&saved.created_by),
                    "submission.rejected",
                    saved,
                )
                .await;
            }
            Verb::Return(_) => {
                self.notify_quiet(
                    std::slice::from_ref(&saved.created_by),
                    "submission.returned",
                    saved,
                )
                .await;
            }
        }
    }

    fn emit_action_audit(
        &self,
        saved: &Submission,
        actor: &UserId,
        verb: &Verb,
        grant: &ResolvedApprover,
        advanced_to: &Option<StageId>,
        finalized: bool,
    ) {
        let event_type = match verb {
            Verb::Approve => "workflow.approval_recorded",
            Verb::Reject => "workflow.rejected",
            Verb::Return(_) => "workflow.returned",
        };
        let mut event = AuditEvent::new(
            Some(saved.id.clone()),
            Uuid::new_v4().to_string(),
            event_type,
            AuditCategory::Workflow,
            actor.0.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("status", format!("{:?}", saved.status))
        .with_metadata("finalized", finalized.to_string());
        if let Some(next) = advanced_to {
            event = event.with_metadata("advanced_to", next.0.clone());
        }
        if grant.is_delegated() {
            event = event.with_metadata("acts_for", grant.acts_for.0.clone());
        }
        self.svc.audit.emit(event);
    }

    /// Delivery is best effort: a failed notification is logged and the
    /// transition stands.
    async fn notify_quiet(&self, users: &[UserId], template_code: &str, saved: &Submission) {
        if users.is_empty() {
            return;
        }
        let mut data = BTreeMap::new();
        data.insert("submission_id".to_string(), saved.id.0.clone());
        if let Some(number) = &saved.document_number {
            data.insert("document_number".to_string(), number.clone());
        }
        if let Err(error) = self.svc.notifications.notify(users, template_code, &data).await {
            tracing::warn!(
                submission_id = %saved.id.0,
                template = template_code,
                %error,
                "notification delivery failed"
            );
        }
    }

    async fn backoff(&self, submission_id: &SubmissionId, attempt: u32) {
        tracing::debug!(
            submission_id = %submission_id.0,
            attempt,
            "version conflict, re-reading and retrying"
        );
        tokio::time::sleep(Duration::from_millis(self.svc.retry.backoff_ms)).await;
    }
}

fn ensure_allowed(outcome: BlockingOutcome) -> Result<(), EngineError> {
    match outcome {
        BlockingOutcome::Allow => Ok(()),
        BlockingOutcome::Block { rule_id, message } => {
            Err(EngineError::Blocked { rule_id: rule_id.0, message })
        }
    }
}
