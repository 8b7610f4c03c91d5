//! In-memory repository doubles for engine and service tests.
//!
//! Each double honors the same contract as its SQL counterpart, including
//! the optimistic-concurrency check on submissions and the write-once rule
//! for history and number audits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::RwLock;

use formflow_core::blocking::{BlockingEvaluation, BlockingPhase, BlockingRule};
use formflow_core::domain::delegation::Delegation;
use formflow_core::domain::history::{ApprovalHistory, HistoryId};
use formflow_core::domain::series::{DocumentSeries, NumberAudit, ProjectId, SeriesId};
use formflow_core::domain::submission::{Submission, SubmissionId, SubmissionStatus};
use formflow_core::domain::workflow::{DocumentTypeId, UserId, Workflow, WorkflowId};

use super::{
    BlockingLogRepository, BlockingRuleRepository, DelegationRepository, HistoryRepository,
    NumberAuditRepository, RepositoryError, SequenceCounterStore, SeriesRepository,
    SubmissionRepository, WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn find_active_by_document_type(
        &self,
        document_type_id: &DocumentTypeId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = self.workflows.read().await;
        let hits: Vec<&Workflow> = workflows
            .values()
            .filter(|w| w.document_type_id == *document_type_id && w.active)
            .collect();

        if hits.len() > 1 {
            return Err(RepositoryError::Integrity(format!(
                "document type `{}` has {} active workflows, expected at most one",
                document_type_id.0,
                hits.len()
            )));
        }

        Ok(hits.first().map(|w| (*w).clone()))
    }

    async fn save(&self, workflow: Workflow) -> Result<(), RepositoryError> {
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDelegationRepository {
    delegations: RwLock<Vec<Delegation>>,
    next_seq: AtomicI64,
}

impl InMemoryDelegationRepository {
    pub fn new() -> Self {
        Self { delegations: RwLock::new(Vec::new()), next_seq: AtomicI64::new(1) }
    }
}

#[async_trait::async_trait]
impl DelegationRepository for InMemoryDelegationRepository {
    async fn list_for_user(&self, from_user: &UserId) -> Result<Vec<Delegation>, RepositoryError> {
        Ok(self
            .delegations
            .read()
            .await
            .iter()
            .filter(|d| d.from_user == *from_user)
            .cloned()
            .collect())
    }

    async fn save(&self, delegation: Delegation) -> Result<Delegation, RepositoryError> {
        let assigned =
            Delegation { seq: self.next_seq.fetch_add(1, Ordering::SeqCst), ..delegation };
        self.delegations.write().await.push(assigned.clone());
        Ok(assigned)
    }
}

#[derive(Default)]
pub struct InMemorySubmissionRepository {
    submissions: RwLock<HashMap<SubmissionId, Submission>>,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SubmissionRepository for InMemorySubmissionRepository {
    async fn find_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        Ok(self.submissions.read().await.get(id).cloned())
    }

    async fn insert(&self, submission: Submission) -> Result<(), RepositoryError> {
        let mut submissions = self.submissions.write().await;
        if submissions.contains_key(&submission.id) {
            return Err(RepositoryError::Integrity(format!(
                "submission `{}` already exists",
                submission.id.0
            )));
        }
        submissions.insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn update_versioned(
        &self,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let mut submissions = self.submissions.write().await;
        let stored = submissions.get(&submission.id);

        match stored {
            Some(existing) if existing.version == submission.version => {
                let updated = Submission { version: submission.version + 1, ..submission };
                submissions.insert(updated.id.clone(), updated.clone());
                Ok(updated)
            }
            _ => Err(RepositoryError::Conflict {
                entity: "submission".to_string(),
                id: submission.id.0.clone(),
            }),
        }
    }

    async fn list_in_approval(&self) -> Result<Vec<Submission>, RepositoryError> {
        Ok(self
            .submissions
            .read()
            .await
            .values()
            .filter(|s| {
                matches!(s.status, SubmissionStatus::InApproval | SubmissionStatus::Returned)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryHistoryRepository {
    entries: RwLock<Vec<ApprovalHistory>>,
    next_seq: AtomicI64,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()), next_seq: AtomicI64::new(1) }
    }
}

#[async_trait::async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entry: ApprovalHistory) -> Result<ApprovalHistory, RepositoryError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(RepositoryError::Integrity(format!(
                "history entry `{}` already exists",
                entry.id.0
            )));
        }
        let assigned =
            ApprovalHistory { seq: self.next_seq.fetch_add(1, Ordering::SeqCst), ..entry };
        entries.push(assigned.clone());
        Ok(assigned)
    }

    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
        include_hidden: bool,
    ) -> Result<Vec<ApprovalHistory>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.submission_id == *submission_id && (include_hidden || !e.hidden))
            .cloned()
            .collect())
    }

    async fn hide(&self, id: &HistoryId) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            if entry.id == *id {
                entry.hidden = true;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySeriesRepository {
    series: RwLock<HashMap<SeriesId, DocumentSeries>>,
}

impl InMemorySeriesRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SeriesRepository for InMemorySeriesRepository {
    async fn find_by_id(&self, id: &SeriesId) -> Result<Option<DocumentSeries>, RepositoryError> {
        Ok(self.series.read().await.get(id).cloned())
    }

    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentSeries>, RepositoryError> {
        Ok(self
            .series
            .read()
            .await
            .values()
            .filter(|s| s.document_type_id == *document_type_id && s.project_id == *project_id)
            .cloned()
            .collect())
    }

    async fn save(&self, series: DocumentSeries) -> Result<(), RepositoryError> {
        self.series.write().await.insert(series.id.clone(), series);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNumberAuditRepository {
    audits: RwLock<Vec<NumberAudit>>,
}

impl InMemoryNumberAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NumberAuditRepository for InMemoryNumberAuditRepository {
    async fn append(&self, audit: NumberAudit) -> Result<(), RepositoryError> {
        let mut audits = self.audits.write().await;
        if audits.iter().any(|a| a.series_id == audit.series_id && a.number == audit.number) {
            return Err(RepositoryError::Integrity(format!(
                "number `{}` already issued for series `{}`",
                audit.number, audit.series_id.0
            )));
        }
        audits.push(audit);
        Ok(())
    }

    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<NumberAudit>, RepositoryError> {
        Ok(self
            .audits
            .read()
            .await
            .iter()
            .filter(|a| a.submission_id == *submission_id)
            .cloned()
            .collect())
    }

    async fn number_exists(
        &self,
        series_id: &SeriesId,
        number: &str,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .audits
            .read()
            .await
            .iter()
            .any(|a| a.series_id == *series_id && a.number == number))
    }
}

#[derive(Default)]
pub struct InMemoryBlockingRuleRepository {
    rules: RwLock<Vec<BlockingRule>>,
}

impl InMemoryBlockingRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlockingRuleRepository for InMemoryBlockingRuleRepository {
    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        phase: BlockingPhase,
    ) -> Result<Vec<BlockingRule>, RepositoryError> {
        let mut hits: Vec<BlockingRule> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.document_type_id == *document_type_id && r.phase == phase && r.active)
            .cloned()
            .collect();
        formflow_core::blocking::order_rules(&mut hits);
        Ok(hits)
    }

    async fn save(&self, rule: BlockingRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBlockingLogRepository {
    evaluations: RwLock<Vec<BlockingEvaluation>>,
}

impl InMemoryBlockingLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<BlockingEvaluation> {
        self.evaluations.read().await.clone()
    }
}

#[async_trait::async_trait]
impl BlockingLogRepository for InMemoryBlockingLogRepository {
    async fn append(&self, evaluation: BlockingEvaluation) -> Result<(), RepositoryError> {
        self.evaluations.write().await.push(evaluation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySequenceCounterStore {
    counters: RwLock<HashMap<(SeriesId, String), i64>>,
}

impl InMemorySequenceCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SequenceCounterStore for InMemorySequenceCounterStore {
    async fn next_number(
        &self,
        series_id: &SeriesId,
        period_key: &str,
        sequence_start: i64,
    ) -> Result<i64, RepositoryError> {
        let mut counters = self.counters.write().await;
        let current = counters
            .entry((series_id.clone(), period_key.to_string()))
            .or_insert(sequence_start - 1);
        *current += 1;
        Ok(*current)
    }
}
