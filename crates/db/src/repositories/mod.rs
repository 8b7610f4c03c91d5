use async_trait::async_trait;
use thiserror::Error;

use formflow_core::blocking::{BlockingEvaluation, BlockingPhase, BlockingRule};
use formflow_core::domain::delegation::Delegation;
use formflow_core::domain::history::{ApprovalHistory, HistoryId};
use formflow_core::domain::series::{DocumentSeries, NumberAudit, ProjectId, SeriesId};
use formflow_core::domain::submission::{Submission, SubmissionId};
use formflow_core::domain::workflow::{DocumentTypeId, UserId, Workflow, WorkflowId};

pub mod blocking;
pub mod delegation;
pub mod history;
pub mod memory;
pub mod series;
pub mod submission;
pub mod workflow;

pub use blocking::{SqlBlockingLogRepository, SqlBlockingRuleRepository};
pub use delegation::SqlDelegationRepository;
pub use history::SqlHistoryRepository;
pub use memory::{
    InMemoryBlockingLogRepository, InMemoryBlockingRuleRepository, InMemoryDelegationRepository,
    InMemoryHistoryRepository, InMemoryNumberAuditRepository, InMemorySequenceCounterStore,
    InMemorySeriesRepository, InMemorySubmissionRepository, InMemoryWorkflowRepository,
};
pub use series::{SqlNumberAuditRepository, SqlSeriesRepository};
pub use submission::SqlSubmissionRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale version for {entity} `{id}`")]
    Conflict { entity: String, id: String },
    #[error("data integrity violation: {0}")]
    Integrity(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Duplicate-key write, as reported by SQLite or by the in-memory
    /// doubles. Callers use this to tell a number collision apart from an
    /// infrastructure failure.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Integrity(_) => true,
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    /// The single active workflow for a document type. More than one active
    /// hit is an `Integrity` error, never a silent pick.
    async fn find_active_by_document_type(
        &self,
        document_type_id: &DocumentTypeId,
    ) -> Result<Option<Workflow>, RepositoryError>;

    async fn save(&self, workflow: Workflow) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DelegationRepository: Send + Sync {
    /// Every delegation row naming `from_user` as delegator, regardless of
    /// activity window; callers filter with the core resolver.
    async fn list_for_user(&self, from_user: &UserId) -> Result<Vec<Delegation>, RepositoryError>;

    /// Persists a delegation and returns it with its assigned insertion
    /// sequence.
    async fn save(&self, delegation: Delegation) -> Result<Delegation, RepositoryError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;

    async fn insert(&self, submission: Submission) -> Result<(), RepositoryError>;

    /// Writes a transition guarded by the optimistic-concurrency token: the
    /// row is updated only while its stored version equals
    /// `submission.version`, and the persisted version is bumped. A stale
    /// token yields `Conflict` and the caller re-reads and re-decides.
    async fn update_versioned(&self, submission: Submission)
        -> Result<Submission, RepositoryError>;

    async fn list_in_approval(&self) -> Result<Vec<Submission>, RepositoryError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Plain insert; history rows are immutable once written. Returns the
    /// entry with its assigned insertion sequence.
    async fn append(&self, entry: ApprovalHistory) -> Result<ApprovalHistory, RepositoryError>;

    /// Entries in insertion-sequence order, the order quorum derivation
    /// replays them in.
    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
        include_hidden: bool,
    ) -> Result<Vec<ApprovalHistory>, RepositoryError>;

    /// Soft delete: clears visibility, never the historical fact.
    async fn hide(&self, id: &HistoryId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SeriesRepository: Send + Sync {
    async fn find_by_id(&self, id: &SeriesId) -> Result<Option<DocumentSeries>, RepositoryError>;

    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        project_id: &ProjectId,
    ) -> Result<Vec<DocumentSeries>, RepositoryError>;

    async fn save(&self, series: DocumentSeries) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NumberAuditRepository: Send + Sync {
    /// Write-once insert; a duplicate (series, number) pair must fail.
    async fn append(&self, audit: NumberAudit) -> Result<(), RepositoryError>;

    async fn list_for_submission(
        &self,
        submission_id: &SubmissionId,
    ) -> Result<Vec<NumberAudit>, RepositoryError>;

    async fn number_exists(
        &self,
        series_id: &SeriesId,
        number: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BlockingRuleRepository: Send + Sync {
    async fn list_for(
        &self,
        document_type_id: &DocumentTypeId,
        phase: BlockingPhase,
    ) -> Result<Vec<BlockingRule>, RepositoryError>;

    async fn save(&self, rule: BlockingRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BlockingLogRepository: Send + Sync {
    async fn append(&self, evaluation: BlockingEvaluation) -> Result<(), RepositoryError>;
}

/// Durable per-(series, period) counter with atomic get-and-increment. Two
/// concurrent callers never receive the same value; gaps after a rollback
/// are acceptable, duplicates never are.
#[async_trait]
pub trait SequenceCounterStore: Send + Sync {
    async fn next_number(
        &self,
        series_id: &SeriesId,
        period_key: &str,
        sequence_start: i64,
    ) -> Result<i64, RepositoryError>;
}
