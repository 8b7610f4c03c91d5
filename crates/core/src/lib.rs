pub mod audit;
pub mod blocking;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod errors;
pub mod numbering;
pub mod workflow;

pub use blocking::{
    BlockingEvaluation, BlockingOutcome, BlockingPhase, BlockingRule, BlockingRuleId,
    RuleCondition, RuleSource,
};
pub use collaborators::{
    CollaboratorError, DatabaseValueSource, FieldValue, IdentityProvider, NotificationSender,
    SignatureProvider, SubmissionFieldReader,
};
pub use domain::delegation::{Delegation, DelegationId, DelegationScope};
pub use domain::history::{ApprovalAction, ApprovalHistory, HistoryId};
pub use domain::series::{
    DocumentSeries, GenerateOn, NumberAudit, ProjectId, ResetPolicy, SeriesCounter, SeriesId,
};
pub use domain::submission::{Submission, SubmissionId, SubmissionStatus};
pub use domain::workflow::{
    Assignee, DocumentTypeId, RoleId, Stage, StageId, UserId, Workflow, WorkflowId,
};
pub use errors::DomainError;
pub use workflow::gate::{GateBlock, GateDecision, GateInput, SignatureStatus};
