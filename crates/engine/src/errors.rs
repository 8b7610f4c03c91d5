use thiserror::Error;

use formflow_core::errors::DomainError;
use formflow_core::workflow::gate::GateBlock;
use formflow_core::CollaboratorError;
use formflow_db::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Broken wiring between configuration tables: missing workflow, missing
    /// series, a stage with no resolvable approver. Not recoverable by the
    /// caller.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("submission `{0}` not found")]
    SubmissionNotFound(String),

    #[error("user `{user}` is not an approver for submission `{submission}`")]
    Unauthorized { user: String, submission: String },

    /// A blocking rule matched during PreOpen or PreSubmit evaluation.
    #[error("blocked by rule `{rule_id}`: {message}")]
    Blocked { rule_id: String, message: String },

    /// The stage gate refused the action (amount window, pending signature).
    #[error("{}", .0.reason())]
    Gated(GateBlock),

    #[error("return target `{target}` does not precede the current stage of submission `{submission}`")]
    InvalidReturnTarget { submission: String, target: String },

    /// A rendered number already exists in the audit trail. The counter state
    /// is suspect; the draw is never silently repeated.
    #[error("document number `{number}` already issued for series `{series}`")]
    NumberCollision { series: String, number: String },

    #[error("gave up on submission `{submission}` after {attempts} conflicting attempts")]
    RetriesExhausted { submission: String, attempts: u32 },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
