use thiserror::Error;

use crate::domain::submission::SubmissionStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid submission transition from {from:?} to {to:?}")]
    InvalidTransition { from: SubmissionStatus, to: SubmissionStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
