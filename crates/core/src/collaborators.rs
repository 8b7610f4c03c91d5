//! Seams to the surrounding system. Implementations live outside this core;
//! tests ship in-memory fakes.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::submission::SubmissionId;
use crate::domain::workflow::{RoleId, StageId, UserId};
use crate::workflow::gate::SignatureStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("collaborator failure: {0}")]
pub struct CollaboratorError(pub String);

/// A value read from a form submission or a database lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(Decimal),
    Text(String),
}

impl FieldValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_role_members(
        &self,
        role: &RoleId,
    ) -> Result<HashSet<UserId>, CollaboratorError>;

    async fn display_name(&self, user: &UserId) -> Result<String, CollaboratorError>;
}

/// Fire-and-forget delivery; a failure here must never roll back a workflow
/// transition.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(
        &self,
        users: &[UserId],
        template_code: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn signature_status(
        &self,
        submission: &SubmissionId,
        stage: &StageId,
    ) -> Result<SignatureStatus, CollaboratorError>;
}

#[async_trait]
pub trait SubmissionFieldReader: Send + Sync {
    async fn field_value(
        &self,
        submission: &SubmissionId,
        field_code: &str,
    ) -> Result<Option<FieldValue>, CollaboratorError>;
}

/// Resolves `RuleSource::Database` lookups for blocking rules.
#[async_trait]
pub trait DatabaseValueSource: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<FieldValue>, CollaboratorError>;
}
