use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::submission::SubmissionId;
use crate::domain::workflow::{DocumentTypeId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// How often the sequence counter restarts from `sequence_start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    None,
    Yearly,
    Monthly,
    Daily,
}

/// Which workflow event stamps the document number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateOn {
    Submit,
    Approval,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSeries {
    pub id: SeriesId,
    pub project_id: ProjectId,
    pub document_type_id: DocumentTypeId,
    pub code: String,
    pub name: String,
    /// Template with `{SERIES}`, `{YYYY}`, `{YY}`, `{MM}`, `{DD}`, `{SEQ}`
    /// and `{SEQ:000...}` placeholders.
    pub template: String,
    pub sequence_start: i64,
    pub sequence_padding: u32,
    pub reset_policy: ResetPolicy,
    pub generate_on: GenerateOn,
    pub is_default: bool,
    pub active: bool,
}

/// Per-period counter row. Unique on (series, period key); the current number
/// only ever moves forward within a period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesCounter {
    pub series_id: SeriesId,
    pub period_key: String,
    pub current_number: i64,
}

/// Write-once record of every generated number, kept for diagnosing
/// duplicate-number incidents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberAudit {
    pub id: String,
    pub submission_id: SubmissionId,
    pub series_id: SeriesId,
    pub number: String,
    pub template: String,
    pub sequence: i64,
    pub period_key: String,
    pub trigger: GenerateOn,
    pub actor: UserId,
    pub generated_at: DateTime<Utc>,
}
