use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use formflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use formflow_core::domain::series::{GenerateOn, NumberAudit, SeriesId};
use formflow_core::domain::submission::Submission;
use formflow_core::domain::workflow::UserId;
use formflow_core::numbering::{period_key, render_number, select_series};
use formflow_db::repositories::{NumberAuditRepository, SequenceCounterStore, SeriesRepository};

use crate::errors::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedNumber {
    pub number: String,
    pub series_id: SeriesId,
    pub sequence: i64,
}

/// Draws document numbers: series selection, period-keyed counter draw,
/// template rendering, and the write-once audit record.
pub struct NumberingService {
    series: Arc<dyn SeriesRepository>,
    counter: Arc<dyn SequenceCounterStore>,
    audits: Arc<dyn NumberAuditRepository>,
    audit_sink: Arc<dyn AuditSink>,
}

impl NumberingService {
    pub fn new(
        series: Arc<dyn SeriesRepository>,
        counter: Arc<dyn SequenceCounterStore>,
        audits: Arc<dyn NumberAuditRepository>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self { series, counter, audits, audit_sink }
    }

    /// Generates a number for `submission` if its selected series fires on
    /// `trigger`.
    ///
    /// Idempotent per submission lifetime: a submission that already carries
    /// a number gets `None`, and a number already reserved in the audit trail
    /// for this submission is reused, never redrawn. A rendered number that
    /// an unrelated submission owns is a fatal collision; the draw is not
    /// retried with a new sequence.
    pub async fn generate(
        &self,
        submission: &Submission,
        trigger: GenerateOn,
        actor: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedNumber>, EngineError> {
        if submission.document_number.is_some() {
            return Ok(None);
        }

        // A draw can land in the audit trail while the submission save that
        // should carry it conflicts or crashes. The reservation stands.
        let reserved = self.audits.list_for_submission(&submission.id).await?;
        if let Some(existing) = reserved.into_iter().next() {
            tracing::debug!(
                submission_id = %submission.id.0,
                number = %existing.number,
                "reusing reserved document number"
            );
            return Ok(Some(IssuedNumber {
                number: existing.number,
                series_id: existing.series_id,
                sequence: existing.sequence,
            }));
        }

        let candidates = self
            .series
            .list_for(&submission.document_type_id, &submission.project_id)
            .await?;
        let Some(series) = select_series(&candidates) else {
            return Err(EngineError::Configuration(format!(
                "no active document series for document type `{}` in project `{}`",
                submission.document_type_id.0, submission.project_id.0
            )));
        };

        if series.generate_on != trigger {
            return Ok(None);
        }

        let period = period_key(series.reset_policy, now);
        let sequence = self.counter.next_number(&series.id, &period, series.sequence_start).await?;
        let number = render_number(series, sequence, now);

        if self.audits.number_exists(&series.id, &number).await? {
            return Err(EngineError::NumberCollision {
                series: series.id.0.clone(),
                number,
            });
        }

        let record = NumberAudit {
            id: Uuid::new_v4().to_string(),
            submission_id: submission.id.clone(),
            series_id: series.id.clone(),
            number: number.clone(),
            template: series.template.clone(),
            sequence,
            period_key: period.clone(),
            trigger,
            actor: actor.clone(),
            generated_at: now,
        };
        if let Err(error) = self.audits.append(record).await {
            if error.is_unique_violation() {
                return Err(EngineError::NumberCollision {
                    series: series.id.0.clone(),
                    number,
                });
            }
            return Err(error.into());
        }

        tracing::info!(
            submission_id = %submission.id.0,
            series = %series.id.0,
            %number,
            sequence,
            period = %period,
            "document number generated"
        );
        self.audit_sink.emit(
            AuditEvent::new(
                Some(submission.id.clone()),
                Uuid::new_v4().to_string(),
                "numbering.generated",
                AuditCategory::Numbering,
                actor.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("number", number.clone())
            .with_metadata("series", series.id.0.clone())
            .with_metadata("period", period),
        );

        Ok(Some(IssuedNumber { number, series_id: series.id.clone(), sequence }))
    }
}
