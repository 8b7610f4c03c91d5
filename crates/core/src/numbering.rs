use chrono::{DateTime, Datelike, Utc};

use crate::domain::series::{DocumentSeries, ResetPolicy};

/// Derives the counter partition key for a timestamp under a reset policy.
/// `None` collapses to a single constant partition.
pub fn period_key(policy: ResetPolicy, at: DateTime<Utc>) -> String {
    match policy {
        ResetPolicy::None => String::new(),
        ResetPolicy::Yearly => format!("{:04}", at.year()),
        ResetPolicy::Monthly => format!("{:04}{:02}", at.year(), at.month()),
        ResetPolicy::Daily => format!("{:04}{:02}{:02}", at.year(), at.month(), at.day()),
    }
}

/// Renders a series template for a reserved sequence value.
///
/// Recognized placeholders: `{SERIES}`, `{YYYY}`, `{YY}`, `{MM}`, `{DD}`,
/// `{SEQ}` (zero-padded to the series' `sequence_padding`) and `{SEQ:000...}`
/// (explicit width). Unrecognized placeholders pass through verbatim so a
/// misconfigured template is visible in the output instead of silently
/// dropped.
pub fn render_number(series: &DocumentSeries, sequence: i64, at: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(series.template.len() + 8);
    let mut rest = series.template.as_str();

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let token = &tail[1..close];
        match expand_token(token, series, sequence, at) {
            Some(expansion) => out.push_str(&expansion),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_token(
    token: &str,
    series: &DocumentSeries,
    sequence: i64,
    at: DateTime<Utc>,
) -> Option<String> {
    match token {
        "SERIES" => Some(series.code.clone()),
        "YYYY" => Some(format!("{:04}", at.year())),
        "YY" => Some(format!("{:02}", at.year() % 100)),
        "MM" => Some(format!("{:02}", at.month())),
        "DD" => Some(format!("{:02}", at.day())),
        "SEQ" => Some(pad_sequence(sequence, series.sequence_padding)),
        _ => {
            let width_spec = token.strip_prefix("SEQ:")?;
            if width_spec.is_empty() || !width_spec.bytes().all(|b| b == b'0') {
                return None;
            }
            Some(pad_sequence(sequence, width_spec.len() as u32))
        }
    }
}

fn pad_sequence(sequence: i64, width: u32) -> String {
    format!("{sequence:0width$}", width = width as usize)
}

/// Picks the series to number a submission with: a single active candidate
/// wins outright; among several, the default is preferred, falling back to
/// the lowest code so selection stays reproducible. Returns `None` when no
/// candidate is active, which callers treat as a configuration error.
pub fn select_series(candidates: &[DocumentSeries]) -> Option<&DocumentSeries> {
    let active: Vec<&DocumentSeries> = candidates.iter().filter(|series| series.active).collect();

    match active.as_slice() {
        [] => None,
        [only] => Some(only),
        several => several
            .iter()
            .copied()
            .min_by_key(|series| (!series.is_default, series.code.clone())),
    }
}
