//! Diagnostics & Partial-Success Reporter
//!
//! Turns sub-query outcomes into redacted summaries and computes coverage
//! of the requested identifier set. Nothing produced here may contain a
//! credential: every string that could echo one passes through
//! [`Credentials::redact`].

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use super::scheduler::{SubQueryError, SubQueryOutcome};
use crate::types::IdentifierSet;
use crate::upstream::{Credentials, EnvelopeSource};

/// Longest identifier list reported in warnings and diagnostics
pub const MAX_REPORTED_IDS: usize = 100;

/// Longest failed chunk list reported
pub const MAX_REPORTED_CHUNKS: usize = 50;

/// GraphQL errors kept per summary
const FIRST_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transport,
    UpstreamLogical,
    Timeout,
    BudgetExpired,
    NotIssued,
}

/// Redacted outcome of one sub-query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuerySummary {
    pub label: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<EnvelopeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub operation_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub first_errors: Vec<Value>,
    pub attempts: u32,
}

impl SubQuerySummary {
    /// Summarize one outcome, redacting anything that could echo a token
    pub fn from_outcome(outcome: &SubQueryOutcome, credentials: &Credentials) -> Self {
        let mut summary = Self {
            label: outcome.label.to_string(),
            ok: false,
            status: None,
            reason: None,
            source: None,
            error_class: None,
            error: None,
            operation_name: outcome.operation_name.clone(),
            first_errors: Vec::new(),
            attempts: outcome.attempts,
        };

        match &outcome.result {
            Ok(envelope) => {
                summary.ok = true;
                summary.status = Some(envelope.status);
                summary.reason = envelope.reason.clone();
                summary.source = Some(envelope.source);
            }
            Err(err) => {
                summary.error_class = Some(err.class());
                summary.error = Some(credentials.redact(&err.to_string()));
                if let SubQueryError::Upstream(envelope) = err {
                    summary.status = Some(envelope.status);
                    summary.reason = envelope.reason.as_deref().map(|r| credentials.redact(r));
                    summary.first_errors = envelope
                        .first_errors(FIRST_ERRORS)
                        .iter()
                        .map(|e| redact_value(e, credentials))
                        .collect();
                }
            }
        }
        summary
    }

    /// Emit one structured log line for this summary
    pub fn log(&self) {
        if self.ok {
            info!(
                label = %self.label,
                operation = %self.operation_name,
                status = ?self.status,
                source = ?self.source,
                attempts = self.attempts,
                "Sub-query ok"
            );
        } else {
            warn!(
                label = %self.label,
                operation = %self.operation_name,
                status = ?self.status,
                error_class = ?self.error_class,
                error = ?self.error,
                attempts = self.attempts,
                "Sub-query failed"
            );
        }
    }
}

/// Summarize every outcome, keyed by label
pub fn summarize(outcomes: &[SubQueryOutcome], credentials: &Credentials) -> BTreeMap<String, SubQuerySummary> {
    outcomes
        .iter()
        .map(|o| (o.label.to_string(), SubQuerySummary::from_outcome(o, credentials)))
        .collect()
}

/// Replace every credential occurrence in any string inside `value`
pub fn redact_value(value: &Value, credentials: &Credentials) -> Value {
    match value {
        Value::String(s) => Value::String(credentials.redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, credentials)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, credentials)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Non-fatal condition attached to a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Warning {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn with_detail(reason: impl Into<String>, detail: Value) -> Self {
        Self {
            reason: reason.into(),
            detail: Some(detail),
        }
    }
}

/// A chunk that failed every attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedChunk {
    pub farm_uuids: Vec<String>,
    pub error: Value,
    pub attempts: u32,
}

/// Completeness report for one aggregation call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub requested_count: usize,
    pub covered_count: usize,
    pub missing_farm_uuids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retried_failed_farm_uuids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<FailedChunk>,
    pub dropped_fields: usize,
    pub dropped_crop_seasons: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_queries: BTreeMap<String, SubQuerySummary>,
}

impl Diagnostics {
    /// Coverage of `requested` by the groups seen in merged entities.
    /// Covered identifiers outside the request are ignored.
    pub fn coverage(requested: &IdentifierSet, covered: &HashSet<String>) -> Self {
        let missing = requested.missing_from(covered.iter().map(String::as_str));
        Self {
            requested_count: requested.len(),
            covered_count: requested.len() - missing.len(),
            missing_farm_uuids: cap(missing, MAX_REPORTED_IDS),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.covered_count == self.requested_count && self.failed_chunks.is_empty()
    }
}

/// Per-chunk warnings folded into one warning per reason. Each chunk's
/// detail is kept next to the farms that chunk covered.
#[derive(Debug, Default)]
pub struct ChunkWarnings {
    by_reason: Vec<(String, Vec<Value>)>,
}

impl ChunkWarnings {
    pub fn add(&mut self, farm_uuids: &[String], warning: Warning) {
        let mut entry = json!({"farmUuids": farm_uuids});
        if let (Some(obj), Some(Value::Object(detail))) = (entry.as_object_mut(), warning.detail) {
            obj.extend(detail);
        }
        match self.by_reason.iter_mut().find(|(reason, _)| *reason == warning.reason) {
            Some((_, chunks)) => chunks.push(entry),
            None => self.by_reason.push((warning.reason, vec![entry])),
        }
    }

    pub fn into_warnings(self) -> impl Iterator<Item = Warning> {
        self.by_reason.into_iter().map(|(reason, chunks)| {
            let chunk_count = chunks.len();
            Warning::with_detail(
                reason,
                json!({"chunkCount": chunk_count, "chunks": cap(chunks, MAX_REPORTED_CHUNKS)}),
            )
        })
    }
}

/// Truncate a report list to at most `max` entries
pub fn cap<T>(mut items: Vec<T>, max: usize) -> Vec<T> {
    items.truncate(max);
    items
}
