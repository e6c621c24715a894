//! Error types for Fieldgate
//!
//! One crate-level error carries the aggregation failure taxonomy. Each
//! variant knows its HTTP status and can render a JSON detail body that
//! includes the diagnostics gathered up to the failure.

use hyper::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::aggregate::diagnostics::{FailedChunk, SubQuerySummary};

/// Main error type for Fieldgate operations
#[derive(Debug, thiserror::Error)]
pub enum FieldgateError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many farms: received {received}, max {max}")]
    TooManyIdentifiers {
        received: usize,
        max: usize,
        sync_max: usize,
    },

    /// Malformed sub-query plan. Indicates a defect, never retried.
    #[error("Planning error: {0}")]
    Planning(String),

    /// The critical sub-query failed; every sub-query outcome is attached.
    #[error("Critical sub-query failed: {reason}")]
    CriticalFailed {
        status: Option<u16>,
        reason: String,
        diagnostics: BTreeMap<String, SubQuerySummary>,
    },

    #[error("All {} chunk(s) failed", failed_chunks.len())]
    AllChunksFailed { failed_chunks: Vec<FailedChunk> },

    /// Strict mode: identifiers missing or chunks failed after the retry round.
    #[error("Incomplete result: {} missing farm(s), {} failed chunk(s)", missing.len(), failed_chunks.len())]
    Incomplete {
        failed_chunks: Vec<FailedChunk>,
        partial_fields: usize,
        missing: Vec<String>,
        retried: Vec<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FieldgateError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooManyIdentifiers { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Planning(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CriticalFailed { status, .. } => status
                .filter(|s| *s >= 400)
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::AllChunksFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Incomplete { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason used in JSON error bodies
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::TooManyIdentifiers { .. } => "too_many_farms",
            Self::Planning(_) => "planning_error",
            Self::CriticalFailed { .. } => "combined_fields_failed",
            Self::AllChunksFailed { .. } => "combined_fields_all_chunks_failed",
            Self::Incomplete { .. } => "combined_fields_incomplete",
            Self::Internal(_) => "internal_error",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// JSON detail body, including diagnostics where the variant carries them
    pub fn to_detail(&self) -> Value {
        match self {
            Self::TooManyIdentifiers {
                received,
                max,
                sync_max,
            } => json!({
                "reason": self.reason(),
                "received_farms": received,
                "max_farms": max,
                "sync_max_farms": sync_max,
            }),
            Self::CriticalFailed {
                status,
                reason,
                diagnostics,
            } => json!({
                "reason": self.reason(),
                "status": status,
                "detail": reason,
                "diagnostics": diagnostics,
            }),
            Self::AllChunksFailed { failed_chunks } => json!({
                "reason": self.reason(),
                "failed_chunks": failed_chunks,
            }),
            Self::Incomplete {
                failed_chunks,
                partial_fields,
                missing,
                retried,
            } => json!({
                "reason": self.reason(),
                "failed_chunks": failed_chunks,
                "partial_fields": partial_fields,
                "missing_farm_uuids": missing,
                "retried_failed_farm_uuids": retried,
            }),
            other => json!({
                "reason": other.reason(),
                "detail": other.to_string(),
            }),
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_detail().to_string();
        (status, body)
    }
}

impl From<std::io::Error> for FieldgateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for FieldgateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for FieldgateError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias for Fieldgate operations
pub type Result<T> = std::result::Result<T, FieldgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            FieldgateError::TooManyIdentifiers {
                received: 600,
                max: 500,
                sync_max: 200
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            FieldgateError::Planning("two critical specs".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            FieldgateError::AllChunksFailed { failed_chunks: vec![] }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_critical_failure_uses_upstream_status() {
        let err = FieldgateError::CriticalFailed {
            status: Some(503),
            reason: "upstream unavailable".into(),
            diagnostics: BTreeMap::new(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = FieldgateError::CriticalFailed {
            status: None,
            reason: "timed out".into(),
            diagnostics: BTreeMap::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_incomplete_detail_body() {
        let err = FieldgateError::Incomplete {
            failed_chunks: vec![],
            partial_fields: 4,
            missing: vec!["f2".into()],
            retried: vec!["f2".into()],
        };
        let detail = err.to_detail();
        assert_eq!(detail["reason"], "combined_fields_incomplete");
        assert_eq!(detail["partial_fields"], 4);
        assert_eq!(detail["missing_farm_uuids"][0], "f2");
    }
}
