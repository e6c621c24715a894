//! Upstream envelope
//!
//! Normalized wrapper around one GraphQL call's outcome. An envelope with
//! `ok = false` never exposes usable data through [`Envelope::data`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key of the field list inside GraphQL `data`
pub const FIELDS_KEY: &str = "fieldsV2";

/// Where an envelope came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeSource {
    #[default]
    Api,
    Cache,
}

/// GraphQL request body: `{operationName, variables, query}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlPayload {
    #[serde(rename = "operationName")]
    pub operation_name: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub query: String,
}

impl GraphQlPayload {
    pub fn new(operation_name: &str, query: &str, variables: Map<String, Value>) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            variables,
            query: query.to_string(),
        }
    }

    /// Copy of this payload with one variable replaced
    pub fn with_variable(&self, key: &str, value: Value) -> Self {
        let mut next = self.clone();
        next.variables.insert(key.to_string(), value);
        next
    }

    /// Canonical JSON form. `serde_json::Map` keeps keys sorted, so two
    /// payloads with equal content always produce the same string.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Record of the request an envelope answers (headers already redacted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub payload: GraphQlPayload,
}

/// Parsed GraphQL response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

/// Normalized outcome of one upstream call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub request: RequestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<GraphQlResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default)]
    pub source: EnvelopeSource,
}

impl Envelope {
    /// Build a successful envelope around a `data` object
    pub fn success(request: RequestRecord, data: Value) -> Self {
        Self {
            ok: true,
            status: 200,
            reason: Some("OK".to_string()),
            request,
            response: Some(GraphQlResponse {
                data: Some(data),
                errors: None,
            }),
            response_text: None,
            source: EnvelopeSource::Api,
        }
    }

    /// Build a failed envelope. Any data is dropped to keep `ok = false`
    /// envelopes free of usable payloads.
    pub fn failure(request: RequestRecord, status: u16, reason: Option<String>, errors: Vec<Value>) -> Self {
        Self {
            ok: false,
            status,
            reason,
            request,
            response: Some(GraphQlResponse {
                data: None,
                errors: if errors.is_empty() { None } else { Some(errors) },
            }),
            response_text: None,
            source: EnvelopeSource::Api,
        }
    }

    pub fn with_source(mut self, source: EnvelopeSource) -> Self {
        self.source = source;
        self
    }

    pub fn operation_name(&self) -> &str {
        &self.request.payload.operation_name
    }

    /// GraphQL `data`, only when the envelope is ok
    pub fn data(&self) -> Option<&Value> {
        if !self.ok {
            return None;
        }
        self.response
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .filter(|d| !d.is_null())
    }

    /// The `fieldsV2` list, only when the envelope is ok and carries one
    pub fn fields(&self) -> Option<&Vec<Value>> {
        self.data()
            .and_then(|d| d.get(FIELDS_KEY))
            .and_then(Value::as_array)
    }

    /// Mutable access to the `fieldsV2` list
    pub fn fields_mut(&mut self) -> Option<&mut Vec<Value>> {
        if !self.ok {
            return None;
        }
        self.response
            .as_mut()
            .and_then(|r| r.data.as_mut())
            .and_then(|d| d.get_mut(FIELDS_KEY))
            .and_then(Value::as_array_mut)
    }

    /// First `n` GraphQL errors, if any
    pub fn first_errors(&self, n: usize) -> Vec<Value> {
        self.response
            .as_ref()
            .and_then(|r| r.errors.as_ref())
            .map(|errs| errs.iter().take(n).cloned().collect())
            .unwrap_or_default()
    }
}
