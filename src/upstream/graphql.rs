//! HTTP GraphQL transport
//!
//! Posts one payload to the upstream endpoint and normalizes whatever comes
//! back into an [`Envelope`]. Headers are recorded with the cookie masked.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    Credentials, Envelope, EnvelopeSource, GraphQlPayload, GraphQlResponse, RequestRecord,
    TransportError, UpstreamClient, REDACTED_COOKIE,
};
use crate::types::{FieldgateError, Result};

/// Longest raw body kept when the response is not JSON
const MAX_RESPONSE_TEXT: usize = 2000;

/// Configuration for the GraphQL transport
#[derive(Debug, Clone)]
pub struct GraphQlClientConfig {
    /// Upstream GraphQL endpoint
    pub endpoint: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Idle timeout on each socket read; the scheduler owns the total budget
    pub read_timeout: Duration,
    /// Origin header the endpoint expects
    pub origin: String,
    /// User agent sent upstream
    pub user_agent: String,
}

impl Default for GraphQlClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://fm-api.xarvio.com/api/graphql/data".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            origin: "https://fm.xarvio.com".to_string(),
            user_agent: "fieldgate/0.1".to_string(),
        }
    }
}

/// reqwest-backed [`UpstreamClient`]
pub struct GraphQlClient {
    http: reqwest::Client,
    config: GraphQlClientConfig,
}

impl GraphQlClient {
    pub fn new(config: GraphQlClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| FieldgateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn recorded_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json, text/plain, */*".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Cookie".to_string(), REDACTED_COOKIE.to_string());
        headers.insert("Origin".to_string(), self.config.origin.clone());
        headers.insert("Referer".to_string(), format!("{}/", self.config.origin));
        headers.insert("User-Agent".to_string(), self.config.user_agent.clone());
        headers
    }
}

/// Map a reqwest failure onto the transport taxonomy
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Normalize a status and raw body into an envelope.
///
/// `ok` requires a non-error status and a non-null `data` object; a
/// GraphQL response carrying only `errors` is an upstream logical failure.
pub(crate) fn normalize(request: RequestRecord, status: u16, reason: Option<String>, body: &str) -> Envelope {
    match serde_json::from_str::<GraphQlResponse>(body) {
        Ok(parsed) => {
            let has_data = parsed.data.as_ref().is_some_and(|d| !d.is_null());
            if status < 400 && has_data {
                Envelope {
                    ok: true,
                    status,
                    reason,
                    request,
                    response: Some(parsed),
                    response_text: None,
                    source: EnvelopeSource::Api,
                }
            } else {
                Envelope::failure(request, status, reason, parsed.errors.unwrap_or_default())
            }
        }
        Err(_) => {
            let mut failed = Envelope::failure(request, status, reason, Vec::new());
            failed.response = None;
            failed.response_text = Some(body.chars().take(MAX_RESPONSE_TEXT).collect());
            failed
        }
    }
}

#[async_trait::async_trait]
impl UpstreamClient for GraphQlClient {
    async fn call(
        &self,
        payload: &GraphQlPayload,
        credentials: &Credentials,
    ) -> std::result::Result<Envelope, TransportError> {
        debug!(operation = %payload.operation_name, "Calling upstream GraphQL");

        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Accept", "application/json, text/plain, */*")
            .header("Cookie", credentials.cookie_header())
            .header("Origin", &self.config.origin)
            .header("Referer", format!("{}/", self.config.origin))
            .header("User-Agent", &self.config.user_agent)
            .json(payload)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        let request = RequestRecord {
            url: self.config.endpoint.clone(),
            headers: self.recorded_headers(),
            payload: payload.clone(),
        };
        let envelope = normalize(
            request,
            status.as_u16(),
            status.canonical_reason().map(str::to_string),
            &body,
        );

        if !envelope.ok {
            warn!(
                operation = %payload.operation_name,
                status = envelope.status,
                "Upstream returned ok=false"
            );
        }

        Ok(envelope)
    }
}
