//! Upstream call client
//!
//! The aggregation core only sees the [`UpstreamClient`] trait: one named
//! GraphQL call in, one normalized [`Envelope`] out. Calls must be idempotent
//! so the scheduler can retry them freely.

pub mod envelope;
pub mod graphql;
pub mod queries;

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use envelope::{
    Envelope, EnvelopeSource, GraphQlPayload, GraphQlResponse, RequestRecord, FIELDS_KEY,
};
pub use graphql::{GraphQlClient, GraphQlClientConfig};

/// Value that replaces the credential cookie in every recorded request
pub const REDACTED_COOKIE: &str = "LOGIN_TOKEN=***; DF_TOKEN=***";

/// Upstream credentials produced by the (external) authentication exchange.
/// Wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    login_token: String,
    api_token: String,
}

impl Credentials {
    pub fn new(login_token: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            login_token: login_token.into(),
            api_token: api_token.into(),
        }
    }

    /// Cookie header value expected by the upstream endpoint
    pub fn cookie_header(&self) -> String {
        format!("LOGIN_TOKEN={}; DF_TOKEN={}", self.login_token, self.api_token)
    }

    /// Replace every occurrence of a token in `text` with `***`
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in [&self.login_token, &self.api_token] {
            if !secret.is_empty() {
                out = out.replace(secret.as_str(), "***");
            }
        }
        out
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login_token", &"***")
            .field("api_token", &"***")
            .finish()
    }
}

/// Failure to obtain any envelope from the upstream endpoint
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("could not connect to upstream: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Other(String),
}

/// Executes one named GraphQL query against the upstream endpoint
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Run the query. A non-2xx or data-less response is an `ok = false`
    /// envelope, not an error; errors are reserved for transport failures.
    async fn call(
        &self,
        payload: &GraphQlPayload,
        credentials: &Credentials,
    ) -> Result<Envelope, TransportError>;
}
