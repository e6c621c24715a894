//! Liveness endpoint: `/health`, `/healthz`

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::http::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub version: &'static str,
    pub uptime: u64,
    pub graphql_endpoint: String,
    pub cache_entries: usize,
}

/// Liveness check; always 200 while the process serves requests
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let health = HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        graphql_endpoint: state.args.graphql_endpoint.clone(),
        cache_entries: state.cache.len(),
    };
    let body = serde_json::to_value(&health).unwrap_or_default();
    json_response(StatusCode::OK, &body)
}
