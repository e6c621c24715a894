//! Response cache inspection
//!
//! Only summaries leave the process; stored request headers already carry
//! the masked cookie and response bodies are never echoed.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;
use tracing::info;

use crate::server::http::json_response;
use crate::server::AppState;
use crate::upstream::Envelope;

/// `GET /cache/graphql/last`
pub fn cache_last(state: &AppState) -> Response<Full<Bytes>> {
    let stats = state.cache.stats();
    let body = match state.cache.last() {
        Some(entry) => json!({
            "ok": true,
            "key": entry.key,
            "savedAt": entry.saved_at,
            "summary": summarize_envelope(&entry.envelope),
            "stats": stats,
            "hitRate": stats.hit_rate(),
        }),
        None => json!({
            "ok": false,
            "reason": "cache_empty",
            "stats": stats,
        }),
    };
    json_response(StatusCode::OK, &body)
}

/// `POST /cache/graphql/clear`
pub fn cache_clear(state: &AppState) -> Response<Full<Bytes>> {
    let removed = state.cache.clear();
    info!(removed, "Response cache cleared over HTTP");
    json_response(StatusCode::OK, &json!({"ok": true, "removed": removed}))
}

fn summarize_envelope(envelope: &Envelope) -> serde_json::Value {
    json!({
        "operationName": envelope.operation_name(),
        "ok": envelope.ok,
        "status": envelope.status,
        "source": envelope.source,
        "url": envelope.request.url,
        "fieldCount": envelope.fields().map(Vec::len),
    })
}
