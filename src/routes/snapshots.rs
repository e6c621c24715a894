//! Snapshot read-back

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::json;

use crate::server::http::json_response;
use crate::server::AppState;

/// `GET /snapshots/{farm_uuid}`
pub fn snapshot_for_farm(state: &AppState, farm_uuid: &str) -> Response<Full<Bytes>> {
    let Some(sink) = &state.snapshots else {
        return json_response(
            StatusCode::NOT_FOUND,
            &json!({"ok": false, "reason": "snapshots_disabled"}),
        );
    };

    match sink.get(farm_uuid) {
        Some(snapshot) => json_response(
            StatusCode::OK,
            &json!({
                "ok": true,
                "farmUuid": farm_uuid,
                "updatedAt": snapshot.updated_at,
                "fieldCount": snapshot.fields.len(),
                "fields": snapshot.fields,
            }),
        ),
        None => json_response(
            StatusCode::NOT_FOUND,
            &json!({"ok": false, "reason": "snapshot_not_found", "farmUuid": farm_uuid}),
        ),
    }
}
