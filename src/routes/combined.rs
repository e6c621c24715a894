//! `POST /combined-fields`
//!
//! Batch calls answer with one JSON object whose HTTP status mirrors the
//! result (200, or 206 when chunks failed). Streaming calls answer with NDJSON.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::aggregate::{AggregateCall, AggregateRequest, AggregateResponse, StreamRecord};
use crate::server::http::{error_response, json_response, to_boxed, BoxBody};
use crate::server::AppState;
use crate::types::{FieldgateError, Result};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn handle_combined_fields(state: Arc<AppState>, req: Request<Incoming>) -> Response<BoxBody> {
    let call = match parse_call(req).await {
        Ok(call) => call,
        Err(e) => {
            warn!(error = %e, "Rejected combined-fields request");
            return to_boxed(error_response(e));
        }
    };

    let requested = call.params.farm_uuids.len();
    match state.aggregator.aggregate(call).await {
        Ok(AggregateResponse::Batch(result)) => {
            let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::OK);
            match serde_json::to_value(&*result) {
                Ok(body) => to_boxed(json_response(status, &body)),
                Err(e) => to_boxed(error_response(FieldgateError::Internal(e.to_string()))),
            }
        }
        Ok(AggregateResponse::Stream(rx)) => {
            info!(requested, "Streaming combined-fields response");
            ndjson_response(rx)
        }
        Err(e) => to_boxed(error_response(e)),
    }
}

async fn parse_call(req: Request<Incoming>) -> Result<AggregateCall> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| FieldgateError::BadRequest(format!("Failed to read body: {}", e)))?
        .to_bytes();
    let request: AggregateRequest = serde_json::from_slice(&body)?;
    AggregateCall::from_request(request, Utc::now())
}

fn ndjson_response(rx: mpsc::Receiver<StreamRecord>) -> Response<BoxBody> {
    let records = futures::stream::unfold(rx, |mut rx| async move {
        let record = rx.recv().await?;
        let frame = Frame::data(Bytes::from(record.to_line()));
        Some((Ok::<_, hyper::Error>(frame), rx))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-ndjson")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(StreamBody::new(records).boxed_unsync())
        .unwrap_or_else(|_| to_boxed(Response::new(Full::new(Bytes::new()))))
}
