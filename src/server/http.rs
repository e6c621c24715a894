//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::aggregate::Aggregator;
use crate::cache::InMemoryResponseCache;
use crate::config::Args;
use crate::routes;
use crate::snapshot::InMemorySnapshotSink;
use crate::types::{FieldgateError, Result};

/// Response body type; unsync so NDJSON streams can be boxed
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub aggregator: Aggregator,
    /// The overlay the aggregator reads and writes, kept for inspection routes
    pub cache: Arc<InMemoryResponseCache>,
    /// The sink the aggregator upserts into, when snapshots are kept in process
    pub snapshots: Option<Arc<InMemorySnapshotSink>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, aggregator: Aggregator, cache: Arc<InMemoryResponseCache>) -> Self {
        Self {
            args,
            aggregator,
            cache,
            snapshots: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<InMemorySnapshotSink>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Accept loop on an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    info!(
        listen = %listener.local_addr()?,
        graphql_endpoint = %state.args.graphql_endpoint,
        "fieldgate listening"
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state))
        }

        (Method::POST, "/combined-fields") => {
            routes::handle_combined_fields(Arc::clone(&state), req).await
        }

        (Method::GET, "/cache/graphql/last") => to_boxed(routes::cache_last(&state)),

        (Method::POST, "/cache/graphql/clear") => to_boxed(routes::cache_clear(&state)),

        (Method::GET, p) if p.starts_with("/snapshots/") => {
            to_boxed(routes::snapshot_for_farm(&state, &p["/snapshots/".len()..]))
        }

        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Error response: status from the error, body from its detail
pub fn error_response(err: FieldgateError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    let mut body = err.to_detail();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("ok".to_string(), serde_json::Value::Bool(false));
    }
    json_response(status, &body)
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "POST /combined-fields"
    });
    json_response(StatusCode::NOT_FOUND, &body)
}
