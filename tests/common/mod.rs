//! Scripted upstream for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldgate::aggregate::{AggregateCall, CallOptions, RequestParams};
use fieldgate::cache::InMemoryResponseCache;
use fieldgate::upstream::{Credentials, Envelope, GraphQlPayload, RequestRecord, TransportError, UpstreamClient};
use fieldgate::{AggregateResponse, AggregateResult, Aggregator, AggregatorConfig, IdentifierSet};

pub const LOGIN_TOKEN: &str = "login-secret-123";
pub const API_TOKEN: &str = "api-secret-456";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Ok,
    /// `ok = false` envelope whose error message echoes the login token
    Fail,
    /// Sleeps far past any budget
    Hang,
}

/// Upstream that answers every operation with one field per requested farm.
/// Failures can be scripted per operation or per farm.
#[derive(Default)]
pub struct ScriptedUpstream {
    operations: Mutex<HashMap<String, Behavior>>,
    failing_farms: Mutex<HashSet<String>>,
    omitted_farms: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    log: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, operation: &str, behavior: Behavior) {
        self.operations
            .lock()
            .unwrap()
            .insert(operation.to_string(), behavior);
    }

    /// Every call whose farm list contains `farm` fails
    pub fn fail_farm(&self, farm: &str) {
        self.failing_farms.lock().unwrap().insert(farm.to_string());
    }

    /// Calls succeed but return no field for `farm`
    pub fn omit_farm(&self, farm: &str) {
        self.omitted_farms.lock().unwrap().insert(farm.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, operation: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == operation)
            .count()
    }

    fn behavior(&self, operation: &str, farms: &[String]) -> Behavior {
        let failing = self.failing_farms.lock().unwrap();
        if farms.iter().any(|f| failing.contains(f)) {
            return Behavior::Fail;
        }
        self.operations
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or(Behavior::Ok)
    }
}

fn farms_of(payload: &GraphQlPayload) -> Vec<String> {
    payload
        .variables
        .get("farmUuids")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Contribution of each operation to a field
fn field_for(operation: &str, farm: &str) -> Value {
    let uuid = format!("field-{}", farm);
    match operation {
        "CombinedDataBase" => json!({
            "uuid": uuid,
            "name": format!("Field of {}", farm),
            "farmV2": {"uuid": farm, "name": farm},
            "cropSeasonsV2": [{"uuid": format!("cs-{}", farm), "crop": "rice"}],
        }),
        "CombinedDataInsights" => json!({
            "uuid": uuid,
            "cropSeasonsV2": [{"uuid": format!("cs-{}", farm), "nitrogenStatus": "ok"}],
        }),
        "CombinedDataPredictions" => json!({"uuid": uuid, "predictedHarvest": "2026-09-01"}),
        _ => json!({"uuid": uuid, format!("{}Seen", operation): true}),
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn call(&self, payload: &GraphQlPayload, _credentials: &Credentials) -> Result<Envelope, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let farms = farms_of(payload);
        self.log
            .lock()
            .unwrap()
            .push((payload.operation_name.clone(), farms.clone()));

        let request = RequestRecord {
            url: "https://upstream.test/graphql".into(),
            headers: BTreeMap::new(),
            payload: payload.clone(),
        };

        match self.behavior(&payload.operation_name, &farms) {
            Behavior::Ok => {
                let omitted = self.omitted_farms.lock().unwrap().clone();
                let fields: Vec<Value> = farms
                    .iter()
                    .filter(|f| !omitted.contains(*f))
                    .map(|f| field_for(&payload.operation_name, f))
                    .collect();
                Ok(Envelope::success(request, json!({"fieldsV2": fields})))
            }
            Behavior::Fail => Ok(Envelope::failure(
                request,
                500,
                Some(format!("upstream rejected token {}", LOGIN_TOKEN)),
                vec![json!({"message": format!("cookie LOGIN_TOKEN={} invalid", LOGIN_TOKEN)})],
            )),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Other("hung call returned".into()))
            }
        }
    }
}

pub fn credentials() -> Credentials {
    Credentials::new(LOGIN_TOKEN, API_TOKEN)
}

pub fn params(farms: &[&str]) -> RequestParams {
    let set: IdentifierSet = farms.iter().copied().collect();
    RequestParams::for_farms(set, Utc::now()).unwrap()
}

pub fn call(farms: &[&str], options: CallOptions) -> AggregateCall {
    AggregateCall::new(params(farms), credentials(), options)
}

pub fn aggregator(upstream: Arc<ScriptedUpstream>, config: AggregatorConfig) -> Aggregator {
    Aggregator::new(upstream, Arc::new(InMemoryResponseCache::new()), config)
}

pub fn batch(response: AggregateResponse) -> AggregateResult {
    match response {
        AggregateResponse::Batch(result) => *result,
        AggregateResponse::Stream(_) => panic!("expected a batch response"),
    }
}
