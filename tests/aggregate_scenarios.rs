//! End-to-end aggregation scenarios against a scripted upstream

mod common;

use common::{aggregator, batch, call, Behavior, ScriptedUpstream, LOGIN_TOKEN};
use fieldgate::aggregate::{CallOptions, ChunkingConfig, ChunkingPolicy, StreamRecord};
use fieldgate::upstream::EnvelopeSource;
use fieldgate::{AggregateResponse, AggregatorConfig, FieldgateError};
use std::time::Duration;

fn chunked_config() -> AggregatorConfig {
    AggregatorConfig {
        chunking: ChunkingConfig {
            chunk_size: 1,
            ..ChunkingConfig::default()
        },
        ..AggregatorConfig::default()
    }
}

fn always_chunk() -> CallOptions {
    CallOptions {
        chunking: ChunkingPolicy::Always,
        ..CallOptions::default()
    }
}

fn reasons(warnings: &[fieldgate::aggregate::Warning]) -> Vec<&str> {
    warnings.iter().map(|w| w.reason.as_str()).collect()
}

#[tokio::test]
async fn test_single_plan_merges_all_sources() {
    let upstream = ScriptedUpstream::new();
    let agg = aggregator(upstream.clone(), AggregatorConfig::default());

    let result = batch(agg.aggregate(call(&["f1", "f2"], CallOptions::default())).await.unwrap());

    assert!(result.ok);
    assert_eq!(result.status, 200);
    assert!(!result.chunked);
    assert!(result.warnings.is_empty());
    assert_eq!(result.source, EnvelopeSource::Api);
    assert_eq!(result.merged_fields.len(), 2);

    let field = &result.merged_fields[0];
    assert_eq!(field.uuid, "field-f1");
    assert_eq!(field.attributes["name"], "Field of f1");
    assert_eq!(field.attributes["predictedHarvest"], "2026-09-01");
    let season = field.crop_season("cs-f1").unwrap();
    assert_eq!(season.attributes["crop"], "rice");
    assert_eq!(season.attributes["nitrogenStatus"], "ok");

    assert_eq!(result.diagnostics.requested_count, 2);
    assert_eq!(result.diagnostics.covered_count, 2);
    assert!(result.diagnostics.missing_farm_uuids.is_empty());
    assert!(result.diagnostics.sub_queries.contains_key("base"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_reported_as_missing() {
    let upstream = ScriptedUpstream::new();
    upstream.fail_farm("f2");
    let agg = aggregator(upstream.clone(), chunked_config());

    let result = batch(agg.aggregate(call(&["f1", "f2", "f3"], always_chunk())).await.unwrap());

    assert!(!result.ok);
    assert_eq!(result.status, 206);
    assert!(result.chunked);
    let uuids: Vec<_> = result.merged_fields.iter().map(|f| f.uuid.as_str()).collect();
    assert_eq!(uuids, vec!["field-f1", "field-f3"]);

    assert_eq!(result.diagnostics.missing_farm_uuids, vec!["f2".to_string()]);
    assert_eq!(result.diagnostics.retried_failed_farm_uuids, vec!["f2".to_string()]);
    assert_eq!(result.diagnostics.failed_chunks.len(), 1);
    assert_eq!(result.diagnostics.failed_chunks[0].farm_uuids, vec!["f2".to_string()]);

    let reasons = reasons(&result.warnings);
    assert!(reasons.contains(&"chunked_fetch_partial"));
    assert!(reasons.contains(&"failed_farms_retried"));
    assert!(reasons.contains(&"missing_farms_in_merged_response"));
}

#[tokio::test(start_paused = true)]
async fn test_chunk_warnings_keep_detail_per_chunk() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataPredictions", Behavior::Fail);
    let agg = aggregator(upstream, chunked_config());

    let result = batch(agg.aggregate(call(&["f1", "f2"], always_chunk())).await.unwrap());

    assert!(result.ok);
    let predictions: Vec<_> = result
        .warnings
        .iter()
        .filter(|w| w.reason == "predictions_unavailable")
        .collect();
    assert_eq!(predictions.len(), 1);
    let detail = predictions[0].detail.as_ref().unwrap();
    assert_eq!(detail["chunkCount"], 2);
    assert_eq!(detail["chunks"][0]["farmUuids"], serde_json::json!(["f1"]));
    assert_eq!(detail["chunks"][1]["farmUuids"], serde_json::json!(["f2"]));
    assert_eq!(detail["chunks"][1]["status"], 500);
}

#[tokio::test(start_paused = true)]
async fn test_diagnostics_never_leak_credentials() {
    let upstream = ScriptedUpstream::new();
    upstream.fail_farm("f2");
    upstream.script("CombinedDataPredictions", Behavior::Fail);
    let agg = aggregator(upstream, chunked_config());

    let result = batch(agg.aggregate(call(&["f1", "f2"], always_chunk())).await.unwrap());
    let text = serde_json::to_string(&result).unwrap();
    assert!(!text.contains(LOGIN_TOKEN));
    assert!(text.contains("***"));
}

#[tokio::test(start_paused = true)]
async fn test_optional_timeout_becomes_warning() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataInsights", Behavior::Hang);
    let agg = aggregator(upstream.clone(), AggregatorConfig::default());

    let result = batch(agg.aggregate(call(&["f1"], CallOptions::default())).await.unwrap());

    assert!(result.ok);
    assert_eq!(result.status, 200);
    assert_eq!(reasons(&result.warnings), vec!["insights_unavailable"]);
    assert_eq!(result.merged_fields.len(), 1);
    let season = result.merged_fields[0].crop_season("cs-f1").unwrap();
    assert!(season.attributes.get("nitrogenStatus").is_none());
    // First call plus two dedicated retries
    assert_eq!(upstream.calls_for("CombinedDataInsights"), 3);
}

#[tokio::test]
async fn test_warm_cache_makes_zero_calls() {
    let upstream = ScriptedUpstream::new();
    let agg = aggregator(upstream.clone(), AggregatorConfig::default());
    let first_call = call(&["f1", "f2"], CallOptions::default());
    let second_call = first_call.clone();

    let first = batch(agg.aggregate(first_call).await.unwrap());
    let calls = upstream.calls();
    assert!(calls > 0);
    assert_eq!(first.source, EnvelopeSource::Api);

    let second = batch(agg.aggregate(second_call).await.unwrap());
    assert_eq!(upstream.calls(), calls);
    assert_eq!(second.source, EnvelopeSource::Cache);
    assert_eq!(second.merged_fields, first.merged_fields);
}

#[tokio::test]
async fn test_critical_failure_fails_call() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataBase", Behavior::Fail);
    let agg = aggregator(upstream.clone(), AggregatorConfig::default());

    let err = agg
        .aggregate(call(&["f1"], CallOptions::default()))
        .await
        .unwrap_err();

    match &err {
        FieldgateError::CriticalFailed {
            status,
            reason,
            diagnostics,
        } => {
            assert_eq!(*status, Some(500));
            assert!(!reason.contains(LOGIN_TOKEN));
            assert!(diagnostics.contains_key("base"));
        }
        other => panic!("expected CriticalFailed, got {:?}", other),
    }
    assert!(!err.to_detail().to_string().contains(LOGIN_TOKEN));
    // Primary attempt plus the boundary-less fallback, no optionals
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_raises_incomplete() {
    let upstream = ScriptedUpstream::new();
    upstream.fail_farm("f2");
    let agg = aggregator(upstream, chunked_config());
    let options = CallOptions {
        strict: true,
        ..always_chunk()
    };

    let err = agg.aggregate(call(&["f1", "f2", "f3"], options)).await.unwrap_err();
    match err {
        FieldgateError::Incomplete {
            missing,
            retried,
            failed_chunks,
            partial_fields,
        } => {
            assert_eq!(missing, vec!["f2".to_string()]);
            assert_eq!(retried, vec!["f2".to_string()]);
            assert_eq!(failed_chunks.len(), 1);
            assert_eq!(partial_fields, 2);
        }
        other => panic!("expected Incomplete, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_chunk_failing() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataBase", Behavior::Fail);
    let agg = aggregator(upstream, chunked_config());

    let err = agg.aggregate(call(&["f1", "f2"], always_chunk())).await.unwrap_err();
    assert!(matches!(err, FieldgateError::AllChunksFailed { ref failed_chunks } if failed_chunks.len() == 2));
}

#[tokio::test]
async fn test_too_many_farms_rejected_without_calls() {
    let upstream = ScriptedUpstream::new();
    let agg = aggregator(
        upstream.clone(),
        AggregatorConfig {
            sync_max: 1,
            hard_max: 2,
            ..AggregatorConfig::default()
        },
    );

    let err = agg
        .aggregate(call(&["f1", "f2", "f3"], CallOptions::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, FieldgateError::TooManyIdentifiers { received: 3, max: 2, sync_max: 1 }));
    assert_eq!(err.status_code(), hyper::StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn test_coverage_is_subset_of_request() {
    let upstream = ScriptedUpstream::new();
    let agg = aggregator(upstream, AggregatorConfig::default());

    let result = batch(agg.aggregate(call(&["f1", "f1", "f2"], CallOptions::default())).await.unwrap());
    assert_eq!(result.diagnostics.requested_count, 2);
    assert!(result.diagnostics.covered_count <= result.diagnostics.requested_count);
}

#[tokio::test]
async fn test_single_plan_missing_farm_stays_ok() {
    let upstream = ScriptedUpstream::new();
    upstream.omit_farm("f2");
    let agg = aggregator(upstream, AggregatorConfig::default());
    let options = CallOptions {
        chunking: ChunkingPolicy::Never,
        ..CallOptions::default()
    };

    let result = batch(agg.aggregate(call(&["f1", "f2"], options)).await.unwrap());

    assert!(result.ok);
    assert_eq!(result.status, 200);
    assert!(!result.chunked);
    assert_eq!(result.merged_fields.len(), 1);
    assert_eq!(result.diagnostics.missing_farm_uuids, vec!["f2".to_string()]);
    assert_eq!(reasons(&result.warnings), vec!["missing_farms_in_merged_response"]);
}

#[tokio::test(start_paused = true)]
async fn test_chunked_missing_farm_without_failed_chunk_stays_ok() {
    let upstream = ScriptedUpstream::new();
    upstream.omit_farm("f2");
    let agg = aggregator(upstream, chunked_config());

    let result = batch(agg.aggregate(call(&["f1", "f2"], always_chunk())).await.unwrap());

    assert!(result.ok);
    assert_eq!(result.status, 200);
    assert!(result.chunked);
    assert!(result.diagnostics.failed_chunks.is_empty());
    assert_eq!(result.diagnostics.missing_farm_uuids, vec!["f2".to_string()]);
    assert_eq!(reasons(&result.warnings), vec!["missing_farms_in_merged_response"]);
}

#[tokio::test]
async fn test_single_plan_missing_farm_fails_in_strict_mode() {
    let upstream = ScriptedUpstream::new();
    upstream.omit_farm("f2");
    let agg = aggregator(upstream, AggregatorConfig::default());
    let options = CallOptions {
        chunking: ChunkingPolicy::Never,
        strict: true,
        ..CallOptions::default()
    };

    let err = agg.aggregate(call(&["f1", "f2"], options)).await.unwrap_err();
    assert!(matches!(err, FieldgateError::Incomplete { ref missing, .. } if missing == &vec!["f2".to_string()]));
}

async fn collect(response: AggregateResponse) -> Vec<StreamRecord> {
    let AggregateResponse::Stream(mut rx) = response else {
        panic!("expected a stream");
    };
    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    records
}

#[tokio::test]
async fn test_stream_flushes_base_first_and_ends_with_done() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataPredictions", Behavior::Fail);
    let agg = aggregator(upstream, AggregatorConfig::default());
    let options = CallOptions {
        stream: true,
        ..CallOptions::default()
    };

    let records = collect(agg.aggregate(call(&["f1"], options)).await.unwrap()).await;

    assert_eq!(records.first().map(|r| r.kind.as_str()), Some("base"));
    let done = records.last().unwrap();
    assert!(done.is_done());
    assert_eq!(records.iter().filter(|r| r.is_done()).count(), 1);
    assert!(records.iter().all(|r| r.kind != "predictions"));

    assert_eq!(done.data["ok"], true);
    assert_eq!(done.data["diagnostics"]["requestedCount"], 1);
    assert_eq!(done.data["diagnostics"]["coveredCount"], 1);
    assert_eq!(done.data["warnings"][0]["reason"], "predictions_unavailable");
    assert!(!serde_json::to_string(&records.iter().map(|r| &r.data).collect::<Vec<_>>())
        .unwrap()
        .contains(LOGIN_TOKEN));
}

#[tokio::test]
async fn test_stream_critical_failure_closes_with_done() {
    let upstream = ScriptedUpstream::new();
    upstream.script("CombinedDataBase", Behavior::Fail);
    let agg = aggregator(upstream, AggregatorConfig::default());
    let options = CallOptions {
        stream: true,
        ..CallOptions::default()
    };

    let records = collect(agg.aggregate(call(&["f1"], options)).await.unwrap()).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_done());
    assert_eq!(records[0].data["ok"], false);
    assert_eq!(records[0].data["status"], 500);
    assert_eq!(records[0].data["reason"], "combined_fields_failed");
}

#[tokio::test]
async fn test_stream_with_warm_cache_answers_as_batch() {
    let upstream = ScriptedUpstream::new();
    let agg = aggregator(upstream.clone(), AggregatorConfig::default());
    agg.aggregate(call(&["f1"], CallOptions::default())).await.unwrap();
    let calls = upstream.calls();

    let options = CallOptions {
        stream: true,
        ..CallOptions::default()
    };
    let result = batch(agg.aggregate(call(&["f1"], options)).await.unwrap());
    assert_eq!(result.source, EnvelopeSource::Cache);
    assert_eq!(upstream.calls(), calls);
    assert!(result.ok);
}

#[tokio::test(start_paused = true)]
async fn test_chunk_results_follow_submission_order() {
    let upstream = ScriptedUpstream::new();
    let config = AggregatorConfig {
        chunking: ChunkingConfig {
            chunk_size: 2,
            concurrency: 3,
            backoff_base: Duration::from_millis(10),
            ..ChunkingConfig::default()
        },
        ..AggregatorConfig::default()
    };
    let agg = aggregator(upstream, config);

    let farms = ["a", "b", "c", "d", "e"];
    let result = batch(agg.aggregate(call(&farms, always_chunk())).await.unwrap());
    let uuids: Vec<_> = result.merged_fields.iter().map(|f| f.uuid.clone()).collect();
    let expected: Vec<_> = farms.iter().map(|f| format!("field-{}", f)).collect();
    assert_eq!(uuids, expected);
    assert!(result.ok);
}

#[tokio::test]
async fn test_stream_missing_farm_closes_ok() {
    let upstream = ScriptedUpstream::new();
    upstream.omit_farm("f2");
    let agg = aggregator(upstream, AggregatorConfig::default());
    let options = CallOptions {
        stream: true,
        ..CallOptions::default()
    };

    let records = collect(agg.aggregate(call(&["f1", "f2"], options)).await.unwrap()).await;
    let done = records.last().unwrap();
    assert!(done.is_done());
    assert_eq!(done.data["ok"], true);
    assert_eq!(done.data["status"], 200);
    assert_eq!(done.data["diagnostics"]["missingFarmUuids"], serde_json::json!(["f2"]));
    assert_eq!(done.data["warnings"][0]["reason"], "missing_farms_in_merged_response");
}
