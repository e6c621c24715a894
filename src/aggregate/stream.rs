//! NDJSON streaming
//!
//! Streaming trades determinism for latency. The critical envelope is
//! flushed first, optional envelopes follow in completion order, and a
//! `done` record closes the stream with warnings and coverage diagnostics.
//! Each flushed envelope already has its fields enriched.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::diagnostics::{summarize, SubQuerySummary};
use super::merge::{FieldEntity, FieldMerger};
use super::params::{CallOptions, RequestParams};
use super::phase::{AggregationPhase, PhaseTracker};
use super::scheduler::SubQueryOutcome;
use super::{missing_warning, optional_warning, AggregateResponse, Aggregator, Diagnostics, Warning};
use crate::enrich::FieldEnricher;
use crate::types::Result;
use crate::upstream::{Credentials, Envelope};

/// Record type closing every stream
pub const DONE: &str = "done";

const CHANNEL_CAPACITY: usize = 16;

/// One NDJSON line: a sub-query label or `done`, with its payload
#[derive(Debug, Clone, Serialize)]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl StreamRecord {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn is_done(&self) -> bool {
        self.kind == DONE
    }

    /// Serialize as one newline-terminated JSON line
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"type":"{}","data":null}}"#, self.kind)
        });
        line.push('\n');
        line
    }
}

/// Plan, then either answer from cache or spawn the streaming task
pub(crate) async fn start(
    aggregator: Aggregator,
    call_id: String,
    params: RequestParams,
    credentials: Credentials,
    options: CallOptions,
) -> Result<AggregateResponse> {
    let plan = aggregator.planner().plan(&params)?;

    let fully_cached = plan
        .specs()
        .iter()
        .all(|spec| aggregator.scheduler().cached(spec).is_some());
    if fully_cached {
        info!(call_id = %call_id, "Every sub-query cached, answering stream request as one batch");
        let batch = CallOptions {
            stream: false,
            ..options
        };
        let result = aggregator.run_single(&call_id, &params, &credentials, batch).await?;
        return Ok(AggregateResponse::Batch(Box::new(result)));
    }

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut phase = PhaseTracker::new(call_id.as_str());
        phase.advance(AggregationPhase::ExecutingCritical);
        let scheduler = aggregator.scheduler();
        let mut outcomes: Vec<SubQueryOutcome> = Vec::with_capacity(plan.len());
        let mut merger = FieldMerger::new();

        let mut critical = scheduler.run_critical(plan.critical(), &credentials).await;
        let base_ok = critical.envelope().and_then(Envelope::fields).is_some();
        if !base_ok {
            phase.fail();
            let summaries = summarize(std::slice::from_ref(&critical), &credentials);
            let status = critical
                .result
                .as_ref()
                .err()
                .and_then(|e| e.status())
                .unwrap_or(502);
            warn!(call_id = %call_id, status, "Critical sub-query failed, closing stream");
            let done = json!({
                "ok": false,
                "status": status,
                "reason": "combined_fields_failed",
                "diagnostics": {"subQueries": summaries},
            });
            let _ = tx.send(StreamRecord::new(DONE, done)).await;
            return;
        }

        if let Ok(envelope) = critical.result.as_mut() {
            merger.merge_source(envelope.fields().map(Vec::as_slice));
            enrich_envelope(aggregator.enricher(), envelope);
            if let Some(data) = record_data(envelope) {
                if tx.send(StreamRecord::new(critical.label, data)).await.is_err() {
                    debug!(call_id = %call_id, "Stream receiver dropped");
                    return;
                }
            }
        }
        outcomes.push(critical);

        phase.advance(AggregationPhase::ExecutingOptional);
        let deadline = Instant::now() + scheduler.config().optional_timeout;
        let mut pending: FuturesUnordered<_> = plan
            .optionals()
            .map(|spec| scheduler.run_optional(spec, &credentials, deadline))
            .collect();

        let mut receiver_gone = false;
        while let Some(mut outcome) = pending.next().await {
            if let Ok(envelope) = outcome.result.as_mut() {
                merger.merge_source(envelope.fields().map(Vec::as_slice));
                enrich_envelope(aggregator.enricher(), envelope);
                if !receiver_gone {
                    if let Some(data) = record_data(envelope) {
                        receiver_gone = tx.send(StreamRecord::new(outcome.label, data)).await.is_err();
                    }
                }
            }
            outcomes.push(outcome);
        }
        drop(pending);

        if receiver_gone {
            debug!(call_id = %call_id, "Stream receiver dropped before done");
        }

        phase.advance(AggregationPhase::Merging);
        let mut merged = merger.finish();
        for field in &mut merged.fields {
            aggregator.enricher().enrich(field);
        }
        phase.advance(AggregationPhase::Reporting);

        let summaries = summarize(&outcomes, &credentials);
        for summary in summaries.values() {
            summary.log();
        }
        let done = done_record(&params, &options, &outcomes, &summaries, &merged.fields, merged.stats);
        let ok = done.data.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if ok || !options.strict {
            phase.complete();
        } else {
            phase.fail();
        }
        info!(
            call_id = %call_id,
            ok,
            fields = merged.fields.len(),
            "Streaming aggregation done"
        );

        if !receiver_gone {
            let _ = tx.send(done).await;
        }
        aggregator.persist(&merged.fields).await;
    });

    Ok(AggregateResponse::Stream(rx))
}

/// Replace each raw field in an envelope with its enriched form
fn enrich_envelope(enricher: &dyn FieldEnricher, envelope: &mut Envelope) {
    let Some(fields) = envelope.fields_mut() else {
        return;
    };
    for raw in fields.iter_mut() {
        if let Some((mut entity, _)) = FieldEntity::from_value(raw) {
            enricher.enrich(&mut entity);
            *raw = entity.to_value();
        }
    }
}

fn record_data(envelope: &Envelope) -> Option<Value> {
    match serde_json::to_value(envelope) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream record");
            None
        }
    }
}

fn done_record(
    params: &RequestParams,
    options: &CallOptions,
    outcomes: &[SubQueryOutcome],
    summaries: &std::collections::BTreeMap<String, SubQuerySummary>,
    fields: &[FieldEntity],
    stats: super::merge::MergeStats,
) -> StreamRecord {
    let warnings_from_optionals = outcomes
        .iter()
        .filter_map(|o| optional_warning(o, summaries.get(o.label)));

    let mut diagnostics = Diagnostics::coverage(&params.farm_uuids, &super::merge::covered_groups(fields));
    diagnostics.dropped_fields = stats.dropped_fields;
    diagnostics.dropped_crop_seasons = stats.dropped_crop_seasons;
    diagnostics.sub_queries = summaries.clone();

    let mut warnings: Vec<Warning> = warnings_from_optionals.collect();
    warnings.extend(missing_warning(&diagnostics));

    // Missing farms only close the stream as failed in strict mode
    let data = if options.strict && !diagnostics.is_complete() {
        json!({
            "ok": false,
            "status": 502,
            "reason": "combined_fields_incomplete",
            "warnings": warnings,
            "diagnostics": diagnostics,
        })
    } else {
        json!({"ok": true, "status": 200, "warnings": warnings, "diagnostics": diagnostics})
    };
    StreamRecord::new(DONE, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line_shape() {
        let line = StreamRecord::new("base", json!({"ok": true})).to_line();
        assert!(line.ends_with('\n'));
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["type"], "base");
        assert_eq!(parsed["data"]["ok"], true);
    }

    #[test]
    fn test_done_record_reports_missing() {
        use crate::types::IdentifierSet;
        use chrono::Utc;

        let farms: IdentifierSet = ["f1", "f2"].into_iter().collect();
        let params = RequestParams::for_farms(farms, Utc::now()).unwrap();
        let (field, _) = FieldEntity::from_value(&json!({"uuid": "a", "farmV2": {"uuid": "f1"}})).unwrap();

        let done = done_record(
            &params,
            &CallOptions::default(),
            &[],
            &Default::default(),
            &[field],
            Default::default(),
        );
        assert!(done.is_done());
        assert_eq!(done.data["ok"], true);
        assert_eq!(done.data["status"], 200);
        assert_eq!(done.data["diagnostics"]["missingFarmUuids"], json!(["f2"]));
        assert_eq!(done.data["warnings"][0]["reason"], "missing_farms_in_merged_response");

        let strict = CallOptions {
            strict: true,
            ..CallOptions::default()
        };
        let done = done_record(&params, &strict, &[], &Default::default(), &[], Default::default());
        assert_eq!(done.data["ok"], false);
        assert_eq!(done.data["status"], 502);
        assert_eq!(done.data["reason"], "combined_fields_incomplete");
    }
}
