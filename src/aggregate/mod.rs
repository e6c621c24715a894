//! Multi-source aggregation
//!
//! [`Aggregator::aggregate`] is the single entrypoint. It applies the size
//! policy, then runs one of three paths:
//!
//! - single plan: plan, schedule, merge, report
//! - chunked: the single-plan pipeline per chunk through
//!   [`ChunkedController`], merged in submission order
//! - streaming: critical result first, optionals in completion order,
//!   terminated by a `done` record (see [`stream`])
//!
//! Every path reports the same coverage diagnostics.

pub mod chunked;
pub mod diagnostics;
pub mod merge;
pub mod params;
pub mod phase;
pub mod planner;
pub mod scheduler;
pub mod stream;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::enrich::{CentroidEnricher, FieldEnricher};
use crate::snapshot::{group_by_farm, SnapshotSink};
use crate::types::{FieldgateError, IdentifierSet, Result};
use crate::upstream::{Credentials, Envelope, EnvelopeSource, UpstreamClient};

pub use chunked::{ChunkResult, ChunkRunner, ChunkedController, ChunkedOutcome, ChunkingConfig};
pub use diagnostics::{Diagnostics, FailedChunk, SubQuerySummary, Warning};
pub use merge::{FieldEntity, FieldMerger, MergeOutcome, MergeStats};
pub use params::{AggregateRequest, CallOptions, ChunkingPolicy, RequestParams, TaskFlags};
pub use phase::{AggregationPhase, PhaseTracker};
pub use planner::{FieldDataPlanner, Planner, QueryPlan, SubQuerySpec, MERGE_PRECEDENCE};
pub use scheduler::{ExecutionReport, Scheduler, SchedulerConfig, SubQueryError, SubQueryOutcome};
pub use stream::StreamRecord;

use diagnostics::{cap, summarize, ChunkWarnings, MAX_REPORTED_CHUNKS, MAX_REPORTED_IDS};
use merge::covered_groups;

// ============================================================================
// Configuration
// ============================================================================

/// Aggregation policy knobs. Built by the binary; the core never reads
/// the environment.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub scheduler: SchedulerConfig,
    pub chunking: ChunkingConfig,
    /// Batch requests with at least this many identifiers are chunked
    pub chunk_threshold: usize,
    /// Above this, the conservative chunked mode is forced
    pub sync_max: usize,
    /// Above `max(sync_max, hard_max)`, the request is rejected
    pub hard_max: usize,
    /// Chunk size ceiling in the forced mode
    pub large_chunk_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            chunking: ChunkingConfig::default(),
            chunk_threshold: 20,
            sync_max: 200,
            hard_max: 500,
            large_chunk_size: 1,
        }
    }
}

impl AggregatorConfig {
    pub fn effective_max(&self) -> usize {
        self.sync_max.max(self.hard_max)
    }
}

// ============================================================================
// Call and result types
// ============================================================================

/// One aggregation call, already split from its wire form
#[derive(Debug, Clone)]
pub struct AggregateCall {
    pub params: RequestParams,
    pub credentials: Credentials,
    pub options: CallOptions,
}

impl AggregateCall {
    pub fn new(params: RequestParams, credentials: Credentials, options: CallOptions) -> Self {
        Self {
            params,
            credentials,
            options,
        }
    }

    pub fn from_request(request: AggregateRequest, now: chrono::DateTime<chrono::Utc>) -> Result<Self> {
        let (params, credentials, options) = request.into_parts(now)?;
        Ok(Self::new(params, credentials, options))
    }
}

/// Batch aggregation result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub ok: bool,
    pub status: u16,
    pub source: EnvelopeSource,
    pub merged_fields: Vec<FieldEntity>,
    pub warnings: Vec<Warning>,
    pub diagnostics: Diagnostics,
    pub chunked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_responses: Option<BTreeMap<String, Envelope>>,
}

/// What the entrypoint hands back to the calling layer
#[derive(Debug)]
pub enum AggregateResponse {
    Batch(Box<AggregateResult>),
    /// NDJSON records, terminated by a `done` record
    Stream(mpsc::Receiver<StreamRecord>),
}

/// Merged output of one plan execution
#[derive(Debug)]
pub(crate) struct PlanRun {
    pub report: ExecutionReport,
    pub fields: Vec<FieldEntity>,
    pub stats: MergeStats,
    pub warnings: Vec<Warning>,
    pub summaries: BTreeMap<String, SubQuerySummary>,
}

/// Warning for each optional sub-query that did not produce data
pub(crate) fn optional_warning(outcome: &SubQueryOutcome, summary: Option<&SubQuerySummary>) -> Option<Warning> {
    if outcome.criticality == planner::Criticality::Critical || outcome.is_ok() {
        return None;
    }
    let detail = match summary {
        Some(s) => json!({"errorClass": s.error_class, "error": s.error, "status": s.status}),
        None => json!({}),
    };
    Some(Warning::with_detail(outcome.warning_reason, detail))
}

/// Warning listing identifiers missing from the merged fields
pub(crate) fn missing_warning(diagnostics: &Diagnostics) -> Option<Warning> {
    if diagnostics.missing_farm_uuids.is_empty() {
        return None;
    }
    Some(Warning::with_detail(
        "missing_farms_in_merged_response",
        json!({"missing_farm_uuids": diagnostics.missing_farm_uuids}),
    ))
}

// ============================================================================
// Aggregator
// ============================================================================

/// Aggregation entrypoint. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Aggregator {
    scheduler: Scheduler,
    planner: Arc<dyn Planner>,
    enricher: Arc<dyn FieldEnricher>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(upstream: Arc<dyn UpstreamClient>, cache: Arc<dyn ResponseCache>, config: AggregatorConfig) -> Self {
        Self {
            scheduler: Scheduler::new(upstream, cache, config.scheduler.clone()),
            planner: Arc::new(FieldDataPlanner::default()),
            enricher: Arc::new(CentroidEnricher),
            snapshots: None,
            config,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn FieldEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_snapshot_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn planner(&self) -> &dyn Planner {
        self.planner.as_ref()
    }

    pub(crate) fn enricher(&self) -> &dyn FieldEnricher {
        self.enricher.as_ref()
    }

    /// Run one aggregation call
    pub async fn aggregate(&self, call: AggregateCall) -> Result<AggregateResponse> {
        let AggregateCall {
            mut params,
            credentials,
            mut options,
        } = call;
        let call_id = Uuid::new_v4().to_string();
        let requested = params.farm_uuids.len();

        let max = self.config.effective_max();
        if requested > max {
            warn!(call_id = %call_id, requested, max, "Too many farms requested");
            return Err(FieldgateError::TooManyIdentifiers {
                received: requested,
                max,
                sync_max: self.config.sync_max,
            });
        }

        if requested > self.config.sync_max {
            let mut warnings = Vec::new();
            if params.with_boundary {
                params.with_boundary = false;
                warnings.push(Warning::new("boundary_omitted_for_large_request"));
            }
            if options.include_sub_responses {
                options.include_sub_responses = false;
                warnings.push(Warning::new("sub_responses_omitted_for_large_request"));
            }
            options.strict = true;

            let mut chunking = self.config.chunking.clone();
            chunking.chunk_size = chunking.chunk_size.min(self.config.large_chunk_size.max(1));
            info!(
                call_id = %call_id,
                requested,
                chunk_size = chunking.chunk_size,
                "Large request, forcing conservative chunked mode"
            );
            let result = self
                .run_chunked(&call_id, &params, &credentials, options, chunking, warnings)
                .await?;
            return Ok(AggregateResponse::Batch(Box::new(result)));
        }

        if options.stream {
            return stream::start(self.clone(), call_id, params, credentials, options).await;
        }

        let chunk = match options.chunking {
            ChunkingPolicy::Always => true,
            ChunkingPolicy::Never => false,
            ChunkingPolicy::Auto => requested >= self.config.chunk_threshold,
        };

        let result = if chunk {
            // Sub-responses are only embedded in single-plan results
            options.include_sub_responses = false;
            let chunking = self.config.chunking.clone();
            self.run_chunked(&call_id, &params, &credentials, options, chunking, Vec::new())
                .await?
        } else {
            self.run_single(&call_id, &params, &credentials, options).await?
        };
        Ok(AggregateResponse::Batch(Box::new(result)))
    }

    /// Plan, execute, merge and enrich one identifier set
    pub(crate) async fn run_plan(
        &self,
        params: &RequestParams,
        credentials: &Credentials,
        phase: &mut PhaseTracker,
    ) -> Result<PlanRun> {
        let plan = match self.planner.plan(params) {
            Ok(plan) => plan,
            Err(err) => {
                phase.fail();
                return Err(err);
            }
        };

        phase.advance(AggregationPhase::ExecutingCritical);
        let report = self.scheduler.execute(&plan, credentials).await;
        let summaries = summarize(&report.outcomes, credentials);
        for summary in summaries.values() {
            summary.log();
        }

        let base_fields = report
            .critical()
            .and_then(SubQueryOutcome::envelope)
            .and_then(Envelope::fields);
        if base_fields.is_none() {
            phase.fail();
            let critical = report.critical();
            let status = critical.and_then(|c| c.result.as_ref().err()).and_then(SubQueryError::status);
            let reason = match critical.map(|c| &c.result) {
                Some(Err(err)) => credentials.redact(&err.to_string()),
                _ => "critical response carried no field list".to_string(),
            };
            return Err(FieldgateError::CriticalFailed {
                status,
                reason,
                diagnostics: summaries,
            });
        }

        phase.advance(AggregationPhase::ExecutingOptional);
        phase.advance(AggregationPhase::Merging);

        let warnings: Vec<Warning> = report
            .outcomes
            .iter()
            .filter_map(|o| optional_warning(o, summaries.get(o.label)))
            .collect();

        let mut merged = merge::merge(report.outcomes.iter().map(|o| {
            o.envelope()
                .and_then(Envelope::fields)
                .map(Vec::as_slice)
        }));
        for field in &mut merged.fields {
            self.enricher.enrich(field);
        }

        Ok(PlanRun {
            report,
            fields: merged.fields,
            stats: merged.stats,
            warnings,
            summaries,
        })
    }

    async fn run_single(
        &self,
        call_id: &str,
        params: &RequestParams,
        credentials: &Credentials,
        options: CallOptions,
    ) -> Result<AggregateResult> {
        let mut phase = PhaseTracker::new(call_id);
        let run = self.run_plan(params, credentials, &mut phase).await?;
        phase.advance(AggregationPhase::Reporting);

        let mut diagnostics = Diagnostics::coverage(&params.farm_uuids, &covered_groups(&run.fields));
        diagnostics.dropped_fields = run.stats.dropped_fields;
        diagnostics.dropped_crop_seasons = run.stats.dropped_crop_seasons;
        diagnostics.sub_queries = run.summaries;

        let mut warnings = run.warnings;
        warnings.extend(missing_warning(&diagnostics));

        let complete = diagnostics.is_complete();
        if options.strict && !complete {
            phase.fail();
            return Err(FieldgateError::Incomplete {
                failed_chunks: Vec::new(),
                partial_fields: run.fields.len(),
                missing: diagnostics.missing_farm_uuids,
                retried: Vec::new(),
            });
        }

        let sub_responses = options.include_sub_responses.then(|| {
            run.report
                .outcomes
                .iter()
                .filter_map(|o| o.envelope().map(|e| (o.label.to_string(), e.clone())))
                .collect()
        });

        // The critical query succeeded: missing farms are reported, not fatal
        let result = AggregateResult {
            ok: true,
            status: 200,
            source: if run.report.fully_cached() {
                EnvelopeSource::Cache
            } else {
                EnvelopeSource::Api
            },
            merged_fields: run.fields,
            warnings,
            diagnostics,
            chunked: false,
            sub_responses,
        };
        phase.complete();
        info!(
            call_id = %call_id,
            fields = result.merged_fields.len(),
            covered = result.diagnostics.covered_count,
            requested = result.diagnostics.requested_count,
            warnings = result.warnings.len(),
            "Aggregation done"
        );

        self.persist(&result.merged_fields).await;
        Ok(result)
    }

    async fn run_chunked(
        &self,
        call_id: &str,
        params: &RequestParams,
        credentials: &Credentials,
        options: CallOptions,
        chunking: ChunkingConfig,
        mut warnings: Vec<Warning>,
    ) -> Result<AggregateResult> {
        // Planning errors are defects; surface them before any chunk runs
        self.planner.plan(params)?;

        let mut phase = PhaseTracker::new(call_id);
        phase.advance(AggregationPhase::ExecutingCritical);

        let runner = PlanChunkRunner {
            aggregator: self,
            call_id,
            params,
            credentials,
        };
        let controller = ChunkedController::new(chunking);
        let outcome = controller.run_chunked(&runner, &params.farm_uuids).await;

        let failed_chunks: Vec<FailedChunk> = cap(
            outcome.failures.iter().map(FailedChunk::from).collect(),
            MAX_REPORTED_CHUNKS,
        );
        if outcome.all_failed() {
            phase.fail();
            warn!(call_id = %call_id, chunks = outcome.failures.len(), "Every chunk failed");
            return Err(FieldgateError::AllChunksFailed { failed_chunks });
        }

        phase.advance(AggregationPhase::ExecutingOptional);
        phase.advance(AggregationPhase::Merging);

        let mut merger = FieldMerger::new();
        let mut chunk_warnings = ChunkWarnings::default();
        let mut fully_cached = true;
        for success in outcome.successes {
            fully_cached &= success.fully_cached;
            merger.add_stats(success.stats);
            for warning in success.warnings {
                chunk_warnings.add(success.identifiers.as_slice(), warning);
            }
            merger.merge_entities(success.fields);
        }
        warnings.extend(chunk_warnings.into_warnings());
        let merged = merger.finish();
        phase.advance(AggregationPhase::Reporting);

        let retried = cap(outcome.retried, MAX_REPORTED_IDS);
        let mut diagnostics = Diagnostics::coverage(&params.farm_uuids, &merged.covered_groups());
        diagnostics.dropped_fields = merged.stats.dropped_fields;
        diagnostics.dropped_crop_seasons = merged.stats.dropped_crop_seasons;
        diagnostics.failed_chunks = failed_chunks.clone();
        diagnostics.retried_failed_farm_uuids = retried.clone();

        if !failed_chunks.is_empty() {
            warnings.push(Warning::with_detail(
                "chunked_fetch_partial",
                json!({"failed_chunks": failed_chunks}),
            ));
        }
        if !retried.is_empty() {
            warnings.push(Warning::with_detail(
                "failed_farms_retried",
                json!({"retried_farm_uuids": retried}),
            ));
        }
        warnings.extend(missing_warning(&diagnostics));

        let complete = diagnostics.is_complete();
        if options.strict && !complete {
            phase.fail();
            return Err(FieldgateError::Incomplete {
                failed_chunks,
                partial_fields: merged.fields.len(),
                missing: diagnostics.missing_farm_uuids,
                retried,
            });
        }

        // Only failed chunks degrade the result; missing farms are warnings
        let degraded = !diagnostics.failed_chunks.is_empty();
        let result = AggregateResult {
            ok: !degraded,
            status: if degraded { 206 } else { 200 },
            source: if fully_cached {
                EnvelopeSource::Cache
            } else {
                EnvelopeSource::Api
            },
            merged_fields: merged.fields,
            warnings,
            diagnostics,
            chunked: true,
            sub_responses: None,
        };
        phase.complete();
        info!(
            call_id = %call_id,
            fields = result.merged_fields.len(),
            covered = result.diagnostics.covered_count,
            requested = result.diagnostics.requested_count,
            failed_chunks = result.diagnostics.failed_chunks.len(),
            "Chunked aggregation done"
        );

        self.persist(&result.merged_fields).await;
        Ok(result)
    }

    /// Upsert merged fields into the snapshot sink, if one is configured
    pub(crate) async fn persist(&self, fields: &[FieldEntity]) {
        let Some(sink) = &self.snapshots else {
            return;
        };
        for (farm, group) in group_by_farm(fields) {
            if let Err(e) = sink.upsert(&farm, &group).await {
                warn!(farm = %farm, error = %e, "Snapshot upsert failed");
            }
        }
    }
}

/// Adapts the single-plan pipeline to the chunk controller
struct PlanChunkRunner<'a> {
    aggregator: &'a Aggregator,
    call_id: &'a str,
    params: &'a RequestParams,
    credentials: &'a Credentials,
}

#[async_trait]
impl ChunkRunner for PlanChunkRunner<'_> {
    async fn run_chunk(&self, identifiers: &IdentifierSet) -> Result<ChunkResult> {
        let params = self.params.with_farms(identifiers.clone());
        let mut phase = PhaseTracker::new(format!("{}:{}", self.call_id, identifiers.as_slice().join(",")));
        let run = self
            .aggregator
            .run_plan(&params, self.credentials, &mut phase)
            .await?;
        phase.complete();

        Ok(ChunkResult {
            identifiers: identifiers.clone(),
            fully_cached: run.report.fully_cached(),
            fields: run.fields,
            stats: run.stats,
            warnings: run.warnings,
            sub_queries: run.summaries,
            attempts: 0,
        })
    }
}
