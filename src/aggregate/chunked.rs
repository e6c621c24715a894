//! Chunked Fan-Out Controller
//!
//! Splits a large identifier set into contiguous chunks and drives the
//! single-set pipeline for each one through a [`ChunkRunner`]:
//!
//! - at most `concurrency` chunks are in flight
//! - each chunk gets `per_chunk_attempts` tries with linear backoff capped
//!   at `backoff_cap`
//! - results come back in submission order, not completion order
//! - identifiers from chunks that failed every attempt get one more pass,
//!   re-chunked the same way
//!
//! Chunks still failing after that pass are permanent failures.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::diagnostics::{FailedChunk, SubQuerySummary, Warning};
use super::merge::{FieldEntity, MergeStats};
use crate::types::{IdentifierSet, Result};

/// Chunking knobs
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub per_chunk_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub concurrency: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1,
            per_chunk_attempts: 3,
            backoff_base: Duration::from_millis(800),
            backoff_cap: Duration::from_millis(5000),
            concurrency: 2,
        }
    }
}

impl ChunkingConfig {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt).min(self.backoff_cap)
    }
}

/// Successful run of the single-set pipeline for one chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub identifiers: IdentifierSet,
    pub fields: Vec<FieldEntity>,
    pub stats: MergeStats,
    pub warnings: Vec<Warning>,
    pub sub_queries: BTreeMap<String, SubQuerySummary>,
    /// Every sub-query of the winning attempt was a cache hit
    pub fully_cached: bool,
    pub attempts: u32,
}

/// Chunk that failed every attempt
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub identifiers: IdentifierSet,
    /// Detail of the last error
    pub error: Value,
    pub attempts: u32,
}

impl From<&ChunkFailure> for FailedChunk {
    fn from(failure: &ChunkFailure) -> Self {
        FailedChunk {
            farm_uuids: failure.identifiers.as_slice().to_vec(),
            error: failure.error.clone(),
            attempts: failure.attempts,
        }
    }
}

/// Runs the full single-set pipeline for one chunk
#[async_trait]
pub trait ChunkRunner: Send + Sync {
    /// Succeeds when the critical sub-query returned a field list
    /// (possibly empty) for the chunk.
    async fn run_chunk(&self, identifiers: &IdentifierSet) -> Result<ChunkResult>;
}

/// Outcome of both passes
#[derive(Debug, Clone, Default)]
pub struct ChunkedOutcome {
    /// Successful chunks, first pass then retry pass, each in submission order
    pub successes: Vec<ChunkResult>,
    /// Chunks that failed in the retry pass
    pub failures: Vec<ChunkFailure>,
    /// Identifiers that went through the retry pass
    pub retried: Vec<String>,
}

impl ChunkedOutcome {
    pub fn all_failed(&self) -> bool {
        self.successes.is_empty()
    }
}

/// Drives chunk runs with bounded concurrency and retries
#[derive(Debug, Clone, Default)]
pub struct ChunkedController {
    config: ChunkingConfig,
}

impl ChunkedController {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// First pass over every chunk, then one retry pass over the
    /// identifiers of chunks that failed.
    pub async fn run_chunked<R>(&self, runner: &R, identifiers: &IdentifierSet) -> ChunkedOutcome
    where
        R: ChunkRunner + ?Sized,
    {
        let (mut successes, first_failures) = self.run_pass(runner, identifiers).await;
        if first_failures.is_empty() {
            return ChunkedOutcome {
                successes,
                failures: Vec::new(),
                retried: Vec::new(),
            };
        }

        let retry_set: IdentifierSet = first_failures
            .iter()
            .flat_map(|f| f.identifiers.iter().cloned())
            .collect();
        info!(
            failed_chunks = first_failures.len(),
            farms = retry_set.len(),
            "Retrying failed chunks"
        );

        let (retried_successes, failures) = self.run_pass(runner, &retry_set).await;
        successes.extend(retried_successes);

        if !failures.is_empty() {
            warn!(failed_chunks = failures.len(), "Chunks still failing after retry pass");
        }

        ChunkedOutcome {
            successes,
            failures,
            retried: retry_set.into(),
        }
    }

    /// One pass: successes and failures, each in submission order
    pub async fn run_pass<R>(&self, runner: &R, identifiers: &IdentifierSet) -> (Vec<ChunkResult>, Vec<ChunkFailure>)
    where
        R: ChunkRunner + ?Sized,
    {
        let chunks = identifiers.chunks(self.config.chunk_size);
        debug!(
            chunks = chunks.len(),
            chunk_size = self.config.chunk_size,
            concurrency = self.config.concurrency,
            "Starting chunk pass"
        );

        let results: Vec<std::result::Result<ChunkResult, ChunkFailure>> = stream::iter(chunks)
            .map(|chunk| self.run_with_attempts(runner, chunk))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(success) => successes.push(success),
                Err(failure) => failures.push(failure),
            }
        }
        (successes, failures)
    }

    async fn run_with_attempts<R>(
        &self,
        runner: &R,
        chunk: IdentifierSet,
    ) -> std::result::Result<ChunkResult, ChunkFailure>
    where
        R: ChunkRunner + ?Sized,
    {
        let attempts = self.config.per_chunk_attempts.max(1);
        let mut last_error = Value::Null;

        for attempt in 1..=attempts {
            match runner.run_chunk(&chunk).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    return Ok(result);
                }
                Err(err) => {
                    warn!(
                        farms = ?chunk.as_slice(),
                        attempt,
                        error = %err,
                        "Chunk attempt failed"
                    );
                    last_error = err.to_detail();
                    if attempt < attempts {
                        sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(ChunkFailure {
            identifiers: chunk,
            error: last_error,
            attempts,
        })
    }
}
