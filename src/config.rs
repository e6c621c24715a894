//! Configuration for fieldgate
//!
//! CLI arguments and environment variable handling using clap. The
//! aggregation core never reads the environment; [`Args`] builds the plain
//! config structs it needs.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::aggregate::{AggregatorConfig, ChunkingConfig, SchedulerConfig};
use crate::upstream::GraphQlClientConfig;

/// fieldgate - multi-source field data aggregation gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "fieldgate")]
#[command(about = "Aggregates agronomic field data from many upstream GraphQL queries")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Upstream GraphQL endpoint
    #[arg(
        long,
        env = "GRAPHQL_ENDPOINT",
        default_value = "https://fm-api.xarvio.com/api/graphql/data"
    )]
    pub graphql_endpoint: String,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "UPSTREAM_CONNECT_TIMEOUT_SECS", default_value = "10")]
    pub upstream_connect_timeout_secs: u64,

    /// Upstream socket read idle timeout in seconds, raised to the critical timeout
    #[arg(long, env = "UPSTREAM_READ_TIMEOUT_SECS", default_value = "60")]
    pub upstream_read_timeout_secs: u64,

    /// Chunking configuration
    #[command(flatten)]
    pub chunking: ChunkingArgs,

    /// Timeout on each critical attempt, in seconds
    #[arg(long, env = "COMBINED_FIELDS_BASE_TIMEOUT_SEC", default_value = "100")]
    pub base_timeout_sec: u64,

    /// Shared budget for optional sub-queries, in seconds
    #[arg(long, env = "COMBINED_FIELDS_OPTIONAL_TIMEOUT_SEC", default_value = "100")]
    pub optional_timeout_sec: u64,

    /// Farms kept by the in-process snapshot store
    #[arg(long, env = "SNAPSHOT_MAX_FARMS", default_value = "10000")]
    pub snapshot_max_farms: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Chunked fan-out and size policy
#[derive(Parser, Debug, Clone)]
pub struct ChunkingArgs {
    /// Identifiers per chunk
    #[arg(long = "chunk-size", env = "COMBINED_FIELDS_SERVER_CHUNK_SIZE", default_value = "1")]
    pub chunk_size: usize,

    /// Attempts per chunk in each pass
    #[arg(
        long = "per-chunk-attempts",
        env = "COMBINED_FIELDS_SERVER_PER_CHUNK_ATTEMPTS",
        default_value = "3"
    )]
    pub per_chunk_attempts: u32,

    /// Backoff base between chunk attempts, in milliseconds
    #[arg(
        long = "retry-backoff-ms",
        env = "COMBINED_FIELDS_SERVER_RETRY_BACKOFF_MS",
        default_value = "800"
    )]
    pub retry_backoff_ms: u64,

    /// Backoff ceiling, in milliseconds
    #[arg(
        long = "retry-backoff-cap-ms",
        env = "COMBINED_FIELDS_SERVER_RETRY_BACKOFF_CAP_MS",
        default_value = "5000"
    )]
    pub retry_backoff_cap_ms: u64,

    /// Chunks in flight at once
    #[arg(
        long = "chunk-concurrency",
        env = "COMBINED_FIELDS_SERVER_CHUNK_CONCURRENCY",
        default_value = "2"
    )]
    pub concurrency: usize,

    /// Batch requests with at least this many farms are chunked
    #[arg(
        long = "chunk-threshold",
        env = "COMBINED_FIELDS_SERVER_CHUNK_THRESHOLD",
        default_value = "20"
    )]
    pub threshold: usize,

    /// Above this many farms the conservative chunked mode is forced
    #[arg(long = "sync-max-farms", env = "COMBINED_FIELDS_SYNC_MAX_FARMS", default_value = "200")]
    pub sync_max_farms: usize,

    /// Above this many farms requests are rejected
    #[arg(long = "hard-max-farms", env = "COMBINED_FIELDS_HARD_MAX_FARMS", default_value = "500")]
    pub hard_max_farms: usize,

    /// Chunk size ceiling in the forced mode
    #[arg(
        long = "large-chunk-size",
        env = "COMBINED_FIELDS_LARGE_CHUNK_SIZE",
        default_value = "1"
    )]
    pub large_chunk_size: usize,
}

impl Args {
    /// Aggregation policy for the core
    pub fn aggregator_config(&self) -> AggregatorConfig {
        let c = &self.chunking;
        AggregatorConfig {
            scheduler: SchedulerConfig {
                critical_timeout: Duration::from_secs(self.base_timeout_sec),
                optional_timeout: Duration::from_secs(self.optional_timeout_sec),
                ..SchedulerConfig::default()
            },
            chunking: ChunkingConfig {
                chunk_size: c.chunk_size,
                per_chunk_attempts: c.per_chunk_attempts,
                backoff_base: Duration::from_millis(c.retry_backoff_ms),
                backoff_cap: Duration::from_millis(c.retry_backoff_cap_ms),
                concurrency: c.concurrency,
            },
            chunk_threshold: c.threshold,
            sync_max: c.sync_max_farms,
            hard_max: c.hard_max_farms,
            large_chunk_size: c.large_chunk_size,
        }
    }

    /// Transport settings for the GraphQL client
    pub fn graphql_config(&self) -> GraphQlClientConfig {
        GraphQlClientConfig {
            endpoint: self.graphql_endpoint.clone(),
            connect_timeout: Duration::from_secs(self.upstream_connect_timeout_secs),
            // A silent critical call must not be cut before its own budget
            read_timeout: Duration::from_secs(self.upstream_read_timeout_secs.max(self.base_timeout_sec)),
            ..GraphQlClientConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err("COMBINED_FIELDS_SERVER_CHUNK_SIZE must be at least 1".to_string());
        }
        if c.per_chunk_attempts == 0 {
            return Err("COMBINED_FIELDS_SERVER_PER_CHUNK_ATTEMPTS must be at least 1".to_string());
        }
        if c.concurrency == 0 {
            return Err("COMBINED_FIELDS_SERVER_CHUNK_CONCURRENCY must be at least 1".to_string());
        }
        if c.large_chunk_size == 0 {
            return Err("COMBINED_FIELDS_LARGE_CHUNK_SIZE must be at least 1".to_string());
        }
        if self.base_timeout_sec == 0 || self.optional_timeout_sec == 0 {
            return Err("timeouts must be at least 1 second".to_string());
        }
        if !self.graphql_endpoint.starts_with("http://") && !self.graphql_endpoint.starts_with("https://") {
            return Err("GRAPHQL_ENDPOINT must be an http(s) URL".to_string());
        }
        Ok(())
    }
}
