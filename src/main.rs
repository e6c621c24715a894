//! fieldgate - multi-source aggregation gateway for agronomic field data

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use fieldgate::{
    aggregate::Aggregator,
    cache::InMemoryResponseCache,
    config::Args,
    logging,
    server::{self, AppState},
    snapshot::InMemorySnapshotSink,
    upstream::GraphQlClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level, &args.log_format) {
        eprintln!("{}", e);
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.aggregator_config();
    info!("======================================");
    info!("  fieldgate");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("GraphQL endpoint: {}", args.graphql_endpoint);
    info!(
        "Chunking: size {} / threshold {} / concurrency {}",
        config.chunking.chunk_size, config.chunk_threshold, config.chunking.concurrency
    );
    info!("Farm limits: sync {} / hard {}", config.sync_max, config.hard_max);
    info!("======================================");

    let upstream = Arc::new(GraphQlClient::new(args.graphql_config())?);
    let cache = Arc::new(InMemoryResponseCache::new());
    let snapshots = Arc::new(InMemorySnapshotSink::with_max_farms(args.snapshot_max_farms));
    let aggregator =
        Aggregator::new(upstream, cache.clone(), config).with_snapshot_sink(snapshots.clone());

    let state = Arc::new(AppState::new(args, aggregator, cache).with_snapshots(snapshots));
    server::run(state).await?;
    Ok(())
}
