//! fieldgate - multi-source aggregation gateway for agronomic field data
//!
//! One caller request fans out into a planned set of named GraphQL
//! sub-queries, executed under a time budget with independent criticality.
//! Their partial results are merged into one record per field, and the
//! response says exactly which farms are covered and which are not.
//!
//! ## Components
//!
//! - **Planner**: builds the sub-query set from request parameters
//! - **Scheduler**: critical first, optionals under a shared deadline
//! - **Chunked fan-out**: bounded-concurrency chunks with retry passes
//! - **Merge engine**: precedence-ordered, non-destructive field merge
//! - **Diagnostics**: redacted per-sub-query summaries and coverage
//!
//! Transport, cache, enrichment and persistence are injected collaborators.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod enrich;
pub mod logging;
pub mod routes;
pub mod server;
pub mod snapshot;
pub mod types;
pub mod upstream;

pub use aggregate::{
    AggregateCall, AggregateResponse, AggregateResult, Aggregator, AggregatorConfig, StreamRecord,
};
pub use config::Args;
pub use server::{run, AppState};
pub use types::{FieldgateError, IdentifierSet, Result};
