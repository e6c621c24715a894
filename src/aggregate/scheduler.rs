//! Execution Scheduler
//!
//! Runs a [`QueryPlan`] against the upstream client under a time budget:
//!
//! 1. every label is looked up in the response cache first
//! 2. the critical sub-query runs alone under a long, independent timeout,
//!    with one fallback attempt using a cheaper payload
//! 3. optional sub-queries then run concurrently, sharing one
//!    elapsed-time-aware deadline; a call whose deadline has already passed
//!    is recorded as expired without being issued
//! 4. a sub-query with a [`RetryPolicy`](super::planner::RetryPolicy) gets
//!    dedicated retries with a fixed delay, outside the shared budget
//!
//! Optional failures never fail the call. A critical failure short-circuits
//! the optionals.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::diagnostics::ErrorClass;
use super::planner::{Criticality, QueryPlan, SubQuerySpec};
use crate::cache::ResponseCache;
use crate::upstream::{Credentials, Envelope, GraphQlPayload, TransportError, UpstreamClient};

/// Scheduler time budgets
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on each critical attempt
    pub critical_timeout: Duration,
    /// Shared budget for all optional sub-queries
    pub optional_timeout: Duration,
    /// Floor for the critical fallback attempt's timeout
    pub fallback_min_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            critical_timeout: Duration::from_secs(100),
            optional_timeout: Duration::from_secs(100),
            fallback_min_timeout: Duration::from_secs(60),
        }
    }
}

/// Classified failure of one sub-query
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubQueryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned ok=false (status {})", .0.status)]
    Upstream(Box<Envelope>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("optional budget expired before the call was issued")]
    BudgetExpired,

    #[error("not issued because the critical sub-query failed")]
    NotIssued,
}

impl SubQueryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transport,
            Self::Upstream(_) => ErrorClass::UpstreamLogical,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::BudgetExpired => ErrorClass::BudgetExpired,
            Self::NotIssued => ErrorClass::NotIssued,
        }
    }

    /// Upstream HTTP status, when the failure was an `ok = false` envelope
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream(envelope) => Some(envelope.status),
            _ => None,
        }
    }
}

impl From<TransportError> for SubQueryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(msg) => Self::Transport(format!("timeout: {}", msg)),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Result of one sub-query, cached or fetched
#[derive(Debug, Clone)]
pub struct SubQueryOutcome {
    pub label: &'static str,
    pub criticality: Criticality,
    pub warning_reason: &'static str,
    pub operation_name: String,
    pub result: Result<Envelope, SubQueryError>,
    /// Upstream calls made; zero for a cache hit
    pub attempts: u32,
    pub elapsed: Duration,
}

impl SubQueryOutcome {
    fn new(spec: &SubQuerySpec, result: Result<Envelope, SubQueryError>, attempts: u32, started: Instant) -> Self {
        Self {
            label: spec.label,
            criticality: spec.criticality,
            warning_reason: spec.warning_reason,
            operation_name: spec.operation_name().to_string(),
            result,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.result.as_ref().ok()
    }

    pub fn from_cache(&self) -> bool {
        self.attempts == 0 && self.is_ok()
    }
}

/// All outcomes of one plan execution, in plan order
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcomes: Vec<SubQueryOutcome>,
}

impl ExecutionReport {
    pub fn critical(&self) -> Option<&SubQueryOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.criticality == Criticality::Critical)
    }

    pub fn critical_ok(&self) -> bool {
        self.critical().is_some_and(SubQueryOutcome::is_ok)
    }

    pub fn get(&self, label: &str) -> Option<&SubQueryOutcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }

    /// Total upstream calls made while executing the plan
    pub fn upstream_calls(&self) -> u32 {
        self.outcomes.iter().map(|o| o.attempts).sum()
    }

    /// True when every outcome was served by the cache
    pub fn fully_cached(&self) -> bool {
        self.outcomes.iter().all(SubQueryOutcome::from_cache)
    }
}

/// Executes plans against an upstream client and cache overlay
#[derive(Clone)]
pub struct Scheduler {
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<dyn ResponseCache>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(upstream: Arc<dyn UpstreamClient>, cache: Arc<dyn ResponseCache>, config: SchedulerConfig) -> Self {
        Self {
            upstream,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Cached `ok` envelope for a spec, if any
    pub fn cached(&self, spec: &SubQuerySpec) -> Option<SubQueryOutcome> {
        self.cache
            .get(spec.operation_name(), &spec.payload)
            .filter(|env| env.ok)
            .map(|env| SubQueryOutcome::new(spec, Ok(env), 0, Instant::now()))
    }

    /// Execute a whole plan in batch mode
    pub async fn execute(&self, plan: &QueryPlan, credentials: &Credentials) -> ExecutionReport {
        let critical = self.run_critical(plan.critical(), credentials).await;

        if !critical.is_ok() {
            warn!(label = %critical.label, "Critical sub-query failed, skipping optional sub-queries");
            let mut outcomes = vec![critical];
            for spec in plan.optionals() {
                let outcome = self.cached(spec).unwrap_or_else(|| {
                    SubQueryOutcome::new(spec, Err(SubQueryError::NotIssued), 0, Instant::now())
                });
                outcomes.push(outcome);
            }
            return ExecutionReport {
                outcomes: order_like(plan, outcomes),
            };
        }

        let deadline = Instant::now() + self.config.optional_timeout;
        let optionals = join_all(
            plan.optionals()
                .map(|spec| self.run_optional(spec, credentials, deadline)),
        )
        .await;

        let mut outcomes = vec![critical];
        outcomes.extend(optionals);
        ExecutionReport {
            outcomes: order_like(plan, outcomes),
        }
    }

    /// Run the critical sub-query: cache, then one bounded attempt, then
    /// one fallback attempt with the cheaper payload.
    pub async fn run_critical(&self, spec: &SubQuerySpec, credentials: &Credentials) -> SubQueryOutcome {
        if let Some(hit) = self.cached(spec) {
            debug!(label = %spec.label, "Critical sub-query served from cache");
            return hit;
        }

        let started = Instant::now();
        let first = self
            .attempt(&spec.payload, credentials, started + self.config.critical_timeout, self.config.critical_timeout)
            .await;

        let result = match (first, &spec.fallback) {
            (Ok(env), _) => {
                self.cache.put(spec.operation_name(), &spec.payload, &env);
                return SubQueryOutcome::new(spec, Ok(env), 1, started);
            }
            (Err(err), None) => Err(err),
            (Err(err), Some(fallback)) => {
                warn!(
                    label = %spec.label,
                    error = %err,
                    "Critical sub-query failed, retrying with reduced payload"
                );
                let bound = self.config.critical_timeout.max(self.config.fallback_min_timeout);
                let retried = self.attempt(fallback, credentials, Instant::now() + bound, bound).await;
                if let Ok(env) = &retried {
                    self.cache.put(spec.operation_name(), fallback, env);
                    info!(label = %spec.label, "Critical sub-query recovered with reduced payload");
                }
                return SubQueryOutcome::new(spec, retried, 2, started);
            }
        };

        SubQueryOutcome::new(spec, result, 1, started)
    }

    /// Run one optional sub-query under the shared `deadline`.
    pub async fn run_optional(&self, spec: &SubQuerySpec, credentials: &Credentials, deadline: Instant) -> SubQueryOutcome {
        if let Some(hit) = self.cached(spec) {
            return hit;
        }

        let started = Instant::now();
        if started >= deadline {
            debug!(label = %spec.label, "Optional budget expired, not issuing call");
            return SubQueryOutcome::new(spec, Err(SubQueryError::BudgetExpired), 0, started);
        }

        let bound = match spec.timeout_hint {
            Some(hint) => deadline.min(started + hint),
            None => deadline,
        };
        let mut result = self.attempt(&spec.payload, credentials, bound, bound - started).await;
        let mut attempts = 1;

        if let Some(policy) = spec.retry {
            let per_attempt = spec.timeout_hint.unwrap_or(self.config.optional_timeout);
            while result.is_err() && attempts <= policy.retries {
                warn!(
                    label = %spec.label,
                    attempt = attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    "Optional sub-query failed, retrying"
                );
                sleep(policy.delay).await;
                attempts += 1;
                result = self
                    .attempt(&spec.payload, credentials, Instant::now() + per_attempt, per_attempt)
                    .await;
            }
        }

        if let Ok(env) = &result {
            self.cache.put(spec.operation_name(), &spec.payload, env);
        }
        SubQueryOutcome::new(spec, result, attempts, started)
    }

    /// One upstream call bounded by `until`
    async fn attempt(
        &self,
        payload: &GraphQlPayload,
        credentials: &Credentials,
        until: Instant,
        budget: Duration,
    ) -> Result<Envelope, SubQueryError> {
        match timeout_at(until, self.upstream.call(payload, credentials)).await {
            Err(_) => Err(SubQueryError::Timeout(budget)),
            Ok(Err(transport)) => Err(transport.into()),
            Ok(Ok(env)) if env.ok => Ok(env),
            Ok(Ok(env)) => Err(SubQueryError::Upstream(Box::new(env))),
        }
    }
}

/// Reorder outcomes to match the plan's spec order
fn order_like(plan: &QueryPlan, mut outcomes: Vec<SubQueryOutcome>) -> Vec<SubQueryOutcome> {
    let labels = plan.labels();
    outcomes.sort_by_key(|o| labels.iter().position(|l| *l == o.label).unwrap_or(usize::MAX));
    outcomes
}
