//! Sub-Query Planner
//!
//! Turns [`RequestParams`] into a typed [`QueryPlan`]: exactly one critical
//! sub-query plus the applicable optional ones, in merge precedence order.
//! Variables are pure functions of the parameters.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::params::{RequestParams, TaskFlags};
use crate::types::{FieldgateError, Result};
use crate::upstream::{queries, GraphQlPayload};

/// Label of the critical sub-query
pub const BASE_LABEL: &str = "base";

/// Merge precedence: later labels win on conflicting keys
pub const MERGE_PRECEDENCE: [&str; 7] = [
    BASE_LABEL,
    "insights",
    "predictions",
    "tasks",
    "tasks_sprayings",
    "risk1",
    "risk2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    Optional,
}

/// Predicate deciding whether a sub-query belongs in the plan
pub type Applicability = Arc<dyn Fn(&RequestParams) -> bool + Send + Sync>;

/// Dedicated retries for a sub-query that times out more than the others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dedicated retries after the first call fails
    pub retries: u32,
    /// Fixed delay before each retry
    pub delay: Duration,
}

/// One named sub-query in a plan
#[derive(Clone)]
pub struct SubQuerySpec {
    pub label: &'static str,
    pub criticality: Criticality,
    pub applicability: Option<Applicability>,
    pub payload: GraphQlPayload,
    /// Cheaper payload tried once if the critical call fails
    pub fallback: Option<GraphQlPayload>,
    pub timeout_hint: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Warning reason reported when this optional sub-query fails
    pub warning_reason: &'static str,
}

impl SubQuerySpec {
    pub fn critical(label: &'static str, payload: GraphQlPayload) -> Self {
        Self {
            label,
            criticality: Criticality::Critical,
            applicability: None,
            payload,
            fallback: None,
            timeout_hint: None,
            retry: None,
            warning_reason: "critical_failed",
        }
    }

    pub fn optional(label: &'static str, payload: GraphQlPayload, warning_reason: &'static str) -> Self {
        Self {
            label,
            criticality: Criticality::Optional,
            applicability: None,
            payload,
            fallback: None,
            timeout_hint: None,
            retry: None,
            warning_reason,
        }
    }

    pub fn with_fallback(mut self, fallback: GraphQlPayload) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_timeout_hint(mut self, hint: Duration) -> Self {
        self.timeout_hint = Some(hint);
        self
    }

    pub fn with_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.retry = Some(RetryPolicy { retries, delay });
        self
    }

    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestParams) -> bool + Send + Sync + 'static,
    {
        self.applicability = Some(Arc::new(predicate));
        self
    }

    pub fn applies_to(&self, params: &RequestParams) -> bool {
        self.applicability.as_ref().map_or(true, |p| p(params))
    }

    pub fn operation_name(&self) -> &str {
        &self.payload.operation_name
    }

    pub fn is_critical(&self) -> bool {
        self.criticality == Criticality::Critical
    }
}

impl fmt::Debug for SubQuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubQuerySpec")
            .field("label", &self.label)
            .field("criticality", &self.criticality)
            .field("operation", &self.payload.operation_name)
            .field("has_fallback", &self.fallback.is_some())
            .field("timeout_hint", &self.timeout_hint)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Validated plan: one critical spec, unique labels, precedence order
#[derive(Debug, Clone)]
pub struct QueryPlan {
    specs: Vec<SubQuerySpec>,
    critical: usize,
}

impl QueryPlan {
    pub fn new(specs: Vec<SubQuerySpec>) -> Result<Self> {
        let critical: Vec<usize> = specs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_critical())
            .map(|(i, _)| i)
            .collect();
        if critical.len() != 1 {
            return Err(FieldgateError::Planning(format!(
                "plan must contain exactly one critical sub-query, found {}",
                critical.len()
            )));
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.label) {
                return Err(FieldgateError::Planning(format!(
                    "duplicate sub-query label '{}'",
                    spec.label
                )));
            }
        }

        Ok(Self {
            specs,
            critical: critical[0],
        })
    }

    pub fn critical(&self) -> &SubQuerySpec {
        &self.specs[self.critical]
    }

    pub fn optionals(&self) -> impl Iterator<Item = &SubQuerySpec> {
        self.specs.iter().filter(|s| !s.is_critical())
    }

    pub fn specs(&self) -> &[SubQuerySpec] {
        &self.specs
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.label).collect()
    }

    pub fn get(&self, label: &str) -> Option<&SubQuerySpec> {
        self.specs.iter().find(|s| s.label == label)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Builds a plan from request parameters
pub trait Planner: Send + Sync {
    fn plan(&self, params: &RequestParams) -> Result<QueryPlan>;
}

// ============================================================================
// Field data planner
// ============================================================================

/// Planner for the field-data sub-query set
#[derive(Debug, Clone)]
pub struct FieldDataPlanner {
    /// Time hint for the insights and predictions calls
    pub optional_hint: Duration,
    /// Dedicated retry policy for insights
    pub insights_retry: RetryPolicy,
}

impl Default for FieldDataPlanner {
    fn default() -> Self {
        Self {
            optional_hint: Duration::from_secs(10),
            insights_retry: RetryPolicy {
                retries: 2,
                delay: Duration::from_secs(3),
            },
        }
    }
}

fn vars(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn tasks_payload(params: &RequestParams, flags: &TaskFlags) -> GraphQlPayload {
    let mut variables = vars([
        ("farmUuids", json!(params.farm_uuids)),
        ("languageCode", json!(params.language_code)),
        ("cropSeasonLifeCycleStates", json!(params.crop_season_lifecycle_states)),
        ("withBoundary", json!(false)),
        ("withCropSeasonsV2", json!(true)),
    ]);
    flags.write_into(&mut variables);
    GraphQlPayload::new("CombinedFieldData", queries::COMBINED_FIELD_DATA_TASKS, variables)
}

fn risk_payload(params: &RequestParams, recommendations: bool) -> GraphQlPayload {
    let status = !recommendations;
    let mut variables = vars([
        ("farmUuids", json!(params.farm_uuids)),
        ("fromDate", json!(params.window.from_date)),
        ("tillDate", json!(params.window.till_date)),
        ("cropSeasonLifeCycleStates", json!(params.crop_season_lifecycle_states)),
        ("withactionRecommendations", json!(recommendations)),
        ("withnutritionRecommendations", json!(recommendations)),
        ("withwaterRecommendations", json!(recommendations)),
        ("withactionWindows", json!(recommendations)),
        ("withweedManagementRecommendations", json!(recommendations)),
        ("withCropSeasonStatus", json!(status)),
        ("withNutritionStatus", json!(status)),
        ("withWaterStatus", json!(status)),
        ("withrisk", json!(status)),
    ]);
    if status {
        variables.insert("languageCode".into(), json!(params.language_code));
        variables.insert("withtimingStressesInfo".into(), json!(true));
    }
    GraphQlPayload::new("CombinedFieldData", queries::COMBINED_FIELD_DATA_RISK, variables)
}

impl Planner for FieldDataPlanner {
    fn plan(&self, params: &RequestParams) -> Result<QueryPlan> {
        let farms = json!(params.farm_uuids);
        let states = json!(params.crop_season_lifecycle_states);

        let base_payload = GraphQlPayload::new(
            "CombinedDataBase",
            queries::COMBINED_DATA_BASE,
            vars([
                ("farmUuids", farms.clone()),
                ("languageCode", json!(params.language_code)),
                ("cropSeasonLifeCycleStates", states.clone()),
                ("withBoundary", json!(params.with_boundary)),
            ]),
        );
        let mut base = SubQuerySpec::critical(BASE_LABEL, base_payload.clone());
        if params.with_boundary {
            base = base.with_fallback(base_payload.with_variable("withBoundary", json!(false)));
        }

        let insights = SubQuerySpec::optional(
            "insights",
            GraphQlPayload::new(
                "CombinedDataInsights",
                queries::COMBINED_DATA_INSIGHTS,
                vars([
                    ("farmUuids", farms.clone()),
                    ("fromDate", json!(params.window.from_date)),
                    ("tillDate", json!(params.window.till_date)),
                    ("cropSeasonLifeCycleStates", states.clone()),
                    ("withrisk", json!(true)),
                ]),
            ),
            "insights_unavailable",
        )
        .with_timeout_hint(self.optional_hint)
        .with_retry(self.insights_retry.retries, self.insights_retry.delay);

        let predictions = SubQuerySpec::optional(
            "predictions",
            GraphQlPayload::new(
                "CombinedDataPredictions",
                queries::COMBINED_DATA_PREDICTIONS,
                vars([
                    ("farmUuids", farms),
                    ("languageCode", json!(params.language_code)),
                    ("countryCode", json!(params.country_code)),
                    ("cropSeasonLifeCycleStates", states),
                ]),
            ),
            "predictions_unavailable",
        )
        .with_timeout_hint(self.optional_hint);

        let tasks = SubQuerySpec::optional(
            "tasks",
            tasks_payload(params, &params.task_flags),
            "tasks_unavailable",
        )
        .when(|p| p.include_tasks);

        let tasks_sprayings = SubQuerySpec::optional(
            "tasks_sprayings",
            tasks_payload(params, &TaskFlags::sprayings_only()),
            "tasks_sprayings_unavailable",
        )
        .when(|p| p.include_tasks && p.task_flags.with_sprayings_v2);

        let risk1 = SubQuerySpec::optional(
            "risk1",
            risk_payload(params, true),
            "risk_recommendations_unavailable",
        );
        let risk2 = SubQuerySpec::optional("risk2", risk_payload(params, false), "risk_status_unavailable");

        let specs = [base, insights, predictions, tasks, tasks_sprayings, risk1, risk2]
            .into_iter()
            .filter(|spec| spec.applies_to(params))
            .collect();

        QueryPlan::new(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdentifierSet;
    use chrono::Utc;

    fn params() -> RequestParams {
        let farms: IdentifierSet = ["f1", "f2"].into_iter().collect();
        RequestParams::for_farms(farms, Utc::now()).unwrap()
    }

    #[test]
    fn test_plan_follows_merge_precedence() {
        let plan = FieldDataPlanner::default().plan(&params()).unwrap();
        assert_eq!(plan.labels(), MERGE_PRECEDENCE.to_vec());
        assert_eq!(plan.critical().label, BASE_LABEL);
        assert_eq!(plan.optionals().count(), 6);
    }

    #[test]
    fn test_inapplicable_specs_are_excluded() {
        let mut p = params();
        p.include_tasks = false;
        let plan = FieldDataPlanner::default().plan(&p).unwrap();
        assert!(plan.get("tasks").is_none());
        assert!(plan.get("tasks_sprayings").is_none());

        let mut p = params();
        p.task_flags.with_sprayings_v2 = false;
        let plan = FieldDataPlanner::default().plan(&p).unwrap();
        assert!(plan.get("tasks").is_some());
        assert!(plan.get("tasks_sprayings").is_none());
    }

    #[test]
    fn test_base_fallback_drops_boundary() {
        let plan = FieldDataPlanner::default().plan(&params()).unwrap();
        let base = plan.critical();
        assert_eq!(base.payload.variables["withBoundary"], json!(true));
        let fallback = base.fallback.as_ref().unwrap();
        assert_eq!(fallback.variables["withBoundary"], json!(false));

        let mut p = params();
        p.with_boundary = false;
        let plan = FieldDataPlanner::default().plan(&p).unwrap();
        assert!(plan.critical().fallback.is_none());
    }

    #[test]
    fn test_insights_has_dedicated_retry() {
        let plan = FieldDataPlanner::default().plan(&params()).unwrap();
        let insights = plan.get("insights").unwrap();
        assert_eq!(insights.retry.map(|r| r.retries), Some(2));
        assert_eq!(insights.timeout_hint, Some(Duration::from_secs(10)));
        assert!(plan.get("risk1").unwrap().retry.is_none());
    }

    #[test]
    fn test_variables_are_pure() {
        let p = params();
        let a = FieldDataPlanner::default().plan(&p).unwrap();
        let b = FieldDataPlanner::default().plan(&p).unwrap();
        for (x, y) in a.specs().iter().zip(b.specs()) {
            assert_eq!(x.payload, y.payload);
        }
    }

    #[test]
    fn test_malformed_plans_fail_fast() {
        let payload = GraphQlPayload::new("Op", "q", Map::new());
        let none = QueryPlan::new(vec![SubQuerySpec::optional("a", payload.clone(), "a_unavailable")]);
        assert!(matches!(none, Err(FieldgateError::Planning(_))));

        let two = QueryPlan::new(vec![
            SubQuerySpec::critical("a", payload.clone()),
            SubQuerySpec::critical("b", payload.clone()),
        ]);
        assert!(matches!(two, Err(FieldgateError::Planning(_))));

        let dup = QueryPlan::new(vec![
            SubQuerySpec::critical("a", payload.clone()),
            SubQuerySpec::optional("a", payload, "a_unavailable"),
        ]);
        assert!(matches!(dup, Err(FieldgateError::Planning(_))));
    }
}
