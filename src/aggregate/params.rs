//! Request parameters
//!
//! [`AggregateRequest`] is the wire form accepted by the entrypoint. It is
//! split into pure [`RequestParams`] (everything the planner reads), the
//! upstream [`Credentials`], and per-call [`CallOptions`].

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{FieldgateError, IdentifierSet, Result};
use crate::upstream::Credentials;

/// Offset used to compute the recommendation date window (JST)
const WINDOW_OFFSET_SECS: i32 = 9 * 3600;

/// Days after today covered by the date window
const WINDOW_DAYS: i64 = 30;

fn default_language() -> String {
    "ja".to_string()
}

fn default_country() -> String {
    "JP".to_string()
}

fn default_states() -> Vec<String> {
    vec!["ACTIVE".to_string(), "PLANNED".to_string()]
}

fn default_true() -> bool {
    true
}

/// How the entrypoint decides between one plan and chunked fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingPolicy {
    /// Chunk when the identifier set reaches the configured threshold
    #[default]
    Auto,
    Always,
    Never,
}

/// Task families requested from the tasks sub-query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskFlags {
    pub with_harvests: bool,
    pub with_crop_establishments: bool,
    pub with_land_preparations: bool,
    pub with_drone_flights: bool,
    pub with_seed_treatments: bool,
    pub with_seed_box_treatments: bool,
    pub with_smart_spraying_tasks: bool,
    pub with_water_management_tasks: bool,
    pub with_scouting_tasks: bool,
    pub with_observations: bool,
    pub with_sprayings_v2: bool,
    pub with_soil_sampling_tasks: bool,
}

impl Default for TaskFlags {
    fn default() -> Self {
        Self {
            with_harvests: true,
            with_crop_establishments: true,
            with_land_preparations: true,
            with_drone_flights: false,
            with_seed_treatments: true,
            with_seed_box_treatments: true,
            with_smart_spraying_tasks: false,
            with_water_management_tasks: true,
            with_scouting_tasks: true,
            with_observations: false,
            with_sprayings_v2: true,
            with_soil_sampling_tasks: false,
        }
    }
}

impl TaskFlags {
    /// Flags with only sprayings enabled
    pub fn sprayings_only() -> Self {
        Self {
            with_harvests: false,
            with_crop_establishments: false,
            with_land_preparations: false,
            with_drone_flights: false,
            with_seed_treatments: false,
            with_seed_box_treatments: false,
            with_smart_spraying_tasks: false,
            with_water_management_tasks: false,
            with_scouting_tasks: false,
            with_observations: false,
            with_sprayings_v2: true,
            with_soil_sampling_tasks: false,
        }
    }

    /// GraphQL variable pairs for these flags
    pub fn variables(&self) -> [(&'static str, bool); 12] {
        [
            ("withHarvests", self.with_harvests),
            ("withCropEstablishments", self.with_crop_establishments),
            ("withLandPreparations", self.with_land_preparations),
            ("withDroneFlights", self.with_drone_flights),
            ("withSeedTreatments", self.with_seed_treatments),
            ("withSeedBoxTreatments", self.with_seed_box_treatments),
            ("withSmartSprayingTasks", self.with_smart_spraying_tasks),
            ("withWaterManagementTasks", self.with_water_management_tasks),
            ("withScoutingTasks", self.with_scouting_tasks),
            ("withObservations", self.with_observations),
            ("withSprayingsV2", self.with_sprayings_v2),
            ("withSoilSamplingTasks", self.with_soil_sampling_tasks),
        ]
    }

    pub fn write_into(&self, vars: &mut Map<String, Value>) {
        for (name, enabled) in self.variables() {
            vars.insert(name.to_string(), Value::Bool(enabled));
        }
    }
}

/// Recommendation window bounds, formatted for the upstream API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    pub from_date: String,
    pub till_date: String,
}

impl DateWindow {
    /// Today 00:00 through today + 30 days 23:59:59.999, local to JST,
    /// expressed in UTC.
    pub fn around(now: DateTime<Utc>) -> Result<Self> {
        let offset = FixedOffset::east_opt(WINDOW_OFFSET_SECS)
            .ok_or_else(|| FieldgateError::Internal("invalid window offset".into()))?;
        let today: NaiveDate = now.with_timezone(&offset).date_naive();
        let shift = Duration::seconds(i64::from(WINDOW_OFFSET_SECS));

        let from = today
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| FieldgateError::Internal("invalid window start".into()))?;
        let till = (today + Duration::days(WINDOW_DAYS))
            .and_hms_milli_opt(23, 59, 59, 999)
            .ok_or_else(|| FieldgateError::Internal("invalid window end".into()))?;

        Ok(Self {
            from_date: format_utc((from - shift).and_utc()),
            till_date: format_utc((till - shift).and_utc()),
        })
    }
}

fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Everything the planner reads. Pure data, no credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub farm_uuids: IdentifierSet,
    pub language_code: String,
    pub country_code: String,
    pub crop_season_lifecycle_states: Vec<String>,
    pub with_boundary: bool,
    pub include_tasks: bool,
    pub task_flags: TaskFlags,
    pub window: DateWindow,
}

impl RequestParams {
    /// Default parameters for a set of farms at a given instant
    pub fn for_farms(farm_uuids: IdentifierSet, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            farm_uuids,
            language_code: default_language(),
            country_code: default_country(),
            crop_season_lifecycle_states: default_states(),
            with_boundary: true,
            include_tasks: true,
            task_flags: TaskFlags::default(),
            window: DateWindow::around(now)?,
        })
    }

    /// Same parameters scoped to a subset of farms
    pub fn with_farms(&self, farm_uuids: IdentifierSet) -> Self {
        Self {
            farm_uuids,
            ..self.clone()
        }
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub chunking: ChunkingPolicy,
    pub strict: bool,
    pub stream: bool,
    pub include_sub_responses: bool,
}

/// Wire form of one aggregation request
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    #[serde(rename = "login_token")]
    pub login_token: String,
    #[serde(rename = "api_token")]
    pub api_token: String,
    #[serde(rename = "farm_uuids")]
    pub farm_uuids: IdentifierSet,
    #[serde(default = "default_language")]
    pub language_code: String,
    #[serde(default = "default_country")]
    pub country_code: String,
    #[serde(default = "default_states")]
    pub crop_season_life_cycle_states: Vec<String>,
    #[serde(default = "default_true")]
    pub with_boundary_svg: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub include_tasks: bool,
    #[serde(default)]
    pub include_sub_responses: bool,
    #[serde(default)]
    pub require_complete: bool,
    #[serde(default)]
    pub chunking: ChunkingPolicy,
    #[serde(flatten)]
    pub task_flags: TaskFlags,
}

impl AggregateRequest {
    /// Split into planner parameters, credentials and call options
    pub fn into_parts(self, now: DateTime<Utc>) -> Result<(RequestParams, Credentials, CallOptions)> {
        if self.farm_uuids.is_empty() {
            return Err(FieldgateError::BadRequest("farm_uuids must not be empty".into()));
        }
        if self.login_token.trim().is_empty() || self.api_token.trim().is_empty() {
            return Err(FieldgateError::BadRequest("login_token and api_token are required".into()));
        }

        let credentials = Credentials::new(self.login_token.as_str(), self.api_token.as_str());
        let options = CallOptions {
            chunking: self.chunking,
            strict: self.require_complete,
            stream: self.stream,
            include_sub_responses: self.include_sub_responses,
        };
        let params = RequestParams {
            farm_uuids: self.farm_uuids,
            language_code: self.language_code,
            country_code: self.country_code,
            crop_season_lifecycle_states: self.crop_season_life_cycle_states,
            with_boundary: self.with_boundary_svg,
            include_tasks: self.include_tasks,
            task_flags: self.task_flags,
            window: DateWindow::around(now)?,
        };

        Ok((params, credentials, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_window_uses_jst_day() {
        // 2024-03-01 20:00 UTC is already 2024-03-02 in JST
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let window = DateWindow::around(now).unwrap();
        assert_eq!(window.from_date, "2024-03-01T15:00:00.000Z");
        assert_eq!(window.till_date, "2024-04-01T14:59:59.999Z");
    }

    #[test]
    fn test_request_defaults() {
        let req: AggregateRequest = serde_json::from_str(
            r#"{"login_token":"l","api_token":"a","farm_uuids":["f1","f1","f2"]}"#,
        )
        .unwrap();
        let (params, _, options) = req.into_parts(Utc::now()).unwrap();

        assert_eq!(params.farm_uuids.len(), 2);
        assert_eq!(params.language_code, "ja");
        assert_eq!(params.crop_season_lifecycle_states, vec!["ACTIVE", "PLANNED"]);
        assert!(params.with_boundary);
        assert!(params.task_flags.with_sprayings_v2);
        assert!(!params.task_flags.with_drone_flights);
        assert_eq!(options.chunking, ChunkingPolicy::Auto);
        assert!(!options.strict);
    }

    #[test]
    fn test_flattened_task_flags() {
        let req: AggregateRequest = serde_json::from_str(
            r#"{"login_token":"l","api_token":"a","farm_uuids":["f1"],
                "withSprayingsV2":false,"withDroneFlights":true,"requireComplete":true,
                "chunking":"always"}"#,
        )
        .unwrap();
        let (params, _, options) = req.into_parts(Utc::now()).unwrap();
        assert!(!params.task_flags.with_sprayings_v2);
        assert!(params.task_flags.with_drone_flights);
        assert!(params.task_flags.with_harvests);
        assert!(options.strict);
        assert_eq!(options.chunking, ChunkingPolicy::Always);
    }

    #[test]
    fn test_empty_farms_rejected() {
        let req: AggregateRequest =
            serde_json::from_str(r#"{"login_token":"l","api_token":"a","farm_uuids":[]}"#).unwrap();
        assert!(matches!(
            req.into_parts(Utc::now()),
            Err(FieldgateError::BadRequest(_))
        ));
    }

    #[test]
    fn test_task_flag_variables() {
        let mut vars = Map::new();
        TaskFlags::sprayings_only().write_into(&mut vars);
        assert_eq!(vars.len(), 12);
        assert_eq!(vars["withSprayingsV2"], Value::Bool(true));
        assert_eq!(vars["withHarvests"], Value::Bool(false));
    }
}
