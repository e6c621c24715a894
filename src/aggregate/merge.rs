//! Entity Merge Engine
//!
//! Combines field lists from several sources into one de-duplicated graph
//! keyed by field `uuid`, with crop seasons keyed by their own `uuid`.
//!
//! Rules, applied in source order:
//! - a later source's present key overwrites the earlier value (null included)
//! - crop seasons merge by uuid with the same rule and are never removed;
//!   a later source without a crop season list leaves the list untouched
//! - an entity without a string `uuid` is dropped and counted
//!
//! Merging is idempotent: `merge([X]) == merge([X, X])`.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Key of the embedded crop season collection
pub const CROP_SEASONS_KEY: &str = "cropSeasonsV2";

const UUID_KEY: &str = "uuid";

/// Keys holding the owning farm reference, in lookup order
const OWNER_KEYS: [&str; 2] = ["farmV2", "farm"];

fn uuid_of(map: &Map<String, Value>) -> Option<String> {
    map.get(UUID_KEY)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Crop season inside a field
#[derive(Debug, Clone, PartialEq)]
pub struct CropSeasonEntity {
    pub uuid: String,
    pub attributes: Map<String, Value>,
}

impl CropSeasonEntity {
    pub fn from_value(value: &Value) -> Option<Self> {
        let attributes = value.as_object()?.clone();
        let uuid = uuid_of(&attributes)?;
        Some(Self { uuid, attributes })
    }

    fn absorb(&mut self, other: &Map<String, Value>) {
        for (key, value) in other {
            self.attributes.insert(key.clone(), value.clone());
        }
    }
}

/// One field with all contributed attributes
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntity {
    pub uuid: String,
    /// Scalar and nested attributes other than crop seasons
    pub attributes: Map<String, Value>,
    /// `None` until some source supplies a crop season list
    pub crop_seasons: Option<Vec<CropSeasonEntity>>,
}

impl FieldEntity {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            attributes: Map::new(),
            crop_seasons: None,
        }
    }

    /// Parse a raw field object. Returns `None` when the uuid is missing;
    /// the second value counts crop seasons dropped for the same reason.
    pub fn from_value(value: &Value) -> Option<(Self, usize)> {
        let mut attributes = value.as_object()?.clone();
        let uuid = uuid_of(&attributes)?;
        let mut dropped = 0;

        let crop_seasons = match attributes.remove(CROP_SEASONS_KEY) {
            Some(Value::Array(items)) => {
                // Repeated uuids within one list collapse into the first slot
                let mut seasons: Vec<CropSeasonEntity> = Vec::with_capacity(items.len());
                for item in &items {
                    let Some(season) = CropSeasonEntity::from_value(item) else {
                        dropped += 1;
                        continue;
                    };
                    match seasons.iter_mut().find(|s| s.uuid == season.uuid) {
                        Some(existing) => existing.absorb(&season.attributes),
                        None => seasons.push(season),
                    }
                }
                Some(seasons)
            }
            Some(Value::Null) | None => None,
            Some(other) => {
                // Not a list; keep it as a plain attribute
                attributes.insert(CROP_SEASONS_KEY.to_string(), other);
                None
            }
        };

        Some((
            Self {
                uuid,
                attributes,
                crop_seasons,
            },
            dropped,
        ))
    }

    /// Owning farm identifier, from `farmV2.uuid` or `farm.uuid`
    pub fn owning_group(&self) -> Option<&str> {
        OWNER_KEYS.iter().find_map(|key| {
            self.attributes
                .get(*key)
                .and_then(|owner| owner.get(UUID_KEY))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
    }

    pub fn crop_season(&self, uuid: &str) -> Option<&CropSeasonEntity> {
        self.crop_seasons
            .as_ref()
            .and_then(|seasons| seasons.iter().find(|s| s.uuid == uuid))
    }

    /// JSON form, crop seasons re-embedded under [`CROP_SEASONS_KEY`]
    pub fn to_value(&self) -> Value {
        let mut out = self.attributes.clone();
        if let Some(seasons) = &self.crop_seasons {
            out.insert(
                CROP_SEASONS_KEY.to_string(),
                Value::Array(
                    seasons
                        .iter()
                        .map(|s| Value::Object(s.attributes.clone()))
                        .collect(),
                ),
            );
        }
        Value::Object(out)
    }

    fn absorb(&mut self, other: FieldEntity) {
        for (key, value) in other.attributes {
            self.attributes.insert(key, value);
        }

        let Some(incoming) = other.crop_seasons else {
            return;
        };
        let seasons = self.crop_seasons.get_or_insert_with(Vec::new);
        for season in incoming {
            match seasons.iter_mut().find(|s| s.uuid == season.uuid) {
                Some(existing) => existing.absorb(&season.attributes),
                None => seasons.push(season),
            }
        }
    }
}

impl Serialize for FieldEntity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Entities that could not be merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub dropped_fields: usize,
    pub dropped_crop_seasons: usize,
}

impl MergeStats {
    pub fn add(&mut self, other: MergeStats) {
        self.dropped_fields += other.dropped_fields;
        self.dropped_crop_seasons += other.dropped_crop_seasons;
    }
}

/// Incremental merger; first-seen order of fields is kept
#[derive(Debug, Default)]
pub struct FieldMerger {
    fields: Vec<FieldEntity>,
    index: HashMap<String, usize>,
    stats: MergeStats,
}

impl FieldMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one raw source list. `None` or an empty list is a no-op.
    pub fn merge_source(&mut self, source: Option<&[Value]>) {
        let Some(items) = source else {
            return;
        };
        for item in items {
            match FieldEntity::from_value(item) {
                Some((entity, dropped)) => {
                    self.stats.dropped_crop_seasons += dropped;
                    self.merge_entity(entity);
                }
                None => self.stats.dropped_fields += 1,
            }
        }
    }

    /// Merge one already-parsed entity
    pub fn merge_entity(&mut self, entity: FieldEntity) {
        match self.index.get(&entity.uuid) {
            Some(&pos) => self.fields[pos].absorb(entity),
            None => {
                self.index.insert(entity.uuid.clone(), self.fields.len());
                self.fields.push(entity);
            }
        }
    }

    pub fn merge_entities(&mut self, entities: impl IntoIterator<Item = FieldEntity>) {
        for entity in entities {
            self.merge_entity(entity);
        }
    }

    pub fn add_stats(&mut self, stats: MergeStats) {
        self.stats.add(stats);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn finish(self) -> MergeOutcome {
        MergeOutcome {
            fields: self.fields,
            stats: self.stats,
        }
    }
}

/// Merged graph plus drop counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub fields: Vec<FieldEntity>,
    pub stats: MergeStats,
}

impl MergeOutcome {
    /// Owning group identifiers seen across the merged fields
    pub fn covered_groups(&self) -> HashSet<String> {
        covered_groups(&self.fields)
    }
}

/// Merge raw field lists in the given order
pub fn merge<'a, I>(sources: I) -> MergeOutcome
where
    I: IntoIterator<Item = Option<&'a [Value]>>,
{
    let mut merger = FieldMerger::new();
    for source in sources {
        merger.merge_source(source);
    }
    merger.finish()
}

pub fn covered_groups(fields: &[FieldEntity]) -> HashSet<String> {
    fields
        .iter()
        .filter_map(FieldEntity::owning_group)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap_or_default()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let x = list(json!([
            {"uuid": "a", "name": "North", "farmV2": {"uuid": "f1"},
             "cropSeasonsV2": [{"uuid": "cs1", "yield": 3}]},
            {"uuid": "b", "name": "South"}
        ]));
        let once = merge([Some(x.as_slice())]);
        let twice = merge([Some(x.as_slice()), Some(x.as_slice())]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_later_source_wins_on_conflict() {
        let a = list(json!([{"uuid": "a", "onlyA": 1, "shared": "from-a"}]));
        let b = list(json!([{"uuid": "a", "onlyB": 2, "shared": "from-b"}]));
        let merged = merge([Some(a.as_slice()), Some(b.as_slice())]);

        let field = &merged.fields[0];
        assert_eq!(field.attributes["onlyA"], json!(1));
        assert_eq!(field.attributes["onlyB"], json!(2));
        assert_eq!(field.attributes["shared"], json!("from-b"));
    }

    #[test]
    fn test_crop_seasons_never_removed() {
        let a = list(json!([{"uuid": "a", "cropSeasonsV2": [{"uuid": "cs1", "stage": 1}]}]));
        let b = list(json!([{"uuid": "a", "name": "renamed"}]));
        let c = list(json!([{"uuid": "a", "cropSeasonsV2": [{"uuid": "cs2"}]}]));
        let merged = merge([Some(a.as_slice()), Some(b.as_slice()), Some(c.as_slice())]);

        let field = &merged.fields[0];
        assert!(field.crop_season("cs1").is_some());
        assert!(field.crop_season("cs2").is_some());
        assert_eq!(field.crop_season("cs1").unwrap().attributes["stage"], json!(1));
    }

    #[test]
    fn test_crop_season_attributes_merge_by_uuid() {
        let a = list(json!([{"uuid": "a", "cropSeasonsV2": [{"uuid": "cs1", "risks": [], "yield": 1}]}]));
        let b = list(json!([{"uuid": "a", "cropSeasonsV2": [{"uuid": "cs1", "yield": 2, "harvests": []}]}]));
        let merged = merge([Some(a.as_slice()), Some(b.as_slice())]);

        let season = merged.fields[0].crop_season("cs1").unwrap();
        assert_eq!(season.attributes["yield"], json!(2));
        assert!(season.attributes.contains_key("risks"));
        assert!(season.attributes.contains_key("harvests"));
    }

    #[test]
    fn test_repeated_crop_season_in_one_source_is_merged() {
        let a = list(json!([{"uuid": "a", "cropSeasonsV2": [
            {"uuid": "cs1", "yield": 1, "crop": "rice"},
            {"uuid": "cs2"},
            {"uuid": "cs1", "yield": 2}
        ]}]));
        let merged = merge([Some(a.as_slice())]);

        let seasons = merged.fields[0].crop_seasons.as_ref().unwrap();
        let uuids: Vec<_> = seasons.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["cs1", "cs2"]);
        assert_eq!(seasons[0].attributes["yield"], json!(2));
        assert_eq!(seasons[0].attributes["crop"], json!("rice"));
        assert_eq!(merged.stats.dropped_crop_seasons, 0);
    }

    #[test]
    fn test_entities_without_uuid_are_dropped() {
        let a = list(json!([
            {"name": "no id"},
            {"uuid": "a", "cropSeasonsV2": [{"uuid": "cs1"}, {"stage": 2}]}
        ]));
        let merged = merge([Some(a.as_slice())]);
        assert_eq!(merged.fields.len(), 1);
        assert_eq!(merged.stats.dropped_fields, 1);
        assert_eq!(merged.stats.dropped_crop_seasons, 1);
    }

    #[test]
    fn test_absent_source_is_noop() {
        let a = list(json!([{"uuid": "a"}]));
        let merged = merge([None, Some(a.as_slice()), Some(&[][..])]);
        assert_eq!(merged.fields.len(), 1);
    }

    #[test]
    fn test_owning_group_and_coverage() {
        let a = list(json!([
            {"uuid": "a", "farmV2": {"uuid": "f1"}},
            {"uuid": "b", "farm": {"uuid": "f2"}},
            {"uuid": "c"}
        ]));
        let merged = merge([Some(a.as_slice())]);
        let covered = merged.covered_groups();
        assert_eq!(covered.len(), 2);
        assert!(covered.contains("f1") && covered.contains("f2"));
    }

    #[test]
    fn test_round_trips_to_value() {
        let a = list(json!([{"uuid": "a", "cropSeasonsV2": [{"uuid": "cs1"}]}]));
        let merged = merge([Some(a.as_slice())]);
        assert_eq!(merged.fields[0].to_value(), a[0]);
    }
}
