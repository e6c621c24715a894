//! Snapshot write sink
//!
//! Merged fields are upserted per owning farm after a successful call.
//! The sink only promises upsert semantics; storage layout is its own.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

use crate::aggregate::merge::FieldEntity;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot store full: {max_farms} farms already stored")]
    Full { max_farms: usize },
}

/// Upsert-only persistence collaborator
#[async_trait::async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Replace the stored snapshot of `farm_uuid` with `fields`
    async fn upsert(&self, farm_uuid: &str, fields: &[FieldEntity]) -> Result<(), SnapshotError>;
}

/// Group fields by owning farm; fields without an owner are skipped
pub fn group_by_farm(fields: &[FieldEntity]) -> BTreeMap<String, Vec<FieldEntity>> {
    let mut groups: BTreeMap<String, Vec<FieldEntity>> = BTreeMap::new();
    for field in fields {
        if let Some(farm) = field.owning_group() {
            groups.entry(farm.to_string()).or_default().push(field.clone());
        }
    }
    groups
}

/// Stored snapshot of one farm
#[derive(Debug, Clone)]
pub struct FarmSnapshot {
    pub fields: Vec<FieldEntity>,
    pub updated_at: DateTime<Utc>,
}

/// Farms kept by [`InMemorySnapshotSink::new`]
pub const DEFAULT_MAX_FARMS: usize = 10_000;

/// In-process sink, bounded by farm count
#[derive(Debug)]
pub struct InMemorySnapshotSink {
    farms: DashMap<String, FarmSnapshot>,
    max_farms: usize,
}

impl Default for InMemorySnapshotSink {
    fn default() -> Self {
        Self::with_max_farms(DEFAULT_MAX_FARMS)
    }
}

impl InMemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_farms(max_farms: usize) -> Self {
        Self {
            farms: DashMap::new(),
            max_farms,
        }
    }

    pub fn get(&self, farm_uuid: &str) -> Option<FarmSnapshot> {
        self.farms.get(farm_uuid).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.farms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.farms.is_empty()
    }
}

#[async_trait::async_trait]
impl SnapshotSink for InMemorySnapshotSink {
    async fn upsert(&self, farm_uuid: &str, fields: &[FieldEntity]) -> Result<(), SnapshotError> {
        // Existing farms are always replaced; only new farms count against the bound
        if !self.farms.contains_key(farm_uuid) && self.farms.len() >= self.max_farms {
            return Err(SnapshotError::Full {
                max_farms: self.max_farms,
            });
        }
        debug!(farm = %farm_uuid, fields = fields.len(), "Upserting snapshot");
        self.farms.insert(
            farm_uuid.to_string(),
            FarmSnapshot {
                fields: fields.to_vec(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
