//! HTTP routes for fieldgate

pub mod cache;
pub mod combined;
pub mod health;
pub mod snapshots;

pub use cache::{cache_clear, cache_last};
pub use combined::handle_combined_fields;
pub use health::health_check;
pub use snapshots::snapshot_for_farm;
