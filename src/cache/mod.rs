//! Response cache overlay for upstream GraphQL envelopes

pub mod keys;
pub mod overlay;

pub use keys::ResponseCacheKey;
pub use overlay::{CachedEnvelope, InMemoryResponseCache, OverlayStats, ResponseCache};
