//! Cache key definitions
//!
//! Response cache keys: operation name plus a short hash of the canonical
//! GraphQL payload.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::upstream::GraphQlPayload;

/// Cache key for one upstream GraphQL call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseCacheKey {
    /// GraphQL operation name
    pub operation: String,
    /// Hash of the canonical payload
    pub payload_hash: String,
}

impl ResponseCacheKey {
    /// Create a key from an operation and its payload
    pub fn new(operation: &str, payload: &GraphQlPayload) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload.canonical().as_bytes());
        let hash = hasher.finalize();

        Self {
            operation: operation.to_string(),
            payload_hash: hex::encode(&hash[..8]), // First 8 bytes = 16 hex chars
        }
    }

    /// Convert to storage key string
    /// Format: operation:payload_hash
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.operation, self.payload_hash)
    }
}

impl fmt::Display for ResponseCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.payload_hash)
    }
}
