//! Shared types for Fieldgate

pub mod error;
pub mod identifiers;

pub use error::{FieldgateError, Result};
pub use identifiers::IdentifierSet;
