//! Identifier sets
//!
//! Ordered, de-duplicated farm handles. Insertion order is kept so chunk
//! assignment is deterministic for a fixed input.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered set of opaque farm identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IdentifierSet {
    ids: Vec<String>,
}

impl IdentifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifier; empty strings and repeats are ignored.
    /// Returns true when the identifier was new.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        let id = id.trim();
        if id.is_empty() || self.contains(id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    /// Partition into contiguous, order-preserving chunks of at most `size`.
    /// A size of zero is treated as one.
    pub fn chunks(&self, size: usize) -> Vec<IdentifierSet> {
        self.ids
            .chunks(size.max(1))
            .map(|chunk| IdentifierSet {
                ids: chunk.to_vec(),
            })
            .collect()
    }

    /// Identifiers of `self` that are not in `covered`, in request order
    pub fn missing_from<'a, I>(&self, covered: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let covered: HashSet<&str> = covered.into_iter().collect();
        self.ids
            .iter()
            .filter(|id| !covered.contains(id.as_str()))
            .cloned()
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for IdentifierSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = IdentifierSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl From<Vec<String>> for IdentifierSet {
    fn from(ids: Vec<String>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<IdentifierSet> for Vec<String> {
    fn from(set: IdentifierSet) -> Self {
        set.ids
    }
}

impl<'a> IntoIterator for &'a IdentifierSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}
