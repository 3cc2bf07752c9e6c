use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Immutable key/value metadata attached to an event envelope.
///
/// Entries map string keys to arbitrary JSON values. A `MetaData` instance is
/// never modified in place; all combining operations produce a new mapping,
/// leaving the original untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaData(HashMap<String, serde_json::Value>);

impl MetaData {
    /// Creates an empty metadata mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new mapping containing all entries of `self` overlaid with
    /// the entries of `other`.
    ///
    /// Keys present in both mappings take the value from `other`; keys present
    /// in only one side are kept as-is.
    pub fn merged_with(&self, other: MetaData) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        let mut merged = self.0.clone();
        merged.extend(other.0);
        Self(merged)
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl From<HashMap<String, serde_json::Value>> for MetaData {
    fn from(entries: HashMap<String, serde_json::Value>) -> Self {
        Self(entries)
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for MetaData {
    fn from_iter<I: IntoIterator<Item = (K, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
