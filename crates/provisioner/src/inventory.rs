//! Inventory snapshots reported by nodes and masters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named facts about one machine.
///
/// Values are compared as opaque strings; presence of a key is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts(BTreeMap<String, String>);

impl Facts {
    /// Create an empty fact set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fact value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Whether the fact is present at all.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Set a fact, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Facts
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Point-in-time inventory of a node or master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Facts reported by the machine.
    #[serde(default)]
    pub facts: Facts,
}

impl Inventory {
    #[must_use]
    pub fn new(facts: Facts) -> Self {
        Self { facts }
    }
}
