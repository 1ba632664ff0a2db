//! Sorted key map backing the catalog
//!
//! A hash map paired with a lexicographically sorted key list, so reads can
//! iterate entries in deterministic order without sorting on every call.
//! Bulk updates go through [`OrderedMap::batch`], which defers the resort
//! until the whole mutation has been applied.

use super::CatalogEntry;
use std::collections::HashMap;

/// Mapping from key to entry with a maintained sorted key list
#[derive(Default, Debug)]
pub struct OrderedMap {
    entries: HashMap<String, CatalogEntry>,
    sorted_keys: Vec<String>,
}

impl OrderedMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by key
    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit every entry in ascending key order
    pub fn range_in_order<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &CatalogEntry),
    {
        for key in &self.sorted_keys {
            if let Some(entry) = self.entries.get(key) {
                visit(key, entry);
            }
        }
    }

    /// Insert or replace an entry and resort the key list
    pub fn set(&mut self, key: String, entry: CatalogEntry) {
        self.entries.insert(key, entry);
        self.resort();
    }

    /// Remove an entry and resort the key list
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
        self.resort();
    }

    /// Apply several mutations with a single resort on commit.
    ///
    /// The batch sees every prior mutation immediately; only the sorted key
    /// list is stale until the closure returns.
    pub fn batch<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut BatchMutation<'_>),
    {
        let mut batch = BatchMutation { map: self };
        mutate(&mut batch);
        self.resort();
    }

    fn resort(&mut self) {
        self.sorted_keys.clear();
        self.sorted_keys.extend(self.entries.keys().cloned());
        self.sorted_keys.sort_unstable();
    }
}

/// Raw mutation handle handed to [`OrderedMap::batch`] closures
pub struct BatchMutation<'a> {
    map: &'a mut OrderedMap,
}

impl BatchMutation<'_> {
    /// Insert or replace an entry without resorting
    pub fn set(&mut self, key: String, entry: CatalogEntry) {
        self.map.entries.insert(key, entry);
    }

    /// Remove an entry without resorting
    pub fn delete(&mut self, key: &str) {
        self.map.entries.remove(key);
    }

    /// Whether a key is currently present, prior mutations included
    pub fn contains(&self, key: &str) -> bool {
        self.map.entries.contains_key(key)
    }
}
