//! The spec catalog
//!
//! A concurrent, source-tagged registry of named specifications. Providers
//! push mutations on behalf of an opaque source tag; every key is owned by
//! exactly one source at any moment, and a non-owning source attempting to
//! claim a key gets [`HubError::ConflictingOwner`]. Reads return snapshots
//! in ascending key order.

mod ordered_map;

pub use ordered_map::{BatchMutation, OrderedMap};

use crate::error::{HubError, Result};
use crate::fetch::SpecFetcher;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Identity and display label of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMetadata {
    /// Stable key derived from the name
    pub key: String,
    /// Human-supplied display name
    pub name: String,
}

impl SpecMetadata {
    /// Derive metadata from a display name.
    ///
    /// The key is the lowercased name with runs of ASCII space collapsed to
    /// a single `-`.
    pub fn of(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let key = lowered
            .split(' ')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        Self {
            key,
            name: name.to_string(),
        }
    }
}

/// One catalog entry, immutable once stored
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    /// Key and display name
    pub metadata: SpecMetadata,
    /// Strategy producing the spec bytes
    pub fetcher: Arc<dyn SpecFetcher>,
}

#[derive(Default, Debug)]
struct CatalogInner {
    /// source tag to the set of keys it owns
    sources: HashMap<String, HashSet<String>>,
    specs: OrderedMap,
}

/// Concurrent source-tagged registry of specs.
///
/// A single readers-writer lock protects the whole structure. Fetcher
/// invocations happen after the lock is released; the catalog never holds
/// the lock while I/O is in flight.
#[derive(Default, Debug)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

/// The owner of `key`, if any source claims it
fn owner_of<'a>(sources: &'a HashMap<String, HashSet<String>>, key: &str) -> Option<&'a str> {
    sources
        .iter()
        .find(|(_, keys)| keys.contains(key))
        .map(|(source, _)| source.as_str())
}

/// Some(owner) if `key` is claimed by a source other than `source`
fn conflicting_owner(
    sources: &HashMap<String, HashSet<String>>,
    source: &str,
    key: &str,
) -> Option<String> {
    match owner_of(sources, key) {
        Some(owner) if owner != source => Some(owner.to_string()),
        _ => None,
    }
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry named `name` on behalf of `source`.
    ///
    /// Fails with [`HubError::ConflictingOwner`] if the key is currently
    /// owned by a different source.
    pub fn put(&self, source: &str, name: &str, fetcher: Arc<dyn SpecFetcher>) -> Result<()> {
        let metadata = SpecMetadata::of(name);
        let mut inner = self.inner.write().unwrap();
        let CatalogInner { sources, specs } = &mut *inner;
        if let Some(owner) = conflicting_owner(sources, source, &metadata.key) {
            return Err(HubError::ConflictingOwner {
                key: metadata.key,
                owner,
            });
        }
        tracing::debug!(source, key = %metadata.key, "putting spec");
        sources
            .entry(source.to_string())
            .or_default()
            .insert(metadata.key.clone());
        specs.set(metadata.key.clone(), CatalogEntry { metadata, fetcher });
        Ok(())
    }

    /// Atomically replace every entry owned by `source` with `specs_by_name`.
    ///
    /// Keys currently owned by a different source are skipped with a logged
    /// warning; the remaining entries are committed. The source's previous
    /// keys are removed even when some new keys were rejected. No reader
    /// observes a partial replace.
    pub fn replace_all_of(
        &self,
        source: &str,
        specs_by_name: HashMap<String, Arc<dyn SpecFetcher>>,
    ) {
        let mut inner = self.inner.write().unwrap();
        let CatalogInner { sources, specs } = &mut *inner;
        let previous = sources.remove(source).unwrap_or_default();
        let mut new_keys = HashSet::with_capacity(specs_by_name.len());
        specs.batch(|batch| {
            for key in &previous {
                batch.delete(key);
            }
            for (name, fetcher) in specs_by_name {
                let metadata = SpecMetadata::of(&name);
                if let Some(owner) = conflicting_owner(sources, source, &metadata.key) {
                    tracing::warn!(
                        source,
                        key = %metadata.key,
                        owner = %owner,
                        "ignoring conflicting key while replacing all"
                    );
                    continue;
                }
                new_keys.insert(metadata.key.clone());
                batch.set(metadata.key.clone(), CatalogEntry { metadata, fetcher });
            }
        });
        tracing::debug!(source, keys = new_keys.len(), "replaced all specs of source");
        sources.insert(source.to_string(), new_keys);
    }

    /// Remove the entry named `name` if `source` is its current owner.
    ///
    /// Removing an absent key is a no-op; removing a key owned by another
    /// source fails with [`HubError::ConflictingOwner`].
    pub fn remove(&self, source: &str, name: &str) -> Result<()> {
        let metadata = SpecMetadata::of(name);
        let mut inner = self.inner.write().unwrap();
        let CatalogInner { sources, specs } = &mut *inner;
        if let Some(owner) = conflicting_owner(sources, source, &metadata.key) {
            return Err(HubError::ConflictingOwner {
                key: metadata.key,
                owner,
            });
        }
        tracing::debug!(source, key = %metadata.key, "removing spec");
        if let Some(keys) = sources.get_mut(source) {
            keys.remove(&metadata.key);
        }
        specs.delete(&metadata.key);
        Ok(())
    }

    /// Remove every entry owned by `source`
    pub fn remove_all_of(&self, source: &str) {
        let mut inner = self.inner.write().unwrap();
        let CatalogInner { sources, specs } = &mut *inner;
        if let Some(owned) = sources.remove(source) {
            tracing::debug!(source, keys = owned.len(), "removing all specs of source");
            specs.batch(|batch| {
                for key in &owned {
                    batch.delete(key);
                }
            });
        }
    }

    /// Snapshot of every entry's metadata in ascending key order
    pub fn keys(&self) -> Vec<SpecMetadata> {
        let inner = self.inner.read().unwrap();
        let mut keys = Vec::with_capacity(inner.specs.len());
        inner
            .specs
            .range_in_order(|_, entry| keys.push(entry.metadata.clone()));
        keys
    }

    /// The fetcher registered under `key`
    pub fn spec(&self, key: &str) -> Result<Arc<dyn SpecFetcher>> {
        let inner = self.inner.read().unwrap();
        inner
            .specs
            .get(key)
            .map(|entry| entry.fetcher.clone())
            .ok_or_else(|| HubError::KeyNotFound {
                key: key.to_string(),
            })
    }

    /// Number of entries in the catalog
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().specs.len()
    }

    /// Whether the catalog holds no entries
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticSpec;

    fn fetcher(body: &str) -> Arc<dyn SpecFetcher> {
        Arc::new(StaticSpec::new(body.to_string()))
    }

    async fn body_of(catalog: &Catalog, key: &str) -> String {
        let bytes = catalog.spec(key).unwrap().get().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn key_list(catalog: &Catalog) -> Vec<String> {
        catalog.keys().into_iter().map(|m| m.key).collect()
    }

    // --- SpecMetadata ---

    #[test]
    fn test_metadata_lowercases() {
        let meta = SpecMetadata::of("PetStore");
        assert_eq!(meta.key, "petstore");
        assert_eq!(meta.name, "PetStore");
    }

    #[test]
    fn test_metadata_collapses_space_runs() {
        assert_eq!(SpecMetadata::of("My  Cool   API").key, "my-cool-api");
        assert_eq!(SpecMetadata::of(" padded ").key, "padded");
    }

    #[test]
    fn test_metadata_plain_name_unchanged() {
        assert_eq!(SpecMetadata::of("billing-v2").key, "billing-v2");
    }

    // --- put / keys / spec ---

    #[test]
    fn test_put_and_keys_sorted() {
        let catalog = Catalog::new();
        catalog.put("env", "zeta", fetcher("{}")).unwrap();
        catalog.put("env", "alpha", fetcher("{}")).unwrap();
        catalog.put("file", "mango", fetcher("{}")).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(key_list(&catalog), vec!["alpha", "mango", "zeta"]);
    }

    #[test]
    fn test_every_listed_key_resolves() {
        let catalog = Catalog::new();
        for name in ["a", "b", "c"] {
            catalog.put("env", name, fetcher("{}")).unwrap();
        }
        for meta in catalog.keys() {
            assert!(catalog.spec(&meta.key).is_ok());
        }
    }

    #[tokio::test]
    async fn test_put_same_source_replaces() {
        let catalog = Catalog::new();
        catalog.put("env", "api", fetcher("v1")).unwrap();
        catalog.put("env", "api", fetcher("v2")).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(body_of(&catalog, "api").await, "v2");
    }

    #[tokio::test]
    async fn test_put_conflicting_source_rejected() {
        let catalog = Catalog::new();
        catalog.put("first", "shared", fetcher("original")).unwrap();

        let err = catalog
            .put("second", "shared", fetcher("intruder"))
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::ConflictingOwner { ref key, ref owner } if key == "shared" && owner == "first"
        ));
        // The entry is unchanged
        assert_eq!(body_of(&catalog, "shared").await, "original");
    }

    #[test]
    fn test_spec_missing_key() {
        let catalog = Catalog::new();
        let err = catalog.spec("ghost").unwrap_err();
        assert!(matches!(err, HubError::KeyNotFound { ref key } if key == "ghost"));
    }

    // --- remove ---

    #[test]
    fn test_remove_own_key() {
        let catalog = Catalog::new();
        catalog.put("env", "api", fetcher("{}")).unwrap();
        catalog.remove("env", "api").unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.spec("api").is_err());
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let catalog = Catalog::new();
        assert!(catalog.remove("env", "ghost").is_ok());
    }

    #[test]
    fn test_remove_foreign_key_rejected() {
        let catalog = Catalog::new();
        catalog.put("owner", "api", fetcher("{}")).unwrap();
        let err = catalog.remove("intruder", "api").unwrap_err();
        assert!(matches!(err, HubError::ConflictingOwner { .. }));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_removed_key_can_change_owner() {
        let catalog = Catalog::new();
        catalog.put("first", "api", fetcher("{}")).unwrap();
        catalog.remove("first", "api").unwrap();
        // First writer wins only until it releases the key
        catalog.put("second", "api", fetcher("{}")).unwrap();
        assert_eq!(key_list(&catalog), vec!["api"]);
    }

    // --- replace_all_of / remove_all_of ---

    fn specs_by_name(names: &[(&str, &str)]) -> HashMap<String, Arc<dyn SpecFetcher>> {
        names
            .iter()
            .map(|&(name, body)| (name.to_string(), fetcher(body)))
            .collect()
    }

    #[tokio::test]
    async fn test_replace_all_of_reconciles() {
        let catalog = Catalog::new();
        catalog.replace_all_of("bundle", specs_by_name(&[("k1", "one"), ("k2", "two")]));
        assert_eq!(key_list(&catalog), vec!["k1", "k2"]);

        catalog.replace_all_of("bundle", specs_by_name(&[("k2", "two'"), ("k3", "three")]));
        assert_eq!(key_list(&catalog), vec!["k2", "k3"]);
        assert_eq!(body_of(&catalog, "k2").await, "two'");
    }

    #[tokio::test]
    async fn test_replace_all_of_skips_conflicts() {
        let catalog = Catalog::new();
        catalog.put("env", "stolen", fetcher("env owns this")).unwrap();

        catalog.replace_all_of("bundle", specs_by_name(&[("stolen", "mine"), ("ok", "{}")]));

        // The conflicting key is skipped, the rest committed
        assert_eq!(key_list(&catalog), vec!["ok", "stolen"]);
        assert_eq!(body_of(&catalog, "stolen").await, "env owns this");
    }

    #[test]
    fn test_replace_all_of_drops_omitted_keys_despite_conflicts() {
        let catalog = Catalog::new();
        catalog.put("env", "stolen", fetcher("{}")).unwrap();
        catalog.replace_all_of("bundle", specs_by_name(&[("old", "{}")]));

        // The new declared state omits "old" and only offers a conflicting
        // key, so the source ends up owning nothing.
        catalog.replace_all_of("bundle", specs_by_name(&[("stolen", "{}")]));
        assert_eq!(key_list(&catalog), vec!["stolen"]);
        assert!(catalog.spec("old").is_err());
    }

    #[test]
    fn test_replace_all_of_empty_clears_source() {
        let catalog = Catalog::new();
        catalog.replace_all_of("bundle", specs_by_name(&[("a", "{}"), ("b", "{}")]));
        catalog.replace_all_of("bundle", HashMap::new());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_remove_all_of_leaves_other_sources() {
        let catalog = Catalog::new();
        catalog.put("env", "env-key", fetcher("{}")).unwrap();
        catalog.replace_all_of("bundle", specs_by_name(&[("b1", "{}"), ("b2", "{}")]));

        catalog.remove_all_of("bundle");
        assert_eq!(key_list(&catalog), vec!["env-key"]);

        // Unknown source is a no-op
        catalog.remove_all_of("nobody");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_len_tracks_distinct_keys() {
        let catalog = Catalog::new();
        catalog.put("a", "one", fetcher("{}")).unwrap();
        catalog.put("a", "two", fetcher("{}")).unwrap();
        catalog.put("a", "one", fetcher("{}")).unwrap();
        assert_eq!(catalog.len(), 2);
        catalog.remove("a", "one").unwrap();
        assert_eq!(catalog.len(), 1);
    }

    // --- concurrency smoke ---

    #[tokio::test]
    async fn test_concurrent_writers_from_distinct_sources() {
        let catalog = Arc::new(Catalog::new());
        let mut tasks = Vec::new();
        for source in 0..8 {
            let catalog = catalog.clone();
            tasks.push(tokio::spawn(async move {
                let tag = format!("source-{source}");
                for i in 0..25 {
                    let name = format!("{tag}-spec-{i:02}");
                    catalog.put(&tag, &name, fetcher("{}")).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(catalog.len(), 200);
        let keys = key_list(&catalog);
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
