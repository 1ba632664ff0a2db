//! Environment provider
//!
//! One-shot scan of the process environment. Every variable whose name
//! carries the configured prefix becomes a cached remote spec; the variable
//! value is the upstream URL. The environment is not watched for changes.

use crate::catalog::Catalog;
use crate::fetch;

/// Source tag for every entry this provider creates
const SOURCE: &str = "env";

/// Register every environment variable starting with `prefix`.
///
/// The key is the variable name with the prefix stripped, lowercased, and
/// `_` translated to `-`. Ownership conflicts are logged and skipped.
pub fn configure(catalog: &Catalog, prefix: &str) {
    for (name, value) in std::env::vars() {
        let Some(stripped) = name.strip_prefix(prefix) else {
            continue;
        };
        let key = stripped.to_lowercase().replace('_', "-");
        tracing::debug!(var = %name, key = %key, "registering environment spec");
        if let Err(e) = catalog.put(SOURCE, &key, fetch::cached_remote(value)) {
            tracing::warn!(key = %key, error = %e, "skipping environment spec");
        }
    }
}
