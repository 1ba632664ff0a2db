//! Centralized error types for spec-hub

use thiserror::Error;

/// Spec-hub error types
#[derive(Debug, Error)]
pub enum HubError {
    /// Configuration file parsing or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mutation attempted by a source that does not own the key
    #[error("conflicting key: key {key} is already owned by source {owner}")]
    ConflictingOwner {
        /// The contested catalog key
        key: String,
        /// The source currently owning the key
        owner: String,
    },

    /// Lookup of a key that is not in the catalog
    #[error("spec {key} not found")]
    KeyNotFound {
        /// The key that was looked up
        key: String,
    },

    /// A remote spec could not be fetched
    #[error("unable to fetch spec from {url}: {source}")]
    UpstreamFetch {
        /// Upstream URL the fetch was addressed to
        url: String,
        /// Underlying transport error
        source: reqwest::Error,
    },

    /// A provider could not be initialized at startup
    #[error("provider init failed: {0}")]
    ProviderInit(String),

    /// HTTP request or response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, HubError>;
