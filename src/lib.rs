//! # spec-hub
//!
//! An OpenAPI documentation aggregator and reverse proxy. Discovers
//! OpenAPI/Swagger spec endpoints from several dynamic sources, maintains a
//! live de-duplicated catalog, and re-serves each spec through a small HTTP
//! surface so a UI can enumerate and fetch them on demand.
//!
//! ## Architecture
//!
//! ```text
//! Providers (environment | directory watcher | cluster watch)
//!     → Catalog (source-tagged, ordered, conflict-rejecting)
//!     → HTTP surface (/docs/, /docs/{id})
//! ```
//!
//! ## Core Features
//!
//! - **Source ownership**: every catalog key is owned by exactly one
//!   provider-chosen source; conflicting writers are rejected.
//! - **Deterministic reads**: key listings are always sorted ascending.
//! - **TTL-cached fetching**: spec bytes are proxied from upstream with a
//!   per-entry cache and at most one concurrent upstream fetch.
//! - **Live discovery**: directory and cluster watchers reconcile the
//!   catalog as files and cluster objects come and go.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spec_hub::config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> spec_hub::Result<()> {
//!     let config = Config::from_file("config.json")?;
//!     let shutdown = CancellationToken::new();
//!     let catalog = config.build_catalog(&shutdown).await?;
//!     let server = spec_hub::server::DocsServer::bind(&config.host, config.port).await?;
//!     server.run(catalog, shutdown).await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod provider;
pub mod server;

// Re-export main types
pub use catalog::{Catalog, SpecMetadata};
pub use error::{HubError, Result};
pub use fetch::SpecFetcher;
