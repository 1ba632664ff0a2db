//! Configuration for spec-hub
//!
//! A JSON document selecting which providers to enable and where the HTTP
//! surface listens. Unknown fields are ignored.
//!
//! # Example
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "port": 8080,
//!   "providers": {
//!     "environment": { "enabled": true, "prefix": "SWAGGER_" },
//!     "file": {
//!       "enabled": true,
//!       "path": "/var/specs",
//!       "prefix": "swagger-",
//!       "json-ext": ".json",
//!       "url-ext": ".url"
//!     },
//!     "kubernetes": { "enabled": false }
//!   }
//! }
//! ```

use crate::catalog::Catalog;
use crate::error::{HubError, Result};
use crate::provider;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host the HTTP surface binds to (empty binds all interfaces)
    #[serde(default)]
    pub host: String,

    /// Port the HTTP surface listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Provider configuration
    #[serde(default)]
    pub providers: ProvidersConfig,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            providers: ProvidersConfig::default(),
        }
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    /// Environment provider settings
    #[serde(default)]
    pub environment: EnvironmentProviderConfig,

    /// File provider settings
    #[serde(default)]
    pub file: FileProviderConfig,

    /// Kubernetes provider settings
    #[serde(default)]
    pub kubernetes: KubernetesProviderConfig,
}

/// Environment provider settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentProviderConfig {
    /// Whether the provider runs at startup
    #[serde(default)]
    pub enabled: bool,

    /// Variable name prefix selecting spec URLs
    #[serde(default)]
    pub prefix: String,
}

/// File provider settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileProviderConfig {
    /// Whether the directory watcher runs
    #[serde(default)]
    pub enabled: bool,

    /// Directory to watch
    #[serde(default)]
    pub path: PathBuf,

    /// Filename prefix selecting spec files
    #[serde(default)]
    pub prefix: String,

    /// Extension marking a file that holds a spec body
    #[serde(default, rename = "json-ext")]
    pub json_ext: String,

    /// Extension marking a bundle of `<name>: <url>` lines
    #[serde(default, rename = "url-ext")]
    pub url_ext: String,
}

/// Kubernetes provider settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubernetesProviderConfig {
    /// Whether the cluster watches run
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!(
                "unable to open config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON string
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| HubError::Config(format!("unable to parse config file: {}", e)))
    }

    /// Build a catalog and start every enabled provider against it.
    ///
    /// Provider init failures are fatal. Cancelling `shutdown` stops the
    /// long-lived providers; the catalog outlives them.
    pub async fn build_catalog(&self, shutdown: &CancellationToken) -> Result<Arc<Catalog>> {
        let catalog = Arc::new(Catalog::new());
        if self.providers.environment.enabled {
            provider::environment::configure(&catalog, &self.providers.environment.prefix);
        }
        if self.providers.file.enabled {
            let file = &self.providers.file;
            provider::file_watcher::configure(
                shutdown.clone(),
                catalog.clone(),
                &file.path,
                &file.prefix,
                &file.json_ext,
                &file.url_ext,
            )?;
        }
        if self.providers.kubernetes.enabled {
            self.configure_kubernetes(shutdown, &catalog).await?;
        }
        Ok(catalog)
    }

    #[cfg(feature = "kube")]
    async fn configure_kubernetes(
        &self,
        shutdown: &CancellationToken,
        catalog: &Arc<Catalog>,
    ) -> Result<()> {
        let client = Arc::new(provider::kubernetes::KubeClusterClient::try_default().await?);
        provider::kubernetes::configure(shutdown.clone(), catalog.clone(), client).await
    }

    #[cfg(not(feature = "kube"))]
    async fn configure_kubernetes(
        &self,
        _shutdown: &CancellationToken,
        _catalog: &Arc<Catalog>,
    ) -> Result<()> {
        Err(HubError::ProviderInit(
            "kubernetes provider requires the `kube` build feature".to_string(),
        ))
    }
}
