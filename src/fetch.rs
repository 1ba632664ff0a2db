//! Spec fetchers
//!
//! A [`SpecFetcher`] is the strategy for producing the bytes of one spec on
//! demand. Providers compose the concrete flavors (static buffer, remote URL,
//! file on disk) with the [`TtlCached`] wrapper so repeated requests within
//! the TTL window hit the cache instead of the upstream.

use crate::error::{HubError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// TTL applied by the providers when they wrap a fetcher in [`TtlCached`]
pub const DEFAULT_TTL: Duration = Duration::from_secs(20);

/// Strategy for obtaining the raw bytes of a single spec.
///
/// Implementations must be safe to call from many tasks concurrently.
#[async_trait]
pub trait SpecFetcher: Send + Sync {
    /// Produce the spec body
    async fn get(&self) -> Result<Bytes>;
}

impl std::fmt::Debug for dyn SpecFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn SpecFetcher")
    }
}

/// Fetcher holding an immutable in-memory body
pub struct StaticSpec {
    body: Bytes,
}

impl StaticSpec {
    /// Create a static fetcher that always returns `body`
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl SpecFetcher for StaticSpec {
    async fn get(&self) -> Result<Bytes> {
        Ok(self.body.clone())
    }
}

/// Shared HTTP client for all remote fetchers
fn shared_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .pool_max_idle_per_host(100)
                .build()
                .unwrap_or_default()
        })
        .clone()
}

/// Fetcher that proxies a spec from a remote URL.
///
/// A transport failure yields [`HubError::UpstreamFetch`] annotated with the
/// URL. Any HTTP response, success or not, yields the full response body;
/// the HTTP surface decides how to expose it.
pub struct RemoteSpec {
    client: reqwest::Client,
    url: String,
}

impl RemoteSpec {
    /// Create a remote fetcher using the shared HTTP client
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(shared_client(), url)
    }

    /// Create a remote fetcher with a custom HTTP client
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// The upstream URL this fetcher is bound to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SpecFetcher for RemoteSpec {
    async fn get(&self) -> Result<Bytes> {
        let response =
            self.client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| HubError::UpstreamFetch {
                    url: self.url.clone(),
                    source: e,
                })?;
        response.bytes().await.map_err(|e| HubError::UpstreamFetch {
            url: self.url.clone(),
            source: e,
        })
    }
}

/// Fetcher that reads a spec file from disk.
///
/// The file is not preloaded; bytes are read at `get` time.
pub struct FileSpec {
    path: PathBuf,
}

impl FileSpec {
    /// Create a file fetcher for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SpecFetcher for FileSpec {
    async fn get(&self) -> Result<Bytes> {
        let body = tokio::fs::read(&self.path).await?;
        Ok(Bytes::from(body))
    }
}

struct CacheSlot {
    body: Option<Bytes>,
    expires_at: Instant,
}

impl CacheSlot {
    fn fresh_body(&self) -> Option<Bytes> {
        match &self.body {
            Some(body) if self.expires_at > Instant::now() => Some(body.clone()),
            _ => None,
        }
    }
}

/// Time-bounded memoization of a delegate fetcher's last successful result.
///
/// Uses double-checked locking: the read lock serves the steady state, and
/// an expired entry upgrades to the write lock, re-checks, and performs at
/// most one delegate fetch while other callers wait. Failures are not
/// cached; the cached body is cleared and the next call retries.
pub struct TtlCached {
    delegate: Arc<dyn SpecFetcher>,
    ttl: Duration,
    slot: RwLock<CacheSlot>,
}

impl TtlCached {
    /// Wrap `delegate` with a cache that expires after `ttl`
    pub fn new(delegate: Arc<dyn SpecFetcher>, ttl: Duration) -> Self {
        Self {
            delegate,
            ttl,
            slot: RwLock::new(CacheSlot {
                body: None,
                expires_at: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl SpecFetcher for TtlCached {
    async fn get(&self) -> Result<Bytes> {
        if let Some(body) = self.slot.read().await.fresh_body() {
            return Ok(body);
        }
        let mut slot = self.slot.write().await;
        if let Some(body) = slot.fresh_body() {
            return Ok(body);
        }
        match self.delegate.get().await {
            Ok(body) => {
                slot.body = Some(body.clone());
                slot.expires_at = Instant::now() + self.ttl;
                Ok(body)
            }
            Err(err) => {
                slot.body = None;
                Err(err)
            }
        }
    }
}

/// Convenience constructor for the providers' default remote composition
pub fn cached_remote(url: impl Into<String>) -> Arc<dyn SpecFetcher> {
    Arc::new(TtlCached::new(Arc::new(RemoteSpec::new(url)), DEFAULT_TTL))
}

/// Convenience constructor for the providers' default file composition
pub fn cached_file(path: impl AsRef<Path>) -> Arc<dyn SpecFetcher> {
    Arc::new(TtlCached::new(
        Arc::new(FileSpec::new(path.as_ref())),
        DEFAULT_TTL,
    ))
}
