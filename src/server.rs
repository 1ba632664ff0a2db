//! HTTP surface
//!
//! Two read-only endpoints on top of the catalog: a key listing and a
//! per-key spec fetch. Both answer pre-flight requests with permissive
//! CORS headers. The accept loop drains in-flight connections with a
//! bounded grace window on shutdown.

use crate::catalog::Catalog;
use crate::error::{HubError, Result};
use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Grace window for in-flight connections on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Route prefix for both endpoints
const DOCS_PREFIX: &str = "/docs/";

type DocsResponse = hyper::Response<Full<Bytes>>;

/// One row of the key listing endpoint
#[derive(Debug, Serialize)]
pub struct KeyUrls {
    /// Catalog key
    pub id: String,
    /// Display name
    pub name: String,
    /// Absolute URL path of the spec
    pub path: String,
}

/// The docs HTTP server, bound but not yet accepting
pub struct DocsServer {
    listener: TcpListener,
}

impl DocsServer {
    /// Bind the listener. An empty host binds all interfaces.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HubError::Config(format!("failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener })
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled, then drain.
    pub async fn run(self, catalog: Arc<Catalog>, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let catalog = catalog.clone();
                    connections.spawn(async move {
                        let io = TokioIo::new(stream);
                        let service =
                            service_fn(move |req| handle_request(catalog.clone(), req));
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!(remote = %remote, error = %e, "connection error");
                        }
                    });
                }
                // Reap finished connection tasks as we go.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(self.listener);

        tracing::info!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "shutting down server gracefully"
        );
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("grace window elapsed, aborting remaining connections");
            connections.shutdown().await;
        }
    }
}

async fn handle_request(
    catalog: Arc<Catalog>,
    req: hyper::Request<Incoming>,
) -> std::result::Result<DocsResponse, hyper::Error> {
    if req.method() == http::Method::OPTIONS {
        return Ok(preflight_response());
    }
    if req.method() != http::Method::GET {
        return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
    }
    Ok(route_get(&catalog, req.uri().path()).await)
}

async fn route_get(catalog: &Catalog, path: &str) -> DocsResponse {
    if path == "/docs" || path == DOCS_PREFIX {
        return list_keys(catalog);
    }
    if let Some(id) = path.strip_prefix(DOCS_PREFIX) {
        if !id.is_empty() && !id.contains('/') {
            return serve_spec(catalog, id).await;
        }
    }
    status_response(StatusCode::NOT_FOUND)
}

fn list_keys(catalog: &Catalog) -> DocsResponse {
    let entries: Vec<KeyUrls> = catalog
        .keys()
        .into_iter()
        .map(|meta| {
            let path = format!("{}{}", DOCS_PREFIX, meta.key);
            KeyUrls {
                id: meta.key,
                name: meta.name,
                path,
            }
        })
        .collect();
    match serde_json::to_vec(&entries) {
        Ok(body) => json_response(StatusCode::OK, Bytes::from(body)),
        Err(e) => {
            tracing::error!(error = %e, "unable to encode key listing");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn serve_spec(catalog: &Catalog, id: &str) -> DocsResponse {
    let fetcher = match catalog.spec(id) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            tracing::debug!(key = id, error = %e, "spec lookup failed");
            return status_response(StatusCode::NOT_FOUND);
        }
    };
    match fetcher.get().await {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            tracing::warn!(key = id, error = %e, "unable to retrieve spec");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn json_response(status: StatusCode, body: Bytes) -> DocsResponse {
    hyper::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(body))
        .unwrap()
}

fn status_response(status: StatusCode) -> DocsResponse {
    hyper::Response::builder()
        .status(status)
        .header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn preflight_response() -> DocsResponse {
    hyper::Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(
            http::header::ACCESS_CONTROL_ALLOW_METHODS,
            "GET, POST, PUT, DELETE, OPTIONS",
        )
        .header(
            http::header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Authorization",
        )
        .header(http::header::ACCESS_CONTROL_MAX_AGE, "86400")
        .body(Full::new(Bytes::new()))
        .unwrap()
}
