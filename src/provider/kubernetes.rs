//! Kubernetes provider
//!
//! Watches services and config-maps carrying the swagger labels and
//! translates watch events into catalog mutations.
//!
//! The cluster API is abstracted behind [`ClusterClient`], a typed event
//! source, so all event-handling logic is pure and testable without a real
//! cluster. The real client is feature-gated behind `kube`.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::fetch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Source tag for service-discovered specs
const SERVICE_SOURCE: &str = "kubeService";

/// Label selecting services that expose a spec
const SERVICE_SELECTOR: &str = "swagger";

/// Label selecting config-maps that declare remote specs
const CONFIG_MAP_SELECTOR: &str = "remote-swagger";

/// Label or annotation naming the spec path on a service
const PATH_LABEL: &str = "swagger-path";

/// Label or annotation naming the spec port on a multi-port service
const PORT_LABEL: &str = "swagger-port";

// -----------------------------------------------------------------------
// Cluster model, defined locally so event handling works without the
// `kube` feature.
// -----------------------------------------------------------------------

/// Simplified kubernetes service representation
#[derive(Debug, Clone)]
pub struct KubeService {
    /// Service name
    pub name: String,
    /// Labels merged with annotations
    pub labels: HashMap<String, String>,
    /// Hostname the service is reachable on
    pub host: String,
    /// Named ports exposed by the service
    pub ports: HashMap<String, u16>,
}

/// Simplified kubernetes config-map representation
#[derive(Debug, Clone)]
pub struct KubeConfigMap {
    /// Config-map name
    pub name: String,
    /// Data entries, spec name to upstream URL
    pub data: HashMap<String, String>,
}

/// Tagged watch event at the core boundary
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    /// A new object appeared
    Added(T),
    /// An existing object changed
    Modified(T),
    /// An object was removed
    Deleted(T),
    /// Progress marker carrying no object
    Bookmark,
    /// A runtime event-stream error
    Error(String),
}

/// Abstract cluster event source.
///
/// Subscription failures are fatal at configure time; errors flowing on an
/// established stream are [`WatchEvent::Error`] and only logged.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Watch services matching `label_selector`
    async fn watch_services(
        &self,
        label_selector: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<KubeService>>>;

    /// Watch config-maps matching `label_selector`
    async fn watch_config_maps(
        &self,
        label_selector: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<KubeConfigMap>>>;
}

/// Subscribe to both watch streams and feed events into the catalog.
///
/// Cancelling `shutdown` stops both loops; the catalog is left as-is.
pub async fn configure(
    shutdown: CancellationToken,
    catalog: Arc<Catalog>,
    client: Arc<dyn ClusterClient>,
) -> Result<()> {
    let services = client.watch_services(SERVICE_SELECTOR).await?;
    let config_maps = client.watch_config_maps(CONFIG_MAP_SELECTOR).await?;
    tokio::spawn(run_service_watch(shutdown.clone(), catalog.clone(), services));
    tokio::spawn(run_config_map_watch(shutdown, catalog, config_maps));
    Ok(())
}

async fn run_service_watch(
    shutdown: CancellationToken,
    catalog: Arc<Catalog>,
    mut events: mpsc::Receiver<WatchEvent<KubeService>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_service_event(&catalog, event),
                None => break,
            },
        }
    }
    tracing::info!("stopping service watch");
}

async fn run_config_map_watch(
    shutdown: CancellationToken,
    catalog: Arc<Catalog>,
    mut events: mpsc::Receiver<WatchEvent<KubeConfigMap>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_config_map_event(&catalog, event),
                None => break,
            },
        }
    }
    tracing::info!("stopping config-map watch");
}

fn handle_service_event(catalog: &Catalog, event: WatchEvent<KubeService>) {
    match event {
        WatchEvent::Added(svc) | WatchEvent::Modified(svc) => apply_service(catalog, &svc),
        WatchEvent::Deleted(svc) => {
            tracing::info!(service = %svc.name, "service deleted");
            remove_service(catalog, &svc);
        }
        WatchEvent::Bookmark => {}
        WatchEvent::Error(e) => tracing::warn!(error = %e, "service watch error"),
    }
}

fn apply_service(catalog: &Catalog, svc: &KubeService) {
    let Some(url) = service_url(svc) else {
        tracing::warn!(service = %svc.name, "service has no usable swagger path or port");
        remove_service(catalog, svc);
        return;
    };
    tracing::info!(service = %svc.name, url = %url, "storing service spec");
    if let Err(e) = catalog.put(SERVICE_SOURCE, &svc.name, fetch::cached_remote(url)) {
        tracing::warn!(service = %svc.name, error = %e, "could not store service spec");
    }
}

fn remove_service(catalog: &Catalog, svc: &KubeService) {
    if let Err(e) = catalog.remove(SERVICE_SOURCE, &svc.name) {
        tracing::warn!(service = %svc.name, error = %e, "could not remove service spec");
    }
}

/// The spec URL declared by a service, if path and port resolve
fn service_url(svc: &KubeService) -> Option<String> {
    let path = svc.labels.get(PATH_LABEL)?;
    let port = resolve_port(svc)?;
    Some(format!("http://{}:{}{}", svc.host, port, path))
}

/// Pick the spec port: a single port wins outright; otherwise the
/// `swagger-port` label is tried as a port number first, then as a port
/// name.
fn resolve_port(svc: &KubeService) -> Option<u16> {
    if svc.ports.len() == 1 {
        return svc.ports.values().next().copied();
    }
    let label = svc.labels.get(PORT_LABEL)?;
    if let Ok(number) = label.parse::<u16>() {
        if svc.ports.values().any(|port| *port == number) {
            return Some(number);
        }
    }
    svc.ports.get(label.as_str()).copied()
}

fn handle_config_map_event(catalog: &Catalog, event: WatchEvent<KubeConfigMap>) {
    match event {
        WatchEvent::Deleted(cm) => {
            tracing::info!(config_map = %cm.name, "config-map deleted");
            catalog.remove_all_of(&config_map_source(&cm.name));
        }
        WatchEvent::Added(cm) | WatchEvent::Modified(cm) => {
            let specs = cm
                .data
                .iter()
                .map(|(name, url)| (name.clone(), fetch::cached_remote(url.clone())))
                .collect();
            catalog.replace_all_of(&config_map_source(&cm.name), specs);
        }
        WatchEvent::Bookmark => {}
        WatchEvent::Error(e) => tracing::warn!(error = %e, "config-map watch error"),
    }
}

/// One source per config-map
fn config_map_source(name: &str) -> String {
    format!("kube:cm:{}", name)
}

// -----------------------------------------------------------------------
// Real cluster client, feature-gated behind `kube`
// -----------------------------------------------------------------------

#[cfg(feature = "kube")]
mod cluster {
    use super::*;
    use crate::error::HubError;
    use futures_util::TryStreamExt;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use kube::api::WatchParams;
    use kube::core::WatchEvent as ApiWatchEvent;
    use kube::Api;

    /// Cluster client backed by the in-cluster or kubeconfig `kube` client
    pub struct KubeClusterClient {
        client: kube::Client,
    }

    impl KubeClusterClient {
        /// Authenticate with the default environment configuration
        pub async fn try_default() -> Result<Self> {
            let client = kube::Client::try_default().await.map_err(|e| {
                HubError::ProviderInit(format!("unable to create kubernetes client: {}", e))
            })?;
            Ok(Self { client })
        }
    }

    fn to_service(svc: Service) -> KubeService {
        let name = svc.metadata.name.unwrap_or_default();
        let mut labels: HashMap<String, String> = svc
            .metadata
            .labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(annotations) = svc.metadata.annotations {
            labels.extend(annotations);
        }
        let mut ports = HashMap::new();
        if let Some(spec) = svc.spec {
            for port in spec.ports.unwrap_or_default() {
                ports.insert(port.name.unwrap_or_default(), port.port as u16);
            }
        }
        KubeService {
            host: name.clone(),
            name,
            labels,
            ports,
        }
    }

    fn to_config_map(cm: ConfigMap) -> KubeConfigMap {
        KubeConfigMap {
            name: cm.metadata.name.unwrap_or_default(),
            data: cm
                .data
                .map(|data| data.into_iter().collect())
                .unwrap_or_default(),
        }
    }

    #[async_trait]
    impl ClusterClient for KubeClusterClient {
        async fn watch_services(
            &self,
            label_selector: &str,
        ) -> Result<mpsc::Receiver<WatchEvent<KubeService>>> {
            let api: Api<Service> = Api::all(self.client.clone());
            watch_resource(api, label_selector, to_service).await
        }

        async fn watch_config_maps(
            &self,
            label_selector: &str,
        ) -> Result<mpsc::Receiver<WatchEvent<KubeConfigMap>>> {
            let api: Api<ConfigMap> = Api::all(self.client.clone());
            watch_resource(api, label_selector, to_config_map).await
        }
    }

    /// Open a watch and forward its events as the core's typed variants.
    ///
    /// The API is probed with a bounded list first so a broken subscription
    /// fails at configure time instead of silently inside the watch task.
    async fn watch_resource<K, T, F>(
        api: Api<K>,
        label_selector: &str,
        convert: F,
    ) -> Result<mpsc::Receiver<WatchEvent<T>>>
    where
        K: Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> T + Send + 'static,
    {
        let probe = kube::api::ListParams::default()
            .labels(label_selector)
            .limit(1);
        api.list(&probe).await.map_err(|e| {
            HubError::ProviderInit(format!("unable to subscribe to kubernetes watch: {}", e))
        })?;

        let selector = label_selector.to_string();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let params = WatchParams::default().labels(&selector);
            let stream = match api.watch(&params, "0").await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(WatchEvent::Error(e.to_string())).await;
                    return;
                }
            };
            futures_util::pin_mut!(stream);
            loop {
                match stream.try_next().await {
                    Ok(Some(event)) => {
                        let event = match event {
                            ApiWatchEvent::Added(obj) => WatchEvent::Added(convert(obj)),
                            ApiWatchEvent::Modified(obj) => WatchEvent::Modified(convert(obj)),
                            ApiWatchEvent::Deleted(obj) => WatchEvent::Deleted(convert(obj)),
                            ApiWatchEvent::Bookmark(_) => WatchEvent::Bookmark,
                            ApiWatchEvent::Error(e) => WatchEvent::Error(e.to_string()),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(WatchEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(feature = "kube")]
pub use cluster::KubeClusterClient;

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, labels: &[(&str, &str)], ports: &[(&str, u16)]) -> KubeService {
        KubeService {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            host: name.to_string(),
            ports: ports
                .iter()
                .map(|(name, port)| (name.to_string(), *port))
                .collect(),
        }
    }

    fn config_map(name: &str, data: &[(&str, &str)]) -> KubeConfigMap {
        KubeConfigMap {
            name: name.to_string(),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn key_list(catalog: &Catalog) -> Vec<String> {
        catalog.keys().into_iter().map(|m| m.key).collect()
    }

    // --- resolve_port ---

    #[test]
    fn test_resolve_port_single_port_wins() {
        let svc = service("svc1", &[], &[("http", 8080)]);
        assert_eq!(resolve_port(&svc), Some(8080));
    }

    #[test]
    fn test_resolve_port_numeric_label() {
        let svc = service(
            "svc1",
            &[("swagger-port", "9090")],
            &[("http", 8080), ("admin", 9090)],
        );
        assert_eq!(resolve_port(&svc), Some(9090));
    }

    #[test]
    fn test_resolve_port_numeric_label_not_present_falls_back_to_name() {
        // "8081" is not among the port numbers and names no port either
        let svc = service(
            "svc1",
            &[("swagger-port", "8081")],
            &[("http", 8080), ("admin", 9090)],
        );
        assert_eq!(resolve_port(&svc), None);
    }

    #[test]
    fn test_resolve_port_named_label() {
        let svc = service(
            "svc1",
            &[("swagger-port", "admin")],
            &[("http", 8080), ("admin", 9090)],
        );
        assert_eq!(resolve_port(&svc), Some(9090));
    }

    #[test]
    fn test_resolve_port_multi_port_without_label() {
        let svc = service("svc1", &[], &[("http", 8080), ("admin", 9090)]);
        assert_eq!(resolve_port(&svc), None);
    }

    // --- service_url ---

    #[test]
    fn test_service_url_composed() {
        let svc = service("svc1", &[("swagger-path", "/api")], &[("http", 8080)]);
        assert_eq!(
            service_url(&svc),
            Some("http://svc1:8080/api".to_string())
        );
    }

    #[test]
    fn test_service_url_missing_path() {
        let svc = service("svc1", &[], &[("http", 8080)]);
        assert_eq!(service_url(&svc), None);
    }

    // --- service events ---

    #[test]
    fn test_service_added_and_deleted() {
        let catalog = Catalog::new();
        let svc = service("svc1", &[("swagger-path", "/api")], &[("http", 8080)]);

        handle_service_event(&catalog, WatchEvent::Added(svc.clone()));
        assert_eq!(key_list(&catalog), vec!["svc1"]);

        handle_service_event(&catalog, WatchEvent::Deleted(svc));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_service_modified_without_path_is_removed() {
        let catalog = Catalog::new();
        let svc = service("svc1", &[("swagger-path", "/api")], &[("http", 8080)]);
        handle_service_event(&catalog, WatchEvent::Added(svc));
        assert_eq!(catalog.len(), 1);

        // The path label disappeared on modification
        let stripped = service("svc1", &[], &[("http", 8080)]);
        handle_service_event(&catalog, WatchEvent::Modified(stripped));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_service_bookmark_and_error_are_ignored() {
        let catalog = Catalog::new();
        handle_service_event(&catalog, WatchEvent::Bookmark);
        handle_service_event(&catalog, WatchEvent::Error("stream hiccup".into()));
        assert!(catalog.is_empty());
    }

    // --- config-map events ---

    #[test]
    fn test_config_map_replace_and_delete() {
        let catalog = Catalog::new();
        let cm = config_map("team-a", &[("pets", "http://u/pets"), ("billing", "http://u/b")]);

        handle_config_map_event(&catalog, WatchEvent::Added(cm.clone()));
        assert_eq!(key_list(&catalog), vec!["billing", "pets"]);

        let shrunk = config_map("team-a", &[("pets", "http://u/pets")]);
        handle_config_map_event(&catalog, WatchEvent::Modified(shrunk));
        assert_eq!(key_list(&catalog), vec!["pets"]);

        handle_config_map_event(&catalog, WatchEvent::Deleted(cm));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_config_maps_have_distinct_sources() {
        let catalog = Catalog::new();
        handle_config_map_event(
            &catalog,
            WatchEvent::Added(config_map("team-a", &[("pets", "http://u/pets")])),
        );
        handle_config_map_event(
            &catalog,
            WatchEvent::Added(config_map("team-b", &[("cars", "http://u/cars")])),
        );
        assert_eq!(catalog.len(), 2);

        handle_config_map_event(
            &catalog,
            WatchEvent::Deleted(config_map("team-a", &[])),
        );
        assert_eq!(key_list(&catalog), vec!["cars"]);
    }

    #[test]
    fn test_config_map_source_tag() {
        assert_eq!(config_map_source("team-a"), "kube:cm:team-a");
    }

    // --- configure, against a channel-backed fake client ---

    struct FakeClusterClient {
        services: std::sync::Mutex<Option<mpsc::Receiver<WatchEvent<KubeService>>>>,
        config_maps: std::sync::Mutex<Option<mpsc::Receiver<WatchEvent<KubeConfigMap>>>>,
    }

    #[async_trait]
    impl ClusterClient for FakeClusterClient {
        async fn watch_services(
            &self,
            _label_selector: &str,
        ) -> Result<mpsc::Receiver<WatchEvent<KubeService>>> {
            Ok(self.services.lock().unwrap().take().expect("watched once"))
        }

        async fn watch_config_maps(
            &self,
            _label_selector: &str,
        ) -> Result<mpsc::Receiver<WatchEvent<KubeConfigMap>>> {
            Ok(self.config_maps.lock().unwrap().take().expect("watched once"))
        }
    }

    #[tokio::test]
    async fn test_configure_feeds_catalog_from_streams() {
        let (svc_tx, svc_rx) = mpsc::channel(8);
        let (cm_tx, cm_rx) = mpsc::channel(8);
        let client = Arc::new(FakeClusterClient {
            services: std::sync::Mutex::new(Some(svc_rx)),
            config_maps: std::sync::Mutex::new(Some(cm_rx)),
        });

        let catalog = Arc::new(Catalog::new());
        let shutdown = CancellationToken::new();
        configure(shutdown.clone(), catalog.clone(), client)
            .await
            .unwrap();

        let svc = service("svc1", &[("swagger-path", "/api")], &[("http", 8080)]);
        svc_tx.send(WatchEvent::Added(svc)).await.unwrap();
        cm_tx
            .send(WatchEvent::Added(config_map("team-a", &[("pets", "http://u/p")])))
            .await
            .unwrap();

        // The loops run on their own tasks; poll until both land.
        for _ in 0..100 {
            if catalog.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(key_list(&catalog), vec!["pets", "svc1"]);

        shutdown.cancel();
    }
}
