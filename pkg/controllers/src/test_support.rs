//! Fixtures shared by the controller tests.

use pkg_constants::labels::{CLUSTER_ID_PROPERTY, CLUSTER_SET_ID_PROPERTY, SERVICE_NAME_LABEL};
use pkg_registry::ServiceDiscoveryClient;
use pkg_registry::cache::CacheConfig;
use pkg_registry::memory::MemoryRegistry;
use pkg_registry::operation_poller::PollerConfig;
use pkg_registry::rate_limiter::RateLimiter;
use pkg_state::ClusterClient;
use pkg_types::cluster::ClusterProperty;
use pkg_types::endpointslice::{AddressType, EndpointPort, EndpointSlice, SliceEndpoint};
use pkg_types::meta::ObjectMeta;
use pkg_types::service::{Service, ServicePort, ServiceSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterUtils;

/// One cluster's local store and registry client, over a registry that can
/// be shared with peers.
pub(crate) struct Harness {
    pub client: ClusterClient,
    pub registry: Arc<MemoryRegistry>,
    pub registry_client: Arc<ServiceDiscoveryClient>,
    pub cluster: Arc<ClusterUtils>,
}

impl Harness {
    pub async fn new(cluster_id: &str) -> Self {
        Self::on_registry(Arc::new(MemoryRegistry::new()), cluster_id).await
    }

    /// Another cluster in the same set, publishing into the same registry.
    pub async fn peer(&self, cluster_id: &str) -> Self {
        Self::on_registry(self.registry.clone(), cluster_id).await
    }

    pub fn without_identity() -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let client = ClusterClient::in_memory();
        Self {
            cluster: Arc::new(ClusterUtils::new(client.clone())),
            registry_client: registry_client(&registry),
            client,
            registry,
        }
    }

    async fn on_registry(registry: Arc<MemoryRegistry>, cluster_id: &str) -> Self {
        let client = ClusterClient::in_memory();
        client
            .create(ClusterProperty::new(CLUSTER_ID_PROPERTY, cluster_id))
            .await
            .unwrap();
        client
            .create(ClusterProperty::new(CLUSTER_SET_ID_PROPERTY, "set-1"))
            .await
            .unwrap();
        Self {
            cluster: Arc::new(ClusterUtils::new(client.clone())),
            registry_client: registry_client(&registry),
            client,
            registry,
        }
    }
}

fn registry_client(registry: &Arc<MemoryRegistry>) -> Arc<ServiceDiscoveryClient> {
    Arc::new(ServiceDiscoveryClient::new(
        registry.clone(),
        RateLimiter::default(),
        CacheConfig::default(),
        PollerConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(1),
        },
        CancellationToken::new(),
    ))
}

/// Service with one port per name: `80+i` targeting `8080+i`.
pub(crate) fn local_service(namespace: &str, name: &str, port_names: &[&str]) -> Service {
    Service {
        meta: ObjectMeta::new(namespace, name),
        spec: ServiceSpec {
            ports: port_names
                .iter()
                .enumerate()
                .map(|(i, port_name)| ServicePort {
                    name: port_name.to_string(),
                    port: 80 + i as u16,
                    target_port: Some((8080 + i).to_string()),
                    protocol: "TCP".to_string(),
                })
                .collect(),
            ..Default::default()
        },
    }
}

/// Ready endpoints for `service`, with slice port `8080+i` per name.
pub(crate) fn local_slice(
    namespace: &str,
    service: &str,
    slice_name: &str,
    ips: &[&str],
    port_names: &[&str],
) -> EndpointSlice {
    EndpointSlice {
        meta: ObjectMeta::new(namespace, slice_name).with_labels([(SERVICE_NAME_LABEL, service)]),
        address_type: AddressType::IPv4,
        endpoints: ips
            .iter()
            .map(|ip| SliceEndpoint {
                addresses: vec![ip.to_string()],
                ready: true,
                hostname: None,
                node_name: None,
            })
            .collect(),
        ports: port_names
            .iter()
            .enumerate()
            .map(|(i, port_name)| EndpointPort {
                name: port_name.to_string(),
                port: 8080 + i as u16,
                protocol: "TCP".to_string(),
            })
            .collect(),
    }
}
