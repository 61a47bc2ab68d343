use anyhow::Context;
use pkg_types::model::{Endpoint, Service};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ServiceDiscoveryApi;
use crate::attributes::encode_attributes;
use crate::cache::{CacheConfig, RegistryCache};
use crate::operation_poller::{OperationPoller, PollerConfig};
use crate::rate_limiter::RateLimiter;
use crate::sdk::{
    Namespace, OperationFilter, OperationStatus, OperationType, ServiceDiscoverySdk,
    TARGET_NAMESPACE_NAME,
};

/// The synchronization engine's view of the remote registry.
///
/// Reads are served from [`RegistryCache`] when possible. Writes complete
/// only after the registry reports every submitted operation terminal, and
/// evict the cache entries they invalidate.
pub struct ServiceDiscoveryClient {
    api: Arc<ServiceDiscoveryApi>,
    cache: RegistryCache,
    poller_config: PollerConfig,
    cancel: CancellationToken,
}

impl ServiceDiscoveryClient {
    pub fn new(
        sdk: Arc<dyn ServiceDiscoverySdk>,
        limiter: RateLimiter,
        cache_config: CacheConfig,
        poller_config: PollerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api: Arc::new(ServiceDiscoveryApi::new(sdk, limiter, cancel.clone())),
            cache: RegistryCache::new(cache_config),
            poller_config,
            cancel,
        }
    }

    fn poller(&self) -> OperationPoller {
        OperationPoller::new(
            self.api.clone(),
            self.poller_config.clone(),
            self.cancel.child_token(),
        )
    }

    /// Every service in `namespace` with its endpoints. Empty when the
    /// namespace does not exist remotely.
    pub async fn list_services(&self, namespace: &str) -> anyhow::Result<Vec<Service>> {
        let Some(ns) = self.get_namespace(namespace).await? else {
            return Ok(Vec::new());
        };
        let service_ids = self.get_service_id_map(&ns).await?;
        let mut names: Vec<_> = service_ids.into_keys().collect();
        names.sort();

        let mut services = Vec::with_capacity(names.len());
        for name in names {
            let endpoints = self.get_endpoints(namespace, &name).await?;
            services.push(Service {
                namespace: namespace.to_string(),
                name,
                endpoints,
            });
        }
        Ok(services)
    }

    /// Create `name` in `namespace`, creating the namespace first if needed.
    pub async fn create_service(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        let ns = match self.get_namespace(namespace).await? {
            Some(ns) => ns,
            None => {
                // A cached miss may predate another writer's creation
                self.cache.evict_namespace_map();
                match self.get_namespace(namespace).await? {
                    Some(ns) => ns,
                    None => self.create_namespace(namespace).await?,
                }
            }
        };

        let op_id = self.api.create_service(&ns.id, name).await?;
        self.poller()
            .poll(&op_id)
            .await
            .with_context(|| format!("creating service {}/{}", namespace, name))?;
        self.cache.evict_service_id_map(namespace);
        info!("Created registry service {}/{}", namespace, name);
        Ok(())
    }

    /// The service and its endpoints, `None` if it does not exist.
    pub async fn get_service(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Service>> {
        if let Some(endpoints) = self.cache.get_endpoints(namespace, name) {
            return Ok(Some(Service {
                namespace: namespace.to_string(),
                name: name.to_string(),
                endpoints,
            }));
        }

        let Some(ns) = self.get_namespace(namespace).await? else {
            return Ok(None);
        };
        if !self.get_service_id_map(&ns).await?.contains_key(name) {
            return Ok(None);
        }

        let endpoints = self.get_endpoints(namespace, name).await?;
        Ok(Some(Service {
            namespace: namespace.to_string(),
            name: name.to_string(),
            endpoints,
        }))
    }

    /// Register (create or replace) every endpoint concurrently.
    pub async fn register_endpoints(
        &self,
        namespace: &str,
        name: &str,
        endpoints: &[Endpoint],
    ) -> anyhow::Result<()> {
        if endpoints.is_empty() {
            return Ok(());
        }
        let service_id = self.require_service_id(namespace, name).await?;

        let mut poller = self.poller();
        for endpoint in endpoints {
            let api = self.api.clone();
            let service_id = service_id.clone();
            let instance_id = endpoint.id.clone();
            let attributes = encode_attributes(endpoint);
            poller.submit(async move {
                api.register_instance(&service_id, &instance_id, attributes)
                    .await
            });
        }
        let result = poller.await_all().await;
        // Some registrations may have landed even if others failed
        self.cache.evict_endpoints(namespace, name);
        result.with_context(|| format!("registering endpoints of {}/{}", namespace, name))?;
        info!(
            "Registered {} endpoint(s) for {}/{}",
            endpoints.len(),
            namespace,
            name
        );
        Ok(())
    }

    /// Deregister every endpoint concurrently.
    pub async fn delete_endpoints(
        &self,
        namespace: &str,
        name: &str,
        endpoints: &[Endpoint],
    ) -> anyhow::Result<()> {
        if endpoints.is_empty() {
            return Ok(());
        }
        let service_id = self.require_service_id(namespace, name).await?;

        let mut poller = self.poller();
        for endpoint in endpoints {
            let api = self.api.clone();
            let service_id = service_id.clone();
            let instance_id = endpoint.id.clone();
            poller.submit(async move { api.deregister_instance(&service_id, &instance_id).await });
        }
        let result = poller.await_all().await;
        self.cache.evict_endpoints(namespace, name);
        result.with_context(|| format!("deregistering endpoints of {}/{}", namespace, name))?;
        info!(
            "Deregistered {} endpoint(s) from {}/{}",
            endpoints.len(),
            namespace,
            name
        );
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> anyhow::Result<Option<Namespace>> {
        if let Some(namespaces) = self.cache.get_namespace_map() {
            return Ok(namespaces.get(name).cloned());
        }
        let namespaces = self.api.get_namespace_map().await?;
        let ns = namespaces.get(name).cloned();
        self.cache.cache_namespace_map(namespaces);
        Ok(ns)
    }

    async fn get_service_id_map(&self, ns: &Namespace) -> anyhow::Result<HashMap<String, String>> {
        if let Some(ids) = self.cache.get_service_id_map(&ns.name) {
            return Ok(ids);
        }
        let ids = self.api.get_service_id_map(&ns.id).await?;
        self.cache.cache_service_id_map(&ns.name, ids.clone());
        Ok(ids)
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> anyhow::Result<Vec<Endpoint>> {
        if let Some(endpoints) = self.cache.get_endpoints(namespace, name) {
            return Ok(endpoints);
        }
        let endpoints = self.api.discover_instances(namespace, name).await?;
        self.cache.cache_endpoints(namespace, name, endpoints.clone());
        Ok(endpoints)
    }

    async fn require_service_id(&self, namespace: &str, name: &str) -> anyhow::Result<String> {
        let ns = self
            .get_namespace(namespace)
            .await?
            .with_context(|| format!("registry namespace {} not found", namespace))?;
        self.get_service_id_map(&ns)
            .await?
            .remove(name)
            .with_context(|| format!("registry service {}/{} not found", namespace, name))
    }

    /// Create an HTTP namespace and wait for it. A creation for the same
    /// name still in flight from an earlier pass is awaited instead of
    /// being issued twice.
    async fn create_namespace(&self, name: &str) -> anyhow::Result<Namespace> {
        let in_flight = OperationFilter {
            operation_type: Some(OperationType::CreateNamespace),
            statuses: vec![OperationStatus::Submitted, OperationStatus::Pending],
        };
        let existing = self
            .api
            .list_operations(&in_flight)
            .await?
            .into_iter()
            .find(|op| op.targets.get(TARGET_NAMESPACE_NAME).is_some_and(|n| n == name));

        let op_id = match existing {
            Some(op) => {
                debug!("Resuming in-flight creation of namespace {} ({})", name, op.id);
                op.id
            }
            None => self.api.create_http_namespace(name).await?,
        };
        self.poller()
            .poll(&op_id)
            .await
            .with_context(|| format!("creating namespace {}", name))?;
        self.cache.evict_namespace_map();
        info!("Created registry namespace {}", name);

        self.get_namespace(name)
            .await?
            .with_context(|| format!("namespace {} missing after creation", name))
    }
}
