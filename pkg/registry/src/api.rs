use anyhow::Context;
use pkg_types::model::Endpoint;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::attributes::endpoint_from_instance;
use crate::rate_limiter::{RateLimiter, RegistryOp};
use crate::sdk::{Namespace, Operation, OperationFilter, ServiceDiscoverySdk};

/// Rate-limited registry calls with pagination drained.
///
/// Every method waits on the limiter bucket for its call kind (once per
/// page for list calls) before touching the wire client.
pub struct ServiceDiscoveryApi {
    sdk: Arc<dyn ServiceDiscoverySdk>,
    limiter: RateLimiter,
    cancel: CancellationToken,
}

impl ServiceDiscoveryApi {
    pub fn new(
        sdk: Arc<dyn ServiceDiscoverySdk>,
        limiter: RateLimiter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sdk,
            limiter,
            cancel,
        }
    }

    async fn throttle(&self, op: RegistryOp) -> anyhow::Result<()> {
        self.limiter.wait(op, &self.cancel).await?;
        Ok(())
    }

    /// Every namespace, keyed by name.
    pub async fn get_namespace_map(&self) -> anyhow::Result<HashMap<String, Namespace>> {
        let mut namespaces = HashMap::new();
        let mut next_token = None;
        loop {
            self.throttle(RegistryOp::ListNamespaces).await?;
            let page = self
                .sdk
                .list_namespaces(next_token)
                .await
                .context("listing namespaces")?;
            namespaces.extend(page.items.into_iter().map(|ns| (ns.name.clone(), ns)));
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }
        debug!("Listed {} registry namespaces", namespaces.len());
        Ok(namespaces)
    }

    /// Service name → service id for every service in a namespace.
    pub async fn get_service_id_map(
        &self,
        namespace_id: &str,
    ) -> anyhow::Result<HashMap<String, String>> {
        let mut services = HashMap::new();
        let mut next_token = None;
        loop {
            self.throttle(RegistryOp::ListServices).await?;
            let page = self
                .sdk
                .list_services(namespace_id, next_token)
                .await
                .with_context(|| format!("listing services in namespace {}", namespace_id))?;
            services.extend(page.items.into_iter().map(|svc| (svc.name, svc.id)));
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(services)
    }

    /// Registered endpoints of a service.
    pub async fn discover_instances(
        &self,
        namespace_name: &str,
        service_name: &str,
    ) -> anyhow::Result<Vec<Endpoint>> {
        self.throttle(RegistryOp::DiscoverInstances).await?;
        let instances = self
            .sdk
            .discover_instances(namespace_name, service_name)
            .await
            .with_context(|| format!("discovering instances of {}/{}", namespace_name, service_name))?;
        instances
            .iter()
            .map(|inst| {
                endpoint_from_instance(&inst.id, &inst.attributes).with_context(|| {
                    format!("decoding instance of {}/{}", namespace_name, service_name)
                })
            })
            .collect()
    }

    pub async fn list_operations(&self, filter: &OperationFilter) -> anyhow::Result<Vec<Operation>> {
        let mut operations = Vec::new();
        let mut next_token = None;
        loop {
            self.throttle(RegistryOp::ListOperations).await?;
            let page = self
                .sdk
                .list_operations(filter, next_token)
                .await
                .context("listing operations")?;
            operations.extend(page.items);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(operations)
    }

    pub async fn get_operation(&self, operation_id: &str) -> anyhow::Result<Operation> {
        self.throttle(RegistryOp::GetOperation).await?;
        self.sdk
            .get_operation(operation_id)
            .await
            .with_context(|| format!("getting operation {}", operation_id))
    }

    pub async fn create_http_namespace(&self, name: &str) -> anyhow::Result<String> {
        self.throttle(RegistryOp::CreateNamespace).await?;
        self.sdk
            .create_http_namespace(name)
            .await
            .with_context(|| format!("creating namespace {}", name))
    }

    pub async fn create_service(&self, namespace_id: &str, name: &str) -> anyhow::Result<String> {
        self.throttle(RegistryOp::CreateService).await?;
        self.sdk
            .create_service(namespace_id, name)
            .await
            .with_context(|| format!("creating service {} in namespace {}", name, namespace_id))
    }

    pub async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        self.throttle(RegistryOp::RegisterInstance).await?;
        self.sdk
            .register_instance(service_id, instance_id, attributes)
            .await
            .with_context(|| format!("registering instance {} in service {}", instance_id, service_id))
    }

    pub async fn deregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> anyhow::Result<String> {
        self.throttle(RegistryOp::DeregisterInstance).await?;
        self.sdk
            .deregister_instance(service_id, instance_id)
            .await
            .with_context(|| {
                format!("deregistering instance {} from service {}", instance_id, service_id)
            })
    }
}
