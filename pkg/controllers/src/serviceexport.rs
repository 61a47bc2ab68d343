use anyhow::Context;
use pkg_constants::labels::{SERVICE_EXPORT_FINALIZER, SERVICE_NAME_LABEL};
use pkg_registry::ServiceDiscoveryClient;
use pkg_state::ClusterClient;
use pkg_state::objects::kind_prefix;
use pkg_types::endpointslice::EndpointSlice;
use pkg_types::model::{Endpoint, Port, ServiceType};
use pkg_types::service::Service;
use pkg_types::serviceexport::{CONDITION_SYNCED, CONDITION_VALID, ServiceExport};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ControllerConfig;
use crate::changes::calculate_changes;
use crate::cluster::{ClusterIdentity, ClusterUtils};
use crate::utils::service_port_to_port;

/// Publishes every exported local Service's endpoints to the registry.
///
/// Each ServiceExport carries a finalizer so that this cluster's endpoints
/// are deregistered before the export disappears. Only endpoints owned by
/// this cluster are ever touched; other clusters publish into the same
/// registry service.
pub struct ServiceExportController {
    client: ClusterClient,
    registry: Arc<ServiceDiscoveryClient>,
    cluster: Arc<ClusterUtils>,
    check_interval: Duration,
    cancel: CancellationToken,
}

impl ServiceExportController {
    pub fn new(
        client: ClusterClient,
        registry: Arc<ServiceDiscoveryClient>,
        cluster: Arc<ClusterUtils>,
        config: &ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            registry,
            cluster,
            check_interval: config.export_interval,
            cancel,
        }
    }

    /// Start the controller loop as a background task. Runs a pass every
    /// interval and whenever an export, service or slice changes locally.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "ServiceExportController started (interval={}s)",
                self.check_interval.as_secs()
            );
            let mut event_rx = self.client.events().subscribe();
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("ServiceExportController stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        self.run_pass().await;
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(ref event) if Self::is_watched(&event.key) => {
                                while event_rx.try_recv().is_ok() {}
                                self.run_pass().await;
                                while event_rx.try_recv().is_ok() {}
                                interval.reset();
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                                self.run_pass().await;
                                interval.reset();
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    fn is_watched(key: &str) -> bool {
        key.starts_with(&kind_prefix::<ServiceExport>())
            || key.starts_with(&kind_prefix::<Service>())
            || key.starts_with(&kind_prefix::<EndpointSlice>())
    }

    async fn run_pass(&self) {
        if let Err(e) = self.reconcile().await {
            warn!("ServiceExportController reconcile error: {:#}", e);
        }
    }

    /// One pass over every ServiceExport. A failing export is logged and
    /// marked not synced; the others still run.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let identity = self
            .cluster
            .identity()
            .await
            .context("resolving cluster identity")?;
        let exports = self.client.list::<ServiceExport>(None).await?;

        for export in exports {
            let namespace = export.meta.namespace.clone();
            let name = export.meta.name.clone();
            if let Err(e) = self.reconcile_export(export, &identity).await {
                warn!("Failed to sync ServiceExport {}/{}: {:#}", namespace, name, e);
                self.mark_sync_failed(&namespace, &name, &e).await;
            }
        }
        Ok(())
    }

    async fn reconcile_export(
        &self,
        mut export: ServiceExport,
        identity: &ClusterIdentity,
    ) -> anyhow::Result<()> {
        if export.meta.is_deleting() {
            return self.finalize(export, identity).await;
        }

        if export.meta.add_finalizer(SERVICE_EXPORT_FINALIZER) {
            self.client.update(&export).await?;
            debug!(
                "Added finalizer to ServiceExport {}/{}",
                export.meta.namespace, export.meta.name
            );
        }

        let namespace = export.meta.namespace.clone();
        let name = export.meta.name.clone();

        let Some(service) = self.client.get::<Service>(&namespace, &name).await? else {
            let withdrawn = self.withdraw(&namespace, &name, identity).await?;
            if withdrawn > 0 {
                info!(
                    "Deregistered {} endpoint(s) of ServiceExport {}/{} whose Service is gone",
                    withdrawn, namespace, name
                );
            }
            let message = format!("Service {}/{} not found", namespace, name);
            if export.set_condition(CONDITION_VALID, false, Some("ServiceNotFound"), Some(message)) {
                self.client.update(&export).await?;
                info!("ServiceExport {}/{} has no matching Service", namespace, name);
            }
            return Ok(());
        };

        let selector = BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), name.clone())]);
        let slices = self
            .client
            .list_by_label::<EndpointSlice>(&namespace, &selector)
            .await?;
        let desired = build_endpoints(&export, &service, &slices, identity);

        let remote = match self.registry.get_service(&namespace, &name).await? {
            Some(remote) => remote,
            None => {
                info!("Creating registry service {}/{}", namespace, name);
                self.registry.create_service(&namespace, &name).await?;
                self.registry
                    .get_service(&namespace, &name)
                    .await?
                    .with_context(|| {
                        format!("registry service {}/{} missing after creation", namespace, name)
                    })?
            }
        };

        let current = remote.endpoints_for_cluster(&identity.cluster_id);
        let changes = calculate_changes(&current, &desired);

        // Registrations land before deregistrations
        if changes.has_updates() {
            self.registry
                .register_endpoints(&namespace, &name, &changes.upserts())
                .await?;
        }
        if changes.has_deletes() {
            self.registry
                .delete_endpoints(&namespace, &name, &changes.delete)
                .await?;
        }
        if !changes.is_none() {
            info!(
                "ServiceExport {}/{} synced ({} created, {} updated, {} deleted)",
                namespace,
                name,
                changes.create.len(),
                changes.update.len(),
                changes.delete.len()
            );
        }

        let mut changed = export.set_condition(CONDITION_VALID, true, None, None);
        changed |= export.set_condition(CONDITION_SYNCED, true, None, None);
        if changed {
            self.client.update(&export).await?;
        }
        Ok(())
    }

    /// Deregister this cluster's endpoints, then release the export.
    async fn finalize(
        &self,
        mut export: ServiceExport,
        identity: &ClusterIdentity,
    ) -> anyhow::Result<()> {
        if !export.meta.has_finalizer(SERVICE_EXPORT_FINALIZER) {
            return Ok(());
        }
        let namespace = export.meta.namespace.clone();
        let name = export.meta.name.clone();

        let withdrawn = self.withdraw(&namespace, &name, identity).await?;
        if withdrawn > 0 {
            info!(
                "Deregistered {} endpoint(s) of deleted ServiceExport {}/{}",
                withdrawn, namespace, name
            );
        }

        export.meta.remove_finalizer(SERVICE_EXPORT_FINALIZER);
        self.client.update(&export).await?;
        info!("ServiceExport {}/{} finalized", namespace, name);
        Ok(())
    }

    /// Deregister every endpoint this cluster owns under `namespace/name`.
    /// Returns how many were removed.
    async fn withdraw(
        &self,
        namespace: &str,
        name: &str,
        identity: &ClusterIdentity,
    ) -> anyhow::Result<usize> {
        let Some(remote) = self.registry.get_service(namespace, name).await? else {
            return Ok(0);
        };
        let owned = remote.endpoints_for_cluster(&identity.cluster_id);
        if !owned.is_empty() {
            self.registry
                .delete_endpoints(namespace, name, &owned)
                .await?;
        }
        Ok(owned.len())
    }

    async fn mark_sync_failed(&self, namespace: &str, name: &str, err: &anyhow::Error) {
        let result = async {
            let Some(mut export) = self.client.get::<ServiceExport>(namespace, name).await? else {
                return Ok(());
            };
            if export.set_condition(
                CONDITION_SYNCED,
                false,
                Some("SyncFailed"),
                Some(format!("{:#}", err)),
            ) {
                self.client.update(&export).await?;
            }
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(
                "Failed to record sync failure on ServiceExport {}/{}: {}",
                namespace, name, e
            );
        }
    }
}

/// Endpoints this cluster should publish for `service`: one per address and
/// service port, matching slice ports to service ports by name. Not-ready
/// addresses are published with `ready = false`.
pub fn build_endpoints(
    export: &ServiceExport,
    service: &Service,
    slices: &[EndpointSlice],
    identity: &ClusterIdentity,
) -> Vec<Endpoint> {
    let service_type = if service.is_headless() {
        ServiceType::Headless
    } else {
        ServiceType::ClusterSetIP
    };
    let created = export.meta.created_at.timestamp_millis();

    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();
    for slice in slices {
        for service_port in &service.spec.ports {
            let Some(slice_port) = slice.ports.iter().find(|p| p.name == service_port.name) else {
                continue;
            };
            for ep in &slice.endpoints {
                let Some(ip) = ep.address() else {
                    continue;
                };
                let id = Endpoint::endpoint_id(ip, slice_port.port, &slice_port.protocol);
                if !seen.insert(id.clone()) {
                    continue;
                }
                endpoints.push(Endpoint {
                    id,
                    ip: ip.to_string(),
                    endpoint_port: Port {
                        name: slice_port.name.clone(),
                        port: slice_port.port,
                        target_port: None,
                        protocol: slice_port.protocol.clone(),
                    },
                    service_port: service_port_to_port(service_port),
                    cluster_id: identity.cluster_id.clone(),
                    cluster_set_id: identity.cluster_set_id.clone(),
                    service_type,
                    ready: ep.ready,
                    hostname: ep.hostname.clone(),
                    nodename: ep.node_name.clone(),
                    service_export_creation_timestamp: created,
                    attributes: BTreeMap::new(),
                });
            }
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, local_service, local_slice};
    use pkg_registry::memory::OperationOutcome;
    use pkg_types::endpointslice::SliceEndpoint;

    fn controller(h: &Harness) -> ServiceExportController {
        ServiceExportController::new(
            h.client.clone(),
            h.registry_client.clone(),
            h.cluster.clone(),
            &ControllerConfig::default(),
            CancellationToken::new(),
        )
    }

    async fn export(h: &Harness, ns: &str, name: &str) -> ServiceExport {
        h.client
            .get::<ServiceExport>(ns, name)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_export_publishes_and_second_pass_is_quiet() {
        let h = Harness::new("cluster-a").await;
        h.client.create(local_service("default", "web", &["http"])).await.unwrap();
        h.client
            .create(local_slice("default", "web", "web-abc", &["10.0.0.1"], &["http"]))
            .await
            .unwrap();
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();

        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        assert_eq!(h.registry.call_count("create_service"), 1);
        assert_eq!(h.registry.call_count("register_instance"), 1);
        let instances = h.registry.instances("default", "web");
        assert!(instances.contains_key("tcp-10_0_0_1-8080"));

        let exported = export(&h, "default", "web").await;
        assert!(exported.meta.has_finalizer(SERVICE_EXPORT_FINALIZER));
        assert!(exported.condition(CONDITION_VALID).unwrap().status);
        assert!(exported.condition(CONDITION_SYNCED).unwrap().status);

        let before = h.registry.mutation_count();
        ctrl.reconcile().await.unwrap();
        assert_eq!(h.registry.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_missing_service_marks_export_invalid() {
        let h = Harness::new("cluster-a").await;
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();

        controller(&h).reconcile().await.unwrap();

        let exported = export(&h, "default", "web").await;
        let valid = exported.condition(CONDITION_VALID).unwrap();
        assert!(!valid.status);
        assert_eq!(valid.reason.as_deref(), Some("ServiceNotFound"));
        assert_eq!(h.registry.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_service_withdraws_endpoints() {
        let h = Harness::new("cluster-a").await;
        let other = h.peer("cluster-b").await;
        for cluster in [&h, &other] {
            cluster.client.create(local_service("default", "web", &["http"])).await.unwrap();
            cluster.client.create(ServiceExport::new("default", "web")).await.unwrap();
        }
        h.client
            .create(local_slice("default", "web", "web-a", &["10.0.0.1"], &["http"]))
            .await
            .unwrap();
        other
            .client
            .create(local_slice("default", "web", "web-b", &["10.1.0.1"], &["http"]))
            .await
            .unwrap();
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();
        controller(&other).reconcile().await.unwrap();
        assert_eq!(h.registry.instances("default", "web").len(), 2);

        // The export stays but its Service goes away
        h.client.delete::<Service>("default", "web").await.unwrap();
        h.client.delete::<EndpointSlice>("default", "web-a").await.unwrap();
        ctrl.reconcile().await.unwrap();

        let instances = h.registry.instances("default", "web");
        assert_eq!(instances.len(), 1);
        assert!(instances.contains_key("tcp-10_1_0_1-8080"));
        let valid = export(&h, "default", "web").await;
        let valid = valid.condition(CONDITION_VALID).unwrap();
        assert!(!valid.status);
        assert_eq!(valid.reason.as_deref(), Some("ServiceNotFound"));
    }

    #[tokio::test]
    async fn test_registrations_precede_deregistrations() {
        let h = Harness::new("cluster-a").await;
        h.client.create(local_service("default", "web", &["http"])).await.unwrap();
        h.client
            .create(local_slice("default", "web", "web-abc", &["10.0.0.1"], &["http"]))
            .await
            .unwrap();
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        // Replace the only address: one registration and one deregistration
        let mut slice: EndpointSlice = h.client.get("default", "web-abc").await.unwrap().unwrap();
        slice.endpoints[0].addresses = vec!["10.0.0.2".to_string()];
        h.client.update(&slice).await.unwrap();
        let mark = h.registry.call_log().len();
        ctrl.reconcile().await.unwrap();

        let log = h.registry.call_log();
        let pass = &log[mark..];
        let last_register = pass.iter().rposition(|c| *c == "register_instance").unwrap();
        let first_deregister = pass.iter().position(|c| *c == "deregister_instance").unwrap();
        assert!(
            last_register < first_deregister,
            "calls out of order: {:?}",
            pass
        );

        let instances = h.registry.instances("default", "web");
        assert_eq!(instances.len(), 1);
        assert!(instances.contains_key("tcp-10_0_0_2-8080"));
    }

    #[tokio::test]
    async fn test_removed_address_is_deregistered() {
        let h = Harness::new("cluster-a").await;
        h.client.create(local_service("default", "web", &["http"])).await.unwrap();
        h.client
            .create(local_slice(
                "default",
                "web",
                "web-abc",
                &["10.0.0.1", "10.0.0.2"],
                &["http"],
            ))
            .await
            .unwrap();
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();
        assert_eq!(h.registry.instances("default", "web").len(), 2);

        let mut slice: EndpointSlice = h.client.get("default", "web-abc").await.unwrap().unwrap();
        slice.endpoints.truncate(1);
        h.client.update(&slice).await.unwrap();
        ctrl.reconcile().await.unwrap();

        let instances = h.registry.instances("default", "web");
        assert_eq!(instances.len(), 1);
        assert!(instances.contains_key("tcp-10_0_0_1-8080"));
    }

    #[tokio::test]
    async fn test_other_clusters_endpoints_are_untouched() {
        let h = Harness::new("cluster-a").await;
        let other = h.peer("cluster-b").await;
        for cluster in [&h, &other] {
            cluster.client.create(local_service("default", "web", &["http"])).await.unwrap();
            cluster.client.create(ServiceExport::new("default", "web")).await.unwrap();
        }
        h.client
            .create(local_slice("default", "web", "web-a", &["10.0.0.1"], &["http"]))
            .await
            .unwrap();
        other
            .client
            .create(local_slice("default", "web", "web-b", &["10.1.0.1"], &["http"]))
            .await
            .unwrap();

        controller(&h).reconcile().await.unwrap();
        controller(&other).reconcile().await.unwrap();
        assert_eq!(h.registry.instances("default", "web").len(), 2);

        // Cluster A loses its only address; B's endpoint must survive
        h.client.delete::<EndpointSlice>("default", "web-a").await.unwrap();
        controller(&h).reconcile().await.unwrap();

        let instances = h.registry.instances("default", "web");
        assert_eq!(instances.len(), 1);
        assert!(instances.contains_key("tcp-10_1_0_1-8080"));
    }

    #[tokio::test]
    async fn test_deletion_deregisters_before_releasing_export() {
        let h = Harness::new("cluster-a").await;
        h.client.create(local_service("default", "web", &["http"])).await.unwrap();
        h.client
            .create(local_slice("default", "web", "web-abc", &["10.0.0.1"], &["http"]))
            .await
            .unwrap();
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        h.client.delete::<ServiceExport>("default", "web").await.unwrap();
        assert!(export(&h, "default", "web").await.meta.is_deleting());

        // Deregistration fails: the export must stay until it succeeds
        h.registry
            .set_outcome("tcp-10_0_0_1-8080", OperationOutcome::Fail("throttled".to_string()));
        ctrl.reconcile().await.unwrap();
        let pending = export(&h, "default", "web").await;
        assert!(pending.meta.has_finalizer(SERVICE_EXPORT_FINALIZER));
        assert!(!pending.condition(CONDITION_SYNCED).unwrap().status);
        assert_eq!(h.registry.instances("default", "web").len(), 1);

        h.registry
            .set_outcome("tcp-10_0_0_1-8080", OperationOutcome::Succeed);
        ctrl.reconcile().await.unwrap();
        assert!(h.registry.instances("default", "web").is_empty());
        assert!(
            h.client
                .get::<ServiceExport>("default", "web")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unresolved_identity_fails_the_pass() {
        let h = Harness::without_identity();
        h.client.create(ServiceExport::new("default", "web")).await.unwrap();
        assert!(controller(&h).reconcile().await.is_err());
        assert_eq!(h.registry.mutation_count(), 0);
    }

    #[test]
    fn test_build_endpoints_matches_ports_by_name() {
        let identity = ClusterIdentity {
            cluster_id: "cluster-a".to_string(),
            cluster_set_id: "set-1".to_string(),
        };
        let export = ServiceExport::new("default", "web");
        let service = local_service("default", "web", &["http", "metrics"]);
        let mut slice = local_slice("default", "web", "web-abc", &["10.0.0.1"], &["http", "grpc"]);
        slice.endpoints.push(SliceEndpoint {
            addresses: vec!["10.0.0.2".to_string()],
            ready: false,
            hostname: Some("web-1".to_string()),
            node_name: None,
        });

        let endpoints = build_endpoints(&export, &service, &[slice], &identity);
        // Only "http" exists on both sides
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|ep| ep.endpoint_port.name == "http"));
        let not_ready = endpoints.iter().find(|ep| ep.ip == "10.0.0.2").unwrap();
        assert!(!not_ready.ready);
        assert_eq!(not_ready.hostname.as_deref(), Some("web-1"));
        assert_eq!(not_ready.cluster_set_id, "set-1");
        assert_eq!(not_ready.service_port.target_port.as_deref(), Some("8080"));
    }
}
