use pkg_constants::labels::{
    CONTROLLER_NAME, DERIVED_SERVICE_ANNOTATION, MANAGED_BY_LABEL, SERVICE_IMPORT_LABEL,
    SERVICE_NAME_LABEL, SOURCE_CLUSTER_LABEL,
};
use pkg_registry::ServiceDiscoveryClient;
use pkg_state::ClusterClient;
use pkg_types::endpointslice::EndpointSlice;
use pkg_types::meta::ObjectMeta;
use pkg_types::model::{self, Endpoint, ServiceType};
use pkg_types::namespace::Namespace;
use pkg_types::service::{CLUSTER_IP_NONE, Service, ServicePort};
use pkg_types::serviceimport::{
    ClusterStatus, ServiceImport, ServiceImportSpec, ServiceImportStatus,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ControllerConfig;
use crate::endpointslice_plan::EndpointSlicePlan;
use crate::utils::{
    derived_service_name, derived_service_ports_equal, extract_service_ports, import_type,
    new_derived_service, port_to_service_port, remote_service_type, service_import_ports_equal,
};

/// Mirrors registry services into local ServiceImports.
///
/// For every namespace that exists locally, each registry service with at
/// least one endpoint becomes a ServiceImport, plus one derived Service per
/// source cluster whose EndpointSlices hold that cluster's endpoints.
pub struct CloudMapController {
    client: ClusterClient,
    registry: Arc<ServiceDiscoveryClient>,
    check_interval: Duration,
    max_endpoints_per_slice: usize,
    cancel: CancellationToken,
}

impl CloudMapController {
    pub fn new(
        client: ClusterClient,
        registry: Arc<ServiceDiscoveryClient>,
        config: &ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            registry,
            check_interval: config.import_interval,
            max_endpoints_per_slice: config.max_endpoints_per_slice,
            cancel,
        }
    }

    /// Start the controller loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "CloudMapController started (interval={}s, max_endpoints_per_slice={})",
                self.check_interval.as_secs(),
                self.max_endpoints_per_slice
            );
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("CloudMapController stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.reconcile().await {
                            warn!("CloudMapController reconcile error: {:#}", e);
                        }
                    }
                }
            }
        })
    }

    /// One pass over every local namespace.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        let namespaces = self.client.list::<Namespace>(None).await?;
        for ns in namespaces {
            if let Err(e) = self.reconcile_namespace(&ns.meta.name).await {
                warn!("Failed to import namespace {}: {:#}", ns.meta.name, e);
            }
        }
        Ok(())
    }

    async fn reconcile_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        let services = self.registry.list_services(namespace).await?;

        let mut live = HashSet::new();
        for svc in &services {
            // A service nobody publishes into is the same as no service
            if svc.endpoints.is_empty() {
                continue;
            }
            live.insert(svc.name.as_str());
            if let Err(e) = self.reconcile_service(svc).await {
                warn!("Failed to import service {}/{}: {:#}", namespace, svc.name, e);
            }
        }

        let imports = self.client.list::<ServiceImport>(Some(namespace)).await?;
        for import in imports {
            if is_managed(&import.meta) && !live.contains(import.meta.name.as_str()) {
                self.delete_service_import(&import).await?;
            }
        }
        Ok(())
    }

    async fn reconcile_service(&self, svc: &model::Service) -> anyhow::Result<()> {
        let cluster_ids = svc.cluster_ids();
        let service_type = remote_service_type(&svc.endpoints);

        self.ensure_service_import(svc, &cluster_ids, service_type)
            .await?;

        for cluster_id in &cluster_ids {
            let endpoints = svc.endpoints_for_cluster(cluster_id);
            let derived = self
                .ensure_derived_service(&svc.namespace, &svc.name, cluster_id, &endpoints, service_type)
                .await?;
            self.reconcile_slices(derived, &svc.name, cluster_id, endpoints)
                .await?;
        }

        self.prune_derived_services(&svc.namespace, &svc.name, &cluster_ids)
            .await
    }

    async fn ensure_service_import(
        &self,
        svc: &model::Service,
        cluster_ids: &[String],
        service_type: ServiceType,
    ) -> anyhow::Result<()> {
        let ports = import_ports(&svc.endpoints);
        let type_ = import_type(service_type);
        let clusters: Vec<ClusterStatus> = cluster_ids
            .iter()
            .map(|id| ClusterStatus { cluster: id.clone() })
            .collect();
        let derived: BTreeMap<&str, String> = cluster_ids
            .iter()
            .map(|id| (id.as_str(), derived_service_name(&svc.namespace, &svc.name, id)))
            .collect();
        let annotation = serde_json::to_string(&derived)?;

        let Some(mut import) = self
            .client
            .get::<ServiceImport>(&svc.namespace, &svc.name)
            .await?
        else {
            let mut meta = ObjectMeta::new(&svc.namespace, &svc.name)
                .with_labels([(MANAGED_BY_LABEL, CONTROLLER_NAME)]);
            meta.annotations
                .insert(DERIVED_SERVICE_ANNOTATION.to_string(), annotation);
            self.client
                .create(ServiceImport {
                    meta,
                    spec: ServiceImportSpec {
                        ports,
                        ips: Vec::new(),
                        type_,
                    },
                    status: ServiceImportStatus { clusters },
                })
                .await?;
            info!(
                "Created ServiceImport {}/{} ({} cluster(s))",
                svc.namespace,
                svc.name,
                cluster_ids.len()
            );
            return Ok(());
        };

        let mut changed = false;
        if !service_import_ports_equal(&import.spec.ports, &ports) {
            import.spec.ports = ports;
            changed = true;
        }
        if import.spec.type_ != type_ {
            import.spec.type_ = type_;
            changed = true;
        }
        if import.status.clusters != clusters {
            import.status.clusters = clusters;
            changed = true;
        }
        if import.meta.annotations.get(DERIVED_SERVICE_ANNOTATION) != Some(&annotation) {
            import
                .meta
                .annotations
                .insert(DERIVED_SERVICE_ANNOTATION.to_string(), annotation);
            changed = true;
        }
        if changed {
            self.client.update(&import).await?;
            info!("Updated ServiceImport {}/{}", svc.namespace, svc.name);
        }
        Ok(())
    }

    async fn ensure_derived_service(
        &self,
        namespace: &str,
        import_name: &str,
        cluster_id: &str,
        endpoints: &[Endpoint],
        service_type: ServiceType,
    ) -> anyhow::Result<Service> {
        let ports: Vec<ServicePort> = extract_service_ports(endpoints)
            .iter()
            .map(port_to_service_port)
            .collect();
        let name = derived_service_name(namespace, import_name, cluster_id);

        let Some(mut existing) = self.client.get::<Service>(namespace, &name).await? else {
            let created = self
                .client
                .create(new_derived_service(
                    namespace,
                    import_name,
                    cluster_id,
                    ports,
                    service_type,
                ))
                .await?;
            info!(
                "Created derived service {}/{} for cluster {}",
                namespace, name, cluster_id
            );
            return Ok(created);
        };

        let mut changed = false;
        if !derived_service_ports_equal(&existing.spec.ports, &ports) {
            existing.spec.ports = ports;
            changed = true;
        }
        let headless = service_type == ServiceType::Headless;
        if existing.is_headless() != headless {
            existing.spec.cluster_ip = headless.then(|| CLUSTER_IP_NONE.to_string());
            changed = true;
        }
        if changed {
            self.client.update(&existing).await?;
            info!("Updated derived service {}/{}", namespace, name);
        }
        Ok(existing)
    }

    async fn reconcile_slices(
        &self,
        derived: Service,
        import_name: &str,
        cluster_id: &str,
        endpoints: Vec<Endpoint>,
    ) -> anyhow::Result<()> {
        let namespace = derived.meta.namespace.clone();
        let selector = BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), derived.meta.name.clone())]);
        let current = self
            .client
            .list_by_label::<EndpointSlice>(&namespace, &selector)
            .await?;

        let plan = EndpointSlicePlan {
            max_endpoints_per_slice: self.max_endpoints_per_slice,
            current,
            desired: endpoints,
            service: derived,
            service_import_name: import_name.to_string(),
            cluster_id: cluster_id.to_string(),
        };
        let changes = plan.calculate_changes();
        if changes.is_none() {
            return Ok(());
        }

        for slice in &changes.create {
            self.client.create(slice.clone()).await?;
        }
        for slice in &changes.update {
            self.client.update(slice).await?;
        }
        for slice in &changes.delete {
            self.client
                .delete::<EndpointSlice>(&namespace, &slice.meta.name)
                .await?;
        }
        info!(
            "EndpointSlices of {}/{} reconciled ({} created, {} updated, {} deleted)",
            namespace,
            plan.service.meta.name,
            changes.create.len(),
            changes.update.len(),
            changes.delete.len()
        );
        Ok(())
    }

    /// Remove derived services whose source cluster no longer publishes.
    async fn prune_derived_services(
        &self,
        namespace: &str,
        import_name: &str,
        live_clusters: &[String],
    ) -> anyhow::Result<()> {
        for svc in self.derived_services(namespace, import_name).await? {
            let source = svc.meta.labels.get(SOURCE_CLUSTER_LABEL);
            if !source.is_some_and(|c| live_clusters.contains(c)) {
                self.delete_derived_service(&svc).await?;
            }
        }
        Ok(())
    }

    async fn derived_services(&self, namespace: &str, import_name: &str) -> anyhow::Result<Vec<Service>> {
        let selector = BTreeMap::from([
            (SERVICE_IMPORT_LABEL.to_string(), import_name.to_string()),
            (MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string()),
        ]);
        self.client.list_by_label::<Service>(namespace, &selector).await
    }

    async fn delete_derived_service(&self, svc: &Service) -> anyhow::Result<()> {
        let namespace = &svc.meta.namespace;
        let selector = BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), svc.meta.name.clone())]);
        for slice in self
            .client
            .list_by_label::<EndpointSlice>(namespace, &selector)
            .await?
        {
            self.client
                .delete::<EndpointSlice>(namespace, &slice.meta.name)
                .await?;
        }
        self.client.delete::<Service>(namespace, &svc.meta.name).await?;
        info!("Deleted derived service {}/{}", namespace, svc.meta.name);
        Ok(())
    }

    async fn delete_service_import(&self, import: &ServiceImport) -> anyhow::Result<()> {
        let namespace = &import.meta.namespace;
        for svc in self.derived_services(namespace, &import.meta.name).await? {
            self.delete_derived_service(&svc).await?;
        }
        self.client
            .delete::<ServiceImport>(namespace, &import.meta.name)
            .await?;
        info!("Deleted ServiceImport {}/{}", namespace, import.meta.name);
        Ok(())
    }
}

fn is_managed(meta: &ObjectMeta) -> bool {
    let managed = meta.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(CONTROLLER_NAME);
    if !managed {
        debug!("Leaving unmanaged ServiceImport {}/{}", meta.namespace, meta.name);
    }
    managed
}

/// Service ports of the import, one per name/port/protocol across clusters.
fn import_ports(endpoints: &[Endpoint]) -> Vec<ServicePort> {
    let mut seen = HashSet::new();
    extract_service_ports(endpoints)
        .into_iter()
        .filter(|p| seen.insert(p.port_id()))
        .map(|p| port_to_service_port(&p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use pkg_types::model::Port;
    use pkg_types::serviceimport::ServiceImportType;

    fn controller(h: &Harness) -> CloudMapController {
        CloudMapController::new(
            h.client.clone(),
            h.registry_client.clone(),
            &ControllerConfig::default(),
            CancellationToken::new(),
        )
    }

    fn remote_endpoint(ip: &str, cluster_id: &str, target_port: &str) -> Endpoint {
        Endpoint {
            id: Endpoint::endpoint_id(ip, 8080, "TCP"),
            ip: ip.to_string(),
            endpoint_port: Port {
                name: "http".to_string(),
                port: 8080,
                target_port: None,
                protocol: "TCP".to_string(),
            },
            service_port: Port {
                name: "http".to_string(),
                port: 80,
                target_port: Some(target_port.to_string()),
                protocol: "TCP".to_string(),
            },
            cluster_id: cluster_id.to_string(),
            cluster_set_id: "set-1".to_string(),
            ready: true,
            ..Default::default()
        }
    }

    async fn publish(h: &Harness, name: &str, endpoints: &[Endpoint]) {
        if h.registry_client.get_service("default", name).await.unwrap().is_none() {
            h.registry_client.create_service("default", name).await.unwrap();
        }
        h.registry_client
            .register_endpoints("default", name, endpoints)
            .await
            .unwrap();
    }

    async fn importer() -> Harness {
        let h = Harness::new("cluster-c").await;
        h.client.create(Namespace::new("default")).await.unwrap();
        h
    }

    async fn slices_of(h: &Harness, derived: &str) -> Vec<EndpointSlice> {
        let selector = BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), derived.to_string())]);
        h.client
            .list_by_label::<EndpointSlice>("default", &selector)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_import_per_cluster_and_quiet_second_pass() {
        let h = importer().await;
        publish(
            &h,
            "web",
            &[
                remote_endpoint("10.0.0.1", "cluster-a", "8080"),
                remote_endpoint("10.1.0.1", "cluster-b", "8080"),
                remote_endpoint("10.1.0.2", "cluster-b", "8080"),
            ],
        )
        .await;

        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        let import: ServiceImport = h.client.get("default", "web").await.unwrap().unwrap();
        assert_eq!(import.spec.type_, ServiceImportType::ClusterSetIP);
        assert_eq!(import.spec.ports.len(), 1);
        assert_eq!(
            import.status.clusters,
            vec![
                ClusterStatus { cluster: "cluster-a".to_string() },
                ClusterStatus { cluster: "cluster-b".to_string() },
            ]
        );
        let derived: BTreeMap<String, String> =
            serde_json::from_str(&import.meta.annotations[DERIVED_SERVICE_ANNOTATION]).unwrap();
        assert_eq!(derived.len(), 2);

        let b_name = derived_service_name("default", "web", "cluster-b");
        assert_eq!(derived["cluster-b"], b_name);
        let b_svc: Service = h.client.get("default", &b_name).await.unwrap().unwrap();
        assert_eq!(b_svc.spec.ports[0].target_port.as_deref(), Some("8080"));
        let b_slices = slices_of(&h, &b_name).await;
        assert_eq!(b_slices.len(), 1);
        assert_eq!(b_slices[0].endpoints.len(), 2);

        let seq = h.client.events().current_seq();
        ctrl.reconcile().await.unwrap();
        assert_eq!(h.client.events().current_seq(), seq);
    }

    #[tokio::test]
    async fn test_target_port_change_only_touches_derived_service() {
        let h = importer().await;
        publish(&h, "web", &[remote_endpoint("10.0.0.1", "cluster-a", "8080")]).await;
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();
        let before: ServiceImport = h.client.get("default", "web").await.unwrap().unwrap();

        publish(&h, "web", &[remote_endpoint("10.0.0.1", "cluster-a", "9090")]).await;
        ctrl.reconcile().await.unwrap();

        let after: ServiceImport = h.client.get("default", "web").await.unwrap().unwrap();
        assert_eq!(after.spec.ports, before.spec.ports);
        let derived: Service = h
            .client
            .get("default", &derived_service_name("default", "web", "cluster-a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(derived.spec.ports[0].target_port.as_deref(), Some("9090"));
    }

    #[tokio::test]
    async fn test_departed_cluster_is_pruned() {
        let h = importer().await;
        let b_endpoint = remote_endpoint("10.1.0.1", "cluster-b", "8080");
        publish(
            &h,
            "web",
            &[remote_endpoint("10.0.0.1", "cluster-a", "8080"), b_endpoint.clone()],
        )
        .await;
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        h.registry_client
            .delete_endpoints("default", "web", &[b_endpoint])
            .await
            .unwrap();
        ctrl.reconcile().await.unwrap();

        let b_name = derived_service_name("default", "web", "cluster-b");
        assert!(h.client.get::<Service>("default", &b_name).await.unwrap().is_none());
        assert!(slices_of(&h, &b_name).await.is_empty());
        let import: ServiceImport = h.client.get("default", "web").await.unwrap().unwrap();
        assert_eq!(import.status.clusters.len(), 1);
    }

    #[tokio::test]
    async fn test_emptied_service_removes_import() {
        let h = importer().await;
        let endpoint = remote_endpoint("10.0.0.1", "cluster-a", "8080");
        publish(&h, "web", std::slice::from_ref(&endpoint)).await;
        let ctrl = controller(&h);
        ctrl.reconcile().await.unwrap();

        h.registry_client
            .delete_endpoints("default", "web", &[endpoint])
            .await
            .unwrap();
        ctrl.reconcile().await.unwrap();

        assert!(h.client.get::<ServiceImport>("default", "web").await.unwrap().is_none());
        let derived = derived_service_name("default", "web", "cluster-a");
        assert!(h.client.get::<Service>("default", &derived).await.unwrap().is_none());
        assert!(slices_of(&h, &derived).await.is_empty());
    }

    #[tokio::test]
    async fn test_unmanaged_import_is_left_alone() {
        let h = importer().await;
        h.client
            .create(ServiceImport {
                meta: ObjectMeta::new("default", "manual"),
                spec: ServiceImportSpec::default(),
                status: ServiceImportStatus::default(),
            })
            .await
            .unwrap();

        controller(&h).reconcile().await.unwrap();
        assert!(h.client.get::<ServiceImport>("default", "manual").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_only_local_namespaces_are_imported() {
        let h = Harness::new("cluster-c").await;
        publish(&h, "web", &[remote_endpoint("10.0.0.1", "cluster-a", "8080")]).await;

        controller(&h).reconcile().await.unwrap();
        assert!(h.client.list::<ServiceImport>(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_cluster_is_split_across_slices() {
        let h = importer().await;
        let endpoints: Vec<Endpoint> = (0..5)
            .map(|i| remote_endpoint(&format!("10.0.0.{}", i + 1), "cluster-a", "8080"))
            .collect();
        publish(&h, "web", &endpoints).await;

        let config = ControllerConfig {
            max_endpoints_per_slice: 2,
            ..Default::default()
        };
        let ctrl = CloudMapController::new(
            h.client.clone(),
            h.registry_client.clone(),
            &config,
            CancellationToken::new(),
        );
        ctrl.reconcile().await.unwrap();

        let slices = slices_of(&h, &derived_service_name("default", "web", "cluster-a")).await;
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.endpoints.len() <= 2));
    }
}
