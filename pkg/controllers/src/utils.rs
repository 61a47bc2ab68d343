use pkg_constants::labels::{
    CONTROLLER_NAME, DERIVED_SERVICE_PREFIX, MANAGED_BY_LABEL, SERVICE_IMPORT_LABEL,
    SERVICE_NAME_LABEL, SOURCE_CLUSTER_LABEL,
};
use pkg_types::endpointslice::{AddressType, EndpointPort, EndpointSlice, SliceEndpoint};
use pkg_types::meta::ObjectMeta;
use pkg_types::model::{Endpoint, Port, ServiceType};
use pkg_types::service::{CLUSTER_IP_NONE, Service, ServicePort, ServiceSpec};
use pkg_types::serviceimport::ServiceImportType;
use std::collections::BTreeSet;
use uuid::Uuid;

pub fn service_port_to_port(port: &ServicePort) -> Port {
    Port {
        name: port.name.clone(),
        port: port.port,
        target_port: port.target_port.clone(),
        protocol: port.protocol.clone(),
    }
}

pub fn port_to_service_port(port: &Port) -> ServicePort {
    ServicePort {
        name: port.name.clone(),
        port: port.port,
        target_port: port.target_port.clone(),
        protocol: port.protocol.clone(),
    }
}

pub fn endpoint_port_to_port(port: &EndpointPort) -> Port {
    Port {
        name: port.name.clone(),
        port: port.port,
        target_port: None,
        protocol: port.protocol.clone(),
    }
}

pub fn port_to_endpoint_port(port: &Port) -> EndpointPort {
    EndpointPort {
        name: port.name.clone(),
        port: port.port,
        protocol: port.protocol.clone(),
    }
}

fn unique_ports<'a>(ports: impl Iterator<Item = &'a Port>) -> Vec<Port> {
    let mut out: Vec<Port> = Vec::new();
    for port in ports {
        if !out.contains(port) {
            out.push(port.clone());
        }
    }
    out
}

/// Distinct service ports across `endpoints`, in first-seen order.
pub fn extract_service_ports(endpoints: &[Endpoint]) -> Vec<Port> {
    unique_ports(endpoints.iter().map(|ep| &ep.service_port))
}

/// Distinct endpoint ports across `endpoints`, in first-seen order.
pub fn extract_endpoint_ports(endpoints: &[Endpoint]) -> Vec<Port> {
    unique_ports(endpoints.iter().map(|ep| &ep.endpoint_port))
}

/// Port equality for ServiceImports: order-insensitive, `target_port` ignored.
pub fn service_import_ports_equal(a: &[ServicePort], b: &[ServicePort]) -> bool {
    let ids = |ports: &[ServicePort]| {
        ports
            .iter()
            .map(|p| service_port_to_port(p).port_id())
            .collect::<BTreeSet<_>>()
    };
    a.len() == b.len() && ids(a) == ids(b)
}

/// Port equality for derived Services: order-insensitive, every field
/// including `target_port` must match.
pub fn derived_service_ports_equal(a: &[ServicePort], b: &[ServicePort]) -> bool {
    let keyed = |ports: &[ServicePort]| {
        let mut keys: Vec<_> = ports
            .iter()
            .map(|p| (p.name.clone(), p.port, p.protocol.clone(), p.target_port.clone()))
            .collect();
        keys.sort();
        keys
    };
    keyed(a) == keyed(b)
}

/// Endpoint-port equality for slices, order-insensitive.
pub fn endpoint_ports_equal(a: &[EndpointPort], b: &[EndpointPort]) -> bool {
    let keyed = |ports: &[EndpointPort]| {
        let mut keys: Vec<_> = ports
            .iter()
            .map(|p| (p.name.clone(), p.port, p.protocol.clone()))
            .collect();
        keys.sort();
        keys
    };
    keyed(a) == keyed(b)
}

/// Name of the local Service that carries one cluster's share of an import.
/// Stable for a given namespace, import and cluster.
pub fn derived_service_name(namespace: &str, name: &str, cluster_id: &str) -> String {
    let mut hash: u64 = 0;
    for byte in format!("{}/{}/{}", namespace, name, cluster_id).bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u64);
    }
    format!("{}{:010x}", DERIVED_SERVICE_PREFIX, hash & 0xff_ffff_ffff)
}

pub fn import_type(service_type: ServiceType) -> ServiceImportType {
    match service_type {
        ServiceType::ClusterSetIP => ServiceImportType::ClusterSetIP,
        ServiceType::Headless => ServiceImportType::Headless,
    }
}

/// Service type advertised by a set of remote endpoints. All endpoints of an
/// export agree; an empty set falls back to the default.
pub fn remote_service_type(endpoints: &[Endpoint]) -> ServiceType {
    endpoints
        .first()
        .map(|ep| ep.service_type)
        .unwrap_or_default()
}

/// Local Service holding one source cluster's endpoints for an import.
pub fn new_derived_service(
    namespace: &str,
    import_name: &str,
    cluster_id: &str,
    ports: Vec<ServicePort>,
    service_type: ServiceType,
) -> Service {
    let name = derived_service_name(namespace, import_name, cluster_id);
    let mut meta = ObjectMeta::new(namespace, &name).with_labels([
        (SERVICE_IMPORT_LABEL, import_name),
        (SOURCE_CLUSTER_LABEL, cluster_id),
        (MANAGED_BY_LABEL, CONTROLLER_NAME),
    ]);
    meta.owner_ref = Some(import_name.to_string());
    Service {
        meta,
        spec: ServiceSpec {
            ports,
            cluster_ip: match service_type {
                ServiceType::Headless => Some(CLUSTER_IP_NONE.to_string()),
                ServiceType::ClusterSetIP => None,
            },
        },
    }
}

/// Empty slice owned by a derived Service.
pub fn new_endpoint_slice(
    service: &Service,
    import_name: &str,
    cluster_id: &str,
    address_type: AddressType,
) -> EndpointSlice {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("{}-{}", service.meta.name, &suffix[..8]);
    let mut meta = ObjectMeta::new(&service.meta.namespace, &name).with_labels([
        (SERVICE_NAME_LABEL, service.meta.name.as_str()),
        (SERVICE_IMPORT_LABEL, import_name),
        (SOURCE_CLUSTER_LABEL, cluster_id),
        (MANAGED_BY_LABEL, CONTROLLER_NAME),
    ]);
    meta.owner_ref = Some(service.meta.name.clone());
    EndpointSlice {
        meta,
        address_type,
        endpoints: Vec::new(),
        ports: Vec::new(),
    }
}

pub fn slice_endpoint(ep: &Endpoint) -> SliceEndpoint {
    SliceEndpoint {
        addresses: vec![ep.ip.clone()],
        ready: ep.ready,
        hostname: ep.hostname.clone(),
        node_name: ep.nodename.clone(),
    }
}
