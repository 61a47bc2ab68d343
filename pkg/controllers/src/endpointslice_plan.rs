use pkg_types::endpointslice::{AddressType, EndpointPort, EndpointSlice, SliceEndpoint};
use pkg_types::model::Endpoint;
use pkg_types::service::Service;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::utils::{
    endpoint_ports_equal, extract_endpoint_ports, new_endpoint_slice, port_to_endpoint_port,
    slice_endpoint,
};

/// Packs one derived Service's desired endpoints into bounded EndpointSlices,
/// reusing existing slices wherever possible.
#[derive(Debug, Clone)]
pub struct EndpointSlicePlan {
    pub max_endpoints_per_slice: usize,
    /// Slices currently owned by `service`.
    pub current: Vec<EndpointSlice>,
    pub desired: Vec<Endpoint>,
    pub service: Service,
    pub service_import_name: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointSliceChanges {
    pub create: Vec<EndpointSlice>,
    pub update: Vec<EndpointSlice>,
    pub delete: Vec<EndpointSlice>,
    pub unmodified: Vec<EndpointSlice>,
}

impl EndpointSliceChanges {
    pub fn is_none(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

impl EndpointSlicePlan {
    /// Trim every current slice down to the endpoints still desired, then
    /// place what is left: first into slices already being updated, then
    /// into slices that would otherwise be deleted, then into one unmodified
    /// slice with room for all of it, and only then into new slices.
    pub fn calculate_changes(&self) -> EndpointSliceChanges {
        let capacity = self.max_endpoints_per_slice.max(1);
        let desired_ports: Vec<EndpointPort> = extract_endpoint_ports(&self.desired)
            .iter()
            .map(port_to_endpoint_port)
            .collect();

        // One slice endpoint per address; several ports share it
        let mut desired: Vec<SliceEndpoint> = Vec::new();
        let mut by_address: HashMap<&str, usize> = HashMap::new();
        for ep in &self.desired {
            if !by_address.contains_key(ep.ip.as_str()) {
                by_address.insert(ep.ip.as_str(), desired.len());
                desired.push(slice_endpoint(ep));
            }
        }

        let mut changes = EndpointSliceChanges::default();
        let mut placed: HashSet<String> = HashSet::new();

        for slice in &self.current {
            let mut kept = Vec::new();
            let mut modified = false;
            for existing in &slice.endpoints {
                let wanted = existing
                    .address()
                    .and_then(|addr| by_address.get(addr))
                    .map(|&i| &desired[i]);
                match wanted {
                    Some(want)
                        if kept.len() < capacity && placed.insert(want.addresses[0].clone()) =>
                    {
                        if want != existing {
                            modified = true;
                        }
                        kept.push(want.clone());
                    }
                    // Gone, held by an earlier slice, or past capacity and
                    // left for the fill pass
                    _ => modified = true,
                }
            }

            if kept.is_empty() {
                changes.delete.push(slice.clone());
                continue;
            }

            let mut slice = slice.clone();
            slice.endpoints = kept;
            if !endpoint_ports_equal(&slice.ports, &desired_ports) {
                slice.ports = desired_ports.clone();
                modified = true;
            }
            if modified {
                changes.update.push(slice);
            } else {
                changes.unmodified.push(slice);
            }
        }

        let mut pending: VecDeque<SliceEndpoint> = desired
            .into_iter()
            .filter(|ep| !placed.contains(&ep.addresses[0]))
            .collect();

        while !pending.is_empty() {
            if let Some(slice) = changes
                .update
                .iter_mut()
                .find(|s| s.endpoints.len() < capacity)
            {
                fill(slice, &mut pending, capacity);
                continue;
            }

            if let Some(mut slice) = changes.delete.pop() {
                slice.endpoints.clear();
                slice.ports = desired_ports.clone();
                slice.address_type = address_type_of(&pending);
                fill(&mut slice, &mut pending, capacity);
                changes.update.push(slice);
                continue;
            }

            if let Some(pos) = changes
                .unmodified
                .iter()
                .position(|s| capacity.saturating_sub(s.endpoints.len()) >= pending.len())
            {
                let mut slice = changes.unmodified.remove(pos);
                fill(&mut slice, &mut pending, capacity);
                changes.update.push(slice);
                continue;
            }

            let mut slice = new_endpoint_slice(
                &self.service,
                &self.service_import_name,
                &self.cluster_id,
                address_type_of(&pending),
            );
            slice.ports = desired_ports.clone();
            fill(&mut slice, &mut pending, capacity);
            changes.create.push(slice);
        }

        changes
    }
}

fn fill(slice: &mut EndpointSlice, pending: &mut VecDeque<SliceEndpoint>, capacity: usize) {
    let room = capacity.saturating_sub(slice.endpoints.len());
    let take = room.min(pending.len());
    slice.endpoints.extend(pending.drain(..take));
}

fn address_type_of(pending: &VecDeque<SliceEndpoint>) -> AddressType {
    pending
        .front()
        .and_then(|ep| ep.address())
        .map(AddressType::of)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::new_derived_service;
    use pkg_types::model::{Port, ServiceType};

    fn port() -> Port {
        Port {
            name: "http".to_string(),
            port: 8080,
            target_port: None,
            protocol: "TCP".to_string(),
        }
    }

    fn endpoint(i: usize) -> Endpoint {
        let ip = format!("10.0.{}.{}", i / 250, i % 250 + 1);
        Endpoint {
            id: Endpoint::endpoint_id(&ip, 8080, "TCP"),
            ip,
            endpoint_port: port(),
            service_port: port(),
            cluster_id: "cluster-a".to_string(),
            cluster_set_id: "set".to_string(),
            ready: true,
            ..Default::default()
        }
    }

    fn plan(current: Vec<EndpointSlice>, desired: Vec<Endpoint>, capacity: usize) -> EndpointSlicePlan {
        EndpointSlicePlan {
            max_endpoints_per_slice: capacity,
            current,
            desired,
            service: new_derived_service("default", "web", "cluster-a", vec![], ServiceType::ClusterSetIP),
            service_import_name: "web".to_string(),
            cluster_id: "cluster-a".to_string(),
        }
    }

    fn existing_slice(endpoints: &[Endpoint]) -> EndpointSlice {
        let p = plan(vec![], vec![], 100);
        let mut slice = new_endpoint_slice(&p.service, "web", "cluster-a", AddressType::IPv4);
        slice.endpoints = endpoints.iter().map(slice_endpoint).collect();
        slice.ports = vec![port_to_endpoint_port(&port())];
        slice
    }

    #[test]
    fn test_packing_from_scratch() {
        let desired: Vec<Endpoint> = (0..43).map(endpoint).collect();
        let changes = plan(vec![], desired, 2).calculate_changes();

        assert_eq!(changes.create.len(), 22);
        assert!(changes.create.iter().all(|s| s.endpoints.len() <= 2));
        let total: usize = changes.create.iter().map(|s| s.endpoints.len()).sum();
        assert_eq!(total, 43);
        assert!(changes.update.is_empty() && changes.delete.is_empty());
        assert_eq!(changes.create[0].ports, vec![port_to_endpoint_port(&port())]);
    }

    #[test]
    fn test_unmodified_slice_with_room_is_extended() {
        let current = vec![existing_slice(&[endpoint(0)])];
        let desired: Vec<Endpoint> = (0..6).map(endpoint).collect();

        let changes = plan(current, desired, 100).calculate_changes();
        assert!(changes.create.is_empty());
        assert_eq!(changes.update.len(), 1);
        assert_eq!(changes.update[0].endpoints.len(), 6);
    }

    #[test]
    fn test_full_slice_is_left_alone() {
        let first: Vec<Endpoint> = (0..3).map(endpoint).collect();
        let current = vec![existing_slice(&first)];
        let desired: Vec<Endpoint> = (0..5).map(endpoint).collect();

        let changes = plan(current, desired, 3).calculate_changes();
        assert_eq!(changes.unmodified.len(), 1);
        assert_eq!(changes.create.len(), 1);
        assert_eq!(changes.create[0].endpoints.len(), 2);
    }

    #[test]
    fn test_unchanged_slices_are_unmodified() {
        let eps: Vec<Endpoint> = (0..4).map(endpoint).collect();
        let changes = plan(vec![existing_slice(&eps)], eps, 100).calculate_changes();
        assert!(changes.is_none());
        assert_eq!(changes.unmodified.len(), 1);
    }

    #[test]
    fn test_readiness_change_updates_slice() {
        let eps: Vec<Endpoint> = (0..2).map(endpoint).collect();
        let mut desired = eps.clone();
        desired[1].ready = false;

        let changes = plan(vec![existing_slice(&eps)], desired, 100).calculate_changes();
        assert_eq!(changes.update.len(), 1);
        assert!(!changes.update[0].endpoints[1].ready);
    }

    #[test]
    fn test_emptied_slices_are_deleted() {
        let eps: Vec<Endpoint> = (0..2).map(endpoint).collect();
        let changes = plan(vec![existing_slice(&eps)], vec![], 100).calculate_changes();
        assert_eq!(changes.delete.len(), 1);
        assert!(changes.create.is_empty() && changes.update.is_empty());
    }

    #[test]
    fn test_emptied_slice_is_reused_before_creating() {
        let current = vec![existing_slice(&[endpoint(0)])];
        let changes = plan(current.clone(), vec![endpoint(1)], 100).calculate_changes();

        assert!(changes.create.is_empty() && changes.delete.is_empty());
        assert_eq!(changes.update.len(), 1);
        assert_eq!(changes.update[0].meta.name, current[0].meta.name);
        assert_eq!(changes.update[0].endpoints[0].address(), Some("10.0.0.2"));
    }

    #[test]
    fn test_port_change_updates_slice() {
        let eps: Vec<Endpoint> = (0..2).map(endpoint).collect();
        let mut slice = existing_slice(&eps);
        slice.ports[0].port = 9090;

        let changes = plan(vec![slice], eps, 100).calculate_changes();
        assert_eq!(changes.update.len(), 1);
        assert_eq!(changes.update[0].ports[0].port, 8080);
    }

    #[test]
    fn test_oversized_slice_is_split() {
        let eps: Vec<Endpoint> = (0..5).map(endpoint).collect();
        let current = vec![existing_slice(&eps)];

        let changes = plan(current.clone(), eps, 2).calculate_changes();
        assert!(changes.unmodified.is_empty());
        assert_eq!(changes.update.len(), 1);
        assert_eq!(changes.update[0].meta.name, current[0].meta.name);

        let sizes: Vec<usize> = changes
            .update
            .iter()
            .chain(changes.create.iter())
            .map(|s| s.endpoints.len())
            .collect();
        assert!(sizes.iter().all(|&n| n <= 2), "sizes {:?}", sizes);
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert_eq!(changes.create.len(), 2);
    }

    #[test]
    fn test_duplicate_address_across_slices() {
        let eps: Vec<Endpoint> = (0..2).map(endpoint).collect();
        let current = vec![existing_slice(&eps), existing_slice(&eps[..1])];

        let changes = plan(current, eps, 100).calculate_changes();
        assert_eq!(changes.unmodified.len(), 1);
        assert_eq!(changes.delete.len(), 1);
    }
}
