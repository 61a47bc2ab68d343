//! Registry-facing model the synchronization engine diffs and publishes.
//!
//! Nothing here is persisted; every pass rebuilds these values either from
//! local objects or from registry responses.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterSetIP,
    Headless,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::ClusterSetIP => write!(f, "ClusterSetIP"),
            ServiceType::Headless => write!(f, "Headless"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ClusterSetIP" => Ok(ServiceType::ClusterSetIP),
            "Headless" => Ok(ServiceType::Headless),
            other => anyhow::bail!("unknown service type '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub port: u16,
    /// Numeric or symbolic target, only meaningful on service ports.
    pub target_port: Option<String>,
    pub protocol: String,
}

impl Port {
    /// Identity used for order-insensitive port set comparisons.
    /// Deliberately leaves out `target_port`.
    pub fn port_id(&self) -> String {
        format!("{}:{}:{}", self.name, self.port, self.protocol)
    }
}

/// One published backend: an address plus the port pair it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub ip: String,
    pub endpoint_port: Port,
    pub service_port: Port,
    pub cluster_id: String,
    pub cluster_set_id: String,
    pub service_type: ServiceType,
    pub ready: bool,
    pub hostname: Option<String>,
    pub nodename: Option<String>,
    /// Milliseconds since the epoch at which the owning export was created.
    pub service_export_creation_timestamp: i64,
    /// Registry attributes not mapped onto a typed field.
    pub attributes: BTreeMap<String, String>,
}

impl Endpoint {
    /// Deterministic endpoint id, stable across passes.
    pub fn endpoint_id(ip: &str, port: u16, protocol: &str) -> String {
        let ip = ip.replace(['.', ':'], "_");
        format!("{}-{}-{}", protocol.to_lowercase(), ip, port)
    }
}

/// A named service and its endpoints, across every cluster in the set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl Service {
    pub fn endpoints_for_cluster(&self, cluster_id: &str) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|ep| ep.cluster_id == cluster_id)
            .cloned()
            .collect()
    }

    /// Distinct cluster ids contributing endpoints, sorted.
    pub fn cluster_ids(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|ep| ep.cluster_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_is_stable_and_protocol_aware() {
        assert_eq!(Endpoint::endpoint_id("10.0.0.1", 80, "TCP"), "tcp-10_0_0_1-80");
        assert_eq!(
            Endpoint::endpoint_id("10.0.0.1", 80, "TCP"),
            Endpoint::endpoint_id("10.0.0.1", 80, "TCP")
        );
        assert_ne!(
            Endpoint::endpoint_id("10.0.0.1", 80, "TCP"),
            Endpoint::endpoint_id("10.0.0.1", 80, "UDP")
        );
        assert_eq!(Endpoint::endpoint_id("fd00::1", 53, "UDP"), "udp-fd00__1-53");
    }

    #[test]
    fn port_id_ignores_target_port() {
        let a = Port {
            name: "http".to_string(),
            port: 80,
            target_port: Some("8080".to_string()),
            protocol: "TCP".to_string(),
        };
        let b = Port {
            target_port: Some("web".to_string()),
            ..a.clone()
        };
        assert_eq!(a.port_id(), b.port_id());
        assert_ne!(a, b);
    }

    #[test]
    fn service_type_parse() {
        assert_eq!("Headless".parse::<ServiceType>().unwrap(), ServiceType::Headless);
        assert!("LoadBalancer".parse::<ServiceType>().is_err());
    }

    #[test]
    fn cluster_partitioning() {
        let ep = |id: &str, cluster: &str| Endpoint {
            id: id.to_string(),
            cluster_id: cluster.to_string(),
            ..Default::default()
        };
        let svc = Service {
            namespace: "default".to_string(),
            name: "web".to_string(),
            endpoints: vec![ep("a", "c2"), ep("b", "c1"), ep("c", "c2")],
        };
        assert_eq!(svc.cluster_ids(), vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(svc.endpoints_for_cluster("c2").len(), 2);
        assert!(svc.endpoints_for_cluster("c3").is_empty());
    }
}
