use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// `cluster_ip` value marking a headless service.
pub const CLUSTER_IP_NONE: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
    /// Numeric or symbolic (named container port) target.
    #[serde(default)]
    pub target_port: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

pub(crate) fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub ports: Vec<ServicePort>,
    /// `None` until allocated; [`CLUSTER_IP_NONE`] for headless services.
    #[serde(default)]
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub spec: ServiceSpec,
}

impl Service {
    pub fn is_headless(&self) -> bool {
        self.spec.cluster_ip.as_deref() == Some(CLUSTER_IP_NONE)
    }
}

impl Resource for Service {
    const KIND: &'static str = "services";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
