use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};
use crate::service::ServicePort;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceImportType {
    #[default]
    ClusterSetIP,
    Headless,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceImportSpec {
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default, rename = "type")]
    pub type_: ServiceImportType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceImportStatus {
    #[serde(default)]
    pub clusters: Vec<ClusterStatus>,
}

/// Local representation of a service exported from any cluster in the set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceImport {
    pub meta: ObjectMeta,
    pub spec: ServiceImportSpec,
    #[serde(default)]
    pub status: ServiceImportStatus,
}

impl Resource for ServiceImport {
    const KIND: &'static str = "serviceimports";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
