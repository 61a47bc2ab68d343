use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// Cluster-scoped key/value property identifying this cluster.
/// See `pkg_constants::labels::CLUSTER_ID_PROPERTY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterProperty {
    pub meta: ObjectMeta,
    pub value: String,
}

impl ClusterProperty {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            meta: ObjectMeta::new("", name),
            value: value.to_string(),
        }
    }
}

impl Resource for ClusterProperty {
    const KIND: &'static str = "clusterproperties";
    const NAMESPACED: bool = false;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
