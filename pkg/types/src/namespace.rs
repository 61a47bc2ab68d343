use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

/// A local namespace. The import controller only materializes remote
/// services into namespaces that exist locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub meta: ObjectMeta,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            meta: ObjectMeta::new("", name),
        }
    }
}

impl Resource for Namespace {
    const KIND: &'static str = "namespaces";
    const NAMESPACED: bool = false;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
