use anyhow::Context;
use pkg_constants::labels::{CLUSTER_ID_PROPERTY, CLUSTER_SET_ID_PROPERTY};
use pkg_state::ClusterClient;
use pkg_types::cluster::ClusterProperty;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub cluster_id: String,
    pub cluster_set_id: String,
}

/// Resolves this cluster's identity from its ClusterProperty objects.
/// The first successful lookup is kept for the life of the process.
pub struct ClusterUtils {
    client: ClusterClient,
    resolved: RwLock<Option<ClusterIdentity>>,
}

impl ClusterUtils {
    pub fn new(client: ClusterClient) -> Self {
        Self {
            client,
            resolved: RwLock::new(None),
        }
    }

    pub async fn identity(&self) -> anyhow::Result<ClusterIdentity> {
        if let Some(identity) = self.resolved.read().await.as_ref() {
            return Ok(identity.clone());
        }

        let identity = ClusterIdentity {
            cluster_id: self.property(CLUSTER_ID_PROPERTY).await?,
            cluster_set_id: self.property(CLUSTER_SET_ID_PROPERTY).await?,
        };
        *self.resolved.write().await = Some(identity.clone());
        Ok(identity)
    }

    async fn property(&self, name: &str) -> anyhow::Result<String> {
        let prop = self
            .client
            .get::<ClusterProperty>("", name)
            .await?
            .with_context(|| format!("ClusterProperty {} not found", name))?;
        if prop.value.is_empty() {
            anyhow::bail!("ClusterProperty {} has an empty value", name);
        }
        Ok(prop.value)
    }
}
