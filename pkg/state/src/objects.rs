use anyhow::{Context, bail};
use chrono::Utc;
use pkg_types::meta::Resource;
use pkg_types::validate::validate_name;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::memory::MemoryStore;
use crate::store::KeyValueStore;
use crate::watch::{EventLog, EventType};

/// Typed access to local objects, with Kubernetes-style deletion:
/// deleting an object that still carries finalizers only stamps its
/// `deletion_timestamp`; it is removed once an update clears the last one.
#[derive(Clone)]
pub struct ClusterClient {
    store: Arc<dyn KeyValueStore>,
    events: EventLog,
}

/// Key prefix under which every object of kind `T` is stored.
pub fn kind_prefix<T: Resource>() -> String {
    format!("/registry/{}/", T::KIND)
}

fn object_key<T: Resource>(namespace: &str, name: &str) -> String {
    if T::NAMESPACED {
        format!("/registry/{}/{}/{}", T::KIND, namespace, name)
    } else {
        format!("/registry/{}/{}", T::KIND, name)
    }
}

impl ClusterClient {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            events: EventLog::default(),
        }
    }

    /// Client over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Fetch one object, `None` if absent.
    pub async fn get<T: Resource>(&self, namespace: &str, name: &str) -> anyhow::Result<Option<T>> {
        let key = object_key::<T>(namespace, name);
        match self.store.get(&key).await? {
            Some(data) => {
                let obj = serde_json::from_slice(&data)
                    .with_context(|| format!("decoding {}", key))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    /// List objects of kind `T`, in one namespace or across all of them.
    /// Entries that fail to decode are skipped.
    pub async fn list<T: Resource>(&self, namespace: Option<&str>) -> anyhow::Result<Vec<T>> {
        let prefix = match namespace {
            Some(ns) if T::NAMESPACED => format!("{}{}/", kind_prefix::<T>(), ns),
            _ => kind_prefix::<T>(),
        };
        let entries = self.store.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_slice(&value) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    warn!("Skipping undecodable object {}: {}", key, e);
                    None
                }
            })
            .collect())
    }

    /// List objects in `namespace` carrying every label in `selector`.
    pub async fn list_by_label<T: Resource>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<T>> {
        Ok(self
            .list::<T>(Some(namespace))
            .await?
            .into_iter()
            .filter(|obj| obj.meta().matches_labels(selector))
            .collect())
    }

    /// Create a new object. Fails if one with the same name exists.
    pub async fn create<T: Resource>(&self, mut obj: T) -> anyhow::Result<T> {
        validate_name(obj.name())?;
        let key = object_key::<T>(obj.namespace(), obj.name());
        if self.store.get(&key).await?.is_some() {
            bail!("{} {} already exists", T::KIND, key);
        }
        let meta = obj.meta_mut();
        meta.uid = Uuid::new_v4().to_string();
        meta.created_at = Utc::now();
        meta.deletion_timestamp = None;
        self.write(&key, &obj).await?;
        debug!("Created {}", key);
        Ok(obj)
    }

    /// Replace an existing object. Removes it instead when it is being
    /// deleted and has no finalizers left.
    pub async fn update<T: Resource>(&self, obj: &T) -> anyhow::Result<()> {
        let key = object_key::<T>(obj.namespace(), obj.name());
        if self.store.get(&key).await?.is_none() {
            bail!("{} {} not found", T::KIND, key);
        }
        if obj.meta().is_deleting() && obj.meta().finalizers.is_empty() {
            return self.remove(&key).await;
        }
        self.write(&key, obj).await
    }

    /// Request deletion. Returns `false` if the object did not exist.
    pub async fn delete<T: Resource>(&self, namespace: &str, name: &str) -> anyhow::Result<bool> {
        let Some(mut obj) = self.get::<T>(namespace, name).await? else {
            return Ok(false);
        };
        let key = object_key::<T>(namespace, name);
        if obj.meta().finalizers.is_empty() {
            self.remove(&key).await?;
        } else if !obj.meta().is_deleting() {
            obj.meta_mut().deletion_timestamp = Some(Utc::now());
            self.write(&key, &obj).await?;
            debug!("Marked {} for deletion", key);
        }
        Ok(true)
    }

    async fn write<T: Resource>(&self, key: &str, obj: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(obj)?;
        self.store.put(key, &data).await?;
        self.events.emit(EventType::Put, key.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.store.delete(key).await?;
        self.events.emit(EventType::Delete, key.to_string());
        debug!("Deleted {}", key);
        Ok(())
    }
}
