use dashmap::DashMap;
use pkg_constants::sync::*;
use pkg_types::model::Endpoint;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::sdk::Namespace;

// Keys are split on '/', which never appears in a namespace or service name,
// so no two entry classes can share a key.
const NAMESPACE_MAP_KEY: &str = "ns-map";

fn service_id_map_key(namespace: &str) -> String {
    format!("svc-map/{}", namespace)
}

fn endpoints_key(namespace: &str, service: &str) -> String {
    format!("endpoints/{}/{}", namespace, service)
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ns_ttl: Duration,
    pub svc_ttl: Duration,
    pub endpoint_ttl: Duration,
    /// Maximum number of entries.
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ns_ttl: Duration::from_secs(NAMESPACE_CACHE_TTL_SECS),
            svc_ttl: Duration::from_secs(SERVICE_CACHE_TTL_SECS),
            endpoint_ttl: Duration::from_secs(ENDPOINT_CACHE_TTL_SECS),
            size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// A cached value. Each key class stores exactly one variant.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// Namespace name → namespace.
    NamespaceMap(HashMap<String, Namespace>),
    /// Service name → service id, for one namespace.
    ServiceIdMap(HashMap<String, String>),
    Endpoints(Vec<Endpoint>),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Instant,
}

/// TTL- and size-bounded cache shielding the registry from repeated reads.
///
/// Backed by a sharded map so passes touching unrelated keys do not
/// contend. There are no cross-key transactions.
pub struct RegistryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
}

impl RegistryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Live value for `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|e| (e.value.clone(), e.expires_at > now));
        match hit {
            Some((value, true)) => Some(value),
            Some((_, false)) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: CacheValue, ttl: Duration) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.config.size {
            self.make_room();
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the one closest to expiry if still full.
    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        if self.entries.len() < self.config.size {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.expires_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Read `key` as one variant. A different variant means the entry is
    /// corrupt: it is evicted and reported as a miss.
    fn get_typed<T>(&self, key: &str, extract: impl FnOnce(CacheValue) -> Option<T>) -> Option<T> {
        let value = self.get(key)?;
        match extract(value) {
            Some(v) => {
                debug!("Registry cache hit: {}", key);
                Some(v)
            }
            None => {
                warn!("Registry cache entry {} holds an unexpected type, evicting", key);
                self.evict(key);
                None
            }
        }
    }

    pub fn get_namespace_map(&self) -> Option<HashMap<String, Namespace>> {
        self.get_typed(NAMESPACE_MAP_KEY, |v| match v {
            CacheValue::NamespaceMap(m) => Some(m),
            _ => None,
        })
    }

    pub fn cache_namespace_map(&self, namespaces: HashMap<String, Namespace>) {
        self.put(
            NAMESPACE_MAP_KEY,
            CacheValue::NamespaceMap(namespaces),
            self.config.ns_ttl,
        );
    }

    pub fn evict_namespace_map(&self) {
        self.evict(NAMESPACE_MAP_KEY);
    }

    pub fn get_service_id_map(&self, namespace: &str) -> Option<HashMap<String, String>> {
        self.get_typed(&service_id_map_key(namespace), |v| match v {
            CacheValue::ServiceIdMap(m) => Some(m),
            _ => None,
        })
    }

    pub fn cache_service_id_map(&self, namespace: &str, service_ids: HashMap<String, String>) {
        self.put(
            &service_id_map_key(namespace),
            CacheValue::ServiceIdMap(service_ids),
            self.config.svc_ttl,
        );
    }

    pub fn evict_service_id_map(&self, namespace: &str) {
        self.evict(&service_id_map_key(namespace));
    }

    pub fn get_endpoints(&self, namespace: &str, service: &str) -> Option<Vec<Endpoint>> {
        self.get_typed(&endpoints_key(namespace, service), |v| match v {
            CacheValue::Endpoints(eps) => Some(eps),
            _ => None,
        })
    }

    pub fn cache_endpoints(&self, namespace: &str, service: &str, endpoints: Vec<Endpoint>) {
        self.put(
            &endpoints_key(namespace, service),
            CacheValue::Endpoints(endpoints),
            self.config.endpoint_ttl,
        );
    }

    pub fn evict_endpoints(&self, namespace: &str, service: &str) {
        self.evict(&endpoints_key(namespace, service));
    }
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
