use serde::{Deserialize, Serialize};

/// Controller configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/mcs-sync
/// cluster-id: cluster-a
/// cluster-set-id: clusterset-1
/// sync-interval-secs: 10
/// endpoint-ttl-secs: 5
/// max-endpoints-per-slice: 100
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "cluster-id")]
    pub cluster_id: Option<String>,
    #[serde(default, alias = "cluster-set-id")]
    pub cluster_set_id: Option<String>,
    #[serde(default, alias = "sync-interval-secs")]
    pub sync_interval_secs: Option<u64>,
    #[serde(default, alias = "namespace-ttl-secs")]
    pub namespace_ttl_secs: Option<u64>,
    #[serde(default, alias = "service-ttl-secs")]
    pub service_ttl_secs: Option<u64>,
    #[serde(default, alias = "endpoint-ttl-secs")]
    pub endpoint_ttl_secs: Option<u64>,
    #[serde(default, alias = "cache-size")]
    pub cache_size: Option<usize>,
    #[serde(default, alias = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, alias = "poll-timeout-secs")]
    pub poll_timeout_secs: Option<u64>,
    #[serde(default, alias = "max-endpoints-per-slice")]
    pub max_endpoints_per_slice: Option<usize>,
    #[serde(default, alias = "json-logs")]
    pub json_logs: Option<bool>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
