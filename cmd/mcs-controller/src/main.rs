use clap::Parser;
use pkg_constants::labels::{CLUSTER_ID_PROPERTY, CLUSTER_SET_ID_PROPERTY};
use pkg_constants::paths::{DEFAULT_CONTROLLER_CONFIG, DEFAULT_DATA_DIR};
use pkg_constants::sync::{
    DEFAULT_CACHE_SIZE, ENDPOINT_CACHE_TTL_SECS, EXPORT_SYNC_INTERVAL_SECS,
    MAX_ENDPOINTS_PER_SLICE, NAMESPACE_CACHE_TTL_SECS, OPERATION_POLL_INTERVAL_SECS,
    OPERATION_POLL_TIMEOUT_SECS, SERVICE_CACHE_TTL_SECS,
};
use pkg_controllers::cluster::ClusterUtils;
use pkg_controllers::{CloudMapController, ControllerConfig, ServiceExportController};
use pkg_registry::ServiceDiscoveryClient;
use pkg_registry::cache::CacheConfig;
use pkg_registry::memory::MemoryRegistry;
use pkg_registry::operation_poller::PollerConfig;
use pkg_registry::rate_limiter::RateLimiter;
use pkg_state::ClusterClient;
use pkg_state::client::StateStore;
use pkg_types::cluster::ClusterProperty;
use pkg_types::config::{ControllerConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug, Default)]
#[command(
    name = "mcs-controller",
    about = "Synchronizes exported services with a multi-cluster service registry"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONTROLLER_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// This cluster's id (seeds the cluster id ClusterProperty)
    #[arg(long)]
    cluster_id: Option<String>,

    /// Cluster set id (seeds the clusterset ClusterProperty)
    #[arg(long)]
    cluster_set_id: Option<String>,

    /// Seconds between reconciliation passes
    #[arg(long)]
    sync_interval_secs: Option<u64>,

    #[arg(long)]
    namespace_ttl_secs: Option<u64>,

    #[arg(long)]
    service_ttl_secs: Option<u64>,

    #[arg(long)]
    endpoint_ttl_secs: Option<u64>,

    /// Maximum registry cache entries
    #[arg(long)]
    cache_size: Option<usize>,

    #[arg(long)]
    poll_interval_secs: Option<u64>,

    #[arg(long)]
    poll_timeout_secs: Option<u64>,

    #[arg(long)]
    max_endpoints_per_slice: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    data_dir: String,
    cluster_id: Option<String>,
    cluster_set_id: Option<String>,
    sync_interval: Duration,
    cache: CacheSettings,
    poll_interval: Duration,
    poll_timeout: Duration,
    max_endpoints_per_slice: usize,
    json_logs: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct CacheSettings {
    namespace_ttl: Duration,
    service_ttl: Duration,
    endpoint_ttl: Duration,
    size: usize,
}

impl Settings {
    fn merge(cli: Cli, file: ControllerConfigFile) -> Self {
        let secs = |cli: Option<u64>, file: Option<u64>, default: u64| {
            Duration::from_secs(cli.or(file).unwrap_or(default))
        };
        Self {
            data_dir: cli
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            cluster_id: cli.cluster_id.or(file.cluster_id),
            cluster_set_id: cli.cluster_set_id.or(file.cluster_set_id),
            sync_interval: secs(
                cli.sync_interval_secs,
                file.sync_interval_secs,
                EXPORT_SYNC_INTERVAL_SECS,
            ),
            cache: CacheSettings {
                namespace_ttl: secs(
                    cli.namespace_ttl_secs,
                    file.namespace_ttl_secs,
                    NAMESPACE_CACHE_TTL_SECS,
                ),
                service_ttl: secs(
                    cli.service_ttl_secs,
                    file.service_ttl_secs,
                    SERVICE_CACHE_TTL_SECS,
                ),
                endpoint_ttl: secs(
                    cli.endpoint_ttl_secs,
                    file.endpoint_ttl_secs,
                    ENDPOINT_CACHE_TTL_SECS,
                ),
                size: cli.cache_size.or(file.cache_size).unwrap_or(DEFAULT_CACHE_SIZE),
            },
            poll_interval: secs(
                cli.poll_interval_secs,
                file.poll_interval_secs,
                OPERATION_POLL_INTERVAL_SECS,
            ),
            poll_timeout: secs(
                cli.poll_timeout_secs,
                file.poll_timeout_secs,
                OPERATION_POLL_TIMEOUT_SECS,
            ),
            max_endpoints_per_slice: cli
                .max_endpoints_per_slice
                .or(file.max_endpoints_per_slice)
                .unwrap_or(MAX_ENDPOINTS_PER_SLICE),
            json_logs: cli.json_logs || file.json_logs.unwrap_or(false),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

/// Create or correct a ClusterProperty from configuration.
async fn seed_property(client: &ClusterClient, name: &str, value: &str) -> anyhow::Result<()> {
    match client.get::<ClusterProperty>("", name).await? {
        Some(prop) if prop.value == value => {}
        Some(mut prop) => {
            warn!(
                "ClusterProperty {} changes from {} to {}",
                name, prop.value, value
            );
            prop.value = value.to_string();
            client.update(&prop).await?;
        }
        None => {
            client.create(ClusterProperty::new(name, value)).await?;
            info!("Seeded ClusterProperty {}={}", name, value);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let config_path = cli.config.clone();
    let file_cfg: ControllerConfigFile = load_config_file(&config_path)?;
    let settings = Settings::merge(cli, file_cfg);

    init_tracing(settings.json_logs);
    info!("Config file: {}", config_path);
    info!("Starting mcs-controller");
    info!("  Data dir:       {}", settings.data_dir);
    info!("  Sync interval:  {}s", settings.sync_interval.as_secs());
    info!(
        "  Max endpoints per slice: {}",
        settings.max_endpoints_per_slice
    );

    let store = StateStore::new(&settings.data_dir).await?;
    let client = ClusterClient::new(Arc::new(store.clone()));

    if let Some(ref id) = settings.cluster_id {
        seed_property(&client, CLUSTER_ID_PROPERTY, id).await?;
    }
    if let Some(ref id) = settings.cluster_set_id {
        seed_property(&client, CLUSTER_SET_ID_PROPERTY, id).await?;
    }

    warn!("No remote registry endpoint configured, using the in-process registry");
    let cancel = CancellationToken::new();
    let registry = Arc::new(ServiceDiscoveryClient::new(
        Arc::new(MemoryRegistry::new()),
        RateLimiter::default(),
        CacheConfig {
            ns_ttl: settings.cache.namespace_ttl,
            svc_ttl: settings.cache.service_ttl,
            endpoint_ttl: settings.cache.endpoint_ttl,
            size: settings.cache.size,
        },
        PollerConfig {
            interval: settings.poll_interval,
            timeout: settings.poll_timeout,
        },
        cancel.clone(),
    ));

    let controller_config = ControllerConfig {
        export_interval: settings.sync_interval,
        import_interval: settings.sync_interval,
        max_endpoints_per_slice: settings.max_endpoints_per_slice,
    };
    let cluster = Arc::new(ClusterUtils::new(client.clone()));
    let export_handle = ServiceExportController::new(
        client.clone(),
        registry.clone(),
        cluster,
        &controller_config,
        cancel.clone(),
    )
    .start();
    let import_handle =
        CloudMapController::new(client, registry, &controller_config, cancel.clone()).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    for handle in [export_handle, import_handle] {
        if let Err(e) = handle.await {
            warn!("Controller task ended abnormally: {}", e);
        }
    }
    store.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli {
            data_dir: Some("/cli".to_string()),
            endpoint_ttl_secs: Some(1),
            ..Default::default()
        };
        let file = ControllerConfigFile {
            data_dir: Some("/file".to_string()),
            cluster_id: Some("cluster-a".to_string()),
            endpoint_ttl_secs: Some(30),
            service_ttl_secs: Some(20),
            json_logs: Some(true),
            ..Default::default()
        };

        let settings = Settings::merge(cli, file);
        assert_eq!(settings.data_dir, "/cli");
        assert_eq!(settings.cluster_id.as_deref(), Some("cluster-a"));
        assert_eq!(settings.cache.endpoint_ttl, Duration::from_secs(1));
        assert_eq!(settings.cache.service_ttl, Duration::from_secs(20));
        assert!(settings.json_logs);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::merge(Cli::default(), ControllerConfigFile::default());
        assert_eq!(settings.data_dir, DEFAULT_DATA_DIR);
        assert_eq!(settings.cache.size, DEFAULT_CACHE_SIZE);
        assert_eq!(settings.poll_timeout, Duration::from_secs(60));
        assert_eq!(settings.max_endpoints_per_slice, 100);
        assert!(settings.cluster_id.is_none());
    }

    #[tokio::test]
    async fn test_seed_property_updates_value() {
        let client = ClusterClient::in_memory();
        seed_property(&client, CLUSTER_ID_PROPERTY, "a").await.unwrap();
        seed_property(&client, CLUSTER_ID_PROPERTY, "b").await.unwrap();
        let prop: ClusterProperty = client.get("", CLUSTER_ID_PROPERTY).await.unwrap().unwrap();
        assert_eq!(prop.value, "b");
    }
}
