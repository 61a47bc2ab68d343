//! Filesystem path constants.

/// Default config file path for the controller.
pub const DEFAULT_CONTROLLER_CONFIG: &str = "/etc/mcs-sync/config.yaml";

/// Default data directory for the local state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/mcs-sync-data";
