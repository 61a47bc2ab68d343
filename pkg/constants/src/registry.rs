//! Remote service registry constants: instance attribute keys and rate limits.

/// Version tag written on every registered instance.
pub const CONTROLLER_VERSION: &str = concat!("mcs-sync-", env!("CARGO_PKG_VERSION"));

// ─── Instance attribute keys ──────────────────────────────────────────────

pub const ATTR_IPV4: &str = "AWS_INSTANCE_IPV4";
pub const ATTR_PORT: &str = "AWS_INSTANCE_PORT";
pub const ATTR_ENDPOINT_PORT_NAME: &str = "ENDPOINT_PORT_NAME";
pub const ATTR_ENDPOINT_PROTOCOL: &str = "ENDPOINT_PROTOCOL";
pub const ATTR_SERVICE_PORT_NAME: &str = "SERVICE_PORT_NAME";
pub const ATTR_SERVICE_PORT: &str = "SERVICE_PORT";
pub const ATTR_SERVICE_TARGET_PORT: &str = "SERVICE_TARGET_PORT";
pub const ATTR_SERVICE_PROTOCOL: &str = "SERVICE_PROTOCOL";
pub const ATTR_SERVICE_TYPE: &str = "SERVICE_TYPE";
pub const ATTR_CLUSTER_ID: &str = "CLUSTER_ID";
pub const ATTR_CLUSTER_SET_ID: &str = "CLUSTERSET_ID";
pub const ATTR_READY: &str = "READY";
pub const ATTR_HOSTNAME: &str = "HOSTNAME";
pub const ATTR_NODENAME: &str = "NODENAME";
pub const ATTR_EXPORT_CREATION_TIMESTAMP: &str = "SERVICE_EXPORT_CREATION_TIMESTAMP";
pub const ATTR_CONTROLLER_VERSION: &str = "K8S_CONTROLLER";

// ─── Rate limits (requests per second, burst) ─────────────────────────────

pub const LIST_NAMESPACES_LIMIT: (f64, u32) = (0.5, 5);
pub const LIST_SERVICES_LIMIT: (f64, u32) = (2.0, 10);
pub const LIST_OPERATIONS_LIMIT: (f64, u32) = (1.0, 5);
pub const GET_OPERATION_LIMIT: (f64, u32) = (100.0, 200);
pub const DISCOVER_INSTANCES_LIMIT: (f64, u32) = (500.0, 1000);
pub const REGISTER_INSTANCE_LIMIT: (f64, u32) = (50.0, 100);
pub const DEREGISTER_INSTANCE_LIMIT: (f64, u32) = (50.0, 100);
pub const CREATE_NAMESPACE_LIMIT: (f64, u32) = (1.0, 5);
pub const CREATE_SERVICE_LIMIT: (f64, u32) = (1.0, 5);
