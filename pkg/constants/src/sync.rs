//! Reconciliation, cache and operation polling constants.

/// How often the export controller walks every ServiceExport, in seconds.
pub const EXPORT_SYNC_INTERVAL_SECS: u64 = 10;

/// How often the import controller walks every namespace, in seconds.
pub const IMPORT_SYNC_INTERVAL_SECS: u64 = 10;

/// TTL of the cached namespace-name → namespace map, in seconds.
pub const NAMESPACE_CACHE_TTL_SECS: u64 = 10;

/// TTL of a cached service-name → service-id map, in seconds.
pub const SERVICE_CACHE_TTL_SECS: u64 = 10;

/// TTL of a cached endpoint list. Shortest of the three since it drives
/// how fresh the published state looks.
pub const ENDPOINT_CACHE_TTL_SECS: u64 = 5;

/// Upper bound on the number of entries held by the registry cache.
pub const DEFAULT_CACHE_SIZE: usize = 2048;

/// Interval between two status queries for one remote operation, in seconds.
pub const OPERATION_POLL_INTERVAL_SECS: u64 = 2;

/// How long an operation may stay non-terminal before polling gives up, in seconds.
pub const OPERATION_POLL_TIMEOUT_SECS: u64 = 60;

/// Capacity of one locally published endpoint slice.
pub const MAX_ENDPOINTS_PER_SLICE: usize = 100;
