//! Reconciliation loops between the local object store and the remote
//! service registry, plus the pure planning logic they share.

pub mod changes;
pub mod cloudmap;
pub mod cluster;
pub mod endpointslice_plan;
pub mod serviceexport;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use cloudmap::CloudMapController;
pub use serviceexport::ServiceExportController;

use pkg_constants::sync::{EXPORT_SYNC_INTERVAL_SECS, IMPORT_SYNC_INTERVAL_SECS, MAX_ENDPOINTS_PER_SLICE};
use std::time::Duration;

/// Knobs shared by both controllers.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub export_interval: Duration,
    pub import_interval: Duration,
    pub max_endpoints_per_slice: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            export_interval: Duration::from_secs(EXPORT_SYNC_INTERVAL_SECS),
            import_interval: Duration::from_secs(IMPORT_SYNC_INTERVAL_SECS),
            max_endpoints_per_slice: MAX_ENDPOINTS_PER_SLICE,
        }
    }
}
