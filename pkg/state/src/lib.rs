//! Local state: the key/value backends, the watch event log and the typed
//! object client controllers use to read and write local objects.

pub mod client;
pub mod memory;
pub mod objects;
pub mod store;
pub mod watch;

pub use objects::ClusterClient;
pub use store::KeyValueStore;
