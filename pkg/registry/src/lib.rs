//! Remote service registry side of the synchronizer.
//!
//! Reads go cache → rate limiter → wire client; writes go through the
//! operation poller so a call only returns once the registry has applied it.

pub mod api;
pub mod attributes;
pub mod cache;
pub mod client;
pub mod memory;
pub mod operation_poller;
pub mod rate_limiter;
pub mod sdk;

pub use client::ServiceDiscoveryClient;
