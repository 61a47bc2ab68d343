//! Object types shared across the workspace.
//!
//! Local objects (ServiceExport, ServiceImport, Service, EndpointSlice,
//! ClusterProperty, Namespace) are what the local state store holds.
//! [`model`] is the registry-facing view the synchronization engine works on.

pub mod cluster;
pub mod config;
pub mod endpointslice;
pub mod meta;
pub mod model;
pub mod namespace;
pub mod service;
pub mod serviceexport;
pub mod serviceimport;
pub mod validate;
