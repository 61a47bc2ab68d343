//! Wire-level contract with the remote service registry.
//!
//! List calls are paginated; mutating calls return an operation id whose
//! progress is tracked with [`ServiceDiscoverySdk::get_operation`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operation target key holding the affected namespace id.
pub const TARGET_NAMESPACE: &str = "NAMESPACE";
/// Operation target key holding the name of a namespace being created.
pub const TARGET_NAMESPACE_NAME: &str = "NAMESPACE_NAME";
/// Operation target key holding the affected service id.
pub const TARGET_SERVICE: &str = "SERVICE";
/// Operation target key holding the affected instance id.
pub const TARGET_INSTANCE: &str = "INSTANCE";

/// One page of a list response.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceType {
    DnsPrivate,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub namespace_type: NamespaceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Submitted,
    Pending,
    Success,
    Fail,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Success | OperationStatus::Fail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    CreateNamespace,
    CreateService,
    RegisterInstance,
    DeregisterInstance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Resources the operation acts on, keyed by `TARGET_*`.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

/// Server-side filter for [`ServiceDiscoverySdk::list_operations`].
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub operation_type: Option<OperationType>,
    /// Empty matches every status.
    pub statuses: Vec<OperationStatus>,
}

impl OperationFilter {
    pub fn matches(&self, op: &Operation) -> bool {
        self.operation_type.is_none_or(|t| t == op.operation_type)
            && (self.statuses.is_empty() || self.statuses.contains(&op.status))
    }
}

/// The remote registry's wire client.
#[async_trait]
pub trait ServiceDiscoverySdk: Send + Sync {
    async fn list_namespaces(&self, next_token: Option<String>) -> anyhow::Result<Page<Namespace>>;

    async fn list_services(
        &self,
        namespace_id: &str,
        next_token: Option<String>,
    ) -> anyhow::Result<Page<ServiceSummary>>;

    async fn list_operations(
        &self,
        filter: &OperationFilter,
        next_token: Option<String>,
    ) -> anyhow::Result<Page<Operation>>;

    async fn get_operation(&self, operation_id: &str) -> anyhow::Result<Operation>;

    async fn discover_instances(
        &self,
        namespace_name: &str,
        service_name: &str,
    ) -> anyhow::Result<Vec<InstanceSummary>>;

    /// Returns an operation id.
    async fn create_http_namespace(&self, name: &str) -> anyhow::Result<String>;

    /// Returns an operation id.
    async fn create_service(&self, namespace_id: &str, name: &str) -> anyhow::Result<String>;

    /// Create or replace an instance. Returns an operation id.
    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: BTreeMap<String, String>,
    ) -> anyhow::Result<String>;

    /// Returns an operation id.
    async fn deregister_instance(&self, service_id: &str, instance_id: &str)
    -> anyhow::Result<String>;
}
