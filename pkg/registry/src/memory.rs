//! In-process registry implementing [`ServiceDiscoverySdk`].
//!
//! Operations normally complete as soon as they are submitted. Outcomes can
//! be overridden per target (instance id, or namespace name for namespace
//! creation) to fail or stay pending, which is how tests exercise partial
//! failures and poll timeouts.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::sdk::*;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeed,
    Fail(String),
    /// Stay `Pending` until [`MemoryRegistry::complete_operation`] is called.
    Hang,
}

#[derive(Debug, Clone)]
enum Mutation {
    CreateNamespace(Namespace),
    CreateService {
        id: String,
        namespace_id: String,
        name: String,
    },
    Register {
        service_id: String,
        instance_id: String,
        attributes: BTreeMap<String, String>,
    },
    Deregister {
        service_id: String,
        instance_id: String,
    },
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    /// service id → (namespace id, name)
    services: BTreeMap<String, (String, String)>,
    /// service id → instance id → attributes
    instances: HashMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    operations: BTreeMap<String, Operation>,
    pending: HashMap<String, Mutation>,
    outcomes: HashMap<String, OperationOutcome>,
    /// instance id → most recent operation touching it
    instance_ops: HashMap<String, String>,
}

impl State {
    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::CreateNamespace(ns) => {
                self.namespaces.insert(ns.id.clone(), ns);
            }
            Mutation::CreateService {
                id,
                namespace_id,
                name,
            } => {
                self.services.insert(id, (namespace_id, name));
            }
            Mutation::Register {
                service_id,
                instance_id,
                attributes,
            } => {
                self.instances
                    .entry(service_id)
                    .or_default()
                    .insert(instance_id, attributes);
            }
            Mutation::Deregister {
                service_id,
                instance_id,
            } => {
                if let Some(instances) = self.instances.get_mut(&service_id) {
                    instances.remove(&instance_id);
                }
            }
        }
    }

    fn service_id(&self, namespace_id: &str, name: &str) -> Option<String> {
        self.services
            .iter()
            .find(|(_, (ns, n))| ns == namespace_id && n == name)
            .map(|(id, _)| id.clone())
    }
}

pub struct MemoryRegistry {
    state: Mutex<State>,
    page_size: usize,
    calls: DashMap<&'static str, usize>,
    /// Every sdk call in arrival order.
    journal: Mutex<Vec<&'static str>>,
}

fn paginate<T: Clone>(items: &[T], next_token: Option<String>, page_size: usize) -> anyhow::Result<Page<T>> {
    let start: usize = match next_token {
        Some(token) => token
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid pagination token '{}'", token))?,
        None => 0,
    };
    let end = (start + page_size).min(items.len());
    Ok(Page {
        items: items.get(start..end).unwrap_or_default().to_vec(),
        next_token: (end < items.len()).then(|| end.to_string()),
    })
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
            calls: DashMap::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: &'static str) {
        *self.calls.entry(call).or_insert(0) += 1;
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Names of all sdk calls received so far, oldest first.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `call` (an sdk method name) was invoked.
    pub fn call_count(&self, call: &str) -> usize {
        self.calls.get(call).map(|c| *c).unwrap_or(0)
    }

    /// Total mutating calls received.
    pub fn mutation_count(&self) -> usize {
        [
            "create_http_namespace",
            "create_service",
            "register_instance",
            "deregister_instance",
        ]
        .iter()
        .map(|c| self.call_count(c))
        .sum()
    }

    /// Override how future operations on `target` end.
    pub fn set_outcome(&self, target: &str, outcome: OperationOutcome) {
        self.lock().outcomes.insert(target.to_string(), outcome);
    }

    /// Most recent operation id issued for an instance.
    pub fn operation_for_instance(&self, instance_id: &str) -> Option<String> {
        self.lock().instance_ops.get(instance_id).cloned()
    }

    /// Finish a pending operation successfully.
    pub fn complete_operation(&self, op_id: &str) -> bool {
        let mut state = self.lock();
        let Some(mutation) = state.pending.remove(op_id) else {
            return false;
        };
        state.apply(mutation);
        if let Some(op) = state.operations.get_mut(op_id) {
            op.status = OperationStatus::Success;
        }
        true
    }

    /// Attributes of every instance registered under `namespace/service`.
    pub fn instances(&self, namespace: &str, service: &str) -> BTreeMap<String, BTreeMap<String, String>> {
        let state = self.lock();
        state
            .namespaces
            .values()
            .find(|ns| ns.name == namespace)
            .and_then(|ns| state.service_id(&ns.id, service))
            .and_then(|id| state.instances.get(&id).cloned())
            .unwrap_or_default()
    }

    fn submit(
        &self,
        target: &str,
        operation_type: OperationType,
        targets: BTreeMap<String, String>,
        mutation: Mutation,
    ) -> String {
        let mut state = self.lock();
        let op_id = format!("op-{}", Uuid::new_v4().simple());
        let outcome = state
            .outcomes
            .get(target)
            .cloned()
            .unwrap_or(OperationOutcome::Succeed);
        let (status, error_message) = match outcome {
            OperationOutcome::Succeed => {
                state.apply(mutation);
                (OperationStatus::Success, None)
            }
            OperationOutcome::Fail(reason) => (OperationStatus::Fail, Some(reason)),
            OperationOutcome::Hang => {
                state.pending.insert(op_id.clone(), mutation);
                (OperationStatus::Pending, None)
            }
        };
        state.operations.insert(
            op_id.clone(),
            Operation {
                id: op_id.clone(),
                operation_type,
                status,
                error_message,
                targets,
            },
        );
        op_id
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceDiscoverySdk for MemoryRegistry {
    async fn list_namespaces(&self, next_token: Option<String>) -> anyhow::Result<Page<Namespace>> {
        self.record("list_namespaces");
        let items: Vec<_> = self.lock().namespaces.values().cloned().collect();
        paginate(&items, next_token, self.page_size)
    }

    async fn list_services(
        &self,
        namespace_id: &str,
        next_token: Option<String>,
    ) -> anyhow::Result<Page<ServiceSummary>> {
        self.record("list_services");
        let items: Vec<_> = self
            .lock()
            .services
            .iter()
            .filter(|(_, (ns, _))| ns == namespace_id)
            .map(|(id, (_, name))| ServiceSummary {
                id: id.clone(),
                name: name.clone(),
            })
            .collect();
        paginate(&items, next_token, self.page_size)
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
        next_token: Option<String>,
    ) -> anyhow::Result<Page<Operation>> {
        self.record("list_operations");
        let items: Vec<_> = self
            .lock()
            .operations
            .values()
            .filter(|op| filter.matches(op))
            .cloned()
            .collect();
        paginate(&items, next_token, self.page_size)
    }

    async fn get_operation(&self, operation_id: &str) -> anyhow::Result<Operation> {
        self.record("get_operation");
        self.lock()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("operation {} not found", operation_id))
    }

    async fn discover_instances(
        &self,
        namespace_name: &str,
        service_name: &str,
    ) -> anyhow::Result<Vec<InstanceSummary>> {
        self.record("discover_instances");
        let state = self.lock();
        let ns = state
            .namespaces
            .values()
            .find(|ns| ns.name == namespace_name)
            .ok_or_else(|| anyhow::anyhow!("namespace {} not found", namespace_name))?;
        let service_id = state
            .service_id(&ns.id, service_name)
            .ok_or_else(|| anyhow::anyhow!("service {}/{} not found", namespace_name, service_name))?;
        Ok(state
            .instances
            .get(&service_id)
            .map(|instances| {
                instances
                    .iter()
                    .map(|(id, attributes)| InstanceSummary {
                        id: id.clone(),
                        attributes: attributes.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_http_namespace(&self, name: &str) -> anyhow::Result<String> {
        self.record("create_http_namespace");
        if self.lock().namespaces.values().any(|ns| ns.name == name) {
            anyhow::bail!("namespace {} already exists", name);
        }
        let ns = Namespace {
            id: format!("ns-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            namespace_type: NamespaceType::Http,
        };
        let targets = BTreeMap::from([
            (TARGET_NAMESPACE.to_string(), ns.id.clone()),
            (TARGET_NAMESPACE_NAME.to_string(), name.to_string()),
        ]);
        Ok(self.submit(
            name,
            OperationType::CreateNamespace,
            targets,
            Mutation::CreateNamespace(ns),
        ))
    }

    async fn create_service(&self, namespace_id: &str, name: &str) -> anyhow::Result<String> {
        self.record("create_service");
        {
            let state = self.lock();
            if !state.namespaces.contains_key(namespace_id) {
                anyhow::bail!("namespace {} not found", namespace_id);
            }
            if state.service_id(namespace_id, name).is_some() {
                anyhow::bail!("service {} already exists in namespace {}", name, namespace_id);
            }
        }
        let id = format!("srv-{}", Uuid::new_v4().simple());
        let targets = BTreeMap::from([
            (TARGET_NAMESPACE.to_string(), namespace_id.to_string()),
            (TARGET_SERVICE.to_string(), id.clone()),
        ]);
        Ok(self.submit(
            name,
            OperationType::CreateService,
            targets,
            Mutation::CreateService {
                id,
                namespace_id: namespace_id.to_string(),
                name: name.to_string(),
            },
        ))
    }

    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: BTreeMap<String, String>,
    ) -> anyhow::Result<String> {
        self.record("register_instance");
        if !self.lock().services.contains_key(service_id) {
            anyhow::bail!("service {} not found", service_id);
        }
        let targets = BTreeMap::from([
            (TARGET_SERVICE.to_string(), service_id.to_string()),
            (TARGET_INSTANCE.to_string(), instance_id.to_string()),
        ]);
        let op_id = self.submit(
            instance_id,
            OperationType::RegisterInstance,
            targets,
            Mutation::Register {
                service_id: service_id.to_string(),
                instance_id: instance_id.to_string(),
                attributes,
            },
        );
        self.lock()
            .instance_ops
            .insert(instance_id.to_string(), op_id.clone());
        Ok(op_id)
    }

    async fn deregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> anyhow::Result<String> {
        self.record("deregister_instance");
        if !self.lock().services.contains_key(service_id) {
            anyhow::bail!("service {} not found", service_id);
        }
        let targets = BTreeMap::from([
            (TARGET_SERVICE.to_string(), service_id.to_string()),
            (TARGET_INSTANCE.to_string(), instance_id.to_string()),
        ]);
        let op_id = self.submit(
            instance_id,
            OperationType::DeregisterInstance,
            targets,
            Mutation::Deregister {
                service_id: service_id.to_string(),
                instance_id: instance_id.to_string(),
            },
        );
        self.lock()
            .instance_ops
            .insert(instance_id.to_string(), op_id.clone());
        Ok(op_id)
    }
}
