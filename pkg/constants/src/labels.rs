//! Label, annotation and finalizer keys placed on local objects.

/// Standard label linking an EndpointSlice to the Service it backs.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Label linking an EndpointSlice or derived Service to its ServiceImport.
pub const SERVICE_IMPORT_LABEL: &str = "multicluster.kubernetes.io/service-name";

/// Label naming the cluster whose endpoints a derived slice carries.
pub const SOURCE_CLUSTER_LABEL: &str = "multicluster.kubernetes.io/source-cluster";

/// Label naming the controller that manages an EndpointSlice.
pub const MANAGED_BY_LABEL: &str = "endpointslice.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on slices this controller publishes.
pub const CONTROLLER_NAME: &str = "mcs-sync-controller";

/// Annotation on a ServiceImport mapping cluster ids to derived service names.
/// Value is a JSON object `{ "<cluster-id>": "<derived-service-name>" }`.
pub const DERIVED_SERVICE_ANNOTATION: &str = "multicluster.k8s.aws/derived-service";

/// Finalizer that keeps a ServiceExport alive until its endpoints are deregistered.
pub const SERVICE_EXPORT_FINALIZER: &str = "multicluster.k8s.aws/service-export-finalizer";

/// Prefix of derived service names.
pub const DERIVED_SERVICE_PREFIX: &str = "imported-";

/// Well-known ClusterProperty holding this cluster's id.
pub const CLUSTER_ID_PROPERTY: &str = "cluster.clusterset.k8s.io";

/// Well-known ClusterProperty holding the clusterset id.
pub const CLUSTER_SET_ID_PROPERTY: &str = "clusterset.k8s.io";
