//! Cluster API seam
//!
//! All Kubernetes access goes through the [`ClusterClient`] trait so the
//! aggregator and controller can be exercised against a mock. The one real
//! implementation wraps `kube::Api` handles; pod usage comes from the
//! `metrics.k8s.io/v1beta1` group via a dynamic object query.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the cluster seam
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The workload was modified concurrently; the caller should re-evaluate
    /// on its next pass instead of retrying.
    #[error("conflicting update for {namespace}/{name}")]
    Conflict { namespace: String, name: String },

    #[error(transparent)]
    Api(#[from] kube::Error),

    #[error("failed to decode metrics payload: {0}")]
    Decode(String),
}

/// A service and its pod selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub namespace: String,
    pub name: String,
    pub selector: BTreeMap<String, String>,
}

/// A pod's labels and declared resource requests
#[derive(Debug, Clone, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub cpu_request_cores: f64,
    pub memory_request_mib: f64,
}

/// Observed resource usage for one pod, summed over its containers
#[derive(Debug, Clone, PartialEq)]
pub struct PodUsage {
    pub pod_name: String,
    pub cpu_cores: f64,
    pub memory_mib: f64,
}

/// A workload descriptor (deployment) and its replica state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub namespace: String,
    pub name: String,
    pub selector: BTreeMap<String, String>,
    /// Replicas observed in status
    pub current_replicas: i32,
    /// Replicas requested in spec
    pub desired_replicas: i32,
}

/// An ingress resource reduced to what the controller consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressInfo {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    /// Distinct backend service names across all HTTP paths
    pub backend_services: Vec<String>,
}

/// Cluster operations required by the aggregator and controller
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List services in the given namespaces; empty means all namespaces
    async fn list_services(&self, namespaces: &[String]) -> Result<Vec<ServiceInfo>, ClusterError>;

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInfo>, ClusterError>;

    /// List pods matching a label selector
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Read per-pod container usage for pods matching a label selector
    async fn pod_usage(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodUsage>, ClusterError>;

    /// List workload descriptors in a namespace
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, ClusterError>;

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IngressInfo>, ClusterError>;

    /// Set a workload's replica count and merge the given annotations
    async fn scale_workload(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;
}

/// True when the workload selector is a superset of the service selector
pub fn selector_matches(
    workload_selector: &BTreeMap<String, String>,
    service_selector: &BTreeMap<String, String>,
) -> bool {
    service_selector
        .iter()
        .all(|(key, value)| workload_selector.get(key) == Some(value))
}

/// Find the workload backing a service.
///
/// Several matches are broken by lexicographic name so repeated passes pick
/// the same workload. A service without a selector backs nothing.
pub fn find_backing_workload<'a>(
    workloads: &'a [WorkloadInfo],
    service_selector: &BTreeMap<String, String>,
) -> Option<&'a WorkloadInfo> {
    if service_selector.is_empty() {
        return None;
    }
    workloads
        .iter()
        .filter(|w| selector_matches(&w.selector, service_selector))
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Parse a Kubernetes CPU quantity ("250m", "1", "1500000n") into cores
pub fn parse_cpu_cores(value: &str) -> f64 {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('n') {
        stripped.parse::<f64>().unwrap_or(0.0) / 1_000_000_000.0
    } else if let Some(stripped) = value.strip_suffix('u') {
        stripped.parse::<f64>().unwrap_or(0.0) / 1_000_000.0
    } else if let Some(stripped) = value.strip_suffix('m') {
        stripped.parse::<f64>().unwrap_or(0.0) / 1000.0
    } else {
        value.parse::<f64>().unwrap_or(0.0)
    }
}

/// Parse a Kubernetes memory quantity ("512Mi", "1Gi", bytes) into MiB
pub fn parse_memory_mib(value: &str) -> f64 {
    let value = value.trim();
    let suffixes: [(&str, f64); 8] = [
        ("Ti", 1024.0 * 1024.0),
        ("Gi", 1024.0),
        ("Mi", 1.0),
        ("Ki", 1.0 / 1024.0),
        ("T", 1_000_000_000_000.0 / (1024.0 * 1024.0)),
        ("G", 1_000_000_000.0 / (1024.0 * 1024.0)),
        ("M", 1_000_000.0 / (1024.0 * 1024.0)),
        ("K", 1000.0 / (1024.0 * 1024.0)),
    ];
    for (suffix, factor) in suffixes {
        if let Some(stripped) = value.strip_suffix(suffix) {
            return stripped.parse::<f64>().unwrap_or(0.0) * factor;
        }
    }
    // Plain number means bytes
    value.parse::<f64>().unwrap_or(0.0) / (1024.0 * 1024.0)
}

fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// `ClusterClient` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pod_metrics_resource() -> ApiResource {
        ApiResource {
            group: "metrics.k8s.io".into(),
            version: "v1beta1".into(),
            api_version: "metrics.k8s.io/v1beta1".into(),
            kind: "PodMetrics".into(),
            plural: "pods".into(),
        }
    }

    fn service_info(service: Service) -> ServiceInfo {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let selector = service
            .spec
            .and_then(|spec| spec.selector)
            .unwrap_or_default();
        ServiceInfo {
            namespace,
            name,
            selector,
        }
    }

    fn pod_info(pod: Pod) -> PodInfo {
        let name = pod.name_any();
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        let mut cpu_request_cores = 0.0;
        let mut memory_request_mib = 0.0;
        if let Some(spec) = &pod.spec {
            for container in &spec.containers {
                let requests = container
                    .resources
                    .as_ref()
                    .and_then(|r| r.requests.as_ref());
                if let Some(requests) = requests {
                    if let Some(cpu) = requests.get("cpu") {
                        cpu_request_cores += parse_cpu_cores(&cpu.0);
                    }
                    if let Some(memory) = requests.get("memory") {
                        memory_request_mib += parse_memory_mib(&memory.0);
                    }
                }
            }
        }

        PodInfo {
            name,
            labels,
            cpu_request_cores,
            memory_request_mib,
        }
    }

    fn workload_info(deployment: Deployment) -> WorkloadInfo {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.clone())
            .unwrap_or_default();
        let desired_replicas = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(0);
        let current_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.replicas)
            .unwrap_or(0);
        WorkloadInfo {
            namespace,
            name,
            selector,
            current_replicas,
            desired_replicas,
        }
    }

    fn ingress_info(ingress: Ingress) -> IngressInfo {
        let namespace = ingress.namespace().unwrap_or_default();
        let name = ingress.name_any();
        let annotations = ingress.metadata.annotations.clone().unwrap_or_default();

        let mut backend_services = Vec::new();
        if let Some(rules) = ingress.spec.and_then(|spec| spec.rules) {
            for rule in rules {
                let Some(http) = rule.http else { continue };
                for path in http.paths {
                    if let Some(service) = path.backend.service {
                        if !service.name.is_empty()
                            && !backend_services.contains(&service.name)
                        {
                            backend_services.push(service.name);
                        }
                    }
                }
            }
        }

        IngressInfo {
            namespace,
            name,
            annotations,
            backend_services,
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_services(&self, namespaces: &[String]) -> Result<Vec<ServiceInfo>, ClusterError> {
        let mut services = Vec::new();
        if namespaces.is_empty() {
            let api: Api<Service> = Api::all(self.client.clone());
            for service in api.list(&ListParams::default()).await? {
                services.push(Self::service_info(service));
            }
        } else {
            for namespace in namespaces {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                for service in api.list(&ListParams::default()).await? {
                    services.push(Self::service_info(service));
                }
            }
        }
        Ok(services)
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInfo>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(Self::service_info))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector_string(selector));
        let pods = api.list(&params).await?;
        Ok(pods.items.into_iter().map(Self::pod_info).collect())
    }

    async fn pod_usage(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodUsage>, ClusterError> {
        let resource = Self::pod_metrics_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let params = ListParams::default().labels(&selector_string(selector));
        let list = api.list(&params).await?;

        let mut usage = Vec::new();
        for item in list {
            let pod_name = item.name_any();
            let containers = item
                .data
                .get("containers")
                .and_then(|c| c.as_array())
                .ok_or_else(|| {
                    ClusterError::Decode(format!("pod metrics for {pod_name} lack containers"))
                })?;

            let mut cpu_cores = 0.0;
            let mut memory_mib = 0.0;
            for container in containers {
                if let Some(used) = container.get("usage") {
                    if let Some(cpu) = used.get("cpu").and_then(|v| v.as_str()) {
                        cpu_cores += parse_cpu_cores(cpu);
                    }
                    if let Some(memory) = used.get("memory").and_then(|v| v.as_str()) {
                        memory_mib += parse_memory_mib(memory);
                    }
                }
            }
            usage.push(PodUsage {
                pod_name,
                cpu_cores,
                memory_mib,
            });
        }
        Ok(usage)
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadInfo>, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployments = api.list(&ListParams::default()).await?;
        Ok(deployments
            .items
            .into_iter()
            .map(Self::workload_info)
            .collect())
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IngressInfo>, ClusterError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(Self::ingress_info))
    }

    async fn scale_workload(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "metadata": { "annotations": annotations },
            "spec": { "replicas": replicas },
        });

        debug!(namespace, name, replicas, "patching workload replicas");
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Err(ClusterError::Conflict {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
