use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ClusterError, ClusterResult};

/// A persistent volume claim to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSpec {
    pub name: String,
    pub class: String,
    pub size: String,
    pub access_mode: String,
    pub labels: BTreeMap<String, String>,
}

/// A host-path persistent volume to create.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    pub class: String,
    pub size: String,
    pub access_mode: String,
    pub host_path: String,
    pub labels: BTreeMap<String, String>,
}

/// A volume mounted into a batch job container. Exactly one of
/// `claim_name` and `host_path` is expected to be set.
#[derive(Debug, Clone, PartialEq)]
pub struct JobVolumeSpec {
    pub name: String,
    pub claim_name: Option<String>,
    pub host_path: Option<String>,
    pub mount_path: String,
}

/// A batch job ready for submission. GPU fields are already translated
/// into a concrete resource name and quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub parallelism: i32,
    pub completions: i32,
    pub priority_class: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// `(resource name, quantity)` set as both request and limit.
    pub gpu: Option<(String, i64)>,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub volumes: Vec<JobVolumeSpec>,
}

/// Container resource requests of one pod, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    /// One map per container: resource name to quantity string.
    pub container_requests: Vec<BTreeMap<String, String>>,
}

impl PodSummary {
    pub fn is_active(&self) -> bool {
        self.phase == "Running" || self.phase == "Pending"
    }

    /// Sum of an integer resource over all containers. Non-integer
    /// quantities are ignored.
    pub fn requested(&self, resource: &str) -> i64 {
        self.container_requests
            .iter()
            .filter_map(|r| r.get(resource))
            .filter_map(|q| q.trim().parse::<i64>().ok())
            .sum()
    }
}

impl From<&Pod> for PodSummary {
    fn from(pod: &Pod) -> Self {
        let container_requests = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|c| {
                        c.resources
                            .as_ref()
                            .and_then(|r| r.requests.as_ref().or(r.limits.as_ref()))
                            .map(|reqs| reqs.iter().map(|(k, q)| (k.clone(), q.0.clone())).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_else(|| "Pending".to_string()),
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            container_requests,
        }
    }
}

/// What the platform needs to know about a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub name: String,
    pub namespace: String,
    pub size: Option<String>,
    pub phase: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl From<&PersistentVolumeClaim> for ClaimSummary {
    fn from(pvc: &PersistentVolumeClaim) -> Self {
        Self {
            name: pvc.metadata.name.clone().unwrap_or_default(),
            namespace: pvc.metadata.namespace.clone().unwrap_or_default(),
            size: claim_size(pvc),
            phase: pvc.status.as_ref().and_then(|s| s.phase.clone()),
            labels: pvc.metadata.labels.clone().unwrap_or_default(),
        }
    }
}

/// Requested storage of a claim, e.g. `3Gi`.
pub fn claim_size(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.clone())
}

/// Claims only grow.
pub fn check_expansion(current: &str, requested: &str) -> ClusterResult<()> {
    let cur = pkg_types::validate::parse_quantity_bytes(current)
        .map_err(|e| ClusterError::Malformed(e.to_string()))?;
    let new = pkg_types::validate::parse_quantity_bytes(requested)
        .map_err(|e| ClusterError::Malformed(e.to_string()))?;
    if new <= cur {
        return Err(ClusterError::Malformed(format!(
            "new size {} must be larger than current size {}",
            requested, current
        )));
    }
    Ok(())
}

/// Object kinds that can be watched in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Pods,
    Services,
    Deployments,
    Jobs,
    Ingresses,
}

impl WatchKind {
    pub const ALL: [WatchKind; 5] = [
        WatchKind::Pods,
        WatchKind::Services,
        WatchKind::Deployments,
        WatchKind::Jobs,
        WatchKind::Ingresses,
    ];

    pub fn api_version(&self) -> &'static str {
        match self {
            WatchKind::Pods | WatchKind::Services => "v1",
            WatchKind::Deployments => "apps/v1",
            WatchKind::Jobs => "batch/v1",
            WatchKind::Ingresses => "networking.k8s.io/v1",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchKind::Pods => "Pod",
            WatchKind::Services => "Service",
            WatchKind::Deployments => "Deployment",
            WatchKind::Jobs => "Job",
            WatchKind::Ingresses => "Ingress",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }
}

impl std::fmt::Display for WatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Added => write!(f, "ADDED"),
            EventType::Modified => write!(f, "MODIFIED"),
            EventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One change to a watched object.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub event_type: EventType,
    pub kind: WatchKind,
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

/// An attached interactive process.
pub struct ExecSession {
    pub stdin: Pin<Box<dyn AsyncWrite + Send>>,
    pub stdout: Pin<Box<dyn AsyncRead + Send>>,
    pub resize: mpsc::Sender<TerminalSize>,
    /// Completes when the remote process exits.
    pub done: JoinHandle<()>,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pod_summary_from_typed_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "train", "namespace": "proj-1-alice"},
            "spec": {"containers": [
                {"name": "a", "image": "x", "resources": {"requests": {"nvidia.com/gpu.shared": "10"}}},
                {"name": "b", "image": "y", "resources": {"limits": {"nvidia.com/gpu": "1"}}},
                {"name": "c", "image": "z"}
            ]},
            "status": {"phase": "Running"}
        }))
        .unwrap();
        let summary = PodSummary::from(&pod);
        assert_eq!(summary.name, "train");
        assert!(summary.is_active());
        assert_eq!(summary.requested("nvidia.com/gpu.shared"), 10);
        assert_eq!(summary.requested("nvidia.com/gpu"), 1);
        assert_eq!(summary.container_requests.len(), 3);
    }

    #[test]
    fn pods_without_status_are_pending() {
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"},
            "spec": {"containers": [{"name": "a"}]}
        }))
        .unwrap();
        assert_eq!(PodSummary::from(&pod).phase, "Pending");
    }

    #[test]
    fn expansion_only_grows() {
        assert!(check_expansion("3Gi", "5Gi").is_ok());
        assert!(check_expansion("3Gi", "3Gi").is_err());
        assert!(check_expansion("3Gi", "1Gi").is_err());
        assert!(check_expansion("3Gi", "lots").is_err());
    }

    #[test]
    fn watch_kind_lookup() {
        assert_eq!(WatchKind::from_kind("Deployment"), Some(WatchKind::Deployments));
        assert_eq!(WatchKind::from_kind("ConfigMap"), None);
        assert_eq!(WatchKind::Ingresses.api_version(), "networking.k8s.io/v1");
    }
}
