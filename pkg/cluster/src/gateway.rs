use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ClusterError, ClusterResult};
use crate::types::{
    ClaimSpec, ClaimSummary, ClusterEvent, ExecSession, JobSpec, PodSummary, VolumeSpec, WatchKind,
};

pub type EventStream = BoxStream<'static, ClusterResult<ClusterEvent>>;

/// Kind and name of a manifest, or `Malformed`.
pub fn object_ref(manifest: &Value) -> ClusterResult<(pkg_manifest::GroupVersionKind, String)> {
    pkg_manifest::codec::validate_value(manifest).map_err(|e| ClusterError::Malformed(e.to_string()))
}

/// Every cluster mutation the platform performs goes through this trait.
///
/// Each call is bounded by the implementation's call deadline and is
/// cancelled by dropping the returned future.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Create the namespace unless it already exists. Labels of an
    /// existing namespace are left alone.
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> ClusterResult<()>;
    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool>;
    /// Foreground delete; a missing namespace is success.
    async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;
    async fn list_namespaces(&self, prefix: &str) -> ClusterResult<Vec<String>>;

    /// Idempotent on already-exists.
    async fn create_claim(&self, ns: &str, spec: &ClaimSpec) -> ClusterResult<()>;
    /// Grow a claim. A size that is not larger than the current one is malformed.
    async fn expand_claim(&self, ns: &str, name: &str, new_size: &str) -> ClusterResult<()>;
    async fn delete_claim(&self, ns: &str, name: &str) -> ClusterResult<()>;
    async fn get_claim(&self, ns: &str, name: &str) -> ClusterResult<Option<ClaimSummary>>;
    /// Label-filtered across all namespaces.
    async fn list_claims_by_label(&self, selector: &str) -> ClusterResult<Vec<ClaimSummary>>;

    async fn create_volume(&self, spec: &VolumeSpec) -> ClusterResult<()>;
    async fn delete_volume(&self, name: &str) -> ClusterResult<()>;

    /// Create a generic object in `ns`, resolving its kind through discovery.
    async fn apply_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()>;
    /// Background delete; a missing object is success.
    async fn delete_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()>;
    /// Replace the live object, carrying over its resource version.
    async fn update_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()>;
    async fn get_object(
        &self,
        ns: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> ClusterResult<Option<Value>>;

    async fn submit_job(&self, spec: &JobSpec) -> ClusterResult<()>;

    async fn list_pods(&self, ns: &str, selector: Option<&str>) -> ClusterResult<Vec<PodSummary>>;
    /// Label-filtered across all namespaces.
    async fn list_pods_by_label(&self, selector: &str) -> ClusterResult<Vec<PodSummary>>;

    async fn service_cluster_ip(&self, ns: &str, name: &str) -> ClusterResult<Option<String>>;
    /// Node port of the named service port, or of the first port.
    async fn service_node_port(
        &self,
        ns: &str,
        name: &str,
        port_name: Option<&str>,
    ) -> ClusterResult<Option<i32>>;

    /// Stream changes of one kind in `ns`. The stream starts with the
    /// current objects as `ADDED` events.
    async fn watch(&self, ns: &str, kind: WatchKind) -> ClusterResult<EventStream>;

    /// Attach an interactive TTY process to a pod.
    async fn exec(
        &self,
        ns: &str,
        pod: &str,
        container: Option<&str>,
        command: Vec<String>,
    ) -> ClusterResult<ExecSession>;
}
