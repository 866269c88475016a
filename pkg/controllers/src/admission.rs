use pkg_cluster::ClusterGateway;
use pkg_constants::gpu::{DEFAULT_GPU_TYPE, GPU_DEDICATED_RESOURCE, GPU_SHARED_RESOURCE, MPS_UNITS_PER_GPU};
use pkg_manifest::naming::project_namespace_prefix;
use pkg_types::project::Project;
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{debug, info};

use crate::policy::requested_units;

/// GPU admission control against the project quota, in shared units.
#[derive(Clone)]
pub struct GpuAdmission {
    gateway: Arc<dyn ClusterGateway>,
}

impl GpuAdmission {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// GPU units held by running or pending pods across every per-user
    /// namespace of the project.
    pub async fn current_usage(&self, project_id: u64) -> CoreResult<u32> {
        let mut total: i64 = 0;
        for ns in self
            .gateway
            .list_namespaces(&project_namespace_prefix(project_id))
            .await?
        {
            for pod in self.gateway.list_pods(&ns, None).await? {
                if !pod.is_active() {
                    continue;
                }
                total += pod.requested(GPU_DEDICATED_RESOURCE) * i64::from(MPS_UNITS_PER_GPU)
                    + pod.requested(GPU_SHARED_RESOURCE);
            }
        }
        debug!("Project {} GPU usage: {} units", project_id, total);
        Ok(u32::try_from(total.max(0)).unwrap_or(u32::MAX))
    }

    /// Accept or refuse a request for `count` GPUs of `gpu_type`
    /// (dedicated when unspecified). Returns the resolved type.
    pub async fn admit(
        &self,
        project: &Project,
        count: u32,
        gpu_type: Option<&str>,
    ) -> CoreResult<String> {
        let requested_type = gpu_type
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_GPU_TYPE.to_string());
        if !project.allows(&requested_type) {
            return Err(CoreError::Forbidden(format!(
                "GPU access type '{}' is not allowed for this project. Allowed: {}",
                requested_type, project.gpu_access
            )));
        }

        let requested = requested_units(count, &requested_type);
        let current = self.current_usage(project.id).await?;
        if current.saturating_add(requested) > project.gpu_quota {
            return Err(CoreError::QuotaExceeded(format!(
                "GPU quota exceeded. Current: {}, Requested: {}, Quota: {}",
                current, requested, project.gpu_quota
            )));
        }
        info!(
            "Admitted {} {} GPU(s) for project {} ({} + {} of {} units)",
            count, requested_type, project.id, current, requested, project.gpu_quota
        );
        Ok(requested_type)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::Fixture;
    use pkg_cluster::ClusterGateway;
    use pkg_types::CoreError;
    use serde_json::{Value, json};

    fn gpu_pod(name: &str, resource: &str, qty: &str, phase: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name},
            "spec": {"containers": [{
                "name": "main",
                "image": "cuda",
                "resources": {"requests": {resource: qty}}
            }]},
            "status": {"phase": phase}
        })
    }

    #[tokio::test]
    async fn usage_counts_active_pods_in_project_namespaces_only() {
        let fx = Fixture::new();
        let gw = &fx.mock;
        for ns in ["proj-7-alice", "proj-7-bob", "proj-70-carol"] {
            gw.ensure_namespace(ns, &Default::default()).await.unwrap();
        }
        gw.apply_object("proj-7-alice", &gpu_pod("a", "nvidia.com/gpu", "1", "Running"))
            .await
            .unwrap();
        gw.apply_object("proj-7-bob", &gpu_pod("b", "nvidia.com/gpu.shared", "3", "Pending"))
            .await
            .unwrap();
        gw.apply_object("proj-7-bob", &gpu_pod("c", "nvidia.com/gpu.shared", "5", "Succeeded"))
            .await
            .unwrap();
        gw.apply_object("proj-70-carol", &gpu_pod("d", "nvidia.com/gpu.shared", "9", "Running"))
            .await
            .unwrap();

        assert_eq!(fx.engine.admission.current_usage(7).await.unwrap(), 13);
        assert_eq!(fx.engine.admission.current_usage(70).await.unwrap(), 9);
        assert_eq!(fx.engine.admission.current_usage(8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn admission_checks_access_then_quota() {
        let fx = Fixture::new();
        let team = fx.group("team").await;
        let project = fx.project(team.id, "vision", 10, "shared").await;
        let admission = &fx.engine.admission;

        let err = admission.admit(&project, 1, None).await.unwrap_err();
        match err {
            CoreError::Forbidden(msg) => {
                assert!(msg.contains("'dedicated' is not allowed"), "{}", msg);
                assert!(msg.ends_with("Allowed: shared"), "{}", msg);
            }
            other => panic!("expected forbidden, got {:?}", other),
        }

        assert_eq!(admission.admit(&project, 10, Some("shared")).await.unwrap(), "shared");
        let err = admission.admit(&project, 11, Some("Shared")).await.unwrap_err();
        assert!(matches!(err, CoreError::QuotaExceeded(ref m) if m == "GPU quota exceeded. Current: 0, Requested: 11, Quota: 10"));
    }

    #[tokio::test]
    async fn usage_is_monotonic_over_admissions() {
        let fx = Fixture::new();
        let team = fx.group("team").await;
        let project = fx.project(team.id, "nlp", 40, "shared,dedicated").await;
        let ns = format!("proj-{}-alice", project.id);
        fx.mock.ensure_namespace(&ns, &Default::default()).await.unwrap();

        let mut last = 0;
        for (i, (resource, qty)) in [("nvidia.com/gpu.shared", "2"), ("nvidia.com/gpu", "1"), ("nvidia.com/gpu.shared", "5")]
            .into_iter()
            .enumerate()
        {
            fx.engine.admission.admit(&project, 1, Some("shared")).await.unwrap();
            fx.mock
                .apply_object(&ns, &gpu_pod(&format!("p{}", i), resource, qty, "Pending"))
                .await
                .unwrap();
            let usage = fx.engine.admission.current_usage(project.id).await.unwrap();
            assert!(usage >= last);
            last = usage;
        }
        assert_eq!(last, 17);
    }
}
