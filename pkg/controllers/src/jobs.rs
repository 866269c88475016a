use chrono::Utc;
use pkg_cluster::{ClusterGateway, JobSpec, JobVolumeSpec};
use pkg_constants::gpu::DEFAULT_GPU_TYPE;
use pkg_constants::labels::{JOB_NAME_LABEL, MANAGED_BY_LABEL, PLATFORM_NAME};
use pkg_manifest::naming::{format_namespace, parse_project_namespace, sanitise};
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::job::{Job, JobStatus, JobSubmission};
use pkg_types::validate::validate_name;
use pkg_types::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Caller;
use crate::admission::GpuAdmission;
use crate::gate::PermissionGate;
use crate::policy::translate_gpu;

/// GPU-admitted batch job submission.
#[derive(Clone)]
pub struct JobService {
    repos: Repos,
    gateway: Arc<dyn ClusterGateway>,
    admission: GpuAdmission,
    gate: PermissionGate,
    audit: Arc<dyn AuditSink>,
    priority_class: String,
}

impl JobService {
    pub fn new(
        repos: Repos,
        gateway: Arc<dyn ClusterGateway>,
        admission: GpuAdmission,
        gate: PermissionGate,
        audit: Arc<dyn AuditSink>,
        priority_class: &str,
    ) -> Self {
        Self {
            repos,
            gateway,
            admission,
            gate,
            audit,
            priority_class: priority_class.to_string(),
        }
    }

    /// Admit, translate and submit a job into one of the caller's project
    /// namespaces (any namespace for a super-admin).
    pub async fn submit(&self, caller: &Caller, input: JobSubmission) -> CoreResult<Job> {
        validate_name(&input.name).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        if input.image.trim().is_empty() {
            return Err(CoreError::InvalidInput("image must not be empty".into()));
        }
        let project_id = parse_project_namespace(&input.namespace).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "namespace '{}' is not a project namespace",
                input.namespace
            ))
        })?;
        let admin = self.gate.is_super_admin(caller.user_id).await?;
        if !admin && input.namespace != format_namespace(project_id, &sanitise(&caller.username)) {
            return Err(CoreError::Forbidden(
                "jobs can only be submitted to your own namespace".into(),
            ));
        }
        let project = self
            .repos
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", project_id)))?;

        let mut gpu = None;
        let mut annotations = BTreeMap::new();
        let mut gpu_type = None;
        if input.gpu_count > 0 {
            let resolved = self
                .admission
                .admit(&project, input.gpu_count, input.gpu_type.as_deref())
                .await?;
            let plan = translate_gpu(input.gpu_count, &resolved, &project.gpu_settings())?;
            gpu = Some((plan.resource_name, plan.quantity));
            annotations = plan.annotations;
            gpu_type = Some(resolved);
        }

        let spec = JobSpec {
            name: input.name.clone(),
            namespace: input.namespace.clone(),
            image: input.image.clone(),
            command: input.command,
            env: input.env,
            parallelism: input.parallelism.unwrap_or(1),
            completions: input.completions.unwrap_or(1),
            priority_class: Some(self.priority_class.clone()),
            annotations,
            labels: BTreeMap::from([
                (MANAGED_BY_LABEL.to_string(), PLATFORM_NAME.to_string()),
                (JOB_NAME_LABEL.to_string(), input.name.clone()),
            ]),
            gpu,
            cpu_request: input.cpu_request,
            memory_request: input.memory_request,
            volumes: input
                .volumes
                .into_iter()
                .map(|v| JobVolumeSpec {
                    name: v.name,
                    claim_name: v.claim_name,
                    host_path: v.host_path,
                    mount_path: v.mount_path,
                })
                .collect(),
        };
        self.gateway.submit_job(&spec).await?;

        let now = Utc::now();
        let job = self
            .repos
            .jobs
            .create(Job {
                id: 0,
                user_id: caller.user_id,
                project_id,
                name: input.name.clone(),
                namespace: input.namespace,
                image: input.image,
                priority_class: self.priority_class.clone(),
                cluster_job_name: input.name,
                gpu_count: input.gpu_count,
                gpu_type: gpu_type.or_else(|| {
                    (input.gpu_count > 0).then(|| DEFAULT_GPU_TYPE.to_string())
                }),
                status: JobStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit
            .record(AuditEvent::created(&caller.actor(), "job", job.id.to_string(), &job));
        info!("Submitted job {}/{} (id={})", job.namespace, job.name, job.id);
        Ok(job)
    }

    /// All jobs for a super-admin, otherwise the caller's own.
    pub async fn list(&self, caller: &Caller) -> CoreResult<Vec<Job>> {
        if self.gate.is_super_admin(caller.user_id).await? {
            Ok(self.repos.jobs.list().await?)
        } else {
            Ok(self.repos.jobs.list_by_user(caller.user_id).await?)
        }
    }

    pub async fn get(&self, caller: &Caller, id: u64) -> CoreResult<Job> {
        let job = self
            .repos
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("job {}", id)))?;
        if job.user_id != caller.user_id && !self.gate.is_super_admin(caller.user_id).await? {
            return Err(CoreError::Forbidden("not your job".into()));
        }
        Ok(job)
    }
}

/// Status of a cluster batch job object.
fn observed_status(object: &Value) -> JobStatus {
    let status = object.get("status");
    let condition = |kind: &str| {
        status
            .and_then(|s| s.get("conditions"))
            .and_then(Value::as_array)
            .is_some_and(|conds| {
                conds.iter().any(|c| {
                    c.get("type").and_then(Value::as_str) == Some(kind)
                        && c.get("status").and_then(Value::as_str) == Some("True")
                })
            })
    };
    let count = |field: &str| {
        status
            .and_then(|s| s.get(field))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };
    if condition("Complete") {
        JobStatus::Succeeded
    } else if condition("Failed") {
        JobStatus::Failed
    } else if count("active") > 0 {
        JobStatus::Running
    } else if count("succeeded") > 0 && count("failed") == 0 {
        JobStatus::Succeeded
    } else if count("failed") > 0 {
        JobStatus::Failed
    } else {
        JobStatus::Pending
    }
}

/// Controller that keeps job rows in step with their cluster jobs.
pub struct JobStatusReconciler {
    repos: Repos,
    gateway: Arc<dyn ClusterGateway>,
    check_interval: Duration,
}

impl JobStatusReconciler {
    pub fn new(repos: Repos, gateway: Arc<dyn ClusterGateway>, check_interval: Duration) -> Self {
        Self {
            repos,
            gateway,
            check_interval,
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "JobStatusReconciler started (interval={}s)",
                self.check_interval.as_secs()
            );
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.reconcile().await {
                    warn!("JobStatusReconciler reconcile error: {}", e);
                }
            }
        })
    }

    /// One pass over every non-terminal job. Returns how many changed.
    pub async fn reconcile(&self) -> anyhow::Result<usize> {
        let mut changed = 0;
        for mut job in self.repos.jobs.list().await? {
            if job.status.is_terminal() {
                continue;
            }
            let object = match self
                .gateway
                .get_object(&job.namespace, "batch/v1", "Job", &job.cluster_job_name)
                .await
            {
                Ok(Some(object)) => object,
                Ok(None) => {
                    debug!("Job {}/{} not in cluster yet", job.namespace, job.cluster_job_name);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to read job {}/{}: {}", job.namespace, job.cluster_job_name, e);
                    continue;
                }
            };
            let status = observed_status(&object);
            if status != job.status {
                info!("Job {} ({}): {} -> {}", job.id, job.name, job.status, status);
                job.status = status;
                job.updated_at = Utc::now();
                self.repos.jobs.update(&job).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
