use chrono::Utc;
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::gpu_request::{CreateGpuRequest, GpuRequest, GpuRequestKind, GpuRequestStatus};
use pkg_types::project::validate_access_list;
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::Caller;

/// Approval workflow for GPU quota and access-type changes.
#[derive(Clone)]
pub struct GpuRequestService {
    repos: Repos,
    audit: Arc<dyn AuditSink>,
}

impl GpuRequestService {
    pub fn new(repos: Repos, audit: Arc<dyn AuditSink>) -> Self {
        Self { repos, audit }
    }

    pub async fn create(
        &self,
        caller: &Caller,
        project_id: u64,
        input: CreateGpuRequest,
    ) -> CoreResult<GpuRequest> {
        if self.repos.projects.get(project_id).await?.is_none() {
            return Err(CoreError::not_found(format!("project {}", project_id)));
        }
        let (requested_quota, requested_access) = match input.kind {
            GpuRequestKind::Quota => {
                let quota = input.requested_quota.ok_or_else(|| {
                    CoreError::InvalidInput("requested_quota is required for a quota request".into())
                })?;
                (Some(quota), None)
            }
            GpuRequestKind::Access => {
                let access = input
                    .requested_access_type
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| {
                        CoreError::InvalidInput(
                            "requested_access_type is required for an access request".into(),
                        )
                    })?;
                validate_access_list(&access).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
                (None, Some(access))
            }
        };

        let now = Utc::now();
        let request = self
            .repos
            .gpu_requests
            .create(GpuRequest {
                id: 0,
                project_id,
                requester_id: caller.user_id,
                kind: input.kind,
                requested_quota,
                requested_access,
                reason: input.reason,
                status: GpuRequestStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit.record(AuditEvent::created(
            &caller.actor(),
            "gpu_request",
            request.id.to_string(),
            &request,
        ));
        info!("GPU request {} opened for project {}", request.id, project_id);
        Ok(request)
    }

    pub async fn list_by_project(&self, project_id: u64) -> CoreResult<Vec<GpuRequest>> {
        Ok(self.repos.gpu_requests.list_by_project(project_id).await?)
    }

    pub async fn list_pending(&self) -> CoreResult<Vec<GpuRequest>> {
        Ok(self.repos.gpu_requests.list_pending().await?)
    }

    /// Approve or reject a pending request. The request leaves pending
    /// exactly once; approval then writes the requested value onto the
    /// project, restoring pending if that write fails.
    pub async fn process(
        &self,
        caller: &Caller,
        id: u64,
        decision: GpuRequestStatus,
    ) -> CoreResult<GpuRequest> {
        if decision == GpuRequestStatus::Pending {
            return Err(CoreError::InvalidInput(
                "status must be approved or rejected".into(),
            ));
        }
        let before = self
            .repos
            .gpu_requests
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("GPU request {}", id)))?;
        if before.status != GpuRequestStatus::Pending {
            return Err(CoreError::Conflict("request is not pending".into()));
        }
        let old_project = if decision == GpuRequestStatus::Approved {
            Some(
                self.repos
                    .projects
                    .get(before.project_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::not_found(format!("project {}", before.project_id))
                    })?,
            )
        } else {
            None
        };

        let request = self
            .repos
            .gpu_requests
            .transition_if_pending(id, decision)
            .await?
            .ok_or_else(|| CoreError::Conflict("request is not pending".into()))?;
        let actor = caller.actor();

        if let Some(old) = old_project {
            let mut project = old.clone();
            match request.kind {
                GpuRequestKind::Quota => {
                    if let Some(quota) = request.requested_quota {
                        project.gpu_quota = quota;
                    }
                }
                GpuRequestKind::Access => {
                    if let Some(access) = &request.requested_access {
                        project.gpu_access = access.clone();
                    }
                }
            }
            project.updated_at = Utc::now();
            if let Err(e) = self.repos.projects.update(&project).await {
                if let Err(restore) = self.repos.gpu_requests.update(&before).await {
                    warn!("Failed to reopen GPU request {}: {}", id, restore);
                }
                return Err(e.into());
            }
            self.audit.record(
                AuditEvent::updated(&actor, "project", project.id.to_string(), &old, &project)
                    .with_description(format!("GPU request {} approved", id)),
            );
        }

        self.audit.record(AuditEvent::updated(
            &actor,
            "gpu_request",
            id.to_string(),
            &before,
            &request,
        ));
        info!("GPU request {} {}", id, decision);
        Ok(request)
    }
}
