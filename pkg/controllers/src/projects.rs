use chrono::Utc;
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::group::Role;
use pkg_types::project::{
    CreateProjectRequest, Project, ProjectMembershipView, UpdateProjectRequest,
    validate_access_list,
};
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::Caller;
use crate::allocator::WorkspaceAllocator;

fn check_gpu_fields(access: Option<&str>, mps_threads: Option<u8>) -> CoreResult<()> {
    if let Some(access) = access {
        validate_access_list(access).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
    }
    if mps_threads.is_some_and(|t| t > 100) {
        return Err(CoreError::InvalidInput(
            "mps_threads must be between 0 and 100".into(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ProjectService {
    repos: Repos,
    allocator: WorkspaceAllocator,
    audit: Arc<dyn AuditSink>,
}

impl ProjectService {
    pub fn new(repos: Repos, allocator: WorkspaceAllocator, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repos,
            allocator,
            audit,
        }
    }

    pub async fn list(&self) -> CoreResult<Vec<Project>> {
        Ok(self.repos.projects.list().await?)
    }

    pub async fn get(&self, id: u64) -> CoreResult<Project> {
        self.repos
            .projects
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", id)))
    }

    /// Projects reachable through the user's group memberships.
    pub async fn list_by_user(&self, user_id: u64) -> CoreResult<Vec<ProjectMembershipView>> {
        let mut views = Vec::new();
        for m in self.repos.memberships.list_by_user(user_id).await? {
            let Some(group) = self.repos.groups.get(m.group_id).await? else {
                continue;
            };
            for project in self.repos.projects.list_by_group(group.id).await? {
                views.push(ProjectMembershipView {
                    project,
                    group_name: group.name.clone(),
                    role: m.role,
                });
            }
        }
        Ok(views)
    }

    /// The user's role in the group owning the project.
    pub async fn role_of(&self, user_id: u64, project_id: u64) -> CoreResult<Option<Role>> {
        let group_id = self
            .repos
            .projects
            .group_id_of(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", project_id)))?;
        Ok(self
            .repos
            .memberships
            .get(user_id, group_id)
            .await?
            .map(|m| m.role))
    }

    /// Create the project and a namespace for every group member. If
    /// provisioning fails the row is removed again.
    pub async fn create(&self, caller: &Caller, input: CreateProjectRequest) -> CoreResult<Project> {
        let name = input.project_name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("project name must not be empty".into()));
        }
        check_gpu_fields(input.gpu_access.as_deref(), input.mps_threads)?;
        if self.repos.groups.get(input.g_id).await?.is_none() {
            return Err(CoreError::not_found(format!("group {}", input.g_id)));
        }
        let now = Utc::now();
        let project = self
            .repos
            .projects
            .create(Project {
                id: 0,
                name,
                description: input.description.unwrap_or_default(),
                group_id: input.g_id,
                gpu_quota: input.gpu_quota.unwrap_or(0),
                gpu_access: input
                    .gpu_access
                    .unwrap_or_else(|| pkg_constants::gpu::ACCESS_SHARED.to_string()),
                mps_threads: input.mps_threads.unwrap_or(0),
                mps_memory_mib: input.mps_memory_mib.unwrap_or(0),
                created_at: now,
                updated_at: now,
            })
            .await?;

        if let Err(e) = self.allocator.allocate(project.id).await {
            warn!("Rolling back project {}: {}", project.id, e);
            if let Err(cleanup) = self.repos.projects.delete(project.id).await {
                warn!("Failed to remove project {} after rollback: {}", project.id, cleanup);
            }
            return Err(e);
        }
        self.audit.record(AuditEvent::created(
            &caller.actor(),
            "project",
            project.id.to_string(),
            &project,
        ));
        info!("Created project {} (id={}) in group {}", project.name, project.id, project.group_id);
        Ok(project)
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: u64,
        input: UpdateProjectRequest,
    ) -> CoreResult<Project> {
        let before = self.get(id).await?;
        check_gpu_fields(input.gpu_access.as_deref(), input.mps_threads)?;
        let mut project = before.clone();
        if let Some(name) = input.project_name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(CoreError::InvalidInput("project name must not be empty".into()));
            }
            project.name = name;
        }
        if let Some(description) = input.description {
            project.description = description;
        }
        if let Some(g_id) = input.g_id {
            if self.repos.groups.get(g_id).await?.is_none() {
                return Err(CoreError::not_found(format!("group {}", g_id)));
            }
            project.group_id = g_id;
        }
        if let Some(quota) = input.gpu_quota {
            project.gpu_quota = quota;
        }
        if let Some(access) = input.gpu_access {
            project.gpu_access = access;
        }
        if let Some(threads) = input.mps_threads {
            project.mps_threads = threads;
        }
        if let Some(memory) = input.mps_memory_mib {
            project.mps_memory_mib = memory;
        }

        let moved = project.group_id != before.group_id;
        if moved {
            if let Err(e) = self.allocator.deallocate(id).await {
                warn!("Failed to release namespaces of project {}: {}", id, e);
            }
        }
        project.updated_at = Utc::now();
        self.repos.projects.update(&project).await?;
        if moved {
            self.allocator.allocate(id).await?;
        }
        self.audit.record(AuditEvent::updated(
            &caller.actor(),
            "project",
            id.to_string(),
            &before,
            &project,
        ));
        Ok(project)
    }

    /// Release every member namespace, then drop the project and the config
    /// files it owns. Release failures are logged, not returned.
    pub async fn delete(&self, caller: &Caller, id: u64) -> CoreResult<()> {
        let project = self.get(id).await?;
        if let Err(e) = self.allocator.deallocate(id).await {
            warn!("Failed to release namespaces of project {}: {}", id, e);
        }
        self.repos.projects.delete(id).await?;
        self.audit
            .record(AuditEvent::deleted(&caller.actor(), "project", id.to_string(), &project));
        info!("Deleted project {} (id={})", project.name, id);
        Ok(())
    }
}
