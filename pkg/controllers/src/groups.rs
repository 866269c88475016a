use chrono::Utc;
use pkg_constants::auth::RESERVED_GROUP_NAME;
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::group::{CreateGroupRequest, Group, UpdateGroupRequest};
use pkg_types::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::Caller;
use crate::allocator::WorkspaceAllocator;

fn reserved(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(RESERVED_GROUP_NAME)
}

#[derive(Clone)]
pub struct GroupService {
    repos: Repos,
    allocator: WorkspaceAllocator,
    audit: Arc<dyn AuditSink>,
}

impl GroupService {
    pub fn new(repos: Repos, allocator: WorkspaceAllocator, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            repos,
            allocator,
            audit,
        }
    }

    pub async fn list(&self) -> CoreResult<Vec<Group>> {
        Ok(self.repos.groups.list().await?)
    }

    pub async fn get(&self, id: u64) -> CoreResult<Group> {
        self.repos
            .groups
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("group {}", id)))
    }

    pub async fn create(&self, caller: &Caller, input: CreateGroupRequest) -> CoreResult<Group> {
        let name = input.group_name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("group name must not be empty".into()));
        }
        if reserved(&name) {
            return Err(CoreError::Forbidden(format!(
                "cannot use reserved group name '{}'",
                RESERVED_GROUP_NAME
            )));
        }
        if self.repos.groups.get_by_name(&name).await?.is_some() {
            return Err(CoreError::AlreadyExists(format!("group '{}' already exists", name)));
        }
        let now = Utc::now();
        let group = self
            .repos
            .groups
            .create(Group {
                id: 0,
                name,
                description: input.description.unwrap_or_default(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit
            .record(AuditEvent::created(&caller.actor(), "group", group.id.to_string(), &group));
        info!("Created group {} (id={})", group.name, group.id);
        Ok(group)
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: u64,
        input: UpdateGroupRequest,
    ) -> CoreResult<Group> {
        let before = self.get(id).await?;
        if reserved(&before.name) {
            return Err(CoreError::Forbidden(format!(
                "cannot modify reserved group '{}'",
                RESERVED_GROUP_NAME
            )));
        }
        let mut group = before.clone();
        if let Some(name) = input.group_name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(CoreError::InvalidInput("group name must not be empty".into()));
            }
            if reserved(&name) {
                return Err(CoreError::Forbidden(format!(
                    "cannot use reserved group name '{}'",
                    RESERVED_GROUP_NAME
                )));
            }
            if name != group.name && self.repos.groups.get_by_name(&name).await?.is_some() {
                return Err(CoreError::AlreadyExists(format!("group '{}' already exists", name)));
            }
            group.name = name;
        }
        if let Some(description) = input.description {
            group.description = description;
        }
        group.updated_at = Utc::now();
        self.repos.groups.update(&group).await?;
        self.audit.record(AuditEvent::updated(
            &caller.actor(),
            "group",
            id.to_string(),
            &before,
            &group,
        ));
        Ok(group)
    }

    /// Release the namespaces of every project in the group, then delete the
    /// group together with its memberships and projects. Release failures
    /// are logged, not returned.
    pub async fn delete(&self, caller: &Caller, id: u64) -> CoreResult<()> {
        let group = self.get(id).await?;
        if reserved(&group.name) {
            return Err(CoreError::Forbidden(format!(
                "cannot delete reserved group '{}'",
                RESERVED_GROUP_NAME
            )));
        }
        for project in self.repos.projects.list_by_group(id).await? {
            if let Err(e) = self.allocator.deallocate(project.id).await {
                warn!("Failed to release namespaces of project {}: {}", project.id, e);
            }
        }
        self.repos.groups.delete(id).await?;
        self.audit
            .record(AuditEvent::deleted(&caller.actor(), "group", id.to_string(), &group));
        info!("Deleted group {} (id={})", group.name, id);
        Ok(())
    }
}
