use async_trait::async_trait;
use pkg_constants::state::*;
use pkg_types::audit::AuditEvent;
use pkg_types::config_file::{ConfigFile, Resource};
use pkg_types::gpu_request::{GpuRequest, GpuRequestStatus};
use pkg_types::group::{Group, Membership};
use pkg_types::job::Job;
use pkg_types::project::Project;
use pkg_types::user::User;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::KvStore;
use crate::repo::*;

/// The single repository implementation: every entity is a JSON document
/// under `/registry/<entity>/<zero-padded id>`.
pub struct KvRepository {
    store: Arc<dyn KvStore>,
    seq_lock: Mutex<()>,
}

fn pad(id: u64) -> String {
    format!("{:0width$}", id, width = ID_WIDTH)
}

fn entity_key(prefix: &str, id: u64) -> String {
    format!("{}{}", prefix, pad(id))
}

fn membership_key(user_id: u64, group_id: u64) -> String {
    format!("{}{}/{}", MEMBERSHIPS_PREFIX, pad(user_id), pad(group_id))
}

fn resource_key(config_file_id: u64, id: u64) -> String {
    format!("{}{}/{}", RESOURCES_PREFIX, pad(config_file_id), pad(id))
}

impl KvRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            seq_lock: Mutex::new(()),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(value)?;
        self.store.put(key, &data).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.store.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn list_json<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<T>> {
        let entries = self.store.list_prefix(prefix).await?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice(&value) {
                Ok(v) => out.push(v),
                Err(e) => debug!("Skipping undecodable entry {}: {}", key, e),
            }
        }
        Ok(out)
    }

    /// Allocate the next id for `entity`, or reserve `requested` when non-zero.
    async fn assign_id(&self, entity: &str, requested: u64) -> anyhow::Result<u64> {
        let _guard = self.seq_lock.lock().await;
        let key = format!("{}{}", SEQUENCES_PREFIX, entity);
        let current: u64 = match self.store.get(&key).await? {
            Some(data) => String::from_utf8_lossy(&data).parse()?,
            None => 0,
        };
        let id = if requested == 0 { current + 1 } else { requested };
        if id > current {
            self.store.put(&key, id.to_string().as_bytes()).await?;
        }
        Ok(id)
    }

    async fn delete_resources_of(&self, config_file_id: u64) -> anyhow::Result<()> {
        let prefix = format!("{}{}/", RESOURCES_PREFIX, pad(config_file_id));
        for (key, _) in self.store.list_prefix(&prefix).await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    async fn delete_config_file_cascade(&self, id: u64) -> anyhow::Result<()> {
        self.delete_resources_of(id).await?;
        self.store.delete(&entity_key(CONFIG_FILES_PREFIX, id)).await
    }

    async fn delete_project_cascade(&self, id: u64) -> anyhow::Result<()> {
        let config_files: Vec<ConfigFile> = self.list_json(CONFIG_FILES_PREFIX).await?;
        for cf in config_files.into_iter().filter(|cf| cf.project_id == id) {
            self.delete_config_file_cascade(cf.id).await?;
        }
        self.store.delete(&entity_key(PROJECTS_PREFIX, id)).await
    }
}

// ============================================================
// Users
// ============================================================

#[async_trait]
impl UserRepo for KvRepository {
    async fn create(&self, mut user: User) -> anyhow::Result<User> {
        user.id = self.assign_id("users", user.id).await?;
        self.put_json(&entity_key(USERS_PREFIX, user.id), &user).await?;
        Ok(user)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<User>> {
        self.get_json(&entity_key(USERS_PREFIX, id)).await
    }

    async fn get_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let users: Vec<User> = self.list_json(USERS_PREFIX).await?;
        Ok(users.into_iter().find(|u| u.username == username))
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        self.list_json(USERS_PREFIX).await
    }

    async fn update(&self, user: &User) -> anyhow::Result<()> {
        self.put_json(&entity_key(USERS_PREFIX, user.id), user).await
    }
}

// ============================================================
// Groups
// ============================================================

#[async_trait]
impl GroupRepo for KvRepository {
    async fn create(&self, mut group: Group) -> anyhow::Result<Group> {
        group.id = self.assign_id("groups", group.id).await?;
        self.put_json(&entity_key(GROUPS_PREFIX, group.id), &group).await?;
        Ok(group)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<Group>> {
        self.get_json(&entity_key(GROUPS_PREFIX, id)).await
    }

    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<Group>> {
        let groups: Vec<Group> = self.list_json(GROUPS_PREFIX).await?;
        Ok(groups.into_iter().find(|g| g.name == name))
    }

    async fn list(&self) -> anyhow::Result<Vec<Group>> {
        self.list_json(GROUPS_PREFIX).await
    }

    async fn update(&self, group: &Group) -> anyhow::Result<()> {
        self.put_json(&entity_key(GROUPS_PREFIX, group.id), group).await
    }

    async fn delete(&self, id: u64) -> anyhow::Result<()> {
        let projects: Vec<Project> = self.list_json(PROJECTS_PREFIX).await?;
        for p in projects.into_iter().filter(|p| p.group_id == id) {
            self.delete_project_cascade(p.id).await?;
        }
        let memberships: Vec<Membership> = self.list_json(MEMBERSHIPS_PREFIX).await?;
        for m in memberships.into_iter().filter(|m| m.group_id == id) {
            self.store
                .delete(&membership_key(m.user_id, m.group_id))
                .await?;
        }
        self.store.delete(&entity_key(GROUPS_PREFIX, id)).await
    }
}

// ============================================================
// Memberships
// ============================================================

#[async_trait]
impl MembershipRepo for KvRepository {
    async fn create(&self, membership: Membership) -> anyhow::Result<Membership> {
        self.put_json(
            &membership_key(membership.user_id, membership.group_id),
            &membership,
        )
        .await?;
        Ok(membership)
    }

    async fn get(&self, user_id: u64, group_id: u64) -> anyhow::Result<Option<Membership>> {
        self.get_json(&membership_key(user_id, group_id)).await
    }

    async fn update(&self, membership: &Membership) -> anyhow::Result<()> {
        self.put_json(
            &membership_key(membership.user_id, membership.group_id),
            membership,
        )
        .await
    }

    async fn delete(&self, user_id: u64, group_id: u64) -> anyhow::Result<()> {
        self.store.delete(&membership_key(user_id, group_id)).await
    }

    async fn list(&self) -> anyhow::Result<Vec<Membership>> {
        self.list_json(MEMBERSHIPS_PREFIX).await
    }

    async fn list_by_user(&self, user_id: u64) -> anyhow::Result<Vec<Membership>> {
        let prefix = format!("{}{}/", MEMBERSHIPS_PREFIX, pad(user_id));
        self.list_json(&prefix).await
    }

    async fn list_by_group(&self, group_id: u64) -> anyhow::Result<Vec<Membership>> {
        let all: Vec<Membership> = self.list_json(MEMBERSHIPS_PREFIX).await?;
        Ok(all.into_iter().filter(|m| m.group_id == group_id).collect())
    }
}

// ============================================================
// Projects
// ============================================================

#[async_trait]
impl ProjectRepo for KvRepository {
    async fn create(&self, mut project: Project) -> anyhow::Result<Project> {
        project.id = self.assign_id("projects", project.id).await?;
        self.put_json(&entity_key(PROJECTS_PREFIX, project.id), &project)
            .await?;
        Ok(project)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<Project>> {
        self.get_json(&entity_key(PROJECTS_PREFIX, id)).await
    }

    async fn list(&self) -> anyhow::Result<Vec<Project>> {
        self.list_json(PROJECTS_PREFIX).await
    }

    async fn list_by_group(&self, group_id: u64) -> anyhow::Result<Vec<Project>> {
        let all: Vec<Project> = self.list_json(PROJECTS_PREFIX).await?;
        Ok(all.into_iter().filter(|p| p.group_id == group_id).collect())
    }

    async fn update(&self, project: &Project) -> anyhow::Result<()> {
        self.put_json(&entity_key(PROJECTS_PREFIX, project.id), project)
            .await
    }

    async fn delete(&self, id: u64) -> anyhow::Result<()> {
        self.delete_project_cascade(id).await
    }

    async fn group_id_of(&self, id: u64) -> anyhow::Result<Option<u64>> {
        let project: Option<Project> = self.get_json(&entity_key(PROJECTS_PREFIX, id)).await?;
        Ok(project.map(|p| p.group_id))
    }
}

// ============================================================
// Config files
// ============================================================

#[async_trait]
impl ConfigFileRepo for KvRepository {
    async fn create(&self, mut config_file: ConfigFile) -> anyhow::Result<ConfigFile> {
        config_file.id = self.assign_id("configfiles", config_file.id).await?;
        self.put_json(&entity_key(CONFIG_FILES_PREFIX, config_file.id), &config_file)
            .await?;
        Ok(config_file)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<ConfigFile>> {
        self.get_json(&entity_key(CONFIG_FILES_PREFIX, id)).await
    }

    async fn list(&self) -> anyhow::Result<Vec<ConfigFile>> {
        self.list_json(CONFIG_FILES_PREFIX).await
    }

    async fn list_by_project(&self, project_id: u64) -> anyhow::Result<Vec<ConfigFile>> {
        let all: Vec<ConfigFile> = self.list_json(CONFIG_FILES_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|cf| cf.project_id == project_id)
            .collect())
    }

    async fn update(&self, config_file: &ConfigFile) -> anyhow::Result<()> {
        self.put_json(&entity_key(CONFIG_FILES_PREFIX, config_file.id), config_file)
            .await
    }

    async fn delete(&self, id: u64) -> anyhow::Result<()> {
        self.delete_config_file_cascade(id).await
    }

    async fn group_id_of(&self, id: u64) -> anyhow::Result<Option<u64>> {
        let cf: Option<ConfigFile> = self.get_json(&entity_key(CONFIG_FILES_PREFIX, id)).await?;
        match cf {
            Some(cf) => ProjectRepo::group_id_of(self, cf.project_id).await,
            None => Ok(None),
        }
    }
}

// ============================================================
// Resources
// ============================================================

#[async_trait]
impl ResourceRepo for KvRepository {
    async fn create(&self, mut resource: Resource) -> anyhow::Result<Resource> {
        resource.id = self.assign_id("resources", resource.id).await?;
        self.put_json(
            &resource_key(resource.config_file_id, resource.id),
            &resource,
        )
        .await?;
        Ok(resource)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<Resource>> {
        let all: Vec<Resource> = self.list_json(RESOURCES_PREFIX).await?;
        Ok(all.into_iter().find(|r| r.id == id))
    }

    async fn list_by_config_file(&self, config_file_id: u64) -> anyhow::Result<Vec<Resource>> {
        let prefix = format!("{}{}/", RESOURCES_PREFIX, pad(config_file_id));
        self.list_json(&prefix).await
    }

    async fn update(&self, resource: &Resource) -> anyhow::Result<()> {
        self.put_json(&resource_key(resource.config_file_id, resource.id), resource)
            .await
    }

    async fn delete(&self, id: u64) -> anyhow::Result<()> {
        if let Some(resource) = ResourceRepo::get(self, id).await? {
            self.store
                .delete(&resource_key(resource.config_file_id, resource.id))
                .await?;
        }
        Ok(())
    }
}

// ============================================================
// Jobs
// ============================================================

#[async_trait]
impl JobRepo for KvRepository {
    async fn create(&self, mut job: Job) -> anyhow::Result<Job> {
        job.id = self.assign_id("jobs", job.id).await?;
        self.put_json(&entity_key(JOBS_PREFIX, job.id), &job).await?;
        Ok(job)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<Job>> {
        self.get_json(&entity_key(JOBS_PREFIX, id)).await
    }

    async fn list(&self) -> anyhow::Result<Vec<Job>> {
        self.list_json(JOBS_PREFIX).await
    }

    async fn list_by_user(&self, user_id: u64) -> anyhow::Result<Vec<Job>> {
        let all: Vec<Job> = self.list_json(JOBS_PREFIX).await?;
        Ok(all.into_iter().filter(|j| j.user_id == user_id).collect())
    }

    async fn update(&self, job: &Job) -> anyhow::Result<()> {
        self.put_json(&entity_key(JOBS_PREFIX, job.id), job).await
    }
}

// ============================================================
// GPU requests
// ============================================================

#[async_trait]
impl GpuRequestRepo for KvRepository {
    async fn create(&self, mut request: GpuRequest) -> anyhow::Result<GpuRequest> {
        request.id = self.assign_id("gpurequests", request.id).await?;
        self.put_json(&entity_key(GPU_REQUESTS_PREFIX, request.id), &request)
            .await?;
        Ok(request)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<GpuRequest>> {
        self.get_json(&entity_key(GPU_REQUESTS_PREFIX, id)).await
    }

    async fn list_by_project(&self, project_id: u64) -> anyhow::Result<Vec<GpuRequest>> {
        let all: Vec<GpuRequest> = self.list_json(GPU_REQUESTS_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect())
    }

    async fn list_pending(&self) -> anyhow::Result<Vec<GpuRequest>> {
        let all: Vec<GpuRequest> = self.list_json(GPU_REQUESTS_PREFIX).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.status == GpuRequestStatus::Pending)
            .collect())
    }

    async fn update(&self, request: &GpuRequest) -> anyhow::Result<()> {
        self.put_json(&entity_key(GPU_REQUESTS_PREFIX, request.id), request)
            .await
    }

    async fn transition_if_pending(
        &self,
        id: u64,
        status: GpuRequestStatus,
    ) -> anyhow::Result<Option<GpuRequest>> {
        let _guard = self.seq_lock.lock().await;
        let key = entity_key(GPU_REQUESTS_PREFIX, id);
        let mut request: GpuRequest = match self.get_json(&key).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        if request.status != GpuRequestStatus::Pending {
            return Ok(None);
        }
        request.status = status;
        request.updated_at = chrono::Utc::now();
        self.put_json(&key, &request).await?;
        Ok(Some(request))
    }
}

// ============================================================
// Audit
// ============================================================

#[async_trait]
impl AuditRepo for KvRepository {
    async fn append(&self, mut event: AuditEvent) -> anyhow::Result<AuditEvent> {
        event.id = self.assign_id("audit", 0).await?;
        self.put_json(&entity_key(AUDIT_PREFIX, event.id), &event).await?;
        Ok(event)
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let mut all: Vec<AuditEvent> = self.list_json(AUDIT_PREFIX).await?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryStore;
    use chrono::Utc;
    use pkg_types::group::Role;

    fn repo() -> KvRepository {
        KvRepository::new(Arc::new(MemoryStore::new()))
    }

    fn group(name: &str) -> Group {
        Group {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn project(group_id: u64, name: &str) -> Project {
        Project {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            group_id,
            gpu_quota: 0,
            gpu_access: "shared".to_string(),
            mps_threads: 0,
            mps_memory_mib: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn config_file(project_id: u64) -> ConfigFile {
        ConfigFile {
            id: 0,
            project_id,
            filename: "app.yaml".to_string(),
            raw_text: String::new(),
            archive_path: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn resource(config_file_id: u64, name: &str) -> Resource {
        Resource {
            id: 0,
            config_file_id,
            kind: "Pod".to_string(),
            name: name.to_string(),
            body: "{}".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_and_reservations_advance_the_sequence() {
        let repo = repo();
        let mut reserved = group("super");
        reserved.id = 1;
        let reserved = GroupRepo::create(&repo, reserved).await.unwrap();
        assert_eq!(reserved.id, 1);

        let a = GroupRepo::create(&repo, group("a")).await.unwrap();
        let b = GroupRepo::create(&repo, group("b")).await.unwrap();
        assert_eq!(a.id, 2);
        assert_eq!(b.id, 3);
        assert_eq!(GroupRepo::get_by_name(&repo, "b").await.unwrap().unwrap().id, 3);
    }

    #[tokio::test]
    async fn deleting_a_group_cascades() {
        let repo = repo();
        let g = GroupRepo::create(&repo, group("team")).await.unwrap();
        let other = GroupRepo::create(&repo, group("other")).await.unwrap();
        let p = ProjectRepo::create(&repo, project(g.id, "p1")).await.unwrap();
        let kept = ProjectRepo::create(&repo, project(other.id, "p2")).await.unwrap();
        let cf = ConfigFileRepo::create(&repo, config_file(p.id)).await.unwrap();
        ResourceRepo::create(&repo, resource(cf.id, "web")).await.unwrap();
        MembershipRepo::create(
            &repo,
            Membership {
                user_id: 2,
                group_id: g.id,
                role: Role::User,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        GroupRepo::delete(&repo, g.id).await.unwrap();

        assert!(GroupRepo::get(&repo, g.id).await.unwrap().is_none());
        assert!(ProjectRepo::get(&repo, p.id).await.unwrap().is_none());
        assert!(ConfigFileRepo::get(&repo, cf.id).await.unwrap().is_none());
        assert!(
            ResourceRepo::list_by_config_file(&repo, cf.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(MembershipRepo::get(&repo, 2, g.id).await.unwrap().is_none());
        assert!(ProjectRepo::get(&repo, kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resources_list_in_bundle_order() {
        let repo = repo();
        let cf = ConfigFileRepo::create(&repo, config_file(1)).await.unwrap();
        for name in ["zeta", "alpha", "mid"] {
            ResourceRepo::create(&repo, resource(cf.id, name)).await.unwrap();
        }
        let names: Vec<String> = ResourceRepo::list_by_config_file(&repo, cf.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn config_file_group_lookup_goes_through_project() {
        let repo = repo();
        let g = GroupRepo::create(&repo, group("team")).await.unwrap();
        let p = ProjectRepo::create(&repo, project(g.id, "p1")).await.unwrap();
        let cf = ConfigFileRepo::create(&repo, config_file(p.id)).await.unwrap();
        assert_eq!(
            ConfigFileRepo::group_id_of(&repo, cf.id).await.unwrap(),
            Some(g.id)
        );
        assert_eq!(ConfigFileRepo::group_id_of(&repo, 999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn audit_lists_newest_first() {
        let repo = repo();
        for key in ["a", "b", "c"] {
            let event = AuditEvent::created(
                &pkg_types::audit::Actor::system(),
                "group",
                key,
                &serde_json::json!({}),
            );
            repo.append(event).await.unwrap();
        }
        let recent = repo.list_recent(2).await.unwrap();
        let keys: Vec<&str> = recent.iter().map(|e| e.resource_key.as_str()).collect();
        assert_eq!(keys, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn gpu_request_leaves_pending_once() {
        let repo = repo();
        let request = GpuRequestRepo::create(
            &repo,
            GpuRequest {
                id: 0,
                project_id: 1,
                requester_id: 1,
                kind: pkg_types::gpu_request::GpuRequestKind::Quota,
                requested_quota: Some(8),
                requested_access: None,
                reason: String::new(),
                status: GpuRequestStatus::Pending,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let done = repo
            .transition_if_pending(request.id, GpuRequestStatus::Rejected)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, GpuRequestStatus::Rejected);
        assert!(repo
            .transition_if_pending(request.id, GpuRequestStatus::Approved)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .transition_if_pending(999, GpuRequestStatus::Approved)
            .await
            .unwrap()
            .is_none());
        let stored = GpuRequestRepo::get(&repo, request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GpuRequestStatus::Rejected);
    }
}
