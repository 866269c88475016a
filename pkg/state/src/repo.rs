use async_trait::async_trait;
use pkg_types::audit::AuditEvent;
use pkg_types::config_file::{ConfigFile, Resource};
use pkg_types::gpu_request::{GpuRequest, GpuRequestStatus};
use pkg_types::group::{Group, Membership};
use pkg_types::job::Job;
use pkg_types::project::Project;
use pkg_types::user::User;
use std::sync::Arc;

use crate::client::KvStore;
use crate::kv::KvRepository;

/// Entities passed to `create` with `id == 0` receive the next id from the
/// entity sequence; a non-zero id is kept and advances the sequence past it.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: User) -> anyhow::Result<User>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<User>>;
    async fn get_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn update(&self, user: &User) -> anyhow::Result<()>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn create(&self, group: Group) -> anyhow::Result<Group>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<Group>>;
    async fn get_by_name(&self, name: &str) -> anyhow::Result<Option<Group>>;
    async fn list(&self) -> anyhow::Result<Vec<Group>>;
    async fn update(&self, group: &Group) -> anyhow::Result<()>;
    /// Deletes the group, its memberships, and its projects with everything they own.
    async fn delete(&self, id: u64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    async fn create(&self, membership: Membership) -> anyhow::Result<Membership>;
    async fn get(&self, user_id: u64, group_id: u64) -> anyhow::Result<Option<Membership>>;
    async fn update(&self, membership: &Membership) -> anyhow::Result<()>;
    async fn delete(&self, user_id: u64, group_id: u64) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<Membership>>;
    async fn list_by_user(&self, user_id: u64) -> anyhow::Result<Vec<Membership>>;
    async fn list_by_group(&self, group_id: u64) -> anyhow::Result<Vec<Membership>>;
}

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn create(&self, project: Project) -> anyhow::Result<Project>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<Project>>;
    async fn list(&self) -> anyhow::Result<Vec<Project>>;
    async fn list_by_group(&self, group_id: u64) -> anyhow::Result<Vec<Project>>;
    async fn update(&self, project: &Project) -> anyhow::Result<()>;
    /// Deletes the project and its config files with their resources.
    async fn delete(&self, id: u64) -> anyhow::Result<()>;
    async fn group_id_of(&self, id: u64) -> anyhow::Result<Option<u64>>;
}

#[async_trait]
pub trait ConfigFileRepo: Send + Sync {
    async fn create(&self, config_file: ConfigFile) -> anyhow::Result<ConfigFile>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<ConfigFile>>;
    async fn list(&self) -> anyhow::Result<Vec<ConfigFile>>;
    async fn list_by_project(&self, project_id: u64) -> anyhow::Result<Vec<ConfigFile>>;
    async fn update(&self, config_file: &ConfigFile) -> anyhow::Result<()>;
    /// Deletes the config file and the resources it owns.
    async fn delete(&self, id: u64) -> anyhow::Result<()>;
    /// Group that owns the project the config file belongs to.
    async fn group_id_of(&self, id: u64) -> anyhow::Result<Option<u64>>;
}

#[async_trait]
pub trait ResourceRepo: Send + Sync {
    async fn create(&self, resource: Resource) -> anyhow::Result<Resource>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<Resource>>;
    /// Resources of one config file in id (bundle) order.
    async fn list_by_config_file(&self, config_file_id: u64) -> anyhow::Result<Vec<Resource>>;
    async fn update(&self, resource: &Resource) -> anyhow::Result<()>;
    async fn delete(&self, id: u64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn create(&self, job: Job) -> anyhow::Result<Job>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<Job>>;
    async fn list(&self) -> anyhow::Result<Vec<Job>>;
    async fn list_by_user(&self, user_id: u64) -> anyhow::Result<Vec<Job>>;
    async fn update(&self, job: &Job) -> anyhow::Result<()>;
}

#[async_trait]
pub trait GpuRequestRepo: Send + Sync {
    async fn create(&self, request: GpuRequest) -> anyhow::Result<GpuRequest>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<GpuRequest>>;
    async fn list_by_project(&self, project_id: u64) -> anyhow::Result<Vec<GpuRequest>>;
    async fn list_pending(&self) -> anyhow::Result<Vec<GpuRequest>>;
    async fn update(&self, request: &GpuRequest) -> anyhow::Result<()>;
    /// Move a pending request to `status`. `None` when the request is
    /// missing or already decided.
    async fn transition_if_pending(
        &self,
        id: u64,
        status: GpuRequestStatus,
    ) -> anyhow::Result<Option<GpuRequest>>;
}

#[async_trait]
pub trait AuditRepo: Send + Sync {
    async fn append(&self, event: AuditEvent) -> anyhow::Result<AuditEvent>;
    /// Most recent events first, at most `limit`.
    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>>;
}

/// The process-wide repository set handed to every service.
#[derive(Clone)]
pub struct Repos {
    pub users: Arc<dyn UserRepo>,
    pub groups: Arc<dyn GroupRepo>,
    pub memberships: Arc<dyn MembershipRepo>,
    pub projects: Arc<dyn ProjectRepo>,
    pub config_files: Arc<dyn ConfigFileRepo>,
    pub resources: Arc<dyn ResourceRepo>,
    pub jobs: Arc<dyn JobRepo>,
    pub gpu_requests: Arc<dyn GpuRequestRepo>,
    pub audit: Arc<dyn AuditRepo>,
}

impl Repos {
    /// Back every repository with one key-value store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let kv = Arc::new(KvRepository::new(store));
        Self {
            users: kv.clone(),
            groups: kv.clone(),
            memberships: kv.clone(),
            projects: kv.clone(),
            config_files: kv.clone(),
            resources: kv.clone(),
            jobs: kv.clone(),
            gpu_requests: kv.clone(),
            audit: kv,
        }
    }

    /// Repositories over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::client::MemoryStore::new()))
    }
}
