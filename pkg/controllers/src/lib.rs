//! Workspace orchestration services.
//!
//! Everything here is built once in the composition root and shared by
//! the HTTP layer through [`Engine`]. Services hold only `Arc`s and are
//! cheap to clone.

pub mod accounts;
pub mod admission;
pub mod allocator;
pub mod archive;
pub mod config_file;
pub mod gate;
pub mod gpu_request;
pub mod groups;
pub mod jobs;
pub mod memberships;
pub mod policy;
pub mod project_storage;
pub mod projects;
pub mod storage_hub;

use pkg_cluster::ClusterGateway;
use pkg_constants::gpu::{DEFAULT_JOB_POLL_SECS, DEFAULT_JOB_PRIORITY_CLASS};
use pkg_constants::storage::{DEFAULT_STORAGE_CLASS, DEFAULT_STORAGE_SIZE};
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::Actor;
use std::sync::Arc;
use std::time::Duration;

pub use accounts::AccountService;
pub use admission::GpuAdmission;
pub use allocator::WorkspaceAllocator;
pub use archive::ManifestArchive;
pub use config_file::ConfigFileService;
pub use gate::PermissionGate;
pub use gpu_request::GpuRequestService;
pub use groups::GroupService;
pub use jobs::{JobService, JobStatusReconciler};
pub use memberships::MembershipService;
pub use project_storage::ProjectStorageService;
pub use projects::ProjectService;
pub use storage_hub::StorageHub;

/// The authenticated identity a service call runs as.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: u64,
    pub username: String,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Caller {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: Some(self.user_id),
            username: Some(self.username.clone()),
            source_ip: self.source_ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage_class: String,
    pub storage_size: String,
    pub job_priority_class: String,
    pub job_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            storage_size: DEFAULT_STORAGE_SIZE.to_string(),
            job_priority_class: DEFAULT_JOB_PRIORITY_CLASS.to_string(),
            job_poll_interval: Duration::from_secs(DEFAULT_JOB_POLL_SECS),
        }
    }
}

/// Every service of the platform, wired to one repository set and one
/// cluster gateway.
#[derive(Clone)]
pub struct Engine {
    pub repos: Repos,
    pub gateway: Arc<dyn ClusterGateway>,
    pub audit: Arc<dyn AuditSink>,
    pub config: EngineConfig,
    pub gate: PermissionGate,
    pub hub: StorageHub,
    pub allocator: WorkspaceAllocator,
    pub admission: GpuAdmission,
    pub accounts: AccountService,
    pub groups: GroupService,
    pub memberships: MembershipService,
    pub projects: ProjectService,
    pub config_files: ConfigFileService,
    pub gpu_requests: GpuRequestService,
    pub jobs: JobService,
    pub project_storage: ProjectStorageService,
}

impl Engine {
    pub fn new(
        repos: Repos,
        gateway: Arc<dyn ClusterGateway>,
        archive: ManifestArchive,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let gate = PermissionGate::new(repos.clone());
        let hub = StorageHub::new(gateway.clone(), &config.storage_class, &config.storage_size);
        let allocator = WorkspaceAllocator::new(repos.clone(), gateway.clone());
        let admission = GpuAdmission::new(gateway.clone());
        let accounts = AccountService::new(repos.clone(), audit.clone());
        let groups = GroupService::new(repos.clone(), allocator.clone(), audit.clone());
        let memberships =
            MembershipService::new(repos.clone(), allocator.clone(), audit.clone());
        let projects = ProjectService::new(repos.clone(), allocator.clone(), audit.clone());
        let config_files = ConfigFileService::new(
            repos.clone(),
            gateway.clone(),
            hub.clone(),
            allocator.clone(),
            gate.clone(),
            archive,
            audit.clone(),
        );
        let gpu_requests = GpuRequestService::new(repos.clone(), audit.clone());
        let jobs = JobService::new(
            repos.clone(),
            gateway.clone(),
            admission.clone(),
            gate.clone(),
            audit.clone(),
            &config.job_priority_class,
        );
        let project_storage = ProjectStorageService::new(
            repos.clone(),
            gateway.clone(),
            hub.clone(),
            &config.storage_class,
            &config.storage_size,
        );
        Self {
            repos,
            gateway,
            audit,
            config,
            gate,
            hub,
            allocator,
            admission,
            accounts,
            groups,
            memberships,
            projects,
            config_files,
            gpu_requests,
            jobs,
            project_storage,
        }
    }

    /// Background loop that keeps job rows in step with the cluster.
    pub fn job_reconciler(&self) -> JobStatusReconciler {
        JobStatusReconciler::new(
            self.repos.clone(),
            self.gateway.clone(),
            self.config.job_poll_interval,
        )
    }
}
