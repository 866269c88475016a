//! Config-file lifecycle: keeps persisted bundles and their live
//! instances in the members' project namespaces consistent.

use chrono::Utc;
use pkg_cluster::ClusterGateway;
use pkg_constants::naming::HUB_SERVICE_NAME;
use pkg_manifest::ParsedDocument;
use pkg_manifest::codec::parse_bundle;
use pkg_manifest::naming::{format_namespace, format_storage_namespace, sanitise, service_dns};
use pkg_manifest::template::{InstanceValues, substitute};
use pkg_state::{AuditSink, Repos};
use pkg_types::audit::AuditEvent;
use pkg_types::config_file::{ConfigFile, ConfigFileWithResources, Resource, UpdateConfigFileRequest};
use pkg_types::group::Role;
use pkg_types::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::Caller;
use crate::allocator::WorkspaceAllocator;
use crate::archive::ManifestArchive;
use crate::gate::PermissionGate;
use crate::policy::{self, PolicyInput};
use crate::storage_hub::StorageHub;

const CONFIG_FILE: &str = "config_file";
const RESOURCE: &str = "resource";

/// Changes needed to turn the stored resources into a new bundle,
/// matched by `metadata.name`.
#[derive(Debug, Default)]
pub struct ResourceDiff {
    pub create: Vec<ParsedDocument>,
    pub update: Vec<(Resource, ParsedDocument)>,
    pub delete: Vec<Resource>,
}

pub fn diff_resources(current: Vec<Resource>, staged: Vec<ParsedDocument>) -> ResourceDiff {
    let mut by_name: HashMap<String, Resource> =
        current.into_iter().map(|r| (r.name.clone(), r)).collect();
    let mut diff = ResourceDiff::default();
    for doc in staged {
        match by_name.remove(&doc.name) {
            Some(existing) => diff.update.push((existing, doc)),
            None => diff.create.push(doc),
        }
    }
    diff.delete = by_name.into_values().collect();
    diff.delete.sort_by_key(|r| r.id);
    diff
}

#[derive(Clone)]
pub struct ConfigFileService {
    repos: Repos,
    gateway: Arc<dyn ClusterGateway>,
    hub: StorageHub,
    allocator: WorkspaceAllocator,
    gate: PermissionGate,
    archive: ManifestArchive,
    audit: Arc<dyn AuditSink>,
}

fn instance_values(project_id: u64, username: &str, nfs_server: String) -> InstanceValues {
    let safe = sanitise(username);
    InstanceValues {
        username: safe.clone(),
        original_username: username.to_string(),
        namespace: format_namespace(project_id, &safe),
        user_storage_namespace: format_storage_namespace(&safe),
        safe_username: safe,
        nfs_server,
        project_id,
    }
}

/// Substitute the instance values into a stored resource body.
fn render(resource: &Resource, values: &InstanceValues) -> CoreResult<Value> {
    let text = substitute(&resource.body, &values.to_map())?;
    serde_json::from_str(&text).map_err(|e| CoreError::Internal(e.into()))
}

impl ConfigFileService {
    pub fn new(
        repos: Repos,
        gateway: Arc<dyn ClusterGateway>,
        hub: StorageHub,
        allocator: WorkspaceAllocator,
        gate: PermissionGate,
        archive: ManifestArchive,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            repos,
            gateway,
            hub,
            allocator,
            gate,
            archive,
            audit,
        }
    }

    pub async fn list(&self) -> CoreResult<Vec<ConfigFile>> {
        Ok(self.repos.config_files.list().await?)
    }

    pub async fn list_by_project(&self, project_id: u64) -> CoreResult<Vec<ConfigFile>> {
        Ok(self.repos.config_files.list_by_project(project_id).await?)
    }

    pub async fn get(&self, id: u64) -> CoreResult<ConfigFile> {
        self.repos
            .config_files
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("config file {}", id)))
    }

    pub async fn resources_of(&self, id: u64) -> CoreResult<Vec<Resource>> {
        self.get(id).await?;
        Ok(self.repos.resources.list_by_config_file(id).await?)
    }

    async fn insert_resource(&self, caller: &Caller, config_file_id: u64, doc: ParsedDocument) -> CoreResult<Resource> {
        let resource = self
            .repos
            .resources
            .create(Resource {
                id: 0,
                config_file_id,
                kind: doc.kind,
                name: doc.name,
                body: doc.canonical,
                created_at: Utc::now(),
            })
            .await?;
        self.audit.record(AuditEvent::created(
            &caller.actor(),
            RESOURCE,
            resource.id.to_string(),
            &resource,
        ));
        Ok(resource)
    }

    /// Parse and persist a new bundle. Nothing is stored when a document
    /// fails to parse.
    pub async fn create(
        &self,
        caller: &Caller,
        project_id: u64,
        filename: &str,
        raw_text: &str,
    ) -> CoreResult<ConfigFileWithResources> {
        if filename.trim().is_empty() {
            return Err(CoreError::InvalidInput("filename must not be empty".into()));
        }
        if self.repos.projects.get(project_id).await?.is_none() {
            return Err(CoreError::not_found(format!("project {}", project_id)));
        }
        let staged = parse_bundle(raw_text)?;
        let archive_path = self.archive.put(project_id, filename, raw_text).await?;

        let now = Utc::now();
        let config_file = self
            .repos
            .config_files
            .create(ConfigFile {
                id: 0,
                project_id,
                filename: filename.to_string(),
                raw_text: raw_text.to_string(),
                archive_path,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit.record(AuditEvent::created(
            &caller.actor(),
            CONFIG_FILE,
            config_file.id.to_string(),
            &config_file,
        ));

        let mut resources = Vec::with_capacity(staged.len());
        for doc in staged {
            resources.push(self.insert_resource(caller, config_file.id, doc).await?);
        }
        info!(
            "Created config file {} ({}) with {} resources",
            config_file.id,
            config_file.filename,
            resources.len()
        );
        Ok(ConfigFileWithResources {
            config_file,
            resources,
        })
    }

    /// Delete the live copies of `resources` from every current member's
    /// namespace.
    async fn teardown(&self, project_id: u64, resources: &[Resource]) -> CoreResult<()> {
        let members = self.allocator.members(project_id).await?;
        for member in &members {
            let values = instance_values(
                project_id,
                &member.username,
                service_dns(HUB_SERVICE_NAME, &format_storage_namespace(&sanitise(&member.username))),
            );
            for resource in resources {
                let manifest = render(resource, &values)?;
                self.gateway.delete_object(&values.namespace, &manifest).await?;
            }
        }
        Ok(())
    }

    /// Rename and/or replace the bundle. A new bundle first tears down
    /// the old live instances, then reconciles the stored resources.
    pub async fn update(
        &self,
        caller: &Caller,
        id: u64,
        request: UpdateConfigFileRequest,
    ) -> CoreResult<ConfigFileWithResources> {
        let old = self.get(id).await?;
        let mut config_file = old.clone();
        if let Some(filename) = request.filename.as_deref() {
            if filename.trim().is_empty() {
                return Err(CoreError::InvalidInput("filename must not be empty".into()));
            }
        }

        if let Some(raw_text) = request.raw_yaml.as_deref() {
            let current = self.repos.resources.list_by_config_file(id).await?;
            let staged = parse_bundle(raw_text)?;

            self.teardown(old.project_id, &current).await?;

            let diff = diff_resources(current, staged);
            let actor = caller.actor();
            for (existing, doc) in diff.update {
                let mut updated = existing.clone();
                updated.kind = doc.kind;
                updated.body = doc.canonical;
                self.repos.resources.update(&updated).await?;
                self.audit.record(AuditEvent::updated(
                    &actor,
                    RESOURCE,
                    updated.id.to_string(),
                    &existing,
                    &updated,
                ));
            }
            for doc in diff.create {
                self.insert_resource(caller, id, doc).await?;
            }
            for gone in diff.delete {
                self.repos.resources.delete(gone.id).await?;
                self.audit
                    .record(AuditEvent::deleted(&actor, RESOURCE, gone.id.to_string(), &gone));
            }

            if config_file.archive_path.is_empty() {
                config_file.archive_path = self
                    .archive
                    .put(config_file.project_id, &config_file.filename, raw_text)
                    .await?;
            } else {
                self.archive.put_at(&config_file.archive_path, raw_text).await?;
            }
            config_file.raw_text = raw_text.to_string();
        }

        if let Some(filename) = request.filename {
            config_file.filename = filename;
        }
        config_file.updated_at = Utc::now();
        self.repos.config_files.update(&config_file).await?;
        self.audit.record(AuditEvent::updated(
            &caller.actor(),
            CONFIG_FILE,
            id.to_string(),
            &old,
            &config_file,
        ));
        info!("Updated config file {}", id);

        let resources = self.repos.resources.list_by_config_file(id).await?;
        Ok(ConfigFileWithResources {
            config_file,
            resources,
        })
    }

    /// Tear down every member's instance, then drop the resources and
    /// the config file.
    pub async fn delete(&self, caller: &Caller, id: u64) -> CoreResult<()> {
        let config_file = self.get(id).await?;
        let resources = self.repos.resources.list_by_config_file(id).await?;
        self.teardown(config_file.project_id, &resources).await?;

        let actor = caller.actor();
        for resource in &resources {
            self.repos.resources.delete(resource.id).await?;
            self.audit
                .record(AuditEvent::deleted(&actor, RESOURCE, resource.id.to_string(), resource));
        }
        self.repos.config_files.delete(id).await?;
        self.audit
            .record(AuditEvent::deleted(&actor, CONFIG_FILE, id.to_string(), &config_file));

        if !config_file.archive_path.is_empty() {
            if let Err(e) = self.archive.delete(&config_file.archive_path).await {
                warn!("Failed to remove archived {}: {}", config_file.archive_path, e);
            }
        }
        info!("Deleted config file {} with {} resources", id, resources.len());
        Ok(())
    }

    /// Apply the bundle into the caller's project namespace, in bundle
    /// order. Stops at the first failure without rolling back.
    pub async fn instantiate(&self, caller: &Caller, id: u64) -> CoreResult<String> {
        let config_file = self.get(id).await?;
        let resources = self.repos.resources.list_by_config_file(id).await?;
        let project = self
            .repos
            .projects
            .get(config_file.project_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", config_file.project_id)))?;
        let admin = self.gate.is_super_admin(caller.user_id).await?;
        let role = self.gate.role_in(caller.user_id, project.group_id).await?;
        if !admin && role.is_none() {
            return Err(CoreError::Forbidden("not a member of this project's group".into()));
        }

        let safe = sanitise(&caller.username);
        let ns = format_namespace(project.id, &safe);
        let attachment = self.hub.attach_from(&ns, &safe).await;
        let values = instance_values(project.id, &caller.username, attachment.endpoint_or_dns());
        let input = PolicyInput {
            enforce_read_only: !admin && role == Some(Role::User),
            gpu: project.gpu_settings(),
        };

        self.gateway.ensure_namespace(&ns, &Default::default()).await?;
        for resource in &resources {
            let mut manifest = render(resource, &values)?;
            policy::apply(&mut manifest, &input);
            match self.gateway.apply_object(&ns, &manifest).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    self.gateway.update_object(&ns, &manifest).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            "Instantiated config file {} into {} ({} resources)",
            id,
            ns,
            resources.len()
        );
        Ok(ns)
    }

    /// Remove the caller's copy of the bundle.
    pub async fn uninstantiate(&self, caller: &Caller, id: u64) -> CoreResult<String> {
        let config_file = self.get(id).await?;
        let resources = self.repos.resources.list_by_config_file(id).await?;
        let safe = sanitise(&caller.username);
        let values = instance_values(
            config_file.project_id,
            &caller.username,
            service_dns(HUB_SERVICE_NAME, &format_storage_namespace(&safe)),
        );
        for resource in &resources {
            let manifest = render(resource, &values)?;
            self.gateway.delete_object(&values.namespace, &manifest).await?;
        }
        info!("Removed config file {} from {}", id, values.namespace);
        Ok(values.namespace)
    }
}
