use pkg_cluster::{ClaimSpec, ClaimSummary, ClusterGateway};
use pkg_constants::labels::{
    MANAGED_BY_LABEL, PLATFORM_NAME, PROJECT_ID_LABEL, PROJECT_NAME_LABEL, STORAGE_TYPE_LABEL,
    STORAGE_TYPE_PROJECT,
};
use pkg_constants::storage::ACCESS_MODE_MULTI_WRITER;
use pkg_manifest::naming::{project_claim, project_storage_namespace, sanitise};
use pkg_state::Repos;
use pkg_types::project::Project;
use pkg_types::validate::parse_quantity_bytes;
use pkg_types::{CoreError, CoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::storage_hub::{HubState, StorageHub};

/// Result of provisioning a project's shared volume.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStorage {
    pub project_id: u64,
    pub namespace: String,
    pub claim: String,
    pub size: String,
}

/// Admin-provisioned shared volume per project, exported over NFS from
/// its own `project-<name>-<hash>` namespace.
#[derive(Clone)]
pub struct ProjectStorageService {
    repos: Repos,
    gateway: Arc<dyn ClusterGateway>,
    hub: StorageHub,
    storage_class: String,
    storage_size: String,
}

impl ProjectStorageService {
    pub fn new(
        repos: Repos,
        gateway: Arc<dyn ClusterGateway>,
        hub: StorageHub,
        storage_class: &str,
        storage_size: &str,
    ) -> Self {
        Self {
            repos,
            gateway,
            hub,
            storage_class: storage_class.to_string(),
            storage_size: storage_size.to_string(),
        }
    }

    async fn project(&self, id: u64) -> CoreResult<Project> {
        self.repos
            .projects
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("project {}", id)))
    }

    fn labels(project: &Project) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), PLATFORM_NAME.to_string()),
            (STORAGE_TYPE_LABEL.to_string(), STORAGE_TYPE_PROJECT.to_string()),
            (PROJECT_ID_LABEL.to_string(), project.id.to_string()),
            (PROJECT_NAME_LABEL.to_string(), sanitise(&project.name)),
        ])
    }

    pub async fn create(&self, project_id: u64, size: Option<&str>) -> CoreResult<ProjectStorage> {
        let project = self.project(project_id).await?;
        let size = size
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.storage_size)
            .to_string();
        parse_quantity_bytes(&size).map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        let ns = project_storage_namespace(&project.name, project.id);
        let claim = project_claim(&ns);
        if self.gateway.get_claim(&ns, &claim).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "storage for project {} already exists",
                project.id
            )));
        }
        let labels = Self::labels(&project);
        self.gateway.ensure_namespace(&ns, &labels).await?;
        self.gateway
            .create_claim(
                &ns,
                &ClaimSpec {
                    name: claim.clone(),
                    class: self.storage_class.clone(),
                    size: size.clone(),
                    access_mode: ACCESS_MODE_MULTI_WRITER.to_string(),
                    labels,
                },
            )
            .await?;
        self.hub.serve(&ns, &claim, HubState::VolumeReady).await?;
        info!("Provisioned project storage {}/{} ({})", ns, claim, size);
        Ok(ProjectStorage {
            project_id: project.id,
            namespace: ns,
            claim,
            size,
        })
    }

    pub async fn list(&self) -> CoreResult<Vec<ClaimSummary>> {
        let selector = format!(
            "{}={},{}={}",
            STORAGE_TYPE_LABEL, STORAGE_TYPE_PROJECT, MANAGED_BY_LABEL, PLATFORM_NAME
        );
        Ok(self.gateway.list_claims_by_label(&selector).await?)
    }

    /// Drop the project's storage namespace with everything in it.
    pub async fn delete(&self, project_id: u64) -> CoreResult<()> {
        let project = self.project(project_id).await?;
        let ns = project_storage_namespace(&project.name, project.id);
        self.gateway.delete_namespace(&ns).await?;
        info!("Removed project storage {}", ns);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[tokio::test]
    async fn create_list_delete() {
        let fx = Fixture::new();
        let team = fx.group("team").await;
        let project = fx.project(team.id, "Vision Lab", 0, "none").await;
        let svc = &fx.engine.project_storage;

        let storage = svc.create(project.id, Some("10Gi")).await.unwrap();
        assert!(storage.namespace.starts_with("project-vision-lab-"));
        assert_eq!(storage.claim, format!("pvc-{}", storage.namespace));
        assert!(fx.mock.has_namespace(&storage.namespace).await);
        assert_eq!(
            fx.mock.names_of(&storage.namespace, "Deployment").await,
            vec!["storage-gateway".to_string()]
        );

        let listed = svc.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].labels["project-id"], project.id.to_string());
        assert_eq!(listed[0].labels["project-name"], "vision-lab");

        assert!(matches!(
            svc.create(project.id, None).await,
            Err(CoreError::Conflict(_))
        ));

        svc.delete(project.id).await.unwrap();
        assert!(!fx.mock.has_namespace(&storage.namespace).await);
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_size_and_missing_project() {
        let fx = Fixture::new();
        let team = fx.group("team").await;
        let project = fx.project(team.id, "p", 0, "none").await;
        let svc = &fx.engine.project_storage;
        assert!(matches!(
            svc.create(project.id, Some("lots")).await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(svc.create(999, None).await, Err(CoreError::NotFound(_))));
    }
}
