//! Per-user storage hubs: a namespace holding one claim and an NFS server
//! that exports it to the user's project namespaces.

use pkg_cluster::{ClaimSpec, ClusterGateway, ClusterResult, builders};
use pkg_constants::labels::*;
use pkg_constants::naming::{HUB_DEPLOYMENT_NAME, HUB_SERVICE_NAME};
use pkg_constants::storage::ACCESS_MODE_SINGLE_WRITER;
use pkg_manifest::naming::{
    browser_service_name, format_hub_claim, format_storage_namespace, service_dns,
};
use pkg_types::validate::parse_quantity_bytes;
use pkg_types::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// How far a hub has been provisioned. Each state implies all earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Absent,
    NamespaceReady,
    VolumeReady,
    ServerReady,
    ServiceReady,
}

impl HubState {
    pub fn is_ready(&self) -> bool {
        *self == HubState::ServiceReady
    }
}

/// Where a project namespace reaches its owner's hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubAttachment {
    pub hub_namespace: String,
    pub cluster_ip: Option<String>,
    pub dns: String,
}

impl HubAttachment {
    /// The service IP when known, otherwise the in-cluster DNS name.
    pub fn endpoint_or_dns(&self) -> String {
        self.cluster_ip.clone().unwrap_or_else(|| self.dns.clone())
    }
}

#[derive(Clone)]
pub struct StorageHub {
    gateway: Arc<dyn ClusterGateway>,
    storage_class: String,
    storage_size: String,
}

fn to_manifest<T: Serialize>(object: &T) -> CoreResult<Value> {
    serde_json::to_value(object).map_err(|e| CoreError::Internal(e.into()))
}

fn tolerate_existing(result: ClusterResult<()>) -> ClusterResult<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

impl StorageHub {
    pub fn new(gateway: Arc<dyn ClusterGateway>, storage_class: &str, storage_size: &str) -> Self {
        Self {
            gateway,
            storage_class: storage_class.to_string(),
            storage_size: storage_size.to_string(),
        }
    }

    pub async fn exists(&self, safe_username: &str) -> CoreResult<bool> {
        Ok(self
            .gateway
            .namespace_exists(&format_storage_namespace(safe_username))
            .await?)
    }

    /// Probe the cluster for the farthest state reached.
    pub async fn state(&self, safe_username: &str) -> CoreResult<HubState> {
        let ns = format_storage_namespace(safe_username);
        if !self.gateway.namespace_exists(&ns).await? {
            return Ok(HubState::Absent);
        }
        if self
            .gateway
            .get_claim(&ns, &format_hub_claim(safe_username))
            .await?
            .is_none()
        {
            return Ok(HubState::NamespaceReady);
        }
        if self
            .gateway
            .get_object(&ns, "apps/v1", "Deployment", HUB_DEPLOYMENT_NAME)
            .await?
            .is_none()
        {
            return Ok(HubState::VolumeReady);
        }
        if self
            .gateway
            .get_object(&ns, "v1", "Service", HUB_SERVICE_NAME)
            .await?
            .is_none()
        {
            return Ok(HubState::ServerReady);
        }
        Ok(HubState::ServiceReady)
    }

    /// Drive the hub forward to `ServiceReady`, creating only what is
    /// missing. On failure the hub stays at the farthest state reached.
    pub async fn initialise(&self, safe_username: &str) -> CoreResult<HubState> {
        let ns = format_storage_namespace(safe_username);
        let claim = format_hub_claim(safe_username);
        let mut state = self.state(safe_username).await?;
        if state.is_ready() {
            info!("Storage hub {} already ready", ns);
            return Ok(state);
        }

        if state < HubState::NamespaceReady {
            let labels = BTreeMap::from([
                (MANAGED_BY_LABEL.to_string(), PLATFORM_NAME.to_string()),
                (STORAGE_TYPE_LABEL.to_string(), STORAGE_TYPE_USER_HUB.to_string()),
            ]);
            self.gateway.ensure_namespace(&ns, &labels).await?;
            state = HubState::NamespaceReady;
        }
        if state < HubState::VolumeReady {
            let spec = ClaimSpec {
                name: claim.clone(),
                class: self.storage_class.clone(),
                size: self.storage_size.clone(),
                access_mode: ACCESS_MODE_SINGLE_WRITER.to_string(),
                labels: BTreeMap::from([
                    (MANAGED_BY_LABEL.to_string(), PLATFORM_NAME.to_string()),
                    (STORAGE_TYPE_LABEL.to_string(), STORAGE_TYPE_USER_HUB.to_string()),
                ]),
            };
            self.gateway.create_claim(&ns, &spec).await?;
            state = HubState::VolumeReady;
        }
        self.serve(&ns, &claim, state).await?;
        info!("Storage hub {} ready", ns);
        Ok(HubState::ServiceReady)
    }

    /// Run the NFS server and its service for `claim` inside `ns`,
    /// starting after `from`.
    pub(crate) async fn serve(&self, ns: &str, claim: &str, from: HubState) -> CoreResult<()> {
        if from < HubState::ServerReady {
            let deployment = to_manifest(&builders::hub_deployment(ns, claim))?;
            tolerate_existing(self.gateway.apply_object(ns, &deployment).await)?;
        }
        if from < HubState::ServiceReady {
            let service = to_manifest(&builders::hub_service(ns))?;
            tolerate_existing(self.gateway.apply_object(ns, &service).await)?;
        }
        Ok(())
    }

    pub async fn expand(&self, safe_username: &str, new_size: &str) -> CoreResult<()> {
        parse_quantity_bytes(new_size).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let ns = format_storage_namespace(safe_username);
        let claim = format_hub_claim(safe_username);
        self.gateway.expand_claim(&ns, &claim, new_size).await?;
        info!("Expanded storage hub claim {}/{} to {}", ns, claim, new_size);
        Ok(())
    }

    /// Drop the hub namespace and everything in it.
    pub async fn delete(&self, safe_username: &str) -> CoreResult<()> {
        let ns = format_storage_namespace(safe_username);
        self.gateway.delete_namespace(&ns).await?;
        info!("Deleted storage hub {}", ns);
        Ok(())
    }

    /// Resolve the hub endpoint for mounts made from `project_ns`.
    pub async fn attach_from(&self, project_ns: &str, safe_username: &str) -> HubAttachment {
        let hub_namespace = format_storage_namespace(safe_username);
        let cluster_ip = match self
            .gateway
            .service_cluster_ip(&hub_namespace, HUB_SERVICE_NAME)
            .await
        {
            Ok(ip) => ip,
            Err(e) => {
                warn!(
                    "Hub service lookup for {} failed, using DNS: {}",
                    project_ns, e
                );
                None
            }
        };
        HubAttachment {
            dns: service_dns(HUB_SERVICE_NAME, &hub_namespace),
            hub_namespace,
            cluster_ip,
        }
    }

    /// Start a file browser over `claim` in `namespace` and return its node port.
    pub async fn open_browser(
        &self,
        safe_username: &str,
        namespace: &str,
        claim: &str,
        read_only: bool,
        base_url: &str,
    ) -> CoreResult<Option<i32>> {
        let deployment = to_manifest(&builders::browser_deployment(namespace, claim, read_only, base_url))?;
        tolerate_existing(self.gateway.apply_object(namespace, &deployment).await)?;
        let service = to_manifest(&builders::browser_service(namespace, claim))?;
        tolerate_existing(self.gateway.apply_object(namespace, &service).await)?;
        let port = self
            .gateway
            .service_node_port(namespace, &browser_service_name(claim), Some("http"))
            .await?;
        info!(
            "File browser for {} on {}/{} (read_only={})",
            safe_username, namespace, claim, read_only
        );
        Ok(port)
    }

    pub async fn close_browser(&self, namespace: &str, claim: &str) -> CoreResult<()> {
        let deployment = to_manifest(&builders::browser_deployment(namespace, claim, true, "/"))?;
        let service = to_manifest(&builders::browser_service(namespace, claim))?;
        self.gateway.delete_object(namespace, &service).await?;
        self.gateway.delete_object(namespace, &deployment).await?;
        info!("Closed file browser on {}/{}", namespace, claim);
        Ok(())
    }
}
