use async_trait::async_trait;
use kube::Client;
use kube::api::ApiResource;
use kube::discovery::{self, Scope};
use pkg_manifest::GroupVersionKind;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

/// A kind resolved to its REST resource.
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Maps a group/version/kind to the resource the API server serves it as.
#[async_trait]
pub trait RestMapper: Send + Sync {
    async fn resolve(&self, gvk: &GroupVersionKind) -> ClusterResult<ResolvedKind>;
}

/// Discovery-backed mapper. Results are cached for the process lifetime.
pub struct DiscoveryMapper {
    client: Client,
    cache: RwLock<HashMap<GroupVersionKind, ResolvedKind>>,
}

impl DiscoveryMapper {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RestMapper for DiscoveryMapper {
    async fn resolve(&self, gvk: &GroupVersionKind) -> ClusterResult<ResolvedKind> {
        if let Some(hit) = self.cache.read().await.get(gvk) {
            return Ok(hit.clone());
        }

        let key = kube::core::GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let (resource, caps) = discovery::pinned_kind(&self.client, &key)
            .await
            .map_err(|e| match ClusterError::from(e) {
                ClusterError::NotFound(_) => ClusterError::UnknownKind(gvk.to_string()),
                other => other,
            })?;
        let resolved = ResolvedKind {
            resource,
            namespaced: caps.scope == Scope::Namespaced,
        };
        debug!("Resolved {} to resource {}", gvk, resolved.resource.plural);
        self.cache.write().await.insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }
}
