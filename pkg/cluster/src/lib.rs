//! Cluster gateway: the only place cluster mutations happen.

pub mod builders;
pub mod error;
pub mod gateway;
pub mod live;
pub mod mapper;
pub mod mock;
pub mod types;
pub mod watch;

pub use error::{ClusterError, ClusterResult};
pub use gateway::{ClusterGateway, EventStream};
pub use live::KubeGateway;
pub use mock::MockGateway;
pub use types::*;

use pkg_types::config::ClusterMode;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Build the gateway for the configured mode.
pub async fn connect(
    mode: ClusterMode,
    kubeconfig: Option<&str>,
    call_timeout: Duration,
) -> anyhow::Result<Arc<dyn ClusterGateway>> {
    match mode {
        ClusterMode::Kube => Ok(Arc::new(KubeGateway::connect(kubeconfig, call_timeout).await?)),
        ClusterMode::Mock => {
            warn!("Cluster mode is mock: no cluster objects will be created");
            Ok(Arc::new(MockGateway::new()))
        }
    }
}
