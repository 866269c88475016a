//! Live gateway backed by kube-rs.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Service,
};
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Client, Config};
use pkg_manifest::GroupVersionKind;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::builders;
use crate::error::{
    ClusterError, ClusterResult, ignore_already_exists, ignore_gone, ignore_not_found,
};
use crate::gateway::{ClusterGateway, EventStream, object_ref};
use crate::mapper::{DiscoveryMapper, ResolvedKind, RestMapper};
use crate::types::{
    ClaimSpec, ClaimSummary, ClusterEvent, EventType, ExecSession, JobSpec, PodSummary,
    TerminalSize, VolumeSpec, WatchKind, check_expansion, claim_size,
};

pub struct KubeGateway {
    client: Client,
    mapper: Arc<dyn RestMapper>,
    timeout: Duration,
}

impl KubeGateway {
    /// Connect using `kubeconfig` when given, otherwise the in-cluster or
    /// default configuration.
    pub async fn connect(kubeconfig: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path)?;
                let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        info!("Connected to cluster (call timeout {:?})", timeout);
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        let mapper = Arc::new(DiscoveryMapper::new(client.clone()));
        Self {
            client,
            mapper,
            timeout,
        }
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> ClusterResult<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ClusterError::from),
            Err(_) => Err(ClusterError::Transient(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> ClusterResult<ResolvedKind> {
        match tokio::time::timeout(self.timeout, self.mapper.resolve(gvk)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Transient(format!("discovery of {} timed out", gvk))),
        }
    }

    fn dynamic_api(&self, ns: &str, resolved: &ResolvedKind) -> Api<DynamicObject> {
        if resolved.namespaced {
            Api::namespaced_with(self.client.clone(), ns, &resolved.resource)
        } else {
            Api::all_with(self.client.clone(), &resolved.resource)
        }
    }

    /// Decode a manifest into a dynamic object bound to `ns`.
    async fn dynamic(
        &self,
        ns: &str,
        manifest: &Value,
    ) -> ClusterResult<(Api<DynamicObject>, DynamicObject, String)> {
        let (gvk, name) = object_ref(manifest)?;
        let resolved = self.resolve(&gvk).await?;
        let mut obj: DynamicObject = serde_json::from_value(manifest.clone())?;
        if resolved.namespaced {
            obj.metadata.namespace = Some(ns.to_string());
        }
        Ok((self.dynamic_api(ns, &resolved), obj, name))
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> ClusterResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if self.call("get namespace", api.get_opt(name)).await?.is_some() {
            debug!("Namespace {} already exists", name);
            return Ok(());
        }
        let ns = builders::namespace(name, labels);
        ignore_already_exists(
            self.call("create namespace", api.create(&PostParams::default(), &ns))
                .await
                .map(|_| ()),
        )?;
        info!("Created namespace {}", name);
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(self.call("get namespace", api.get_opt(name)).await?.is_some())
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        ignore_not_found(
            self.call("delete namespace", api.delete(name, &DeleteParams::foreground()))
                .await
                .map(|_| ()),
        )?;
        info!("Deleted namespace {}", name);
        Ok(())
    }

    async fn list_namespaces(&self, prefix: &str) -> ClusterResult<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = self.call("list namespaces", api.list(&ListParams::default())).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn create_claim(&self, ns: &str, spec: &ClaimSpec) -> ClusterResult<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        let pvc = builders::claim(ns, spec);
        ignore_already_exists(
            self.call("create claim", api.create(&PostParams::default(), &pvc))
                .await
                .map(|_| ()),
        )?;
        info!("Created claim {}/{} ({})", ns, spec.name, spec.size);
        Ok(())
    }

    async fn expand_claim(&self, ns: &str, name: &str, new_size: &str) -> ClusterResult<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        let pvc = self.call("get claim", api.get(name)).await?;
        let current = claim_size(&pvc)
            .ok_or_else(|| ClusterError::Malformed(format!("claim {}/{} has no storage request", ns, name)))?;
        check_expansion(&current, new_size)?;
        let patch = json!({"spec": {"resources": {"requests": {"storage": new_size}}}});
        self.call(
            "expand claim",
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;
        info!("Expanded claim {}/{} from {} to {}", ns, name, current, new_size);
        Ok(())
    }

    async fn delete_claim(&self, ns: &str, name: &str) -> ClusterResult<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        ignore_not_found(
            self.call("delete claim", api.delete(name, &DeleteParams::foreground()))
                .await
                .map(|_| ()),
        )
    }

    async fn get_claim(&self, ns: &str, name: &str) -> ClusterResult<Option<ClaimSummary>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        let pvc = self.call("get claim", api.get_opt(name)).await?;
        Ok(pvc.as_ref().map(ClaimSummary::from))
    }

    async fn list_claims_by_label(&self, selector: &str) -> ClusterResult<Vec<ClaimSummary>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let list = self
            .call("list claims", api.list(&ListParams::default().labels(selector)))
            .await?;
        Ok(list.items.iter().map(ClaimSummary::from).collect())
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> ClusterResult<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let pv = builders::volume(spec);
        ignore_already_exists(
            self.call("create volume", api.create(&PostParams::default(), &pv))
                .await
                .map(|_| ()),
        )?;
        info!("Created volume {}", spec.name);
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> ClusterResult<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        ignore_not_found(
            self.call("delete volume", api.delete(name, &DeleteParams::default()))
                .await
                .map(|_| ()),
        )
    }

    async fn apply_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (api, obj, name) = self.dynamic(ns, manifest).await?;
        self.call("create object", api.create(&PostParams::default(), &obj))
            .await?;
        info!("Applied {} {}/{}", kind_of(manifest), ns, name);
        Ok(())
    }

    async fn delete_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (_, name) = object_ref(manifest)?;
        let deleted = async {
            let (api, _, name) = self.dynamic(ns, manifest).await?;
            self.call("delete object", api.delete(&name, &DeleteParams::background()))
                .await
                .map(|_| ())
        }
        .await;
        ignore_gone(deleted)?;
        info!("Deleted {} {}/{}", kind_of(manifest), ns, name);
        Ok(())
    }

    async fn update_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (api, mut obj, name) = self.dynamic(ns, manifest).await?;
        let live = self.call("get object", api.get(&name)).await?;
        obj.metadata.resource_version = live.metadata.resource_version;
        self.call("replace object", api.replace(&name, &PostParams::default(), &obj))
            .await?;
        info!("Updated {} {}/{}", kind_of(manifest), ns, name);
        Ok(())
    }

    async fn get_object(
        &self,
        ns: &str,
        api_version: &str,
        kind: &str,
        name: &str,
    ) -> ClusterResult<Option<Value>> {
        let gvk = GroupVersionKind::from_api_version(api_version, kind);
        let resolved = self.resolve(&gvk).await?;
        let api = self.dynamic_api(ns, &resolved);
        match self.call("get object", api.get_opt(name)).await? {
            Some(obj) => Ok(Some(serde_json::to_value(&obj)?)),
            None => Ok(None),
        }
    }

    async fn submit_job(&self, spec: &JobSpec) -> ClusterResult<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &spec.namespace);
        let job = builders::job(spec);
        self.call("create job", api.create(&PostParams::default(), &job))
            .await?;
        info!("Submitted job {}/{}", spec.namespace, spec.name);
        Ok(())
    }

    async fn list_pods(&self, ns: &str, selector: Option<&str>) -> ClusterResult<Vec<PodSummary>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let mut lp = ListParams::default();
        if let Some(sel) = selector {
            lp = lp.labels(sel);
        }
        let list = self.call("list pods", api.list(&lp)).await?;
        Ok(list.items.iter().map(PodSummary::from).collect())
    }

    async fn list_pods_by_label(&self, selector: &str) -> ClusterResult<Vec<PodSummary>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = self
            .call("list pods", api.list(&ListParams::default().labels(selector)))
            .await?;
        Ok(list.items.iter().map(PodSummary::from).collect())
    }

    async fn service_cluster_ip(&self, ns: &str, name: &str) -> ClusterResult<Option<String>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        let svc = self.call("get service", api.get_opt(name)).await?;
        Ok(svc
            .and_then(|s| s.spec)
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None"))
    }

    async fn service_node_port(
        &self,
        ns: &str,
        name: &str,
        port_name: Option<&str>,
    ) -> ClusterResult<Option<i32>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        let svc = self.call("get service", api.get_opt(name)).await?;
        let ports = svc.and_then(|s| s.spec).and_then(|spec| spec.ports).unwrap_or_default();
        let port = match port_name {
            Some(wanted) => ports.into_iter().find(|p| p.name.as_deref() == Some(wanted)),
            None => ports.into_iter().next(),
        };
        Ok(port.and_then(|p| p.node_port))
    }

    async fn watch(&self, ns: &str, kind: WatchKind) -> ClusterResult<EventStream> {
        let gvk = GroupVersionKind::from_api_version(kind.api_version(), kind.kind());
        let resolved = self.resolve(&gvk).await?;
        let api = self.dynamic_api(ns, &resolved);
        let mut seen: HashSet<String> = HashSet::new();
        let stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| {
                let out = match event {
                    Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                        let name = obj.metadata.name.clone().unwrap_or_default();
                        let event_type = if seen.insert(name) {
                            EventType::Added
                        } else {
                            EventType::Modified
                        };
                        to_event(event_type, kind, &obj)
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        if let Some(name) = &obj.metadata.name {
                            seen.remove(name);
                        }
                        to_event(EventType::Deleted, kind, &obj)
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(ClusterError::Transient(e.to_string()))),
                };
                futures_util::future::ready(out)
            })
            .boxed();
        Ok(stream)
    }

    async fn exec(
        &self,
        ns: &str,
        pod: &str,
        container: Option<&str>,
        command: Vec<String>,
    ) -> ClusterResult<ExecSession> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let mut params = AttachParams::interactive_tty();
        if let Some(c) = container {
            params = params.container(c);
        }
        let mut attached = self.call("exec", api.exec(pod, command, &params)).await?;
        let stdin = attached
            .stdin()
            .ok_or_else(|| ClusterError::Internal("exec session has no stdin".into()))?;
        let stdout = attached
            .stdout()
            .ok_or_else(|| ClusterError::Internal("exec session has no stdout".into()))?;
        let mut sizes = attached.terminal_size();

        let (resize_tx, mut resize_rx) = mpsc::channel::<TerminalSize>(8);
        let resize_task = tokio::spawn(async move {
            while let Some(size) = resize_rx.recv().await {
                let Some(sink) = sizes.as_mut() else { continue };
                let term = kube::api::TerminalSize {
                    width: size.cols,
                    height: size.rows,
                };
                if sink.send(term).await.is_err() {
                    break;
                }
            }
        });
        let target = format!("{}/{}", ns, pod);
        let done = tokio::spawn(async move {
            if let Err(e) = attached.join().await {
                warn!("Exec session {} ended with error: {}", target, e);
            }
            resize_task.abort();
        });
        info!("Attached exec session to {}/{}", ns, pod);

        Ok(ExecSession {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            resize: resize_tx,
            done,
        })
    }
}

fn kind_of(manifest: &Value) -> &str {
    manifest.get("kind").and_then(Value::as_str).unwrap_or("object")
}

fn to_event(
    event_type: EventType,
    kind: WatchKind,
    obj: &DynamicObject,
) -> Option<ClusterResult<ClusterEvent>> {
    Some(
        serde_json::to_value(obj)
            .map(|object| ClusterEvent {
                event_type,
                kind,
                object,
            })
            .map_err(ClusterError::from),
    )
}
