//! In-memory gateway for `cluster.mode: mock` deployments and tests.
//!
//! Every mutating call logs a `[mock]` line and succeeds. Objects are
//! recorded so later reads see them; nothing else is simulated.

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::builders;
use crate::error::{ClusterError, ClusterResult};
use crate::gateway::{ClusterGateway, EventStream, object_ref};
use crate::types::{
    ClaimSpec, ClaimSummary, ClusterEvent, EventType, ExecSession, JobSpec, PodSummary,
    TerminalSize, VolumeSpec, WatchKind, check_expansion, claim_size,
};

const CLAIM_KIND: &str = "PersistentVolumeClaim";

/// (namespace, kind, name)
type ObjectKey = (String, String, String);

#[derive(Default)]
struct MockState {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    objects: BTreeMap<ObjectKey, Value>,
    volumes: BTreeMap<String, Value>,
}

pub struct MockGateway {
    state: Mutex<MockState>,
    creating_writes: AtomicUsize,
    events: broadcast::Sender<(String, ClusterEvent)>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(pkg_constants::network::WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MockState::default()),
            creating_writes: AtomicUsize::new(0),
            events,
        }
    }

    /// Number of calls that created something.
    pub fn creating_writes(&self) -> usize {
        self.creating_writes.load(Ordering::SeqCst)
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().await.namespaces.contains_key(name)
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.state.lock().await.namespaces.keys().cloned().collect()
    }

    pub async fn object(&self, ns: &str, kind: &str, name: &str) -> Option<Value> {
        let key = (ns.to_string(), kind.to_string(), name.to_string());
        self.state.lock().await.objects.get(&key).cloned()
    }

    /// Names of all recorded objects of `kind` in `ns`.
    pub async fn names_of(&self, ns: &str, kind: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(n, k, _)| n == ns && k == kind)
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    pub async fn has_volume(&self, name: &str) -> bool {
        self.state.lock().await.volumes.contains_key(name)
    }

    fn created(&self) {
        self.creating_writes.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, ns: &str, event_type: EventType, object: &Value) {
        let Some(kind) = object
            .get("kind")
            .and_then(Value::as_str)
            .and_then(WatchKind::from_kind)
        else {
            return;
        };
        // No subscribers is fine.
        let _ = self.events.send((
            ns.to_string(),
            ClusterEvent {
                event_type,
                kind,
                object: object.clone(),
            },
        ));
    }

    async fn insert_new(&self, ns: &str, kind: &str, name: &str, object: Value) -> ClusterResult<()> {
        let key = (ns.to_string(), kind.to_string(), name.to_string());
        {
            let mut state = self.state.lock().await;
            if state.objects.contains_key(&key) {
                return Err(ClusterError::AlreadyExists(format!(
                    "{} \"{}\" already exists",
                    kind, name
                )));
            }
            state.objects.insert(key, object.clone());
        }
        self.created();
        self.emit(ns, EventType::Added, &object);
        Ok(())
    }

    async fn pods_matching(&self, ns: Option<&str>, selector: Option<&str>) -> ClusterResult<Vec<PodSummary>> {
        let state = self.state.lock().await;
        let mut pods = Vec::new();
        for ((n, kind, _), value) in state.objects.iter() {
            if kind != "Pod" || ns.is_some_and(|want| want != n) {
                continue;
            }
            let pod: Pod = serde_json::from_value(value.clone())?;
            let summary = PodSummary::from(&pod);
            if selector.is_none_or(|s| selector_matches(s, &summary.labels)) {
                pods.push(summary);
            }
        }
        Ok(pods)
    }
}

fn with_namespace(manifest: &Value, ns: &str) -> Value {
    let mut object = manifest.clone();
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("namespace".to_string(), Value::String(ns.to_string()));
    }
    object
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Equality-based label selector: `a=b,c!=d,e`.
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> ClusterResult<()> {
        let mut state = self.state.lock().await;
        if state.namespaces.contains_key(name) {
            return Ok(());
        }
        state.namespaces.insert(name.to_string(), labels.clone());
        drop(state);
        self.created();
        info!("[mock] Created namespace {}", name);
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
        Ok(self.has_namespace(name).await)
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let removed: Vec<Value> = {
            let mut state = self.state.lock().await;
            state.namespaces.remove(name);
            let keys: Vec<ObjectKey> = state
                .objects
                .keys()
                .filter(|(ns, _, _)| ns == name)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| state.objects.remove(k)).collect()
        };
        for object in &removed {
            self.emit(name, EventType::Deleted, object);
        }
        info!("[mock] Deleted namespace {} ({} objects)", name, removed.len());
        Ok(())
    }

    async fn list_namespaces(&self, prefix: &str) -> ClusterResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .namespaces
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_claim(&self, ns: &str, spec: &ClaimSpec) -> ClusterResult<()> {
        let pvc = serde_json::to_value(builders::claim(ns, spec))?;
        match self.insert_new(ns, CLAIM_KIND, &spec.name, pvc).await {
            Ok(()) => {
                info!("[mock] Created claim {}/{}", ns, spec.name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn expand_claim(&self, ns: &str, name: &str, new_size: &str) -> ClusterResult<()> {
        let key = (ns.to_string(), CLAIM_KIND.to_string(), name.to_string());
        let mut state = self.state.lock().await;
        let value = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("claim {}/{} not found", ns, name)))?;
        let mut pvc: PersistentVolumeClaim = serde_json::from_value(value.clone())?;
        let current = claim_size(&pvc).unwrap_or_default();
        check_expansion(&current, new_size)?;
        if let Some(requests) = pvc
            .spec
            .as_mut()
            .and_then(|s| s.resources.as_mut())
            .and_then(|r| r.requests.as_mut())
        {
            requests.insert(
                "storage".to_string(),
                k8s_openapi::apimachinery::pkg::api::resource::Quantity(new_size.to_string()),
            );
        }
        *value = serde_json::to_value(&pvc)?;
        info!("[mock] Expanded claim {}/{} to {}", ns, name, new_size);
        Ok(())
    }

    async fn delete_claim(&self, ns: &str, name: &str) -> ClusterResult<()> {
        let key = (ns.to_string(), CLAIM_KIND.to_string(), name.to_string());
        self.state.lock().await.objects.remove(&key);
        info!("[mock] Deleted claim {}/{}", ns, name);
        Ok(())
    }

    async fn get_claim(&self, ns: &str, name: &str) -> ClusterResult<Option<ClaimSummary>> {
        match self.object(ns, CLAIM_KIND, name).await {
            Some(value) => {
                let pvc: PersistentVolumeClaim = serde_json::from_value(value)?;
                Ok(Some(ClaimSummary::from(&pvc)))
            }
            None => Ok(None),
        }
    }

    async fn list_claims_by_label(&self, selector: &str) -> ClusterResult<Vec<ClaimSummary>> {
        let state = self.state.lock().await;
        let mut claims = Vec::new();
        for ((_, kind, _), value) in state.objects.iter() {
            if kind != CLAIM_KIND || !selector_matches(selector, &labels_of(value)) {
                continue;
            }
            let pvc: PersistentVolumeClaim = serde_json::from_value(value.clone())?;
            claims.push(ClaimSummary::from(&pvc));
        }
        Ok(claims)
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> ClusterResult<()> {
        let pv = serde_json::to_value(builders::volume(spec))?;
        let mut state = self.state.lock().await;
        if state.volumes.contains_key(&spec.name) {
            return Ok(());
        }
        state.volumes.insert(spec.name.clone(), pv);
        drop(state);
        self.created();
        info!("[mock] Created volume {}", spec.name);
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> ClusterResult<()> {
        self.state.lock().await.volumes.remove(name);
        info!("[mock] Deleted volume {}", name);
        Ok(())
    }

    async fn apply_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (gvk, name) = object_ref(manifest)?;
        self.insert_new(ns, &gvk.kind, &name, with_namespace(manifest, ns))
            .await?;
        info!("[mock] Applied {} {}/{}", gvk.kind, ns, name);
        Ok(())
    }

    async fn delete_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (gvk, name) = object_ref(manifest)?;
        let key = (ns.to_string(), gvk.kind.clone(), name.clone());
        let removed = self.state.lock().await.objects.remove(&key);
        if let Some(object) = removed {
            self.emit(ns, EventType::Deleted, &object);
        }
        info!("[mock] Deleted {} {}/{}", gvk.kind, ns, name);
        Ok(())
    }

    async fn update_object(&self, ns: &str, manifest: &Value) -> ClusterResult<()> {
        let (gvk, name) = object_ref(manifest)?;
        let key = (ns.to_string(), gvk.kind.clone(), name.clone());
        let object = with_namespace(manifest, ns);
        {
            let mut state = self.state.lock().await;
            let slot = state.objects.get_mut(&key).ok_or_else(|| {
                ClusterError::NotFound(format!("{} \"{}\" not found", gvk.kind, name))
            })?;
            *slot = object.clone();
        }
        self.emit(ns, EventType::Modified, &object);
        info!("[mock] Updated {} {}/{}", gvk.kind, ns, name);
        Ok(())
    }

    async fn get_object(
        &self,
        ns: &str,
        _api_version: &str,
        kind: &str,
        name: &str,
    ) -> ClusterResult<Option<Value>> {
        Ok(self.object(ns, kind, name).await)
    }

    async fn submit_job(&self, spec: &JobSpec) -> ClusterResult<()> {
        let job = serde_json::to_value(builders::job(spec))?;
        self.insert_new(&spec.namespace, "Job", &spec.name, job).await?;
        info!("[mock] Submitted job {}/{}", spec.namespace, spec.name);
        Ok(())
    }

    async fn list_pods(&self, ns: &str, selector: Option<&str>) -> ClusterResult<Vec<PodSummary>> {
        self.pods_matching(Some(ns), selector).await
    }

    async fn list_pods_by_label(&self, selector: &str) -> ClusterResult<Vec<PodSummary>> {
        self.pods_matching(None, Some(selector)).await
    }

    async fn service_cluster_ip(&self, ns: &str, name: &str) -> ClusterResult<Option<String>> {
        Ok(self
            .object(ns, "Service", name)
            .await
            .and_then(|s| s.pointer("/spec/clusterIP").and_then(Value::as_str).map(str::to_string))
            .filter(|ip| !ip.is_empty() && ip != "None"))
    }

    async fn service_node_port(
        &self,
        ns: &str,
        name: &str,
        port_name: Option<&str>,
    ) -> ClusterResult<Option<i32>> {
        let Some(svc) = self.object(ns, "Service", name).await else {
            return Ok(None);
        };
        let ports = svc
            .pointer("/spec/ports")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let port = match port_name {
            Some(wanted) => ports
                .into_iter()
                .find(|p| p.get("name").and_then(Value::as_str) == Some(wanted)),
            None => ports.into_iter().next(),
        };
        Ok(port
            .and_then(|p| p.get("nodePort").and_then(Value::as_i64))
            .and_then(|p| i32::try_from(p).ok()))
    }

    async fn watch(&self, ns: &str, kind: WatchKind) -> ClusterResult<EventStream> {
        let rx = self.events.subscribe();
        let initial: Vec<ClusterResult<ClusterEvent>> = {
            let state = self.state.lock().await;
            state
                .objects
                .iter()
                .filter(|((n, k, _), _)| n == ns && k == kind.kind())
                .map(|(_, object)| {
                    Ok(ClusterEvent {
                        event_type: EventType::Added,
                        kind,
                        object: object.clone(),
                    })
                })
                .collect()
        };
        let namespace = ns.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |msg| {
            let out = match msg {
                Ok((event_ns, event)) if event_ns == namespace && event.kind == kind => Some(Ok(event)),
                _ => None,
            };
            futures_util::future::ready(out)
        });
        Ok(futures_util::stream::iter(initial).chain(live).boxed())
    }

    /// Echo session: whatever is written to stdin comes back on stdout.
    async fn exec(
        &self,
        ns: &str,
        pod: &str,
        _container: Option<&str>,
        command: Vec<String>,
    ) -> ClusterResult<ExecSession> {
        let (input, output) = tokio::io::duplex(64 * 1024);
        let (resize, mut sizes) = mpsc::channel::<TerminalSize>(8);
        let done = tokio::spawn(async move { while sizes.recv().await.is_some() {} });
        info!("[mock] Exec {:?} in {}/{}", command, ns, pod);
        Ok(ExecSession {
            stdin: Box::pin(input),
            stdout: Box::pin(output),
            resize,
            done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pod(name: &str, shared: u32, phase: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name, "labels": {"app": "train"}},
            "spec": {"containers": [{
                "name": "main",
                "resources": {"requests": {"nvidia.com/gpu.shared": shared.to_string()}}
            }]},
            "status": {"phase": phase}
        })
    }

    #[tokio::test]
    async fn namespaces_are_idempotent() {
        let gw = MockGateway::new();
        gw.ensure_namespace("proj-1-alice", &BTreeMap::new()).await.unwrap();
        gw.ensure_namespace("proj-1-alice", &BTreeMap::new()).await.unwrap();
        gw.ensure_namespace("proj-2-alice", &BTreeMap::new()).await.unwrap();
        assert_eq!(gw.creating_writes(), 2);
        assert_eq!(gw.list_namespaces("proj-1-").await.unwrap(), vec!["proj-1-alice"]);
        gw.delete_namespace("proj-1-alice").await.unwrap();
        gw.delete_namespace("proj-1-alice").await.unwrap();
        assert!(!gw.namespace_exists("proj-1-alice").await.unwrap());
    }

    #[tokio::test]
    async fn objects_round_trip() {
        let gw = MockGateway::new();
        let cm = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}, "data": {"a": "1"}});
        gw.apply_object("ns", &cm).await.unwrap();
        assert!(gw.apply_object("ns", &cm).await.unwrap_err().is_already_exists());

        let stored = gw.get_object("ns", "v1", "ConfigMap", "cfg").await.unwrap().unwrap();
        assert_eq!(stored["metadata"]["namespace"], "ns");

        let mut changed = cm.clone();
        changed["data"]["a"] = json!("2");
        gw.update_object("ns", &changed).await.unwrap();
        assert_eq!(gw.object("ns", "ConfigMap", "cfg").await.unwrap()["data"]["a"], "2");

        gw.delete_object("ns", &cm).await.unwrap();
        gw.delete_object("ns", &cm).await.unwrap();
        assert!(gw.object("ns", "ConfigMap", "cfg").await.is_none());
        assert!(gw.update_object("ns", &cm).await.unwrap_err().is_not_found());
        assert!(matches!(
            gw.apply_object("ns", &json!({"kind": "Pod"})).await,
            Err(ClusterError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn claims_expand_and_filter() {
        let gw = MockGateway::new();
        let spec = ClaimSpec {
            name: "pvc-a".into(),
            class: "longhorn".into(),
            size: "3Gi".into(),
            access_mode: "ReadWriteMany".into(),
            labels: BTreeMap::from([("storage-type".into(), "project".into())]),
        };
        gw.create_claim("a", &spec).await.unwrap();
        gw.create_claim("a", &spec).await.unwrap();
        assert_eq!(gw.creating_writes(), 1);

        assert!(gw.expand_claim("a", "pvc-a", "2Gi").await.is_err());
        gw.expand_claim("a", "pvc-a", "10Gi").await.unwrap();
        let claim = gw.get_claim("a", "pvc-a").await.unwrap().unwrap();
        assert_eq!(claim.size.as_deref(), Some("10Gi"));

        assert_eq!(gw.list_claims_by_label("storage-type=project").await.unwrap().len(), 1);
        assert!(gw.list_claims_by_label("storage-type=user-hub").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pods_are_listed_from_recorded_objects() {
        let gw = MockGateway::new();
        gw.apply_object("proj-1-alice", &pod("a", 10, "Pending")).await.unwrap();
        gw.apply_object("proj-1-bob", &pod("b", 3, "Succeeded")).await.unwrap();
        let pods = gw.list_pods("proj-1-alice", None).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].requested("nvidia.com/gpu.shared"), 10);
        assert_eq!(gw.list_pods_by_label("app=train").await.unwrap().len(), 2);
        assert!(gw.list_pods_by_label("app=web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_replays_then_follows() {
        let gw = MockGateway::new();
        gw.apply_object("ns", &pod("first", 0, "Running")).await.unwrap();
        let mut stream = gw.watch("ns", WatchKind::Pods).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, EventType::Added);
        assert_eq!(first.object["metadata"]["name"], "first");

        gw.apply_object("other", &pod("elsewhere", 0, "Running")).await.unwrap();
        gw.delete_object("ns", &pod("first", 0, "Running")).await.unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.event_type, EventType::Deleted);
        assert_eq!(next.object["metadata"]["name"], "first");
    }

    #[tokio::test]
    async fn exec_echoes() {
        let gw = MockGateway::new();
        let mut session = gw.exec("ns", "p", None, vec!["sh".into()]).await.unwrap();
        session.stdin.write_all(b"ls\n").await.unwrap();
        let mut buf = [0u8; 3];
        session.stdout.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");
    }

    #[test]
    fn selectors() {
        let labels = BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        assert!(selector_matches("a=1,b=2", &labels));
        assert!(selector_matches("a==1", &labels));
        assert!(selector_matches("a, b!=3", &labels));
        assert!(!selector_matches("a=2", &labels));
        assert!(!selector_matches("c", &labels));
        assert!(selector_matches("", &labels));
    }
}
