//! Namespace watch fan-in: one task per kind, JSON envelopes into a
//! bounded channel, drop on full.

use futures_util::StreamExt;
use pkg_constants::network::{WATCH_BACKOFF_INITIAL_MS, WATCH_BACKOFF_MAX_MS};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::ClusterGateway;
use crate::types::{ClusterEvent, EventType, WatchKind};

/// Build the client-facing envelope for one event.
pub fn envelope(event: &ClusterEvent) -> Value {
    let obj = &event.object;
    let mut data = Map::new();
    data.insert("type".into(), json!(event.event_type.to_string()));
    data.insert("kind".into(), json!(event.kind.kind()));
    data.insert("name".into(), json!(str_at(obj, "/metadata/name").unwrap_or_default()));
    data.insert("ns".into(), json!(str_at(obj, "/metadata/namespace").unwrap_or_default()));

    let mut metadata = Map::new();
    if let Some(ts) = obj.pointer("/metadata/creationTimestamp") {
        metadata.insert("creationTimestamp".into(), ts.clone());
    }
    if let Some(labels) = obj.pointer("/metadata/labels") {
        metadata.insert("labels".into(), labels.clone());
    }
    if let Some(ts) = obj.pointer("/metadata/deletionTimestamp") {
        metadata.insert("deletionTimestamp".into(), ts.clone());
    }
    data.insert("metadata".into(), Value::Object(metadata));

    for (k, v) in status_fields(event.kind, obj) {
        data.insert(k, v);
    }

    match event.kind {
        WatchKind::Pods => {
            let containers = array_at(obj, "/spec/containers");
            let names: Vec<&str> = containers.iter().filter_map(|c| c.get("name")?.as_str()).collect();
            let images: Vec<&str> = containers.iter().filter_map(|c| c.get("image")?.as_str()).collect();
            if !names.is_empty() {
                data.insert("containers".into(), json!(names));
            }
            if !images.is_empty() {
                data.insert("images".into(), json!(images));
            }
            let statuses = array_at(obj, "/status/containerStatuses");
            if !statuses.is_empty() {
                let restarts: i64 = statuses
                    .iter()
                    .filter_map(|s| s.get("restartCount")?.as_i64())
                    .sum();
                data.insert("restartCount".into(), json!(restarts));
            }
        }
        WatchKind::Services => {
            let mut external: Vec<String> = array_at(obj, "/spec/externalIPs")
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            external.extend(
                array_at(obj, "/status/loadBalancer/ingress")
                    .iter()
                    .filter_map(|i| i.get("ip")?.as_str().map(str::to_string)),
            );
            if !external.is_empty() {
                data.insert("externalIPs".into(), json!(external));
            }
            let ports = array_at(obj, "/spec/ports");
            let node_ports: Vec<i64> = ports.iter().filter_map(|p| p.get("nodePort")?.as_i64()).collect();
            if !node_ports.is_empty() {
                data.insert("nodePorts".into(), json!(node_ports));
            }
            let service_ports: Vec<String> = ports
                .iter()
                .filter_map(|p| {
                    let port = p.get("port")?.as_i64()?;
                    Some(match p.get("protocol").and_then(Value::as_str) {
                        Some(proto) => format!("{}/{}", port, proto),
                        None => port.to_string(),
                    })
                })
                .collect();
            if !service_ports.is_empty() {
                data.insert("ports".into(), json!(service_ports));
            }
        }
        _ => {}
    }
    Value::Object(data)
}

fn str_at<'a>(obj: &'a Value, pointer: &str) -> Option<&'a str> {
    obj.pointer(pointer).and_then(Value::as_str)
}

fn array_at<'a>(obj: &'a Value, pointer: &str) -> &'a [Value] {
    obj.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Status-bearing fields per kind. Also the basis of change detection.
fn status_fields(kind: WatchKind, obj: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    match kind {
        WatchKind::Pods => {
            if let Some(phase) = str_at(obj, "/status/phase") {
                out.insert("status".into(), json!(phase));
            }
            let mut crashing = Vec::new();
            for cs in array_at(obj, "/status/containerStatuses") {
                let Some(waiting) = cs.pointer("/state/waiting") else { continue };
                let reason = waiting
                    .get("reason")
                    .and_then(Value::as_str)
                    .filter(|r| r.contains("CrashLoopBackOff"))
                    .or_else(|| {
                        waiting
                            .get("message")
                            .and_then(Value::as_str)
                            .filter(|m| m.contains("CrashLoopBackOff"))
                    });
                if let Some(reason) = reason {
                    crashing.push(cs.get("name").and_then(Value::as_str).unwrap_or_default().to_string());
                    out.insert("status".into(), json!("CrashLoopBackOff"));
                    out.insert("statusReason".into(), json!(reason));
                }
            }
            if !crashing.is_empty() {
                out.insert("crashLoopContainers".into(), json!(crashing));
            }
        }
        WatchKind::Services | WatchKind::Ingresses => {
            if kind == WatchKind::Services {
                if let Some(ip) = str_at(obj, "/spec/clusterIP") {
                    out.insert("clusterIP".into(), json!(ip));
                }
            }
            if let Some(first) = array_at(obj, "/status/loadBalancer/ingress").first() {
                if let Some(ip) = first.get("ip").and_then(Value::as_str) {
                    out.insert("externalIP".into(), json!(ip));
                }
                if let Some(host) = first.get("hostname").and_then(Value::as_str) {
                    out.insert("externalHostname".into(), json!(host));
                }
            }
        }
        WatchKind::Deployments => {
            if let Some(n) = obj.pointer("/status/availableReplicas").and_then(Value::as_i64) {
                out.insert("availableReplicas".into(), json!(n));
            }
        }
        WatchKind::Jobs => {
            if let Some(n) = obj.pointer("/status/succeeded").and_then(Value::as_i64) {
                out.insert("succeeded".into(), json!(n));
            }
        }
    }
    out
}

/// Compact signature of the status-relevant parts of an object.
fn snapshot(event: &ClusterEvent) -> String {
    let obj = &event.object;
    let mut m = status_fields(event.kind, obj);
    if let Some(ts) = obj.pointer("/metadata/deletionTimestamp") {
        m.insert("deletionTimestamp".into(), ts.clone());
    }
    if event.kind == WatchKind::Pods {
        let statuses: Vec<Value> = array_at(obj, "/status/containerStatuses")
            .iter()
            .map(|cs| {
                json!({
                    "name": cs.get("name"),
                    "restartCount": cs.get("restartCount"),
                    "waiting": cs.pointer("/state/waiting/reason"),
                })
            })
            .collect();
        m.insert("containerStatuses".into(), Value::Array(statuses));
    }
    Value::Object(m).to_string()
}

/// Suppresses events whose status signature did not change.
#[derive(Default)]
pub struct ChangeFilter {
    last: HashMap<String, String>,
}

impl ChangeFilter {
    /// Whether `event` should be forwarded. Deletes always pass.
    pub fn admit(&mut self, event: &ClusterEvent) -> bool {
        let name = str_at(&event.object, "/metadata/name").unwrap_or_default().to_string();
        if event.event_type == EventType::Deleted {
            self.last.remove(&name);
            return true;
        }
        let snap = snapshot(event);
        if self.last.get(&name) == Some(&snap) {
            return false;
        }
        self.last.insert(name, snap);
        true
    }
}

/// Start one watcher task per kind. Each writes serialised envelopes into
/// `tx`, dropping them when the channel is full, re-establishes its watch
/// with backoff after failures, and exits on cancellation or channel close.
pub fn spawn_watchers(
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    kinds: &[WatchKind],
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    kinds
        .iter()
        .map(|&kind| {
            let gateway = gateway.clone();
            let namespace = namespace.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                watch_kind(gateway, namespace, kind, tx, cancel).await;
            })
        })
        .collect()
}

async fn watch_kind(
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    kind: WatchKind,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut filter = ChangeFilter::default();
    let mut backoff = Duration::from_millis(WATCH_BACKOFF_INITIAL_MS);
    let max_backoff = Duration::from_millis(WATCH_BACKOFF_MAX_MS);

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            s = gateway.watch(&namespace, kind) => s,
        };
        match stream {
            Ok(mut stream) => loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    n = stream.next() => n,
                };
                match next {
                    Some(Ok(event)) => {
                        backoff = Duration::from_millis(WATCH_BACKOFF_INITIAL_MS);
                        if !filter.admit(&event) {
                            continue;
                        }
                        match tx.try_send(envelope(&event).to_string()) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                debug!("Watch buffer full for {}, dropping {} event", namespace, kind);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => return,
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Watch {} in {} failed: {}", kind, namespace, e);
                        break;
                    }
                    None => break,
                }
            },
            Err(e) => warn!("Failed to start {} watch in {}: {}", kind, namespace, e),
        }
        if tx.is_closed() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;

    fn event(event_type: EventType, kind: WatchKind, object: Value) -> ClusterEvent {
        ClusterEvent {
            event_type,
            kind,
            object,
        }
    }

    #[test]
    fn pod_envelope() {
        let e = event(
            EventType::Added,
            WatchKind::Pods,
            json!({
                "metadata": {"name": "web", "namespace": "proj-1-alice", "labels": {"app": "web"},
                             "creationTimestamp": "2026-01-01T00:00:00Z"},
                "spec": {"containers": [{"name": "c", "image": "nginx"}]},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "c", "restartCount": 4, "state": {"waiting": {"reason": "CrashLoopBackOff"}}}
                ]}
            }),
        );
        let env = envelope(&e);
        assert_eq!(env["type"], "ADDED");
        assert_eq!(env["kind"], "Pod");
        assert_eq!(env["name"], "web");
        assert_eq!(env["ns"], "proj-1-alice");
        assert_eq!(env["metadata"]["labels"]["app"], "web");
        assert_eq!(env["status"], "CrashLoopBackOff");
        assert_eq!(env["containers"], json!(["c"]));
        assert_eq!(env["images"], json!(["nginx"]));
        assert_eq!(env["restartCount"], 4);
    }

    #[test]
    fn service_and_workload_envelopes() {
        let svc = envelope(&event(
            EventType::Modified,
            WatchKind::Services,
            json!({
                "metadata": {"name": "s"},
                "spec": {"clusterIP": "10.0.0.9", "ports": [{"port": 80, "protocol": "TCP", "nodePort": 30080}]},
                "status": {"loadBalancer": {"ingress": [{"ip": "1.2.3.4"}]}}
            }),
        ));
        assert_eq!(svc["clusterIP"], "10.0.0.9");
        assert_eq!(svc["nodePorts"], json!([30080]));
        assert_eq!(svc["ports"], json!(["80/TCP"]));
        assert_eq!(svc["externalIPs"], json!(["1.2.3.4"]));
        assert_eq!(svc["externalIP"], "1.2.3.4");

        let dep = envelope(&event(
            EventType::Modified,
            WatchKind::Deployments,
            json!({"metadata": {"name": "d"}, "status": {"availableReplicas": 2}}),
        ));
        assert_eq!(dep["availableReplicas"], 2);

        let job = envelope(&event(
            EventType::Deleted,
            WatchKind::Jobs,
            json!({"metadata": {"name": "j"}, "status": {"succeeded": 1}}),
        ));
        assert_eq!(job["type"], "DELETED");
        assert_eq!(job["succeeded"], 1);
    }

    #[test]
    fn change_filter_skips_repeats() {
        let mut filter = ChangeFilter::default();
        let running = json!({"metadata": {"name": "p"}, "status": {"phase": "Running"}});
        assert!(filter.admit(&event(EventType::Added, WatchKind::Pods, running.clone())));
        assert!(!filter.admit(&event(EventType::Modified, WatchKind::Pods, running.clone())));
        let done = json!({"metadata": {"name": "p"}, "status": {"phase": "Succeeded"}});
        assert!(filter.admit(&event(EventType::Modified, WatchKind::Pods, done)));
        assert!(filter.admit(&event(EventType::Deleted, WatchKind::Pods, running.clone())));
        assert!(filter.admit(&event(EventType::Added, WatchKind::Pods, running)));
    }

    #[tokio::test]
    async fn watchers_forward_until_cancelled() {
        let gw = Arc::new(MockGateway::new());
        gw.apply_object(
            "ns",
            &json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "svc"}}),
        )
        .await
        .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handles = spawn_watchers(gw.clone(), "ns".into(), &WatchKind::ALL, tx, cancel.clone());

        let first: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["kind"], "Service");
        assert_eq!(first["name"], "svc");

        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }
}
