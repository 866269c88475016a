use pkg_constants::state::AUDIT_QUEUE_CAPACITY;
use pkg_types::audit::AuditEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::repo::AuditRepo;

/// Destination for audit events. Recording never fails from the caller's
/// point of view and never blocks on persistence.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Queues events into a bounded channel drained by a background writer.
#[derive(Clone)]
pub struct BusAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl BusAuditSink {
    /// Create the sink and spawn the writer task that persists into `repo`.
    pub fn start(repo: Arc<dyn AuditRepo>) -> (Self, tokio::task::JoinHandle<()>) {
        Self::with_capacity(repo, AUDIT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        repo: Arc<dyn AuditRepo>,
        capacity: usize,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, mut rx) = mpsc::channel::<AuditEvent>(capacity);
        let handle = tokio::spawn(async move {
            debug!("Audit writer started (capacity={})", capacity);
            while let Some(event) = rx.recv().await {
                let key = format!("{}/{}", event.resource_type, event.resource_key);
                if let Err(e) = repo.append(event).await {
                    warn!("Failed to persist audit event {}: {}", key, e);
                }
            }
            debug!("Audit writer stopped");
        });
        (Self { sender }, handle)
    }
}

impl AuditSink for BusAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping audit event: {}", e);
        }
    }
}

/// Discards every event.
#[derive(Clone, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Keeps events in memory; handy for asserting what a service recorded.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<std::sync::Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pkg_types::audit::Actor;

    struct FailingRepo;

    #[async_trait]
    impl AuditRepo for FailingRepo {
        async fn append(&self, _event: AuditEvent) -> anyhow::Result<AuditEvent> {
            anyhow::bail!("audit backend unavailable")
        }

        async fn list_recent(&self, _limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
            Ok(vec![])
        }
    }

    fn event(key: &str) -> AuditEvent {
        AuditEvent::created(&Actor::system(), "group", key, &serde_json::json!({"k": key}))
    }

    #[tokio::test]
    async fn bus_persists_events_in_order() {
        let repos = crate::repo::Repos::in_memory();
        let (sink, handle) = BusAuditSink::start(repos.audit.clone());
        sink.record(event("first"));
        sink.record(event("second"));
        drop(sink);
        handle.await.unwrap();

        let stored = repos.audit.list_recent(10).await.unwrap();
        let keys: Vec<&str> = stored.iter().map(|e| e.resource_key.as_str()).collect();
        assert_eq!(keys, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn failing_backend_does_not_reach_the_caller() {
        let (sink, handle) = BusAuditSink::start(Arc::new(FailingRepo));
        sink.record(event("lost"));
        drop(sink);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (sink, _handle) = BusAuditSink::with_capacity(Arc::new(FailingRepo), 1);
        for i in 0..100 {
            sink.record(event(&i.to_string()));
        }
    }
}
