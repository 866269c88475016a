use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditVerb {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for AuditVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditVerb::Create => write!(f, "create"),
            AuditVerb::Update => write!(f, "update"),
            AuditVerb::Delete => write!(f, "delete"),
        }
    }
}

/// Who did something and where the request came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<u64>,
    pub username: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    /// Actor for work the server does on its own behalf.
    pub fn system() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(default)]
    pub id: u64,
    pub actor_id: Option<u64>,
    pub verb: AuditVerb,
    pub resource_type: String,
    pub resource_key: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from before/after snapshots of any serialisable entity.
    pub fn new<B: Serialize, A: Serialize>(
        actor: &Actor,
        verb: AuditVerb,
        resource_type: &str,
        resource_key: impl Into<String>,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Self {
        Self {
            id: 0,
            actor_id: actor.user_id,
            verb,
            resource_type: resource_type.to_string(),
            resource_key: resource_key.into(),
            before: before.and_then(|b| serde_json::to_value(b).ok()),
            after: after.and_then(|a| serde_json::to_value(a).ok()),
            source_ip: actor.source_ip.clone(),
            user_agent: actor.user_agent.clone(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn created<A: Serialize>(
        actor: &Actor,
        resource_type: &str,
        resource_key: impl Into<String>,
        after: &A,
    ) -> Self {
        Self::new::<(), A>(actor, AuditVerb::Create, resource_type, resource_key, None, Some(after))
    }

    pub fn updated<T: Serialize>(
        actor: &Actor,
        resource_type: &str,
        resource_key: impl Into<String>,
        before: &T,
        after: &T,
    ) -> Self {
        Self::new(actor, AuditVerb::Update, resource_type, resource_key, Some(before), Some(after))
    }

    pub fn deleted<B: Serialize>(
        actor: &Actor,
        resource_type: &str,
        resource_key: impl Into<String>,
        before: &B,
    ) -> Self {
        Self::new::<B, ()>(actor, AuditVerb::Delete, resource_type, resource_key, Some(before), None)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
