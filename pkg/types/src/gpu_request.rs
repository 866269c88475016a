use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequestKind {
    Quota,
    Access,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for GpuRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuRequestStatus::Pending => write!(f, "pending"),
            GpuRequestStatus::Approved => write!(f, "approved"),
            GpuRequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A pending change request for a project's GPU policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuRequest {
    pub id: u64,
    pub project_id: u64,
    pub requester_id: u64,
    pub kind: GpuRequestKind,
    #[serde(default)]
    pub requested_quota: Option<u32>,
    #[serde(default)]
    pub requested_access: Option<String>,
    #[serde(default)]
    pub reason: String,
    pub status: GpuRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGpuRequest {
    #[serde(rename = "type")]
    pub kind: GpuRequestKind,
    #[serde(default)]
    pub requested_quota: Option<u32>,
    #[serde(default)]
    pub requested_access_type: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessGpuRequest {
    pub status: GpuRequestStatus,
}
