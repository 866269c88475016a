use chrono::{DateTime, Utc};
use pkg_constants::gpu::{ACCESS_DEDICATED, ACCESS_NONE, ACCESS_SHARED, MPS_UNITS_PER_GPU};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub group_id: u64,
    /// Quota in shared GPU units.
    #[serde(default)]
    pub gpu_quota: u32,
    /// Comma list drawn from `none`, `shared`, `dedicated`.
    #[serde(default = "default_gpu_access")]
    pub gpu_access: String,
    /// MPS active thread percentage, 0-100. Zero means unset.
    #[serde(default)]
    pub mps_threads: u8,
    /// MPS device memory limit in MiB. Zero means unset.
    #[serde(default)]
    pub mps_memory_mib: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_gpu_access() -> String {
    ACCESS_SHARED.to_string()
}

impl Project {
    /// Parsed `gpu_access` list.
    pub fn access_set(&self) -> BTreeSet<String> {
        parse_access_list(&self.gpu_access)
    }

    pub fn allows(&self, access_type: &str) -> bool {
        self.access_set().contains(access_type)
    }

    /// Quota expressed in whole dedicated GPUs, rounded down.
    pub fn quota_in_gpus(&self) -> u32 {
        self.gpu_quota / MPS_UNITS_PER_GPU
    }

    pub fn gpu_settings(&self) -> ProjectGpuSettings {
        ProjectGpuSettings {
            gpu_quota: self.gpu_quota,
            gpu_access: self.gpu_access.clone(),
            mps_threads: self.mps_threads,
            mps_memory_mib: self.mps_memory_mib,
        }
    }
}

/// Split a comma list into a set of trimmed, non-empty access modes.
pub fn parse_access_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reject access lists containing anything but the three known modes.
pub fn validate_access_list(raw: &str) -> anyhow::Result<()> {
    for mode in parse_access_list(raw) {
        if ![ACCESS_NONE, ACCESS_SHARED, ACCESS_DEDICATED].contains(&mode.as_str()) {
            anyhow::bail!("unknown GPU access mode '{}'", mode);
        }
    }
    Ok(())
}

/// The GPU policy slice of a project consumed by the policy injector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectGpuSettings {
    pub gpu_quota: u32,
    pub gpu_access: String,
    pub mps_threads: u8,
    pub mps_memory_mib: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub project_name: String,
    pub g_id: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub gpu_quota: Option<u32>,
    #[serde(default)]
    pub gpu_access: Option<String>,
    #[serde(default)]
    pub mps_threads: Option<u8>,
    #[serde(default)]
    pub mps_memory_mib: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub g_id: Option<u64>,
    #[serde(default)]
    pub gpu_quota: Option<u32>,
    #[serde(default)]
    pub gpu_access: Option<String>,
    #[serde(default)]
    pub mps_threads: Option<u8>,
    #[serde(default)]
    pub mps_memory_mib: Option<u32>,
}

/// A project together with the group it was reached through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMembershipView {
    pub project: Project,
    pub group_name: String,
    pub role: crate::group::Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(access: &str) -> Project {
        Project {
            id: 1,
            name: "p".to_string(),
            description: String::new(),
            group_id: 1,
            gpu_quota: 25,
            gpu_access: access.to_string(),
            mps_threads: 0,
            mps_memory_mib: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn access_list_is_trimmed() {
        let p = project(" shared , dedicated,");
        assert!(p.allows("shared"));
        assert!(p.allows("dedicated"));
        assert!(!p.allows("none"));
        assert_eq!(p.access_set().len(), 2);
    }

    #[test]
    fn empty_access_allows_nothing() {
        let p = project("");
        assert!(!p.allows("shared"));
        assert!(!p.allows("dedicated"));
    }

    #[test]
    fn unknown_access_mode_rejected() {
        assert!(validate_access_list("shared,dedicated").is_ok());
        assert!(validate_access_list("shared,exclusive").is_err());
    }

    #[test]
    fn quota_in_whole_gpus() {
        assert_eq!(project("shared").quota_in_gpus(), 2);
    }
}
