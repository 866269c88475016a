use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named bundle of manifest documents owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub id: u64,
    pub project_id: u64,
    pub filename: String,
    pub raw_text: String,
    /// Object key of the archived raw text.
    #[serde(default)]
    pub archive_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persisted, validated form of one document inside a config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: u64,
    pub config_file_id: u64,
    pub kind: String,
    pub name: String,
    /// Canonical JSON of the document.
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConfigFileRequest {
    pub project_id: u64,
    pub filename: String,
    pub raw_yaml: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfigFileRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub raw_yaml: Option<String>,
}

/// A config file and the resources parsed out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFileWithResources {
    #[serde(flatten)]
    pub config_file: ConfigFile,
    pub resources: Vec<Resource>,
}
