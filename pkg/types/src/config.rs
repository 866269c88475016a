use serde::{Deserialize, Serialize};

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 8080
/// data-dir: /var/lib/workspace/data
/// jwt-secret: change-me
/// cluster:
///   mode: kube
///   kubeconfig: /etc/workspace/kubeconfig
/// storage:
///   class: longhorn
///   size: 3Gi
/// archive:
///   endpoint: minio.storage:9000
///   bucket: config-files
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data_dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "jwt_secret")]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default, alias = "token_ttl_hours")]
    pub token_ttl_hours: Option<i64>,
    #[serde(default, alias = "admin_password")]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub cluster: ClusterConfigFile,
    #[serde(default)]
    pub storage: StorageConfigFile,
    #[serde(default)]
    pub archive: ArchiveConfigFile,
    #[serde(default)]
    pub jobs: JobsConfigFile,
}

/// How the server reaches the cluster.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// Talk to a real API server.
    #[default]
    Kube,
    /// Record cluster writes in memory without touching a cluster.
    Mock,
}

impl std::str::FromStr for ClusterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kube" => Ok(ClusterMode::Kube),
            "mock" => Ok(ClusterMode::Mock),
            other => anyhow::bail!("unknown cluster mode '{}' (expected kube or mock)", other),
        }
    }
}

impl std::fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterMode::Kube => write!(f, "kube"),
            ClusterMode::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfigFile {
    #[serde(default)]
    pub mode: Option<ClusterMode>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default, alias = "call_timeout_secs")]
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfigFile {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveConfigFile {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, alias = "access_key")]
    pub access_key: Option<String>,
    #[serde(default, alias = "secret_key")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default, alias = "use_ssl")]
    pub use_ssl: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobsConfigFile {
    #[serde(default, alias = "priority_class")]
    pub priority_class: Option<String>,
    #[serde(default, alias = "poll_secs")]
    pub poll_secs: Option<u64>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
