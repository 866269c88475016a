//! Cluster naming conventions. Integrations depend on these being bit-exact.

/// Maximum length of a cluster object name.
pub const MAX_NAME_LEN: usize = 63;

/// Returned by sanitisation when nothing valid is left.
pub const UNNAMED: &str = "unnamed";

/// Number of hex chars used for stable name suffixes.
pub const HASH_SUFFIX_LEN: usize = 6;

/// Per-(project, user) namespace: `proj-<project_id>-<safe_username>`.
pub const PROJECT_NAMESPACE_PREFIX: &str = "proj";

/// Per-user hub namespace: `user-<safe_username>-storage`.
pub const USER_NAMESPACE_PREFIX: &str = "user";
pub const STORAGE_NAMESPACE_SUFFIX: &str = "storage";

/// Per-user hub claim: `user-<safe_username>-disk`.
pub const HUB_CLAIM_SUFFIX: &str = "disk";

/// Admin-provisioned project namespace prefix: `project-<name>-<hash6>`.
pub const PROJECT_STORAGE_PREFIX: &str = "project";

/// Project-shared claim: `pvc-<project_namespace>`.
pub const PROJECT_CLAIM_PREFIX: &str = "pvc";

/// Hub file-server service name and deployment name.
pub const HUB_SERVICE_NAME: &str = "storage-svc";
pub const HUB_DEPLOYMENT_NAME: &str = "storage-gateway";

/// Cluster DNS suffix for service addresses.
pub const CLUSTER_DNS_SUFFIX: &str = "svc.cluster.local";

/// File browser object names: `filebrowser-<pvc>` and `filebrowser-<pvc>-svc`.
pub const FILEBROWSER_PREFIX: &str = "filebrowser";
pub const SERVICE_SUFFIX: &str = "svc";
