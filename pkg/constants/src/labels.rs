//! Label keys and values stamped on cluster objects.

/// Identifies objects managed by this platform.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const PLATFORM_NAME: &str = "platform-go";

pub const STORAGE_TYPE_LABEL: &str = "storage-type";
pub const STORAGE_TYPE_PROJECT: &str = "project";
pub const STORAGE_TYPE_USER_HUB: &str = "user-hub";
pub const PROJECT_ID_LABEL: &str = "project-id";
pub const PROJECT_NAME_LABEL: &str = "project-name";

/// Generic workload selector key.
pub const APP_LABEL: &str = "app";

/// `app=` value on the hub file server pods.
pub const NFS_GATEWAY_APP: &str = "nfs-gateway";

/// `app=` value on file-browser pods.
pub const FILEBROWSER_APP: &str = "filebrowser";

/// Carries the claim a file browser is serving.
pub const PVC_LABEL: &str = "pvc";

/// Label the batch controller puts on the pods of a job.
pub const JOB_NAME_LABEL: &str = "job-name";
