//! Storage hub and file-browser constants.

/// Claim name that stays writable for every role inside a project namespace.
pub const DEFAULT_STORAGE_NAME: &str = "project";

/// Default storage class for claims.
pub const DEFAULT_STORAGE_CLASS: &str = "longhorn";

/// Default size for hub and project claims.
pub const DEFAULT_STORAGE_SIZE: &str = "3Gi";

/// Single-writer access mode used by the hub claim.
pub const ACCESS_MODE_SINGLE_WRITER: &str = "ReadWriteOnce";

/// Multi-writer access mode used by project-shared claims.
pub const ACCESS_MODE_MULTI_WRITER: &str = "ReadWriteMany";

// ─── Hub file server ──────────────────────────────────────────────────────

pub const NFS_SERVER_IMAGE: &str = "erichough/nfs-server:latest";
pub const NFS_CONTAINER_NAME: &str = "nfs";
pub const NFS_EXPORT_ROOT: &str = "/exports";
pub const NFS_EXPORT_ENV: &str = "NFS_EXPORT_0";
pub const NFS_EXPORT_OPTIONS: &str =
    "/exports *(rw,fsid=0,async,no_subtree_check,no_auth_nlm,insecure,no_root_squash)";
pub const HUB_VOLUME_NAME: &str = "hub-storage";

pub const NFS_PORT: i32 = 2049;
pub const MOUNTD_PORT: i32 = 20048;
pub const RPCBIND_PORT: i32 = 111;

// ─── File browser ─────────────────────────────────────────────────────────

pub const FILEBROWSER_IMAGE: &str = "filebrowser/filebrowser:latest";
pub const FILEBROWSER_CONTAINER_NAME: &str = "filebrowser";
pub const FILEBROWSER_ROOT: &str = "/srv";
pub const FILEBROWSER_PORT: i32 = 80;
pub const FILEBROWSER_VOLUME_NAME: &str = "data";
