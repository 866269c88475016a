//! Filesystem path constants.

// ─── Server ────────────────────────────────────────────────────────────────

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/workspace/config.yaml";

/// Default data directory for the server state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/tmp/workspace-data";

/// Subdirectory of the data dir used for manifest archival when no
/// object-store endpoint is configured.
pub const ARCHIVE_SUBDIR: &str = "archive";

// ─── Archive ──────────────────────────────────────────────────────────────

/// Default bucket for raw config-file archival.
pub const DEFAULT_ARCHIVE_BUCKET: &str = "config-files";
