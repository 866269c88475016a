//! State store key layout.
//!
//! Every entity lives under `/registry/<entity>/`. Numeric ids are
//! zero-padded to [`ID_WIDTH`] digits so prefix scans come back in id order.

pub const USERS_PREFIX: &str = "/registry/users/";
pub const GROUPS_PREFIX: &str = "/registry/groups/";
pub const MEMBERSHIPS_PREFIX: &str = "/registry/memberships/";
pub const PROJECTS_PREFIX: &str = "/registry/projects/";
pub const CONFIG_FILES_PREFIX: &str = "/registry/configfiles/";
pub const RESOURCES_PREFIX: &str = "/registry/resources/";
pub const JOBS_PREFIX: &str = "/registry/jobs/";
pub const GPU_REQUESTS_PREFIX: &str = "/registry/gpurequests/";
pub const AUDIT_PREFIX: &str = "/registry/audit/";

/// Per-entity id sequences: `SEQUENCES_PREFIX + <entity>`.
pub const SEQUENCES_PREFIX: &str = "/registry/sequences/";

/// Width of zero-padded numeric ids in keys.
pub const ID_WIDTH: usize = 12;

/// Capacity of the audit queue drained by the background writer.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;
