//! Authentication and authorization constants.

/// Name of the reserved global-admin group.
pub const RESERVED_GROUP_NAME: &str = "super";

/// Username of the bootstrap administrator.
pub const RESERVED_ADMIN_USERNAME: &str = "admin";

/// Id of the bootstrap administrator. The membership
/// `(RESERVED_ADMIN_ID, super, admin)` can never be removed.
pub const RESERVED_ADMIN_ID: u64 = 1;

/// Default token signing secret. Override in every real deployment.
pub const DEFAULT_JWT_SECRET: &str = "defaultsecret";

/// Default token issuer claim.
pub const DEFAULT_JWT_ISSUER: &str = "platform";

/// Default token lifetime in hours.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Default password for the bootstrap administrator.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Minimum accepted password length at registration.
pub const MIN_PASSWORD_LEN: usize = 6;
