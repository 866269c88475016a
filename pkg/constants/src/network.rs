//! Network-related constants.

/// Default port for the workspace API server.
pub const DEFAULT_API_PORT: u16 = 8080;

/// Interval between WebSocket ping frames on terminal sessions, in seconds.
pub const WS_PING_INTERVAL_SECS: u64 = 54;

/// Idle read deadline for terminal sessions, in seconds.
/// Reset on every inbound message and pong.
pub const WS_READ_DEADLINE_SECS: u64 = 60;

/// Maximum inbound WebSocket message size for terminal sessions.
pub const WS_READ_LIMIT_BYTES: usize = 512 * 1024;

/// Capacity of the per-connection watch fan-in channel.
/// Events are dropped when a client falls this far behind.
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

/// First retry delay after a watch stream fails, in milliseconds.
pub const WATCH_BACKOFF_INITIAL_MS: u64 = 1_000;

/// Upper bound on the watch retry delay, in milliseconds.
pub const WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default deadline applied to each cluster API call, in seconds.
pub const DEFAULT_CLUSTER_CALL_TIMEOUT_SECS: u64 = 30;
