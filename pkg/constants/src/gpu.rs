//! GPU and MPS constants.

/// Extended resource name for a whole (dedicated) GPU.
pub const GPU_DEDICATED_RESOURCE: &str = "nvidia.com/gpu";

/// Extended resource name for an MPS-shared GPU slice.
pub const GPU_SHARED_RESOURCE: &str = "nvidia.com/gpu.shared";

/// One dedicated GPU is worth this many shared units in quota arithmetic.
pub const MPS_UNITS_PER_GPU: u32 = 10;

/// Annotation carrying the MPS active thread percentage.
pub const MPS_THREADS_ANNOTATION: &str = "mps.nvidia.com/threads";

/// Annotation carrying the MPS device memory limit.
pub const MPS_VRAM_ANNOTATION: &str = "mps.nvidia.com/vram";

/// Thread percentage forced when a dedicated GPU is emulated on a shared node.
pub const EMULATED_MPS_THREADS: &str = "100";

/// Memory limit forced when a dedicated GPU is emulated on a shared node.
pub const EMULATED_MPS_VRAM: &str = "48000M";

/// Access mode names accepted in a project's `gpu_access` list.
pub const ACCESS_NONE: &str = "none";
pub const ACCESS_SHARED: &str = "shared";
pub const ACCESS_DEDICATED: &str = "dedicated";

/// Access type assumed when a job does not specify one.
pub const DEFAULT_GPU_TYPE: &str = ACCESS_DEDICATED;

/// Priority class attached to submitted batch jobs.
pub const DEFAULT_JOB_PRIORITY_CLASS: &str = "low-priority";

/// Interval between job status reconciliation passes, in seconds.
pub const DEFAULT_JOB_POLL_SECS: u64 = 15;
