pub mod audit;
pub mod client;
pub mod kv;
pub mod repo;

pub use audit::{AuditSink, BusAuditSink, MemoryAuditSink, NoopAuditSink};
pub use client::{KvStore, MemoryStore, StateStore};
pub use repo::{
    AuditRepo, ConfigFileRepo, GpuRequestRepo, GroupRepo, JobRepo, MembershipRepo, ProjectRepo,
    Repos, ResourceRepo, UserRepo,
};
