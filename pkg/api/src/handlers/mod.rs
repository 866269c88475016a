pub mod audit;
pub mod config_files;
pub mod exec;
pub mod gpu_requests;
pub mod groups;
pub mod jobs;
pub mod memberships;
pub mod projects;
pub mod storage;
pub mod users;
pub mod watch;
