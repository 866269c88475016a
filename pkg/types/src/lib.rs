pub mod audit;
pub mod config;
pub mod config_file;
pub mod error;
pub mod gpu_request;
pub mod group;
pub mod job;
pub mod project;
pub mod user;
pub mod validate;

pub use error::{CoreError, CoreResult};
