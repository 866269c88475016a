//! Centralized constants for the workspace platform.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod auth;
pub mod gpu;
pub mod labels;
pub mod naming;
pub mod network;
pub mod paths;
pub mod state;
pub mod storage;
