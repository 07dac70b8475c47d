//! Container management module
//!
//! In-memory container state: creation, start, stop, health and exit.

pub mod config;
pub mod lifecycle;

pub use config::{ContainerConfig, ContainerHealth, ContainerStatus};
pub use lifecycle::ContainerManager;
