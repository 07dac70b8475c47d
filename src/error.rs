//! Error types for stackwire

use std::path::PathBuf;
use thiserror::Error;

/// Result type for stackwire operations
pub type Result<T> = std::result::Result<T, StackError>;

/// stackwire error types
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Host port {port}/{protocol} is claimed by both '{first}' and '{second}'")]
    PortConflict {
        port: u16,
        protocol: String,
        first: String,
        second: String,
    },

    #[error("Host port {port}/{protocol} is already in use by '{holder}'")]
    PortInUse {
        port: u16,
        protocol: String,
        holder: String,
    },

    #[error("Network '{network}' uses unknown driver '{driver}'")]
    UnknownNetworkDriver { network: String, driver: String },

    #[error("Service '{service}' joins undefined network '{network}'")]
    UndefinedNetwork { service: String, network: String },

    #[error("Build context for service '{service}' not found: {}", .path.display())]
    BuildContextNotFound { service: String, path: PathBuf },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Timed out waiting for service '{service}' after {max_retries} attempts")]
    ServiceWaitTimeout { service: String, max_retries: u32 },

    #[error("Dependency '{service}' failed: {reason}")]
    DependencyFailed { service: String, reason: String },

    #[error("Container error: {0}")]
    Container(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl From<serde_yaml::Error> for StackError {
    fn from(err: serde_yaml::Error) -> Self {
        StackError::Yaml(err.to_string())
    }
}
