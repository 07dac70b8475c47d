//! Container configuration

use crate::compose::port::PortBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container was stopped
    Stopped,
    /// Container process exited on its own
    Exited,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Health reported by a container's healthcheck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    /// No healthcheck configured
    None,
    /// Healthcheck configured, no verdict yet
    Starting,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for ContainerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerHealth::None => write!(f, "none"),
            ContainerHealth::Starting => write!(f, "starting"),
            ContainerHealth::Healthy => write!(f, "healthy"),
            ContainerHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Container configuration and state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image name/tag
    pub image: String,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Hostname
    pub hostname: String,
    /// Whether a healthcheck is configured
    pub healthcheck: bool,
    /// Current status
    pub status: ContainerStatus,
    /// Current health
    pub health: ContainerHealth,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: String::new(),
            image: String::new(),
            env: HashMap::new(),
            ports: Vec::new(),
            labels: HashMap::new(),
            hostname: String::new(),
            healthcheck: false,
            status: ContainerStatus::Created,
            health: ContainerHealth::None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }
}

impl ContainerConfig {
    /// Create a new container configuration
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            hostname: name.to_string(),
            ..Self::default()
        }
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Add port binding
    pub fn port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }

    /// Add label
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Set hostname
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    /// Mark the container as having a healthcheck
    pub fn with_healthcheck(mut self, enabled: bool) -> Self {
        self.healthcheck = enabled;
        self
    }

    /// Whether the container process has been launched and is still up
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}
