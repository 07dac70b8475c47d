//! Container lifecycle management

use super::config::{ContainerConfig, ContainerHealth, ContainerStatus};
use crate::error::{Result, StackError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// Container manager for handling container lifecycle
///
/// Tracks container state in memory. "Started" here means the container
/// is `Running`; readiness is reported separately through its health.
#[derive(Default)]
pub struct ContainerManager {
    /// All containers indexed by ID
    containers: RwLock<HashMap<String, ContainerConfig>>,
}

impl ContainerManager {
    /// Create a new container manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new container
    pub fn create(&self, config: ContainerConfig) -> Result<String> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        if containers.contains_key(&config.id) || containers.values().any(|c| c.name == config.name) {
            return Err(StackError::ContainerExists(config.name));
        }

        let id = config.id.clone();
        tracing::debug!("Created container {} ({})", config.name, id);
        containers.insert(id.clone(), config);
        Ok(id)
    }

    /// Start a container
    pub fn start(&self, id: &str) -> Result<()> {
        self.update(id, |container| {
            if container.is_running() {
                return Err(StackError::Container(format!(
                    "Container {} is already running",
                    container.name
                )));
            }

            container.status = ContainerStatus::Running;
            container.started_at = Some(Utc::now());
            container.finished_at = None;
            container.exit_code = None;
            container.health = if container.healthcheck {
                ContainerHealth::Starting
            } else {
                ContainerHealth::None
            };
            Ok(())
        })
    }

    /// Stop a container
    pub fn stop(&self, id: &str) -> Result<()> {
        self.update(id, |container| {
            if container.is_running() {
                container.status = ContainerStatus::Stopped;
                container.finished_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    /// Record that a container's process exited with `code`
    pub fn exit(&self, id: &str, code: i32) -> Result<()> {
        self.update(id, |container| {
            if !container.is_running() {
                return Err(StackError::Container(format!(
                    "Container {} is not running",
                    container.name
                )));
            }
            container.status = ContainerStatus::Exited;
            container.exit_code = Some(code);
            container.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Record a healthcheck verdict
    pub fn set_health(&self, id: &str, health: ContainerHealth) -> Result<()> {
        self.update(id, |container| {
            if !container.healthcheck {
                return Err(StackError::Container(format!(
                    "Container {} has no healthcheck",
                    container.name
                )));
            }
            container.health = health;
            Ok(())
        })
    }

    /// Remove a container
    pub fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        let container = containers
            .get(id)
            .ok_or_else(|| StackError::ContainerNotFound(id.to_string()))?;

        if container.is_running() && !force {
            return Err(StackError::Container(format!(
                "Cannot remove running container {}",
                container.name
            )));
        }

        containers.remove(id);
        Ok(())
    }

    /// Get container by ID
    pub fn get(&self, id: &str) -> Result<ContainerConfig> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        containers
            .get(id)
            .cloned()
            .ok_or_else(|| StackError::ContainerNotFound(id.to_string()))
    }

    /// List containers, running only unless `all`
    pub fn list(&self, all: bool) -> Result<Vec<ContainerConfig>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let mut result: Vec<ContainerConfig> = containers
            .values()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(result)
    }

    /// Find container by name
    pub fn find_by_name(&self, name: &str) -> Result<Option<ContainerConfig>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(containers.values().find(|c| c.name == name).cloned())
    }

    /// Get running container count
    pub fn running_count(&self) -> Result<usize> {
        Ok(self.list(false)?.len())
    }

    fn update<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ContainerConfig) -> Result<()>,
    {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        let container = containers
            .get_mut(id)
            .ok_or_else(|| StackError::ContainerNotFound(id.to_string()))?;

        f(container)
    }
}
