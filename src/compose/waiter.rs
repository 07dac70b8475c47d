//! Waiting for dependencies to become ready
//!
//! A dependency counts as ready once it reaches the condition its dependent
//! declared. Polling backs off exponentially between attempts.

use super::config::DependencyCondition;
use crate::container::{ContainerHealth, ContainerManager, ContainerStatus};
use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Maximum number of checks
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay after the first failed check, in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Growth factor between delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    23
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl WaitConfig {
    /// Delay before check `attempt + 1`, capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }
}

/// Outcome of one readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The condition is met
    Ready,
    /// Not yet; check again later
    Pending,
    /// The condition can no longer be met
    Failed,
}

/// Check a container against a dependency condition once
pub fn check(
    containers: &ContainerManager,
    container_id: &str,
    condition: DependencyCondition,
) -> Result<Readiness> {
    let container = containers.get(container_id)?;

    let readiness = match condition {
        DependencyCondition::ServiceStarted => match container.status {
            // An exited container was still launched.
            ContainerStatus::Running | ContainerStatus::Exited => Readiness::Ready,
            ContainerStatus::Created => Readiness::Pending,
            ContainerStatus::Stopped => Readiness::Failed,
        },
        DependencyCondition::ServiceHealthy => match (container.status, container.health) {
            (ContainerStatus::Running, ContainerHealth::Healthy) => Readiness::Ready,
            // No healthcheck: running counts as healthy.
            (ContainerStatus::Running, ContainerHealth::None) => Readiness::Ready,
            (ContainerStatus::Running, ContainerHealth::Unhealthy) => Readiness::Failed,
            (ContainerStatus::Running, ContainerHealth::Starting) => Readiness::Pending,
            (ContainerStatus::Created, _) => Readiness::Pending,
            (ContainerStatus::Stopped | ContainerStatus::Exited, _) => Readiness::Failed,
        },
        DependencyCondition::ServiceCompletedSuccessfully => {
            match (container.status, container.exit_code) {
                (ContainerStatus::Exited, Some(0)) => Readiness::Ready,
                (ContainerStatus::Exited, _) => Readiness::Failed,
                (ContainerStatus::Stopped, _) => Readiness::Failed,
                _ => Readiness::Pending,
            }
        }
    };

    Ok(readiness)
}

/// Wait until a dependency's container meets `condition`
pub async fn wait_for_dependency(
    containers: &ContainerManager,
    service: &str,
    container_id: &str,
    condition: DependencyCondition,
    config: &WaitConfig,
) -> Result<()> {
    for attempt in 0..config.max_retries {
        match check(containers, container_id, condition)? {
            Readiness::Ready => {
                tracing::debug!("Dependency {} reached {}", service, condition);
                return Ok(());
            }
            Readiness::Failed => {
                let container = containers.get(container_id)?;
                return Err(StackError::DependencyFailed {
                    service: service.to_string(),
                    reason: format!(
                        "cannot reach {} (status {}, health {}, exit code {:?})",
                        condition, container.status, container.health, container.exit_code
                    ),
                });
            }
            Readiness::Pending => {}
        }

        if attempt + 1 < config.max_retries {
            let delay_ms = config.delay_for_attempt(attempt);
            tracing::debug!(
                "Waiting {}ms for {} to reach {} (attempt {}/{})",
                delay_ms,
                service,
                condition,
                attempt + 1,
                config.max_retries
            );
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    Err(StackError::ServiceWaitTimeout {
        service: service.to_string(),
        max_retries: config.max_retries,
    })
}
