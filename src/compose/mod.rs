//! Docker Compose compatible orchestration
//!
//! This module loads compose descriptors, plans a deployment from them and
//! drives that plan in dependency order.

pub mod config;
pub mod graph;
pub mod orchestrator;
pub mod parser;
pub mod plan;
pub mod port;
pub mod project;
pub mod waiter;

pub use config::{ComposeConfig, DependencyCondition, ServiceConfig};
pub use graph::DependencyGraph;
pub use orchestrator::{ComposeOrchestrator, ServiceOutcome, ServiceStatus, UpReport};
pub use parser::ComposeParser;
pub use plan::{DeploymentPlan, PlannedNetwork, PlannedService, ResolvedBuild};
pub use port::{HostPort, PortBinding, Protocol};
pub use project::{Project, ProjectOptions};
pub use waiter::WaitConfig;
