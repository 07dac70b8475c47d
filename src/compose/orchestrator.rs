//! Compose orchestrator

use super::plan::{DeploymentPlan, PlannedNetwork, PlannedService, LABEL_NETWORK, LABEL_PROJECT};
use super::waiter::{wait_for_dependency, WaitConfig};
use crate::container::{ContainerConfig, ContainerHealth, ContainerManager, ContainerStatus};
use crate::error::{Result, StackError};
use crate::network::{NetworkConfig, NetworkManager, PortRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// What happened to one service during `up`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ServiceOutcome {
    /// Container launched
    Started { container_id: String },
    /// Service could not be started
    Failed { reason: String },
    /// Not attempted because a dependency did not start
    Skipped { dependency: String },
}

impl ServiceOutcome {
    /// Whether the service's container was launched
    pub fn is_started(&self) -> bool {
        matches!(self, ServiceOutcome::Started { .. })
    }
}

/// Result of bringing a project up
#[derive(Debug, Clone, Serialize)]
pub struct UpReport {
    /// Project name
    pub project: String,
    /// Runtime names of networks created by this run
    pub created_networks: Vec<String>,
    /// Outcomes in start order
    pub services: Vec<(String, ServiceOutcome)>,
}

impl UpReport {
    /// Outcome for one service
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.services
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, outcome)| outcome)
    }

    /// Whether every service started
    pub fn is_success(&self) -> bool {
        self.services.iter().all(|(_, o)| o.is_started())
    }
}

/// Current view of one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Container name
    pub container_name: String,
    /// Container ID, if a container exists
    pub container_id: Option<String>,
    /// Container status, if a container exists
    pub status: Option<ContainerStatus>,
    /// Container health, if a container exists
    pub health: Option<ContainerHealth>,
    /// Address on each joined network, by runtime network name
    pub addresses: BTreeMap<String, Ipv4Addr>,
}

/// Compose orchestrator
///
/// Drives a [`DeploymentPlan`] against the container, network and port
/// managers. Dependencies are waited on per their declared condition, so a
/// dependent is only created once its dependency is ready, not merely
/// launched.
pub struct ComposeOrchestrator {
    /// Deployment plan
    plan: DeploymentPlan,
    /// Container manager
    containers: Arc<ContainerManager>,
    /// Network manager
    networks: Arc<NetworkManager>,
    /// Host port reservations
    ports: Arc<PortRegistry>,
    /// Backoff for dependency waits
    wait: WaitConfig,
    /// Container ID per started service
    service_containers: HashMap<String, String>,
}

impl ComposeOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        plan: DeploymentPlan,
        containers: Arc<ContainerManager>,
        networks: Arc<NetworkManager>,
        ports: Arc<PortRegistry>,
    ) -> Self {
        Self {
            plan,
            containers,
            networks,
            ports,
            wait: WaitConfig::default(),
            service_containers: HashMap::new(),
        }
    }

    /// Use a different backoff for dependency waits
    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// The plan being driven
    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    /// Start the compose project
    ///
    /// Network setup failures abort the whole run. A service that fails to
    /// start only takes down the services that depend on it.
    pub async fn up(&mut self) -> Result<UpReport> {
        tracing::info!("Starting compose project: {}", self.plan.project);

        let created_networks = self.materialize_networks()?;

        let mut services = Vec::with_capacity(self.plan.start_order.len());
        let mut not_started: HashSet<String> = HashSet::new();

        for service_name in self.plan.start_order.clone() {
            let planned = self.plan.service(&service_name)?.clone();

            let blocked = planned
                .depends_on
                .iter()
                .find(|(dep, _)| not_started.contains(dep))
                .map(|(dep, _)| dep.clone());

            let outcome = if let Some(dependency) = blocked {
                tracing::warn!(
                    "Skipping service {}: dependency {} did not start",
                    service_name,
                    dependency
                );
                ServiceOutcome::Skipped { dependency }
            } else {
                match self.launch(&planned).await {
                    Ok(container_id) => ServiceOutcome::Started { container_id },
                    Err(e) => {
                        tracing::warn!("Service {} failed to start: {}", service_name, e);
                        ServiceOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                }
            };

            if !outcome.is_started() {
                not_started.insert(service_name.clone());
            }
            services.push((service_name, outcome));
        }

        Ok(UpReport {
            project: self.plan.project.clone(),
            created_networks,
            services,
        })
    }

    /// Stop the compose project and remove its containers and networks
    pub async fn down(&mut self) -> Result<()> {
        tracing::info!("Stopping compose project: {}", self.plan.project);

        for service_name in self.plan.stop_order() {
            self.stop_service(&service_name).await?;
        }

        for network in &self.plan.networks {
            if network.external || !self.networks.exists(&network.name) {
                continue;
            }

            let members = self.networks.get(&network.name)?.containers.len();
            if members > 0 {
                tracing::warn!(
                    "Keeping network {}: {} container(s) still attached",
                    network.name,
                    members
                );
                continue;
            }

            self.networks.remove(&network.name)?;
            tracing::info!("Removed network {}", network.name);
        }

        Ok(())
    }

    /// Start a specific service, without waiting on its dependencies
    pub async fn start_service(&mut self, service_name: &str) -> Result<String> {
        let planned = self.plan.service(service_name)?.clone();
        self.materialize_networks()?;
        self.create_and_start(&planned)
    }

    /// Stop a specific service and remove its container
    pub async fn stop_service(&mut self, service_name: &str) -> Result<()> {
        let Some(id) = self.service_containers.remove(service_name) else {
            return Ok(());
        };

        if let Err(e) = self.containers.stop(&id) {
            tracing::warn!("Failed to stop container {}: {}", id, e);
        }

        let released = self.discard_container(service_name, &id);
        tracing::info!(
            "Stopped service {} (released {} port(s))",
            service_name,
            released
        );

        Ok(())
    }

    /// Restart a service
    pub async fn restart_service(&mut self, service_name: &str) -> Result<String> {
        self.stop_service(service_name).await?;
        self.start_service(service_name).await
    }

    /// Get project status, in start order
    pub fn status(&self) -> Result<Vec<ServiceStatus>> {
        let mut statuses = Vec::with_capacity(self.plan.start_order.len());

        for name in &self.plan.start_order {
            let planned = self.plan.service(name)?;
            let mut status = ServiceStatus {
                name: name.clone(),
                container_name: planned.container_name.clone(),
                container_id: None,
                status: None,
                health: None,
                addresses: BTreeMap::new(),
            };

            if let Some(id) = self.service_containers.get(name) {
                let container = self.containers.get(id)?;
                status.container_id = Some(id.clone());
                status.status = Some(container.status);
                status.health = Some(container.health);

                for network in self.networks.networks_of(id)? {
                    let config = self.networks.get(&network)?;
                    if let Some(ip) = config.containers.get(id).and_then(|c| c.ipv4_address) {
                        status.addresses.insert(network, ip);
                    }
                }
            }

            statuses.push(status);
        }

        Ok(statuses)
    }

    /// Container ID of a started service
    pub fn container_id(&self, service_name: &str) -> Option<&str> {
        self.service_containers.get(service_name).map(|s| s.as_str())
    }

    /// Resolve `name` as seen from inside `from_service`'s container
    pub fn resolve(&self, from_service: &str, name: &str) -> Result<Option<Ipv4Addr>> {
        let id = self
            .service_containers
            .get(from_service)
            .ok_or_else(|| StackError::ServiceNotFound(from_service.to_string()))?;
        self.networks.resolve_from(id, name)
    }

    /// Create every planned network that does not exist yet
    ///
    /// External networks must already exist. Returns the names of the
    /// networks created by this call.
    fn materialize_networks(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();

        for network in &self.plan.networks {
            if network.external {
                if !self.networks.exists(&network.name) {
                    return Err(StackError::NetworkNotFound(format!(
                        "{} (declared external)",
                        network.name
                    )));
                }
                continue;
            }

            let (_, was_created) = self.networks.ensure(self.network_config(network))?;
            if was_created {
                tracing::info!("Created network {} ({})", network.name, network.driver);
                created.push(network.name.clone());
            } else {
                tracing::debug!("Reusing network {}", network.name);
            }
        }

        Ok(created)
    }

    fn network_config(&self, network: &PlannedNetwork) -> NetworkConfig {
        let mut config = NetworkConfig::new(&network.name)
            .driver(network.driver)
            .internal(network.internal)
            .label(LABEL_PROJECT, &self.plan.project)
            .label(LABEL_NETWORK, &network.key);

        if let Some(subnet) = &network.subnet {
            config = config.subnet(subnet);
            if let Some(gateway) = &network.gateway {
                config = config.gateway(gateway);
            }
        }

        config
    }

    /// Wait for dependencies, then create and start the service
    async fn launch(&mut self, planned: &PlannedService) -> Result<String> {
        if let Some(id) = self.service_containers.get(&planned.name) {
            if self.containers.get(id)?.is_running() {
                tracing::debug!("Service {} is already running", planned.name);
                return Ok(id.clone());
            }
        }

        for (dep, condition) in &planned.depends_on {
            let dep_id = self
                .service_containers
                .get(dep)
                .cloned()
                .ok_or_else(|| StackError::DependencyFailed {
                    service: dep.clone(),
                    reason: "no container".to_string(),
                })?;

            tracing::info!("Service {} waiting for {} ({})", planned.name, dep, condition);
            wait_for_dependency(&self.containers, dep, &dep_id, *condition, &self.wait).await?;
        }

        self.create_and_start(planned)
    }

    /// Host port owner for a service, unique across projects
    fn port_owner(&self, service_name: &str) -> String {
        format!("{}/{}", self.plan.project, service_name)
    }

    /// Detach a container from its networks, remove it and release the
    /// service's ports
    ///
    /// Every step runs even if an earlier one fails; failures are logged.
    /// Returns the number of ports released.
    fn discard_container(&self, service_name: &str, id: &str) -> usize {
        match self.networks.networks_of(id) {
            Ok(networks) => {
                for network in networks {
                    if let Err(e) = self.networks.disconnect(&network, id) {
                        tracing::warn!("Failed to disconnect {} from {}: {}", id, network, e);
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to list networks of {}: {}", id, e),
        }

        if let Err(e) = self.containers.remove(id, true) {
            tracing::warn!("Failed to remove container {}: {}", id, e);
        }

        match self.ports.release_owner(&self.port_owner(service_name)) {
            Ok(released) => released,
            Err(e) => {
                tracing::warn!("Failed to release ports of {}: {}", service_name, e);
                0
            }
        }
    }

    fn create_and_start(&mut self, planned: &PlannedService) -> Result<String> {
        if let Some(stale) = self.service_containers.remove(&planned.name) {
            tracing::debug!("Replacing container {} of {}", stale, planned.name);
            self.discard_container(&planned.name, &stale);
        }

        let owner = self.port_owner(&planned.name);
        self.ports.reserve_all(&planned.ports, &owner)?;

        let mut config = ContainerConfig::new(&planned.container_name, &planned.image)
            .hostname(&planned.name)
            .with_healthcheck(planned.healthcheck);
        for binding in &planned.ports {
            config = config.port(*binding);
        }
        for (key, value) in &planned.environment {
            config = config.env(key, value);
        }
        for (key, value) in &planned.labels {
            config = config.label(key, value);
        }

        let id = match self.containers.create(config) {
            Ok(id) => id,
            Err(e) => {
                if let Err(release) = self.ports.release_owner(&owner) {
                    tracing::warn!("Failed to release ports of {}: {}", planned.name, release);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.attach_and_start(planned, &id) {
            self.discard_container(&planned.name, &id);
            return Err(e);
        }

        tracing::info!(
            "Started service {} as {} ({})",
            planned.name,
            planned.container_name,
            id
        );
        self.service_containers.insert(planned.name.clone(), id.clone());

        Ok(id)
    }

    fn attach_and_start(&self, planned: &PlannedService, id: &str) -> Result<()> {
        for key in &planned.networks {
            let network = self.plan.network(key).ok_or_else(|| {
                StackError::NetworkNotFound(format!("{} (not in plan)", key))
            })?;

            let mut aliases = vec![planned.name.clone()];
            if let Some(extra) = planned.aliases.get(key) {
                aliases.extend(extra.iter().cloned());
            }

            self.networks
                .connect(&network.name, id, &planned.container_name, &aliases)?;
        }

        self.containers.start(id)
    }
}
