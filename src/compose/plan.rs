//! Deployment planning
//!
//! A plan is everything the orchestrator needs, computed up front so that
//! every deployment-time error in the descriptor is reported before any
//! container is created.

use super::config::{BuildConfig, DependencyCondition, ExternalConfig, ServiceConfig};
use super::graph::DependencyGraph;
use super::parser::ComposeParser;
use super::port::{parse_ports, PortBinding};
use super::project::Project;
use crate::error::{Result, StackError};
use crate::network::NetworkDriver;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Label keys attached to every container and network of a project
pub const LABEL_PROJECT: &str = "com.docker.compose.project";
pub const LABEL_SERVICE: &str = "com.docker.compose.service";
pub const LABEL_NETWORK: &str = "com.docker.compose.network";

/// Resolved build context of a service
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedBuild {
    /// Absolute or project-relative context directory
    pub context: PathBuf,
    /// Build file inside the context, if one was named
    pub dockerfile: Option<PathBuf>,
    /// Tag the built image receives
    pub tag: String,
}

/// A network the deployment needs
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNetwork {
    /// Name in the descriptor
    pub key: String,
    /// Name the runtime knows it by
    pub name: String,
    /// Driver
    pub driver: NetworkDriver,
    /// Managed outside the project; must already exist
    pub external: bool,
    /// Internal network
    pub internal: bool,
    /// Configured subnet
    pub subnet: Option<String>,
    /// Configured gateway
    pub gateway: Option<String>,
    /// Services that join it, in name order
    pub members: Vec<String>,
}

/// One service of the deployment
#[derive(Debug, Clone, Serialize)]
pub struct PlannedService {
    /// Service name
    pub name: String,
    /// Container name
    pub container_name: String,
    /// Image to run
    pub image: String,
    /// Build step, if the service is built locally
    pub build: Option<ResolvedBuild>,
    /// Host-to-container port bindings
    pub ports: Vec<PortBinding>,
    /// Descriptor network keys the service joins
    pub networks: Vec<String>,
    /// Extra aliases per network key
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Dependencies and the condition each must reach
    pub depends_on: Vec<(String, DependencyCondition)>,
    /// Whether a healthcheck is configured
    pub healthcheck: bool,
    /// Environment
    pub environment: BTreeMap<String, String>,
    /// Labels
    pub labels: BTreeMap<String, String>,
}

/// Complete, validated deployment plan
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// Project name
    pub project: String,
    /// Project directory
    pub directory: PathBuf,
    /// Services in start order
    pub start_order: Vec<String>,
    /// Networks to materialize, in name order
    pub networks: Vec<PlannedNetwork>,
    /// Services by name
    pub services: BTreeMap<String, PlannedService>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl DeploymentPlan {
    /// Validate the project and compute its plan
    pub fn build(project: &Project) -> Result<Self> {
        let config = &project.config;
        let warnings = ComposeParser::validate(config)?;

        let graph = DependencyGraph::from_config(config)?;
        let start_order = graph.start_order()?;

        let mut services = BTreeMap::new();
        for (name, service) in &config.services {
            let planned = plan_service(project, name, service)?;
            services.insert(name.clone(), planned);
        }

        let mut networks = Vec::new();
        let mut members: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for service in services.values() {
            for network in &service.networks {
                members
                    .entry(network.clone())
                    .or_default()
                    .push(service.name.clone());
            }
        }

        for (key, members) in members {
            let declared = config.network(&key).unwrap_or_default();
            let driver = ComposeParser::network_driver(config, &key)?;
            let external = declared.is_external();

            let name = match (&declared.external, &declared.name) {
                (Some(ExternalConfig::Named { name }), _) => name.clone(),
                (_, Some(name)) => name.clone(),
                _ if external => key.clone(),
                _ => format!("{}_{}", project.name, key),
            };

            let pool = declared
                .ipam
                .as_ref()
                .and_then(|i| i.config.as_ref())
                .and_then(|c| c.first());

            networks.push(PlannedNetwork {
                key,
                name,
                driver,
                external,
                internal: declared.internal.unwrap_or(false),
                subnet: pool.and_then(|p| p.subnet.clone()),
                gateway: pool.and_then(|p| p.gateway.clone()),
                members,
            });
        }

        tracing::info!(
            "Planned project {}: {} service(s), {} network(s)",
            project.name,
            services.len(),
            networks.len()
        );

        Ok(Self {
            project: project.name.clone(),
            directory: project.directory.clone(),
            start_order,
            networks,
            services,
            warnings,
        })
    }

    /// Stop order: the reverse of start order
    pub fn stop_order(&self) -> Vec<String> {
        self.start_order.iter().rev().cloned().collect()
    }

    /// Planned network by descriptor key
    pub fn network(&self, key: &str) -> Option<&PlannedNetwork> {
        self.networks.iter().find(|n| n.key == key)
    }

    /// Planned service by name
    pub fn service(&self, name: &str) -> Result<&PlannedService> {
        self.services
            .get(name)
            .ok_or_else(|| StackError::ServiceNotFound(name.to_string()))
    }

    /// Host port bindings per service
    pub fn port_bindings(&self) -> HashMap<String, Vec<PortBinding>> {
        self.services
            .iter()
            .map(|(name, s)| (name.clone(), s.ports.clone()))
            .collect()
    }

    /// Network membership per service
    pub fn network_membership(&self) -> HashMap<String, Vec<String>> {
        self.services
            .iter()
            .map(|(name, s)| (name.clone(), s.networks.clone()))
            .collect()
    }
}

fn plan_service(project: &Project, name: &str, service: &ServiceConfig) -> Result<PlannedService> {
    let build = match &service.build {
        Some(build) => Some(resolve_build(project, name, build)?),
        None => None,
    };

    let image = match (&service.image, &build) {
        (Some(image), _) => image.clone(),
        (None, Some(build)) => build.tag.clone(),
        (None, None) => {
            return Err(StackError::InvalidConfig(format!(
                "Service '{}' must have either 'image' or 'build' specified",
                name
            )))
        }
    };

    let networks = service.network_names();
    let aliases = networks
        .iter()
        .map(|n| (n.clone(), service.network_aliases(n)))
        .filter(|(_, a)| !a.is_empty())
        .collect();

    let mut labels: BTreeMap<String, String> = service.labels_map().into_iter().collect();
    labels.insert(LABEL_PROJECT.to_string(), project.name.clone());
    labels.insert(LABEL_SERVICE.to_string(), name.to_string());

    Ok(PlannedService {
        name: name.to_string(),
        container_name: service
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-1", project.name, name)),
        image,
        build,
        ports: parse_ports(&service.ports)?,
        networks,
        aliases,
        depends_on: service.dependencies(),
        healthcheck: service.has_healthcheck(),
        environment: service.environment_map().into_iter().collect(),
        labels,
    })
}

/// Resolve a build context against the project directory
///
/// The context must be an existing directory, and a named build file must
/// exist inside it. Remote contexts (URLs) are passed through unchecked.
fn resolve_build(
    project: &Project,
    service: &str,
    build: &BuildConfig,
) -> Result<ResolvedBuild> {
    let raw = build.context();
    let tag = format!("{}-{}:latest", project.name, service);

    if is_remote_context(raw) {
        return Ok(ResolvedBuild {
            context: PathBuf::from(raw),
            dockerfile: build.dockerfile().map(PathBuf::from),
            tag,
        });
    }

    let context = project.directory.join(raw);
    if !context.is_dir() {
        return Err(StackError::BuildContextNotFound {
            service: service.to_string(),
            path: context,
        });
    }

    let dockerfile = match build.dockerfile() {
        Some(file) => {
            let path = context.join(file);
            if !path.is_file() {
                return Err(StackError::BuildContextNotFound {
                    service: service.to_string(),
                    path,
                });
            }
            Some(path)
        }
        None => None,
    };

    Ok(ResolvedBuild {
        context,
        dockerfile,
        tag,
    })
}

fn is_remote_context(context: &str) -> bool {
    ["http://", "https://", "git://", "ssh://", "git@"]
        .iter()
        .any(|prefix| context.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const STACK: &str = r#"
version: "3.8"
services:
  flask-api:
    build: ./flask_api
    ports:
      - "5000:5000"
    networks:
      - app-network
  streamlit-app:
    build: ./streamlit_app
    ports:
      - "8501:8501"
    depends_on:
      - flask-api
    networks:
      - app-network
networks:
  app-network:
    driver: bridge
"#;

    fn project(yaml: &str, dirs: &[&str]) -> (TempDir, Project) {
        let dir = tempdir().unwrap();
        for d in dirs {
            std::fs::create_dir_all(dir.path().join(d)).unwrap();
        }
        let config = ComposeParser::parse_str(yaml).unwrap();
        let project = Project::from_config("stack", dir.path().to_path_buf(), config).unwrap();
        (dir, project)
    }

    #[test]
    fn test_plan_two_service_stack() {
        let (_dir, project) = project(STACK, &["flask_api", "streamlit_app"]);
        let plan = DeploymentPlan::build(&project).unwrap();

        assert_eq!(plan.start_order, vec!["flask-api", "streamlit-app"]);
        assert_eq!(plan.stop_order(), vec!["streamlit-app", "flask-api"]);

        let network = plan.network("app-network").unwrap();
        assert_eq!(network.name, "stack_app-network");
        assert_eq!(network.driver, NetworkDriver::Bridge);
        assert_eq!(network.members, vec!["flask-api", "streamlit-app"]);

        let api = plan.service("flask-api").unwrap();
        assert_eq!(api.container_name, "stack-flask-api-1");
        assert_eq!(api.image, "stack-flask-api:latest");
        assert_eq!(api.ports, vec![PortBinding::new(5000, 5000)]);
        assert_eq!(api.labels[LABEL_SERVICE], "flask-api");
        assert!(api.build.as_ref().unwrap().context.ends_with("flask_api"));
    }

    #[test]
    fn test_missing_build_context() {
        let (_dir, project) = project(STACK, &["flask_api"]);
        match DeploymentPlan::build(&project) {
            Err(StackError::BuildContextNotFound { service, .. }) => {
                assert_eq!(service, "streamlit-app");
            }
            other => panic!("expected missing build context, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dockerfile() {
        let yaml = r#"
services:
  api:
    build:
      context: ./api
      dockerfile: Containerfile
"#;
        let (dir, project) = project(yaml, &["api"]);
        assert!(DeploymentPlan::build(&project).is_err());

        std::fs::write(dir.path().join("api/Containerfile"), "FROM scratch\n").unwrap();
        let plan = DeploymentPlan::build(&project).unwrap();
        assert!(plan.services["api"].build.as_ref().unwrap().dockerfile.is_some());
    }

    #[test]
    fn test_ordering_and_resources_are_independent() {
        let (_dir, with_edge) = project(STACK, &["flask_api", "streamlit_app"]);
        let with_edge_plan = DeploymentPlan::build(&with_edge).unwrap();

        let mut without = with_edge.clone();
        without
            .config
            .services
            .get_mut("streamlit-app")
            .unwrap()
            .depends_on = None;
        let without_plan = DeploymentPlan::build(&without).unwrap();

        assert_eq!(with_edge_plan.port_bindings(), without_plan.port_bindings());
        assert_eq!(
            with_edge_plan.network_membership(),
            without_plan.network_membership()
        );
        assert!(without_plan.services["streamlit-app"].depends_on.is_empty());
    }

    #[test]
    fn test_default_and_external_networks() {
        let yaml = r#"
services:
  web:
    image: nginx
  proxy:
    image: traefik
    networks: [edge]
networks:
  edge:
    external: true
"#;
        let (_dir, project) = project(yaml, &[]);
        let plan = DeploymentPlan::build(&project).unwrap();

        let default = plan.network("default").unwrap();
        assert_eq!(default.name, "stack_default");
        assert!(!default.external);

        let edge = plan.network("edge").unwrap();
        assert_eq!(edge.name, "edge");
        assert!(edge.external);
    }

    #[test]
    fn test_container_name_override() {
        let yaml = r#"
services:
  web:
    image: nginx
    container_name: frontdoor
"#;
        let (_dir, project) = project(yaml, &[]);
        let plan = DeploymentPlan::build(&project).unwrap();
        assert_eq!(plan.services["web"].container_name, "frontdoor");
        assert_eq!(plan.services["web"].image, "nginx");
    }
}
