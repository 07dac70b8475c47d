//! Compose descriptor types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Name of the network a service joins when it lists none
pub const DEFAULT_NETWORK: &str = "default";

/// Compose file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Compose file version. Unquoted numbers such as `3.8` are accepted.
    #[serde(
        default,
        deserialize_with = "deserialize_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
    /// Project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Networks. A bare `name:` entry declares a network with defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
}

/// `version:` as written, quoted or not
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let version = Option::<VersionValue>::deserialize(deserializer)?;
    Ok(version.map(|v| match v {
        VersionValue::Text(s) => s,
        VersionValue::Integer(i) => i.to_string(),
        VersionValue::Float(f) if f.fract() == 0.0 => format!("{:.1}", f),
        VersionValue::Float(f) => f.to_string(),
    }))
}

impl ComposeConfig {
    /// Declared configuration for a network, with defaults for bare entries
    pub fn network(&self, name: &str) -> Option<NetworkConfig> {
        self.networks
            .get(name)
            .map(|n| n.clone().unwrap_or_default())
    }

    /// Whether the network is declared or is the implicit default network
    pub fn has_network(&self, name: &str) -> bool {
        name == DEFAULT_NETWORK || self.networks.contains_key(name)
    }
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,
    /// Networks to connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<NetworksConfig>,
    /// Network mode (`host`, `none`, `service:<name>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    /// Service dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Healthcheck configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
}

impl ServiceConfig {
    /// Dependencies with the condition each one must reach
    pub fn dependencies(&self) -> Vec<(String, DependencyCondition)> {
        match &self.depends_on {
            None => Vec::new(),
            Some(DependsOnConfig::Array(arr)) => arr
                .iter()
                .map(|name| (name.clone(), DependencyCondition::default()))
                .collect(),
            Some(DependsOnConfig::Map(map)) => map
                .iter()
                .map(|(name, dep)| {
                    let condition = dep.as_ref().map(|d| d.condition).unwrap_or_default();
                    (name.clone(), condition)
                })
                .collect(),
        }
    }

    /// Names of the services this one depends on
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies().into_iter().map(|(name, _)| name).collect()
    }

    /// Networks this service joins
    ///
    /// A service listing no networks joins the default network, unless it
    /// sets a `network_mode`, in which case it joins none.
    pub fn network_names(&self) -> Vec<String> {
        if self.network_mode.is_some() {
            return Vec::new();
        }

        match &self.networks {
            None => vec![DEFAULT_NETWORK.to_string()],
            Some(NetworksConfig::Array(arr)) => arr.clone(),
            Some(NetworksConfig::Map(map)) => map.keys().cloned().collect(),
        }
    }

    /// Extra aliases declared for a network
    pub fn network_aliases(&self, network: &str) -> Vec<String> {
        match &self.networks {
            Some(NetworksConfig::Map(map)) => map
                .get(network)
                .and_then(|n| n.as_ref())
                .and_then(|n| n.aliases.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Environment as a flat map
    pub fn environment_map(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        match &self.environment {
            Some(EnvironmentConfig::Array(arr)) => {
                for item in arr {
                    if let Some((key, value)) = item.split_once('=') {
                        env.insert(key.to_string(), value.to_string());
                    }
                }
            }
            Some(EnvironmentConfig::Map(map)) => {
                for (key, value) in map {
                    if let Some(v) = value {
                        env.insert(key.clone(), v.to_yaml_string());
                    }
                }
            }
            None => {}
        }
        env
    }

    /// Labels as a flat map
    pub fn labels_map(&self) -> HashMap<String, String> {
        match &self.labels {
            Some(labels) => labels.to_map(),
            None => HashMap::new(),
        }
    }

    /// Whether a healthcheck is configured and enabled
    pub fn has_healthcheck(&self) -> bool {
        match &self.healthcheck {
            Some(hc) => !hc.is_disabled(),
            None => false,
        }
    }
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    /// Simple context path
    Simple(String),
    /// Full build configuration
    Full(BuildConfigFull),
}

impl BuildConfig {
    /// Context path as written in the descriptor
    pub fn context(&self) -> &str {
        match self {
            BuildConfig::Simple(path) => path,
            BuildConfig::Full(full) => full.context.as_deref().unwrap_or("."),
        }
    }

    /// Dockerfile path relative to the context, if named
    pub fn dockerfile(&self) -> Option<&str> {
        match self {
            BuildConfig::Simple(_) => None,
            BuildConfig::Full(full) => full.dockerfile.as_deref(),
        }
    }
}

/// Full build configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfigFull {
    /// Build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Dockerfile path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,
    /// Target stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Scalar environment value
///
/// YAML lets `DEBUG: false` or `PORT: 5000` through unquoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl EnvValue {
    fn to_yaml_string(&self) -> String {
        match self {
            EnvValue::String(s) => s.clone(),
            EnvValue::Bool(b) => b.to_string(),
            EnvValue::Integer(i) => i.to_string(),
            EnvValue::Float(f) => f.to_string(),
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<EnvValue>>),
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Short syntax: "8080:80"
    Short(String),
    /// Bare container port: 80
    Number(u16),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u16,
    /// Published port or range on host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedPort>,
    /// Host IP to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Mode (host/ingress)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Published port in long syntax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedPort {
    Number(u16),
    Text(String),
}

/// Networks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworksConfig {
    /// Array of network names
    Array(Vec<String>),
    /// Map of network name to config
    Map(BTreeMap<String, Option<ServiceNetworkConfig>>),
}

/// Service network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    /// Aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    /// IPv4 address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
}

/// Depends on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, Option<DependsOnCondition>>),
}

/// Depends on condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    #[serde(default)]
    pub condition: DependencyCondition,
}

/// State a dependency must reach before its dependent is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    /// The dependency container has been launched
    #[default]
    ServiceStarted,
    /// The dependency reports healthy
    ServiceHealthy,
    /// The dependency ran to completion with exit code 0
    ServiceCompletedSuccessfully,
}

impl std::fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyCondition::ServiceStarted => write!(f, "service_started"),
            DependencyCondition::ServiceHealthy => write!(f, "service_healthy"),
            DependencyCondition::ServiceCompletedSuccessfully => {
                write!(f, "service_completed_successfully")
            }
        }
    }
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Test command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<HealthcheckTest>,
    /// Interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Start period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    /// Disable healthcheck
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable: Option<bool>,
}

impl HealthcheckConfig {
    /// `disable: true` or a `["NONE"]` test turns the check off
    pub fn is_disabled(&self) -> bool {
        if self.disable == Some(true) {
            return true;
        }
        match &self.test {
            Some(HealthcheckTest::Array(arr)) => arr.first().map(|s| s == "NONE").unwrap_or(false),
            _ => false,
        }
    }
}

/// Healthcheck test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthcheckTest {
    /// Command string
    Command(String),
    /// Command array
    Array(Vec<String>),
}

/// Labels configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsConfig {
    /// Array of "key=value" strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, String>),
}

impl LabelsConfig {
    /// Labels as a flat map
    pub fn to_map(&self) -> HashMap<String, String> {
        match self {
            LabelsConfig::Array(arr) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
            LabelsConfig::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_opts: Option<BTreeMap<String, String>>,
    /// IPAM configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<IpamConfig>,
    /// External network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalConfig>,
    /// Internal network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NetworkConfig {
    /// Whether the network is managed outside the project
    pub fn is_external(&self) -> bool {
        match &self.external {
            Some(ExternalConfig::Bool(b)) => *b,
            Some(ExternalConfig::Named { .. }) => true,
            None => false,
        }
    }
}

/// IPAM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Config blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<IpamPoolConfig>>,
}

/// IPAM pool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamPoolConfig {
    /// Subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// External resource configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    /// Boolean
    Bool(bool),
    /// With name
    Named { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(yaml: &str) -> ServiceConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_dependencies_short_syntax() {
        let svc = service("depends_on: [db, cache]");
        let deps = svc.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps
            .iter()
            .all(|(_, c)| *c == DependencyCondition::ServiceStarted));
    }

    #[test]
    fn test_dependencies_long_syntax() {
        let svc = service(
            r#"
depends_on:
  db:
    condition: service_healthy
  migrate:
    condition: service_completed_successfully
  cache:
"#,
        );
        let deps: HashMap<_, _> = svc.dependencies().into_iter().collect();
        assert_eq!(deps["db"], DependencyCondition::ServiceHealthy);
        assert_eq!(
            deps["migrate"],
            DependencyCondition::ServiceCompletedSuccessfully
        );
        assert_eq!(deps["cache"], DependencyCondition::ServiceStarted);
    }

    #[test]
    fn test_network_names_default() {
        let svc = service("image: nginx");
        assert_eq!(svc.network_names(), vec!["default".to_string()]);

        let svc = service("image: nginx\nnetwork_mode: host");
        assert!(svc.network_names().is_empty());
    }

    #[test]
    fn test_network_aliases() {
        let svc = service(
            r#"
networks:
  backend:
    aliases: [api]
  frontend:
"#,
        );
        assert_eq!(svc.network_names(), vec!["backend", "frontend"]);
        assert_eq!(svc.network_aliases("backend"), vec!["api".to_string()]);
        assert!(svc.network_aliases("frontend").is_empty());
    }

    #[test]
    fn test_environment_scalars() {
        let svc = service(
            r#"
environment:
  DEBUG: false
  PORT: 5000
  NAME: api
  EMPTY:
"#,
        );
        let env = svc.environment_map();
        assert_eq!(env["DEBUG"], "false");
        assert_eq!(env["PORT"], "5000");
        assert_eq!(env["NAME"], "api");
        assert!(!env.contains_key("EMPTY"));
    }

    #[test]
    fn test_healthcheck_disabled() {
        let svc = service("healthcheck:\n  test: [\"NONE\"]");
        assert!(!svc.has_healthcheck());

        let svc = service("healthcheck:\n  test: [\"CMD\", \"true\"]");
        assert!(svc.has_healthcheck());
    }

    #[test]
    fn test_bare_network_declaration() {
        let config: ComposeConfig = serde_yaml::from_str(
            r#"
services: {}
networks:
  app-network:
"#,
        )
        .unwrap();
        let net = config.network("app-network").unwrap();
        assert!(net.driver.is_none());
        assert!(config.has_network("default"));
        assert!(!config.has_network("other"));
    }
}
