//! Compose file parser

use super::config::{
    ComposeConfig, DependencyCondition, DependsOnCondition, DependsOnConfig, NetworksConfig,
    ServiceConfig, ServiceNetworkConfig,
};
use super::graph::DependencyGraph;
use super::port::{parse_ports, HostPort};
use crate::error::{Result, StackError};
use crate::network::NetworkDriver;
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Schema versions this parser understands
const KNOWN_VERSIONS: &[&str] = &[
    "2", "2.0", "2.1", "2.2", "2.3", "2.4", "3", "3.0", "3.1", "3.2", "3.3", "3.4", "3.5", "3.6",
    "3.7", "3.8", "3.9",
];

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"));

static BRACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(?:(:?[-?+])(.*))?$").expect("valid regex")
});

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        for name in DEFAULT_COMPOSE_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Parse compose file from path, without interpolation
    pub fn parse_file(path: &Path) -> Result<ComposeConfig> {
        Self::parse_file_with_env(path, &HashMap::new())
    }

    /// Parse compose file from path, interpolating variables from `env`
    pub fn parse_file_with_env(path: &Path, env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StackError::ComposeParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_str_with_env(&content, env)
    }

    /// Parse compose file from string
    pub fn parse_str(content: &str) -> Result<ComposeConfig> {
        Self::parse_str_with_env(content, &HashMap::new())
    }

    /// Parse compose file from string, interpolating every string scalar
    pub fn parse_str_with_env(content: &str, env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let mut value: Value = serde_yaml::from_str(content)
            .map_err(|e| StackError::ComposeParse(format!("Failed to parse YAML: {}", e)))?;

        if value.is_null() {
            return Err(StackError::ComposeParse("Compose file is empty".to_string()));
        }

        interpolate_value(&mut value, env)?;

        serde_yaml::from_value(value)
            .map_err(|e| StackError::ComposeParse(format!("Invalid compose file: {}", e)))
    }

    /// Parse multiple compose files, later files overlaying earlier ones
    pub fn parse_files(paths: &[PathBuf], env: &HashMap<String, String>) -> Result<ComposeConfig> {
        let mut config = ComposeConfig::default();

        for path in paths {
            let file_config = Self::parse_file_with_env(path, env)?;
            config = Self::merge_configs(config, file_config);
        }

        Ok(config)
    }

    /// Merge two compose configurations
    pub fn merge_configs(base: ComposeConfig, overlay: ComposeConfig) -> ComposeConfig {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }

        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.get_mut(&name) {
                Some(existing) => merge_service(existing, service),
                None => {
                    result.services.insert(name, service);
                }
            }
        }

        for (name, network) in overlay.networks {
            result.networks.insert(name, network);
        }

        result
    }

    /// Validate compose configuration
    ///
    /// Returns warnings for suspicious but deployable descriptors, or the
    /// first error that makes the descriptor undeployable.
    pub fn validate(config: &ComposeConfig) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if let Some(version) = &config.version {
            if KNOWN_VERSIONS.contains(&version.as_str()) {
                warnings.push(format!(
                    "The 'version' attribute ({}) is obsolete and ignored",
                    version
                ));
            } else {
                warnings.push(format!(
                    "Unknown compose file version '{}'; the 'version' attribute is obsolete and ignored",
                    version
                ));
            }
        }

        if config.services.is_empty() {
            warnings.push("Compose file declares no services".to_string());
        }

        for (name, service) in &config.services {
            if service.image.is_none() && service.build.is_none() {
                return Err(StackError::InvalidConfig(format!(
                    "Service '{}' must have either 'image' or 'build' specified",
                    name
                )));
            }

            for network in service.network_names() {
                if !config.has_network(&network) {
                    return Err(StackError::UndefinedNetwork {
                        service: name.clone(),
                        network,
                    });
                }
            }

            if service.network_mode.is_some() && service.networks.is_some() {
                return Err(StackError::InvalidConfig(format!(
                    "Service '{}' sets both 'network_mode' and 'networks'",
                    name
                )));
            }
        }

        let graph = DependencyGraph::from_config(config)?;
        graph.start_order()?;

        for (name, service) in &config.services {
            for (dep, condition) in service.dependencies() {
                let healthcheck = config
                    .services
                    .get(&dep)
                    .map(|s| s.has_healthcheck())
                    .unwrap_or(false);
                if condition == DependencyCondition::ServiceHealthy && !healthcheck {
                    warnings.push(format!(
                        "Service '{}' waits for '{}' to be healthy, but '{}' has no healthcheck",
                        name, dep, dep
                    ));
                }
            }
        }

        Self::check_port_conflicts(config)?;

        for name in config.networks.keys() {
            Self::network_driver(config, name)?;
        }

        Ok(warnings)
    }

    /// Reject descriptors in which two services claim the same host port
    pub fn check_port_conflicts(config: &ComposeConfig) -> Result<()> {
        let mut claimed: Vec<(HostPort, &str)> = Vec::new();

        for (name, service) in &config.services {
            for binding in parse_ports(&service.ports)? {
                let Some(key) = binding.host_key() else {
                    continue;
                };

                if let Some((_, owner)) = claimed.iter().find(|(k, _)| k.collides_with(&key)) {
                    return Err(StackError::PortConflict {
                        port: key.port,
                        protocol: key.protocol.to_string(),
                        first: owner.to_string(),
                        second: name.clone(),
                    });
                }
                claimed.push((key, name.as_str()));
            }
        }

        Ok(())
    }

    /// Resolve the driver of a declared (or implicit default) network
    pub fn network_driver(config: &ComposeConfig, network: &str) -> Result<NetworkDriver> {
        let driver = config.network(network).and_then(|n| n.driver);
        match driver {
            None => Ok(NetworkDriver::default()),
            Some(d) => d.parse().map_err(|_| StackError::UnknownNetworkDriver {
                network: network.to_string(),
                driver: d,
            }),
        }
    }

    /// Load a `.env` style file into a map
    pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(parse_env_str(&content))
    }
}

/// Parse `.env` content: `KEY=VALUE` lines, `#` comments, optional `export`
pub fn parse_env_str(content: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let value = value.trim();
        let value = match value.chars().next() {
            Some(q @ ('"' | '\'')) if value.len() >= 2 && value.ends_with(q) => {
                &value[1..value.len() - 1]
            }
            _ => value.split(" #").next().unwrap_or(value).trim_end(),
        };

        env.insert(key.trim().to_string(), value.to_string());
    }

    env
}

fn merge_service(existing: &mut ServiceConfig, overlay: ServiceConfig) {
    if overlay.image.is_some() {
        existing.image = overlay.image;
    }
    if overlay.build.is_some() {
        existing.build = overlay.build;
    }
    if overlay.container_name.is_some() {
        existing.container_name = overlay.container_name;
    }
    if overlay.hostname.is_some() {
        existing.hostname = overlay.hostname;
    }
    if overlay.environment.is_some() {
        existing.environment = overlay.environment;
    }
    if overlay.network_mode.is_some() {
        existing.network_mode = overlay.network_mode;
    }
    if overlay.healthcheck.is_some() {
        existing.healthcheck = overlay.healthcheck;
    }
    if overlay.labels.is_some() {
        existing.labels = overlay.labels;
    }
    if overlay.restart.is_some() {
        existing.restart = overlay.restart;
    }
    if overlay.profiles.is_some() {
        existing.profiles = overlay.profiles;
    }

    for port in overlay.ports {
        if !existing.ports.contains(&port) {
            existing.ports.push(port);
        }
    }

    if let Some(depends) = overlay.depends_on {
        existing.depends_on = Some(match existing.depends_on.take() {
            None => depends,
            Some(base) => {
                let mut merged = depends_map(base);
                merged.extend(depends_map(depends));
                DependsOnConfig::Map(merged)
            }
        });
    }

    if let Some(networks) = overlay.networks {
        existing.networks = Some(match existing.networks.take() {
            None => networks,
            Some(base) => {
                let mut merged = networks_map(base);
                merged.extend(networks_map(networks));
                NetworksConfig::Map(merged)
            }
        });
    }
}

fn depends_map(
    depends: DependsOnConfig,
) -> BTreeMap<String, Option<DependsOnCondition>> {
    match depends {
        DependsOnConfig::Array(arr) => arr.into_iter().map(|name| (name, None)).collect(),
        DependsOnConfig::Map(map) => map,
    }
}

fn networks_map(
    networks: NetworksConfig,
) -> BTreeMap<String, Option<ServiceNetworkConfig>> {
    match networks {
        NetworksConfig::Array(arr) => arr.into_iter().map(|name| (name, None)).collect(),
        NetworksConfig::Map(map) => map,
    }
}

fn interpolate_value(value: &mut Value, env: &HashMap<String, String>) -> Result<()> {
    match value {
        Value::String(s) => {
            *s = interpolate_string(s, env)?;
        }
        Value::Sequence(seq) => {
            for item in seq {
                interpolate_value(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        Value::Tagged(tagged) => interpolate_value(&mut tagged.value, env)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Interpolate environment variables in a string
///
/// Supports `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`,
/// `${VAR:?error}`, `${VAR?error}`, `${VAR:+alt}`, `${VAR+alt}` and `$$`.
/// Default and alternate values are themselves interpolated, so
/// `${A:-${B:-x}}` falls back through `B` to `x`.
pub fn interpolate_string(s: &str, env: &HashMap<String, String>) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            result.push('$');
            rest = tail;
        } else if let Some(inner) = after.strip_prefix('{') {
            let end = closing_brace(inner).ok_or_else(|| {
                StackError::ComposeParse(format!("Unterminated interpolation: ${}", after))
            })?;
            result.push_str(&substitute(&inner[..end], env)?);
            rest = &inner[end + 1..];
        } else if let Some(name) = NAME.find(after) {
            if let Some(value) = env.get(name.as_str()) {
                result.push_str(value);
            }
            rest = &after[name.end()..];
        } else {
            result.push('$');
            rest = after;
        }
    }

    result.push_str(rest);
    Ok(result)
}

/// Byte offset of the `}` closing an already-opened `${`
fn closing_brace(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn substitute(body: &str, env: &HashMap<String, String>) -> Result<String> {
    let parts = BRACED.captures(body).ok_or_else(|| {
        StackError::ComposeParse(format!("Invalid interpolation format: ${{{}}}", body))
    })?;

    let name = &parts[1];
    let value = env.get(name);
    let operator = parts.get(2).map(|m| m.as_str());
    let argument = parts.get(3).map(|m| m.as_str()).unwrap_or_default();

    let set = value.is_some();
    let non_empty = value.map(|v| !v.is_empty()).unwrap_or(false);

    let resolved = match operator {
        None => value.cloned().unwrap_or_default(),
        Some(":-") if non_empty => value.cloned().unwrap_or_default(),
        Some(":-") => interpolate_string(argument, env)?,
        Some("-") if set => value.cloned().unwrap_or_default(),
        Some("-") => interpolate_string(argument, env)?,
        Some(":?") | Some("?") => {
            let ok = if operator == Some(":?") { non_empty } else { set };
            if !ok {
                let message = if argument.is_empty() {
                    format!("required variable {} is missing a value", name)
                } else {
                    format!(
                        "required variable {} is missing a value: {}",
                        name,
                        interpolate_string(argument, env)?
                    )
                };
                return Err(StackError::ComposeParse(message));
            }
            value.cloned().unwrap_or_default()
        }
        Some(":+") if non_empty => interpolate_string(argument, env)?,
        Some("+") if set => interpolate_string(argument, env)?,
        Some(_) => String::new(),
    };

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple_compose() {
        let yaml = r#"
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

        let config = ComposeParser::parse_str(yaml).unwrap();
        assert_eq!(config.version.as_deref(), Some("3.8"));
        assert_eq!(config.services.len(), 2);
        assert!(config.services.contains_key("flask-api"));
        assert!(config.services.contains_key("streamlit-app"));
        assert_eq!(
            config.services["streamlit-app"].dependency_names(),
            vec!["flask-api"]
        );

        let warnings = ComposeParser::validate(&config).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("obsolete"));
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(ComposeParser::parse_str("").is_err());
        assert!(ComposeParser::parse_str("services: [1, 2]").is_err());
    }

    #[test]
    fn test_validate_missing_image() {
        let yaml = r#"
services:
  web:
    ports:
      - "80:80"
"#;

        let config = ComposeParser::parse_str(yaml).unwrap();
        let result = ComposeParser::validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let yaml = r#"
services:
  streamlit-app:
    build: .
    depends_on: [flask-api]
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(matches!(
            ComposeParser::validate(&config),
            Err(StackError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_validate_cycle() {
        let yaml = r#"
services:
  a:
    image: a
    depends_on: [b]
  b:
    image: b
    depends_on: [a]
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(matches!(
            ComposeParser::validate(&config),
            Err(StackError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_validate_port_conflict() {
        let yaml = r#"
services:
  a:
    image: a
    ports: ["5000:5000"]
  b:
    image: b
    ports: ["5000:80"]
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        match ComposeParser::validate(&config) {
            Err(StackError::PortConflict {
                port,
                first,
                second,
                ..
            }) => {
                assert_eq!(port, 5000);
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected port conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_same_container_port_is_fine() {
        let yaml = r#"
services:
  a:
    image: a
    ports: ["5000:80"]
  b:
    image: b
    ports: ["5001:80", "5000:80/udp"]
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(ComposeParser::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_unknown_driver() {
        let yaml = r#"
services:
  a:
    image: a
    networks: [net]
networks:
  net:
    driver: quantum
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(matches!(
            ComposeParser::validate(&config),
            Err(StackError::UnknownNetworkDriver { .. })
        ));
    }

    #[test]
    fn test_validate_undefined_network() {
        let yaml = r#"
services:
  a:
    image: a
    networks: [missing]
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        assert!(matches!(
            ComposeParser::validate(&config),
            Err(StackError::UndefinedNetwork { .. })
        ));
    }

    #[test]
    fn test_validate_warnings() {
        let yaml = r#"
version: "7"
services:
  db:
    image: postgres
  api:
    image: api
    depends_on:
      db:
        condition: service_healthy
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        let warnings = ComposeParser::validate(&config).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Unknown compose file version '7'"));
        assert!(warnings[1].contains("no healthcheck"));
    }

    #[test]
    fn test_unquoted_version() {
        let config = ComposeParser::parse_str("version: 3.8\nservices:\n  a:\n    image: a\n").unwrap();
        assert_eq!(config.version.as_deref(), Some("3.8"));

        let config = ComposeParser::parse_str("version: 3\nservices:\n  a:\n    image: a\n").unwrap();
        assert_eq!(config.version.as_deref(), Some("3"));

        let config = ComposeParser::parse_str("version: 3.0\nservices:\n  a:\n    image: a\n").unwrap();
        assert_eq!(config.version.as_deref(), Some("3.0"));

        let warnings = ComposeParser::validate(&config).unwrap();
        assert!(warnings[0].contains("obsolete"));
        assert!(!warnings[0].contains("Unknown"));
    }

    #[test]
    fn test_validate_network_mode_with_networks() {
        let yaml = r#"
services:
  a:
    image: a
    network_mode: host
    networks: [net]
networks:
  net: {}
"#;
        let config = ComposeParser::parse_str(yaml).unwrap();
        match ComposeParser::validate(&config) {
            Err(StackError::InvalidConfig(message)) => {
                assert!(message.contains("network_mode"));
            }
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());

        assert_eq!(interpolate_string("nginx:${TAG}", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate_string("nginx:$TAG", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate_string("${MISSING:-5000}", &env).unwrap(), "5000");
        assert_eq!(interpolate_string("${EMPTY:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_string("${EMPTY-x}", &env).unwrap(), "");
        assert_eq!(interpolate_string("${TAG:+set}", &env).unwrap(), "set");
        assert_eq!(interpolate_string("cost $$5", &env).unwrap(), "cost $5");
        assert!(interpolate_string("${MISSING:?must be set}", &env).is_err());
        assert!(interpolate_string("${1BAD}", &env).is_err());
        assert!(interpolate_string("${TAG", &env).is_err());
        assert_eq!(interpolate_string("price: $5", &env).unwrap(), "price: $5");
    }

    #[test]
    fn test_interpolate_nested_defaults() {
        let mut env = HashMap::new();
        env.insert("B".to_string(), "from-b".to_string());

        let empty = HashMap::new();
        assert_eq!(interpolate_string("${A:-${B:-x}}", &empty).unwrap(), "x");
        assert_eq!(interpolate_string("${A:-${B:-x}}", &env).unwrap(), "from-b");
        assert_eq!(
            interpolate_string("http://${HOST:-${B}}:${PORT:-5000}/", &env).unwrap(),
            "http://from-b:5000/"
        );
        assert_eq!(interpolate_string("${B:+${A:-alt}}", &env).unwrap(), "alt");
        assert!(interpolate_string("${A:-${B:-x}", &env).is_err());
    }

    #[test]
    fn test_parse_with_env() {
        let yaml = r#"
services:
  flask-api:
    build: ./flask_api
    ports:
      - "${API_PORT:-5000}:5000"
"#;
        let mut env = HashMap::new();
        env.insert("API_PORT".to_string(), "6000".to_string());

        let config = ComposeParser::parse_str_with_env(yaml, &env).unwrap();
        let ports = parse_ports(&config.services["flask-api"].ports).unwrap();
        assert_eq!(ports[0].host_port, Some(6000));
    }

    #[test]
    fn test_merge_files() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("compose.yaml");
        let overlay = dir.path().join("compose.override.yaml");

        std::fs::write(
            &base,
            r#"
services:
  api:
    image: api:1
    ports: ["5000:5000"]
  web:
    image: web:1
    depends_on: [api]
"#,
        )
        .unwrap();
        std::fs::write(
            &overlay,
            r#"
services:
  api:
    image: api:2
    ports: ["5000:5000", "5001:5001"]
  web:
    depends_on:
      api:
        condition: service_healthy
"#,
        )
        .unwrap();

        let config = ComposeParser::parse_files(&[base, overlay], &HashMap::new()).unwrap();
        let api = &config.services["api"];
        assert_eq!(api.image.as_deref(), Some("api:2"));
        assert_eq!(api.ports.len(), 2);

        let deps = config.services["web"].dependencies();
        assert_eq!(
            deps,
            vec![("api".to_string(), DependencyCondition::ServiceHealthy)]
        );
    }

    #[test]
    fn test_find_compose_file() {
        let dir = tempdir().unwrap();
        assert!(ComposeParser::find_compose_file(dir.path()).is_none());

        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}").unwrap();
        let found = ComposeParser::find_compose_file(dir.path()).unwrap();
        assert!(found.ends_with("docker-compose.yml"));
    }

    #[test]
    fn test_parse_env_str() {
        let env = parse_env_str(
            r#"
# comment
API_PORT=6000
export NAME="stack wire"
QUOTED='x'
TRAILING=value # note
"#,
        );
        assert_eq!(env["API_PORT"], "6000");
        assert_eq!(env["NAME"], "stack wire");
        assert_eq!(env["QUOTED"], "x");
        assert_eq!(env["TRAILING"], "value");
    }
}
