//! Service dependency graph

use super::config::{ComposeConfig, DependencyCondition};
use crate::error::{Result, StackError};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Dependency edges between the services of a descriptor
///
/// An edge `from -> to` means `from` depends on `to`, so `to` must be
/// started first.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<(String, DependencyCondition)>>,
}

impl DependencyGraph {
    /// Build the graph, checking that every edge names a declared service
    pub fn from_config(config: &ComposeConfig) -> Result<Self> {
        let mut edges = BTreeMap::new();

        for (name, service) in &config.services {
            let deps = service.dependencies();
            for (dep, _) in &deps {
                if !config.services.contains_key(dep) {
                    return Err(StackError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            edges.insert(name.clone(), deps);
        }

        Ok(Self { edges })
    }

    /// The same services with every edge removed
    pub fn without_edges(&self) -> Self {
        Self {
            edges: self
                .edges
                .keys()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
        }
    }

    /// Service names in the graph
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(|s| s.as_str())
    }

    /// Direct dependencies of a service with their conditions
    pub fn dependencies_of(&self, service: &str) -> &[(String, DependencyCondition)] {
        self.edges.get(service).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Every service that depends on `service`, directly or transitively
    pub fn dependents_of(&self, service: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![service.to_string()];

        while let Some(current) = frontier.pop() {
            for (name, deps) in &self.edges {
                if deps.iter().any(|(d, _)| *d == current) && found.insert(name.clone()) {
                    frontier.push(name.clone());
                }
            }
        }

        found
    }

    /// Start order: every service appears after all of its dependencies
    ///
    /// Services are visited in name order, so the result is stable for a
    /// given descriptor.
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut order = Vec::with_capacity(self.edges.len());
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for service in self.edges.keys() {
            self.visit(service, &mut visited, &mut path, &mut order)?;
        }

        Ok(order)
    }

    /// Stop order: dependents are stopped before their dependencies
    pub fn stop_order(&self) -> Result<Vec<String>> {
        let mut order = self.start_order()?;
        order.reverse();
        Ok(order)
    }

    fn visit(
        &self,
        service: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(service) {
            return Ok(());
        }

        if let Some(start) = path.iter().position(|s| s == service) {
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(service.to_string());
            return Err(StackError::DependencyCycle(cycle));
        }

        path.push(service.to_string());

        for (dep, _) in self.dependencies_of(service) {
            self.visit(dep, visited, path, order)?;
        }

        path.pop();
        visited.insert(service.to_string());
        order.push(service.to_string());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::parser::ComposeParser;

    fn graph(yaml: &str) -> Result<DependencyGraph> {
        let config = ComposeParser::parse_str(yaml).unwrap();
        DependencyGraph::from_config(&config)
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|s| s == name).unwrap()
    }

    #[test]
    fn test_get_start_order() {
        let graph = graph(
            r#"
services:
  web:
    image: nginx
    depends_on:
      - api
  api:
    image: node
    depends_on:
      - db
  db:
    image: postgres
"#,
        )
        .unwrap();

        let order = graph.start_order().unwrap();
        assert!(position(&order, "db") < position(&order, "api"));
        assert!(position(&order, "api") < position(&order, "web"));

        let stop = graph.stop_order().unwrap();
        assert_eq!(stop, vec!["web", "api", "db"]);
    }

    #[test]
    fn test_flask_api_before_streamlit_app() {
        let graph = graph(
            r#"
services:
  streamlit-app:
    build: ./streamlit_app
    depends_on:
      - flask-api
  flask-api:
    build: ./flask_api
"#,
        )
        .unwrap();

        let order = graph.start_order().unwrap();
        assert_eq!(order, vec!["flask-api", "streamlit-app"]);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let graph = graph(
            r#"
services:
  a:
    image: nginx
    depends_on:
      - b
  b:
    image: nginx
    depends_on:
      - a
"#,
        )
        .unwrap();

        match graph.start_order() {
            Err(StackError::DependencyCycle(cycle)) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = graph(
            r#"
services:
  a:
    image: nginx
    depends_on: [a]
"#,
        )
        .unwrap();
        assert!(matches!(
            graph.start_order(),
            Err(StackError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let result = graph(
            r#"
services:
  web:
    image: nginx
    depends_on: [api]
"#,
        );
        match result {
            Err(StackError::UnknownDependency {
                service,
                dependency,
            }) => {
                assert_eq!(service, "web");
                assert_eq!(dependency, "api");
            }
            other => panic!("expected unknown dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_dependents_of_is_transitive() {
        let graph = graph(
            r#"
services:
  db:
    image: postgres
  api:
    image: node
    depends_on: [db]
  web:
    image: nginx
    depends_on: [api]
  worker:
    image: node
"#,
        )
        .unwrap();

        let dependents = graph.dependents_of("db");
        assert!(dependents.contains("api"));
        assert!(dependents.contains("web"));
        assert!(!dependents.contains("worker"));
    }

    #[test]
    fn test_without_edges_keeps_services() {
        let graph = graph(
            r#"
services:
  a:
    image: nginx
    depends_on: [b]
  b:
    image: nginx
    depends_on: [a]
"#,
        )
        .unwrap();
        let flat = graph.without_edges();
        assert_eq!(flat.start_order().unwrap(), vec!["a", "b"]);
    }
}
