//! Host port reservations

use crate::compose::port::{HostPort, PortBinding};
use crate::error::{Result, StackError};
use std::sync::Mutex;

/// Tracks which owner holds each published host port
#[derive(Default)]
pub struct PortRegistry {
    reservations: Mutex<Vec<(HostPort, String)>>,
}

impl PortRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the host side of a binding for `owner`
    ///
    /// Bindings without a host port reserve nothing. The reservation fails
    /// if it overlaps any port held by another owner. Reserving a key the
    /// same owner already holds is a no-op.
    pub fn reserve(&self, binding: &PortBinding, owner: &str) -> Result<()> {
        let Some(key) = binding.host_key() else {
            return Ok(());
        };

        let mut reservations = self
            .reservations
            .lock()
            .map_err(|_| StackError::Lock("Failed to acquire port registry lock".to_string()))?;

        if let Some((_, holder)) = reservations
            .iter()
            .find(|(k, o)| o != owner && k.collides_with(&key))
        {
            return Err(StackError::PortInUse {
                port: key.port,
                protocol: key.protocol.to_string(),
                holder: holder.clone(),
            });
        }

        if !reservations.iter().any(|(k, o)| o == owner && *k == key) {
            reservations.push((key, owner.to_string()));
        }
        Ok(())
    }

    /// Reserve every binding or none of them
    pub fn reserve_all(&self, bindings: &[PortBinding], owner: &str) -> Result<()> {
        let held_before = self.held_by(owner)?;

        for binding in bindings {
            if let Err(e) = self.reserve(binding, owner) {
                self.release_except(owner, &held_before)?;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Release every port held by `owner`
    pub fn release_owner(&self, owner: &str) -> Result<usize> {
        self.release_except(owner, &[])
    }

    /// Current holder of the host side of a binding
    pub fn holder(&self, binding: &PortBinding) -> Result<Option<String>> {
        let Some(key) = binding.host_key() else {
            return Ok(None);
        };

        let reservations = self
            .reservations
            .lock()
            .map_err(|_| StackError::Lock("Failed to acquire port registry lock".to_string()))?;

        Ok(reservations
            .iter()
            .find(|(k, _)| k.collides_with(&key))
            .map(|(_, owner)| owner.clone()))
    }

    /// Ports currently held by `owner`
    pub fn held_by(&self, owner: &str) -> Result<Vec<HostPort>> {
        let reservations = self
            .reservations
            .lock()
            .map_err(|_| StackError::Lock("Failed to acquire port registry lock".to_string()))?;

        Ok(reservations
            .iter()
            .filter(|(_, o)| o == owner)
            .map(|(k, _)| *k)
            .collect())
    }

    fn release_except(&self, owner: &str, keep: &[HostPort]) -> Result<usize> {
        let mut reservations = self
            .reservations
            .lock()
            .map_err(|_| StackError::Lock("Failed to acquire port registry lock".to_string()))?;

        let before = reservations.len();
        reservations.retain(|(k, o)| o != owner || keep.contains(k));
        Ok(before - reservations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::port::parse_port_spec;

    #[test]
    fn test_reserve_and_release() {
        let registry = PortRegistry::new();
        let api = PortBinding::new(5000, 5000);

        registry.reserve(&api, "flask-api").unwrap();
        registry.reserve(&api, "flask-api").unwrap();
        assert_eq!(registry.holder(&api).unwrap().as_deref(), Some("flask-api"));

        match registry.reserve(&PortBinding::new(5000, 80), "other") {
            Err(StackError::PortInUse { port, holder, .. }) => {
                assert_eq!(port, 5000);
                assert_eq!(holder, "flask-api");
            }
            other => panic!("expected port in use, got {:?}", other),
        }

        assert_eq!(registry.release_owner("flask-api").unwrap(), 1);
        assert!(registry.holder(&api).unwrap().is_none());
    }

    #[test]
    fn test_wildcard_checks_every_overlapping_holder() {
        let registry = PortRegistry::new();
        let first = parse_port_spec("127.0.0.1:80:80").unwrap();
        let second = parse_port_spec("127.0.0.2:80:80").unwrap();
        registry.reserve_all(&first, "web").unwrap();
        registry.reserve_all(&second, "other").unwrap();

        match registry.reserve(&PortBinding::new(80, 80), "web") {
            Err(StackError::PortInUse { holder, .. }) => assert_eq!(holder, "other"),
            other => panic!("expected port in use, got {:?}", other),
        }
        assert_eq!(registry.held_by("web").unwrap().len(), 1);

        // Widening to the wildcard records a new key for the same owner.
        registry.release_owner("other").unwrap();
        registry.reserve(&PortBinding::new(80, 80), "web").unwrap();
        registry.reserve(&PortBinding::new(80, 80), "web").unwrap();
        assert_eq!(registry.held_by("web").unwrap().len(), 2);
        assert!(registry.reserve(&second[0], "other").is_err());
    }

    #[test]
    fn test_reserve_all_is_atomic() {
        let registry = PortRegistry::new();
        registry
            .reserve(&PortBinding::new(8502, 8502), "squatter")
            .unwrap();

        let bindings = vec![PortBinding::new(8501, 8501), PortBinding::new(8502, 8502)];
        assert!(registry.reserve_all(&bindings, "streamlit-app").is_err());
        assert!(registry.held_by("streamlit-app").unwrap().is_empty());
    }

    #[test]
    fn test_unpublished_bindings_reserve_nothing() {
        let registry = PortRegistry::new();
        let internal = parse_port_spec("8501").unwrap();
        registry.reserve_all(&internal, "a").unwrap();
        registry.reserve_all(&internal, "b").unwrap();
        assert!(registry.held_by("a").unwrap().is_empty());
    }
}
