//! Bridge network implementation

use super::config::{IpAllocator, NetworkConfig, NetworkContainer, NetworkDriver};
use crate::error::{Result, StackError};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use uuid::Uuid;

/// Networks created by the manager itself and never removed
const PREDEFINED_NETWORKS: &[&str] = &["bridge", "host", "none"];

/// A virtual network and its address pool
pub struct BridgeNetwork {
    /// Network configuration
    pub config: NetworkConfig,
    /// IP allocator, absent for drivers without addressing
    allocator: Option<IpAllocator>,
}

impl BridgeNetwork {
    /// Create a new network
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let allocator = if config.driver.provides_addressing() {
            let pool = config.ipam.config.first().ok_or_else(|| {
                StackError::Network(format!("Network {} has no address pool", config.name))
            })?;
            Some(IpAllocator::new(&pool.subnet, pool.gateway.as_deref())?)
        } else {
            None
        };

        Ok(Self { config, allocator })
    }

    /// Connect a container to this network
    pub fn connect(
        &mut self,
        container_id: &str,
        container_name: &str,
        aliases: &[String],
    ) -> Result<NetworkContainer> {
        if self.config.containers.contains_key(container_id) {
            return Err(StackError::Network(format!(
                "Container {} is already connected to network {}",
                container_name, self.config.name
            )));
        }

        let ipv4_address = match self.allocator.as_mut() {
            Some(allocator) => Some(allocator.allocate()?),
            None => None,
        };

        let container = NetworkContainer {
            container_id: container_id.to_string(),
            name: container_name.to_string(),
            aliases: aliases.to_vec(),
            endpoint_id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            mac_address: generate_mac_address(),
            ipv4_address,
        };

        self.config
            .containers
            .insert(container_id.to_string(), container.clone());

        Ok(container)
    }

    /// Disconnect a container from this network
    pub fn disconnect(&mut self, container_id: &str) -> Result<()> {
        let container = self.config.containers.remove(container_id).ok_or_else(|| {
            StackError::Container(format!(
                "Container {} not connected to network {}",
                container_id, self.config.name
            ))
        })?;

        if let (Some(allocator), Some(ip)) = (self.allocator.as_mut(), container.ipv4_address) {
            allocator.release(ip);
        }

        Ok(())
    }

    /// Resolve a member's address by container name, id or alias
    pub fn resolve(&self, name: &str) -> Option<Ipv4Addr> {
        if !self.config.driver.provides_addressing() {
            return None;
        }

        let mut members: Vec<&NetworkContainer> = self
            .config
            .containers
            .values()
            .filter(|c| c.answers_to(name))
            .collect();
        members.sort_by_key(|c| c.ipv4_address);
        members.first().and_then(|c| c.ipv4_address)
    }

    /// Get connected containers
    pub fn containers(&self) -> &HashMap<String, NetworkContainer> {
        &self.config.containers
    }
}

struct Networks {
    by_id: HashMap<String, BridgeNetwork>,
    names: HashMap<String, String>,
    next_subnet: u8,
}

impl Networks {
    fn id_for(&self, id_or_name: &str) -> Result<String> {
        if self.by_id.contains_key(id_or_name) {
            Ok(id_or_name.to_string())
        } else if let Some(id) = self.names.get(id_or_name) {
            Ok(id.clone())
        } else {
            Err(StackError::NetworkNotFound(id_or_name.to_string()))
        }
    }

    fn get_mut(&mut self, id_or_name: &str) -> Result<&mut BridgeNetwork> {
        let id = self.id_for(id_or_name)?;
        self.by_id
            .get_mut(&id)
            .ok_or_else(|| StackError::NetworkNotFound(id_or_name.to_string()))
    }

    /// Next free /24 from 172.20.0.0/16 upward
    fn allocate_subnet(&mut self) -> Result<String> {
        loop {
            let candidate = format!("172.20.{}.0/24", self.next_subnet);
            self.next_subnet = self.next_subnet.checked_add(1).ok_or_else(|| {
                StackError::Network("No free subnets left in 172.20.0.0/16".to_string())
            })?;

            let taken = self
                .by_id
                .values()
                .any(|n| n.config.primary_subnet() == Some(candidate.as_str()));
            if !taken {
                return Ok(candidate);
            }
        }
    }
}

/// Network manager for handling all networks
pub struct NetworkManager {
    inner: RwLock<Networks>,
}

impl NetworkManager {
    /// Create a new network manager
    pub fn new() -> Result<Self> {
        let manager = Self {
            inner: RwLock::new(Networks {
                by_id: HashMap::new(),
                names: HashMap::new(),
                next_subnet: 0,
            }),
        };

        manager.create_default_networks()?;

        Ok(manager)
    }

    /// Create default networks (bridge, host, none)
    fn create_default_networks(&self) -> Result<()> {
        let bridge = NetworkConfig::new("bridge")
            .driver(NetworkDriver::Bridge)
            .subnet("172.17.0.0/16")
            .gateway("172.17.0.1");
        self.create(bridge)?;

        self.create(NetworkConfig::new("host").driver(NetworkDriver::Host))?;
        self.create(NetworkConfig::new("none").driver(NetworkDriver::None))?;

        Ok(())
    }

    /// Create a new network
    ///
    /// A network with addressing but no configured subnet receives the next
    /// free /24 from 172.20.0.0/16.
    pub fn create(&self, mut config: NetworkConfig) -> Result<String> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        if inner.names.contains_key(&config.name) {
            return Err(StackError::Network(format!(
                "Network {} already exists",
                config.name
            )));
        }

        if config.driver.provides_addressing() && config.ipam.config.is_empty() {
            let subnet = inner.allocate_subnet()?;
            config = config.subnet(&subnet);
        }

        let id = config.id.clone();
        let name = config.name.clone();
        let network = BridgeNetwork::new(config)?;

        tracing::debug!("Created network {} ({})", name, id);
        inner.by_id.insert(id.clone(), network);
        inner.names.insert(name, id.clone());

        Ok(id)
    }

    /// Create the network unless one with the same name exists
    ///
    /// Returns the network ID and whether it was newly created.
    pub fn ensure(&self, config: NetworkConfig) -> Result<(String, bool)> {
        {
            let inner = self
                .inner
                .read()
                .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;
            let existing = inner
                .names
                .get(&config.name)
                .and_then(|id| inner.by_id.get(id).map(|n| (id, n)));
            if let Some((id, existing)) = existing {
                if existing.config.driver != config.driver {
                    return Err(StackError::Network(format!(
                        "Network {} exists with driver {}, expected {}",
                        config.name, existing.config.driver, config.driver
                    )));
                }
                return Ok((id.clone(), false));
            }
        }

        self.create(config).map(|id| (id, true))
    }

    /// Remove a network
    pub fn remove(&self, id_or_name: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        let id = inner.id_for(id_or_name)?;

        if let Some(network) = inner.by_id.get(&id) {
            if PREDEFINED_NETWORKS.contains(&network.config.name.as_str()) {
                return Err(StackError::Network(format!(
                    "{} is a pre-defined network and cannot be removed",
                    network.config.name
                )));
            }

            if !network.config.containers.is_empty() {
                return Err(StackError::Network(format!(
                    "Network {} has active endpoints",
                    id_or_name
                )));
            }

            let name = network.config.name.clone();
            inner.names.remove(&name);
        }

        inner.by_id.remove(&id);

        Ok(())
    }

    /// Get a network by ID or name
    pub fn get(&self, id_or_name: &str) -> Result<NetworkConfig> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let id = inner.id_for(id_or_name)?;
        inner
            .by_id
            .get(&id)
            .map(|n| n.config.clone())
            .ok_or_else(|| StackError::NetworkNotFound(id_or_name.to_string()))
    }

    /// Whether a network with this ID or name exists
    pub fn exists(&self, id_or_name: &str) -> bool {
        self.get(id_or_name).is_ok()
    }

    /// List all networks
    pub fn list(&self) -> Result<Vec<NetworkConfig>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let mut networks: Vec<NetworkConfig> =
            inner.by_id.values().map(|n| n.config.clone()).collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Connect a container to a network
    pub fn connect(
        &self,
        network_id_or_name: &str,
        container_id: &str,
        container_name: &str,
        aliases: &[String],
    ) -> Result<NetworkContainer> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        inner
            .get_mut(network_id_or_name)?
            .connect(container_id, container_name, aliases)
    }

    /// Disconnect a container from a network
    pub fn disconnect(&self, network_id_or_name: &str, container_id: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))?;

        inner.get_mut(network_id_or_name)?.disconnect(container_id)
    }

    /// Resolve a name to an address on one network
    pub fn resolve(&self, network_id_or_name: &str, name: &str) -> Result<Option<Ipv4Addr>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let id = inner.id_for(network_id_or_name)?;
        Ok(inner.by_id.get(&id).and_then(|n| n.resolve(name)))
    }

    /// Resolve a name as seen from inside a container
    ///
    /// Only networks the container is attached to are searched, in name order.
    pub fn resolve_from(&self, container_id: &str, name: &str) -> Result<Option<Ipv4Addr>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let mut attached: Vec<&BridgeNetwork> = inner
            .by_id
            .values()
            .filter(|n| n.containers().contains_key(container_id))
            .collect();
        attached.sort_by(|a, b| a.config.name.cmp(&b.config.name));

        Ok(attached.into_iter().find_map(|n| n.resolve(name)))
    }

    /// Names of the networks a container is attached to
    pub fn networks_of(&self, container_id: &str) -> Result<Vec<String>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

        let mut names: Vec<String> = inner
            .by_id
            .values()
            .filter(|n| n.containers().contains_key(container_id))
            .map(|n| n.config.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Prune unused networks
    pub fn prune(&self) -> Result<Vec<String>> {
        let to_remove: Vec<String> = {
            let inner = self
                .inner
                .read()
                .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))?;

            inner
                .by_id
                .values()
                .filter(|n| {
                    n.config.containers.is_empty()
                        && !PREDEFINED_NETWORKS.contains(&n.config.name.as_str())
                })
                .map(|n| n.config.name.clone())
                .collect()
        };

        for name in &to_remove {
            self.remove(name)?;
        }

        Ok(to_remove)
    }
}

/// Generate a random MAC address
fn generate_mac_address() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();

    // Use locally administered, unicast MAC
    let bytes: [u8; 6] = [0x02, rng.gen(), rng.gen(), rng.gen(), rng.gen(), rng.gen()];

    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}
