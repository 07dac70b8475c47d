//! Network configuration

use crate::error::{Result, StackError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Network driver types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    /// Bridge network (default)
    #[default]
    Bridge,
    /// Host network
    Host,
    /// No networking
    None,
    /// Overlay network
    Overlay,
    /// Macvlan network
    Macvlan,
    /// IPvlan network
    Ipvlan,
}

impl std::fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkDriver::Bridge => write!(f, "bridge"),
            NetworkDriver::Host => write!(f, "host"),
            NetworkDriver::None => write!(f, "none"),
            NetworkDriver::Overlay => write!(f, "overlay"),
            NetworkDriver::Macvlan => write!(f, "macvlan"),
            NetworkDriver::Ipvlan => write!(f, "ipvlan"),
        }
    }
}

impl std::str::FromStr for NetworkDriver {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bridge" => Ok(NetworkDriver::Bridge),
            "host" => Ok(NetworkDriver::Host),
            "none" | "null" => Ok(NetworkDriver::None),
            "overlay" => Ok(NetworkDriver::Overlay),
            "macvlan" => Ok(NetworkDriver::Macvlan),
            "ipvlan" => Ok(NetworkDriver::Ipvlan),
            other => Err(StackError::Network(format!("Unknown network driver: {}", other))),
        }
    }
}

impl NetworkDriver {
    /// Whether members of a network with this driver get addresses and
    /// name resolution from the network itself
    pub fn provides_addressing(&self) -> bool {
        !matches!(self, NetworkDriver::Host | NetworkDriver::None)
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Network driver
    pub driver: NetworkDriver,
    /// IPAM configuration
    pub ipam: IpamConfig,
    /// Internal network (no external access)
    pub internal: bool,
    /// Network labels
    pub labels: BTreeMap<String, String>,
    /// Connected containers
    pub containers: HashMap<String, NetworkContainer>,
    /// Created timestamp
    pub created: DateTime<Utc>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: String::new(),
            driver: NetworkDriver::default(),
            ipam: IpamConfig::default(),
            internal: false,
            labels: BTreeMap::new(),
            containers: HashMap::new(),
            created: Utc::now(),
        }
    }
}

impl NetworkConfig {
    /// Create a new network configuration
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Set network driver
    pub fn driver(mut self, driver: NetworkDriver) -> Self {
        self.driver = driver;
        self
    }

    /// Set subnet
    pub fn subnet(mut self, subnet: &str) -> Self {
        self.ipam.config = vec![IpamPoolConfig {
            subnet: subnet.to_string(),
            gateway: None,
        }];
        self
    }

    /// Set gateway
    pub fn gateway(mut self, gateway: &str) -> Self {
        if let Some(pool) = self.ipam.config.last_mut() {
            pool.gateway = Some(gateway.to_string());
        }
        self
    }

    /// Add label
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Set internal
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    /// Subnet of the first address pool, if one is configured
    pub fn primary_subnet(&self) -> Option<&str> {
        self.ipam.config.first().map(|c| c.subnet.as_str())
    }
}

/// IPAM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    /// IPAM driver
    pub driver: String,
    /// IP pool configurations
    pub config: Vec<IpamPoolConfig>,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            driver: "default".to_string(),
            config: Vec::new(),
        }
    }
}

/// IPAM pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamPoolConfig {
    /// Subnet in CIDR format
    pub subnet: String,
    /// Gateway address
    pub gateway: Option<String>,
}

/// Container network connection info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkContainer {
    /// Container ID
    pub container_id: String,
    /// Container name
    pub name: String,
    /// Names the container answers to on this network
    pub aliases: Vec<String>,
    /// Endpoint ID
    pub endpoint_id: String,
    /// MAC address
    pub mac_address: String,
    /// IPv4 address
    pub ipv4_address: Option<Ipv4Addr>,
}

impl NetworkContainer {
    /// Whether the container answers to `name` on this network
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.container_id == name || self.aliases.iter().any(|a| a == name)
    }
}

/// IP address allocator for one subnet
pub struct IpAllocator {
    network: u32,
    mask: u32,
    gateway: Ipv4Addr,
    allocated: Vec<Ipv4Addr>,
}

impl IpAllocator {
    /// Create a new IP allocator for a subnet
    ///
    /// The gateway defaults to the first host address and is never handed out.
    pub fn new(subnet: &str, gateway: Option<&str>) -> Result<Self> {
        let (base, prefix) = subnet
            .split_once('/')
            .ok_or_else(|| StackError::Network(format!("Invalid subnet: {}", subnet)))?;

        let base: Ipv4Addr = base
            .parse()
            .map_err(|_| StackError::Network(format!("Invalid IP: {}", base)))?;
        let prefix: u32 = prefix
            .parse()
            .ok()
            .filter(|p| (1..=30).contains(p))
            .ok_or_else(|| StackError::Network(format!("Invalid prefix length: {}", subnet)))?;

        let mask = u32::MAX << (32 - prefix);
        let network = u32::from(base) & mask;

        let gateway = match gateway {
            Some(gw) => gw
                .parse()
                .map_err(|_| StackError::Network(format!("Invalid gateway: {}", gw)))?,
            None => Ipv4Addr::from(network + 1),
        };

        Ok(Self {
            network,
            mask,
            gateway,
            allocated: vec![gateway],
        })
    }

    /// Gateway address of the subnet
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Allocate the lowest free host address
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let broadcast = self.network | !self.mask;

        for candidate in (self.network + 1)..broadcast {
            let ip = Ipv4Addr::from(candidate);
            if !self.allocated.contains(&ip) {
                self.allocated.push(ip);
                return Ok(ip);
            }
        }

        Err(StackError::Network(format!(
            "Address pool {}/{} exhausted",
            Ipv4Addr::from(self.network),
            self.mask.count_ones()
        )))
    }

    /// Release an IP address
    pub fn release(&mut self, ip: Ipv4Addr) {
        if ip != self.gateway {
            self.allocated.retain(|&a| a != ip);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_default() {
        let config = NetworkConfig::default();
        assert_eq!(config.driver, NetworkDriver::Bridge);
        assert_eq!(config.id.len(), 12);
        assert!(config.primary_subnet().is_none());
    }

    #[test]
    fn test_network_config_builder() {
        let config = NetworkConfig::new("my-network")
            .driver(NetworkDriver::Overlay)
            .subnet("10.0.0.0/24")
            .gateway("10.0.0.1")
            .internal(true);

        assert_eq!(config.name, "my-network");
        assert_eq!(config.driver, NetworkDriver::Overlay);
        assert_eq!(config.primary_subnet(), Some("10.0.0.0/24"));
        assert!(config.internal);
    }

    #[test]
    fn test_driver_from_str() {
        assert_eq!("bridge".parse::<NetworkDriver>().unwrap(), NetworkDriver::Bridge);
        assert_eq!("none".parse::<NetworkDriver>().unwrap(), NetworkDriver::None);
        assert!("quantum".parse::<NetworkDriver>().is_err());
        assert!(!NetworkDriver::Host.provides_addressing());
    }

    #[test]
    fn test_ip_allocator() {
        let mut allocator = IpAllocator::new("172.20.0.0/24", None).unwrap();
        assert_eq!(allocator.gateway(), Ipv4Addr::new(172, 20, 0, 1));

        let ip1 = allocator.allocate().unwrap();
        assert_eq!(ip1, Ipv4Addr::new(172, 20, 0, 2));

        let ip2 = allocator.allocate().unwrap();
        assert_eq!(ip2, Ipv4Addr::new(172, 20, 0, 3));

        allocator.release(ip1);
        assert_eq!(allocator.allocate().unwrap(), ip1);
    }

    #[test]
    fn test_ip_allocator_exhaustion() {
        let mut allocator = IpAllocator::new("10.0.0.0/30", None).unwrap();
        assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert!(allocator.allocate().is_err());
    }

    #[test]
    fn test_ip_allocator_invalid() {
        assert!(IpAllocator::new("10.0.0.0", None).is_err());
        assert!(IpAllocator::new("10.0.0.0/33", None).is_err());
        assert!(IpAllocator::new("nope/24", None).is_err());
    }
}
