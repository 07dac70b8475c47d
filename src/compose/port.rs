//! Port mapping parsing
//!
//! Turns the `ports` entries of a service into concrete host/container
//! bindings. Short syntax follows `[ip:][host[-end]:]container[-end][/proto]`.

use super::config::{PortConfig, PortConfigLong, PublishedPort};
use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Transport protocol of a binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(StackError::InvalidConfig(format!(
                "Unknown port protocol: {}",
                other
            ))),
        }
    }
}

/// One host-to-container port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host address to bind; `None` binds every address
    pub host_ip: Option<IpAddr>,
    /// Host port; `None` publishes nothing on the host
    pub host_port: Option<u16>,
    /// Port inside the container
    pub container_port: u16,
    /// Protocol
    pub protocol: Protocol,
}

impl PortBinding {
    /// Binding of a host port to a container port over TCP on every address
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port: Some(host_port),
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    /// Host-side resource this binding reserves, if any
    pub fn host_key(&self) -> Option<HostPort> {
        self.host_port.map(|port| HostPort {
            ip: self.host_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port,
            protocol: self.protocol,
        })
    }
}

impl std::fmt::Display for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ip) = self.host_ip {
            write!(f, "{}:", ip)?;
        }
        if let Some(port) = self.host_port {
            write!(f, "{}:", port)?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

/// A reserved host address, port and protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

impl HostPort {
    /// Two reservations collide on the same port and protocol when either
    /// binds every address or both bind the same address.
    pub fn collides_with(&self, other: &HostPort) -> bool {
        self.port == other.port
            && self.protocol == other.protocol
            && (self.ip.is_unspecified() || other.ip.is_unspecified() || self.ip == other.ip)
    }
}

/// Parse every `ports` entry of a service
pub fn parse_ports(ports: &[PortConfig]) -> Result<Vec<PortBinding>> {
    let mut bindings = Vec::new();
    for port in ports {
        bindings.extend(parse_port_config(port)?);
    }
    Ok(bindings)
}

/// Parse one `ports` entry, expanding ranges
pub fn parse_port_config(port: &PortConfig) -> Result<Vec<PortBinding>> {
    match port {
        PortConfig::Short(spec) => parse_port_spec(spec),
        PortConfig::Number(container_port) => Ok(vec![PortBinding {
            host_ip: None,
            host_port: None,
            container_port: nonzero(*container_port, &container_port.to_string())?,
            protocol: Protocol::Tcp,
        }]),
        PortConfig::Long(long) => parse_long(long),
    }
}

/// Parse short port syntax
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortBinding>> {
    let spec = spec.trim();
    let (mapping, protocol) = match spec.rsplit_once('/') {
        Some((mapping, proto)) => (mapping, proto.parse::<Protocol>()?),
        None => (spec, Protocol::Tcp),
    };

    let (host_ip, rest) = split_host_ip(mapping, spec)?;

    let (host_part, container_part) = match rest.rsplit_once(':') {
        Some((host, container)) => (Some(host), container),
        None => (None, rest),
    };

    let container_ports = parse_range(container_part, spec)?;
    let host_ports = match host_part {
        Some(h) if !h.is_empty() => Some(parse_range(h, spec)?),
        _ => None,
    };

    let mut bindings = Vec::with_capacity(container_ports.len());
    match host_ports {
        None => {
            for container_port in container_ports {
                bindings.push(PortBinding {
                    host_ip,
                    host_port: None,
                    container_port,
                    protocol,
                });
            }
        }
        Some(host_ports) => {
            if host_ports.len() != container_ports.len() {
                return Err(StackError::InvalidConfig(format!(
                    "Port ranges differ in length: {}",
                    spec
                )));
            }
            for (host_port, container_port) in host_ports.into_iter().zip(container_ports) {
                bindings.push(PortBinding {
                    host_ip,
                    host_port: Some(host_port),
                    container_port,
                    protocol,
                });
            }
        }
    }

    Ok(bindings)
}

fn parse_long(long: &PortConfigLong) -> Result<Vec<PortBinding>> {
    let spec = format!("target {}", long.target);
    let container_port = nonzero(long.target, &spec)?;
    let protocol = match &long.protocol {
        Some(p) => p.parse()?,
        None => Protocol::Tcp,
    };
    let host_ip = match &long.host_ip {
        Some(ip) => Some(ip.parse::<IpAddr>().map_err(|_| {
            StackError::InvalidConfig(format!("Invalid host_ip in port mapping: {}", ip))
        })?),
        None => None,
    };

    let host_ports = match &long.published {
        None => vec![None],
        Some(PublishedPort::Number(port)) => vec![Some(nonzero(*port, &spec)?)],
        Some(PublishedPort::Text(text)) => parse_range(text, &spec)?
            .into_iter()
            .map(Some)
            .collect(),
    };

    Ok(host_ports
        .into_iter()
        .map(|host_port| PortBinding {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
        .collect())
}

/// Split a leading host IP off a mapping. IPv6 addresses are bracketed.
fn split_host_ip<'a>(mapping: &'a str, spec: &str) -> Result<(Option<IpAddr>, &'a str)> {
    if let Some(rest) = mapping.strip_prefix('[') {
        let (ip, rest) = rest.split_once("]:").ok_or_else(|| invalid(spec))?;
        let ip = ip.parse::<IpAddr>().map_err(|_| invalid(spec))?;
        return Ok((Some(ip), rest));
    }

    let parts: Vec<&str> = mapping.split(':').collect();
    match parts.len() {
        1 | 2 => Ok((None, mapping)),
        3 => {
            let ip = parts[0].parse::<IpAddr>().map_err(|_| invalid(spec))?;
            let offset = parts[0].len() + 1;
            Ok((Some(ip), &mapping[offset..]))
        }
        _ => Err(invalid(spec)),
    }
}

fn parse_range(text: &str, spec: &str) -> Result<Vec<u16>> {
    match text.split_once('-') {
        Some((start, end)) => {
            let start = parse_port(start, spec)?;
            let end = parse_port(end, spec)?;
            if end < start {
                return Err(invalid(spec));
            }
            Ok((start..=end).collect())
        }
        None => Ok(vec![parse_port(text, spec)?]),
    }
}

fn parse_port(text: &str, spec: &str) -> Result<u16> {
    let port = text.trim().parse::<u16>().map_err(|_| invalid(spec))?;
    nonzero(port, spec)
}

fn nonzero(port: u16, spec: &str) -> Result<u16> {
    if port == 0 {
        return Err(invalid(spec));
    }
    Ok(port)
}

fn invalid(spec: &str) -> StackError {
    StackError::InvalidConfig(format!("Invalid port mapping: {}", spec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_container() {
        let bindings = parse_port_spec("5000:5000").unwrap();
        assert_eq!(bindings, vec![PortBinding::new(5000, 5000)]);
    }

    #[test]
    fn test_parse_container_only() {
        let bindings = parse_port_spec("8501").unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].host_port, None);
        assert_eq!(bindings[0].container_port, 8501);
        assert!(bindings[0].host_key().is_none());
    }

    #[test]
    fn test_parse_ip_and_protocol() {
        let bindings = parse_port_spec("127.0.0.1:5353:53/udp").unwrap();
        assert_eq!(bindings[0].host_ip, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(bindings[0].host_port, Some(5353));
        assert_eq!(bindings[0].container_port, 53);
        assert_eq!(bindings[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_ipv6() {
        let bindings = parse_port_spec("[::1]:8080:80").unwrap();
        assert_eq!(bindings[0].host_ip, Some("::1".parse().unwrap()));
        assert_eq!(bindings[0].host_port, Some(8080));
    }

    #[test]
    fn test_parse_range() {
        let bindings = parse_port_spec("9000-9002:8000-8002").unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[2].host_port, Some(9002));
        assert_eq!(bindings[2].container_port, 8002);

        assert!(parse_port_spec("9000-9001:8000-8002").is_err());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_port_spec("abc").is_err());
        assert!(parse_port_spec("0:80").is_err());
        assert!(parse_port_spec("80:80/icmp").is_err());
        assert!(parse_port_spec("70000:80").is_err());
    }

    #[test]
    fn test_parse_long_syntax() {
        let long = PortConfigLong {
            target: 80,
            published: Some(PublishedPort::Text("8080".to_string())),
            host_ip: Some("0.0.0.0".to_string()),
            protocol: Some("tcp".to_string()),
            mode: None,
        };
        let bindings = parse_port_config(&PortConfig::Long(long)).unwrap();
        assert_eq!(bindings[0].host_port, Some(8080));
        assert_eq!(bindings[0].container_port, 80);
    }

    #[test]
    fn test_host_key_collisions() {
        let any = PortBinding::new(5000, 5000).host_key().unwrap();
        let local = parse_port_spec("127.0.0.1:5000:80").unwrap()[0]
            .host_key()
            .unwrap();
        let other_local = parse_port_spec("127.0.0.2:5000:80").unwrap()[0]
            .host_key()
            .unwrap();
        let udp = parse_port_spec("5000:5000/udp").unwrap()[0]
            .host_key()
            .unwrap();

        assert!(any.collides_with(&local));
        assert!(!local.collides_with(&other_local));
        assert!(!any.collides_with(&udp));
    }
}
