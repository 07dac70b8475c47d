//! Network management module
//!
//! Virtual networks, address allocation, name resolution between members
//! and host port reservations.

pub mod bridge;
pub mod config;
pub mod port;

pub use bridge::{BridgeNetwork, NetworkManager};
pub use config::{NetworkConfig, NetworkDriver};
pub use port::PortRegistry;
