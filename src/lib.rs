//! Stackwire - compose-style multi-service deployment planning
//!
//! Stackwire reads a compose descriptor and turns it into a deployment:
//!
//! - Descriptor parsing, overlay merging and variable interpolation
//! - Build context resolution
//! - Dependency-ordered startup with readiness waits
//! - Host port reservation with collision detection
//! - Project networks with name-based service discovery

pub mod compose;
pub mod container;
pub mod error;
pub mod network;

pub use error::{Result, StackError};
