//! Domain models for VPC provisioning.
//!
//! - [`Ipv4`] - IPv4 network block with CIDR notation support
//! - [`Subnet`] - Subnet owned by a VPC

mod ipv4;
mod subnet;

// Re-export public types
pub use ipv4::{num_usable_hosts, Ipv4, MAX_LENGTH};
pub use subnet::{Subnet, PRIVATE, PUBLIC};
