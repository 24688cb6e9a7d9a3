//! VPC subnet data model.

use super::Ipv4;
use serde::{Deserialize, Serialize};

/// Label used for public subnets in zone pair maps.
pub const PUBLIC: &str = "public";
/// Label used for private subnets in zone pair maps.
pub const PRIVATE: &str = "private";

/// A subnet owned by a [`crate::vpc::Vpc`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Identifier assigned by the cloud once created.
    pub id: String,
    /// Availability zone, e.g. `us-east-2a`.
    pub zone: String,
    /// Private subnets route egress through a NAT gateway (or nowhere).
    pub private: bool,
    /// Block carved from the VPC address pool.
    pub cidr: Ipv4,
    /// Route table associated with the subnet, if any.
    pub route_table_id: Option<String>,
    pub vpc_id: String,
    pub region: String,
    pub name: String,
}

impl Subnet {
    /// `"public"` or `"private"`.
    pub fn visibility(&self) -> &'static str {
        if self.private {
            PRIVATE
        } else {
            PUBLIC
        }
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} [{}] {}",
            self.id,
            self.zone,
            self.visibility(),
            self.cidr,
            self.name
        )
    }
}
