//! Address allocation and dependency-ordered provisioning of VPC network
//! chains: internet gateway, route tables, public/private subnet pairs and
//! NAT egress, with teardown in reverse order.
//!
//! - [`cloud`] - the cloud network collaborator and its implementations
//! - [`vpc`] - the [`Vpc`] aggregate and its create/delete chain
//! - [`processing`] - address pool and overlap audit
//! - [`models`] - IPv4 blocks and subnets
//! - [`output`] - CSV and JSON printing

pub mod cloud;
pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod processing;
pub mod vpc;

pub use error::{Error, Result};
pub use vpc::{Vpc, VpcOptions};

use cloud::{AwsCliNetwork, CloudNetwork, MemoryNetwork};
use config::Settings;
use std::sync::Arc;

/// The collaborator for `settings`: the aws cli, or an in-memory network
/// for dry runs.
pub fn cloud_network(settings: &Settings, dry_run: bool) -> Arc<dyn CloudNetwork> {
    if dry_run {
        log::warn!("Dry run: using an in-memory network for {}", settings.region);
        Arc::new(MemoryNetwork::new(&settings.region).with_visibility_lag(1))
    } else {
        Arc::new(AwsCliNetwork::new(settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_network_uses_region() {
        let settings = Settings::from_lookup(|_| None).with_region("eu-west-1");
        let network = cloud_network(&settings, true);
        assert_eq!(network.region(), "eu-west-1");
    }
}
