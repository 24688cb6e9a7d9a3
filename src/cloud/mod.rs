//! Cloud network collaborator.
//!
//! - [`client`] - the [`CloudNetwork`] trait the orchestrator talks to
//! - [`aws`] - `aws ec2` CLI implementation
//! - [`memory`] - in-process implementation for tests and dry runs
//! - [`poller`] - bounded polling over eventual consistency

mod aws;
pub mod cli;
mod client;
mod error;
mod memory;
mod poller;
mod types;

pub use aws::AwsCliNetwork;
pub use client::CloudNetwork;
pub use error::{ignore_not_found, CloudError, CloudResult};
pub use memory::MemoryNetwork;
pub use poller::{wait_for_resource_deleted, wait_for_resource_existing, wait_until, PollConfig};
pub use types::{
    tags, ElasticIp, Filter, Image, Instance, InstanceRequest, InternetGateway, KeyPair,
    NatGateway, NatGatewayState, Route, RouteTable, RouteTableAssociation, RouteTarget,
    SecurityGroup, SubnetRecord, Tags, VpcRecord,
};
