//! JSON output for VPC subnets.

use crate::models::Subnet;
use crate::vpc::{ChainState, Vpc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Serializable snapshot of a [`Vpc`].
#[derive(Serialize, Debug)]
pub struct VpcSummary {
    pub vpc_id: String,
    pub name: String,
    pub region: String,
    pub cidr: String,
    pub chain: ChainState,
    pub internet_gateway_id: Option<String>,
    pub nat_gateway_ids: BTreeMap<String, String>,
    pub subnets: Vec<Subnet>,
}

impl From<&Vpc> for VpcSummary {
    fn from(vpc: &Vpc) -> Self {
        VpcSummary {
            vpc_id: vpc.id().to_string(),
            name: vpc.name().to_string(),
            region: vpc.region().to_string(),
            cidr: vpc.cidr().to_string(),
            chain: vpc.chain_state(),
            internet_gateway_id: vpc.internet_gateway_id(),
            nat_gateway_ids: vpc.nat_gateway_ids(),
            subnets: vpc.subnets(),
        }
    }
}

/// Print `vpc` and its subnets as pretty JSON to stdout.
pub fn print_subnets_json(vpc: &Vpc) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(&VpcSummary::from(vpc))?);
    Ok(())
}
