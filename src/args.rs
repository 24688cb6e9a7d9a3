//! Command line arguments.
//!
//! - vpc-chain create --name <name> --cidr <cidr> --zones a,b
//! - vpc-chain subnets --vpc-id <id> --zones a,b
//! - vpc-chain delete --vpc-id <id> [--total-clean]
//! - vpc-chain list --vpc-id <id> [--json]
//! - vpc-chain bastion --vpc-id <id> --zone <zone> [--allowed-cidr <cidr>]

use clap::{Parser, Subcommand};
use vpc_chain::config;

/// Provision and tear down VPC subnet chains.
#[derive(Parser, Debug)]
#[command(name = "vpc-chain")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Region, overrides AWS_REGION
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Named profile of the aws cli, overrides AWS_PROFILE
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Run against an in-memory network instead of the aws cli
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find or create a VPC and build the full chain in the given zones
    Create {
        #[arg(long, default_value = config::VPC_DEFAULT_NAME)]
        name: String,
        #[arg(long, default_value = config::DEFAULT_VPC_CIDR)]
        cidr: String,
        /// Zone names or bare zone letters, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        zones: Vec<String>,
        /// Prefix length of carved subnets
        #[arg(long, default_value_t = config::DEFAULT_CIDR_PREFIX)]
        prefix: u8,
    },

    /// Prepare a public/private subnet pair per zone, zones in parallel
    Subnets {
        #[arg(long)]
        vpc_id: String,
        #[arg(long, value_delimiter = ',', required = true)]
        zones: Vec<String>,
    },

    /// Delete the chain of a VPC
    Delete {
        #[arg(long)]
        vpc_id: String,
        /// Also delete security groups, owned key pairs and addresses and the VPC
        #[arg(long)]
        total_clean: bool,
    },

    /// Print the subnets of a VPC
    List {
        #[arg(long)]
        vpc_id: String,
        #[arg(long)]
        json: bool,
    },

    /// Find or launch the squid proxy bastion
    Bastion {
        #[arg(long)]
        vpc_id: String,
        #[arg(long)]
        zone: String,
        /// Clients allowed to use the proxy, everyone when empty
        #[arg(long, default_value = "")]
        allowed_cidr: String,
    },
}

/// Expand a bare zone letter (`a`) to a zone of `region` (`us-east-2a`).
pub fn normalize_zone(region: &str, zone: &str) -> String {
    let zone = zone.trim();
    if zone.starts_with(region) {
        zone.to_string()
    } else {
        format!("{region}{zone}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_defaults() {
        let cli = Cli::try_parse_from(["vpc-chain", "create", "--zones", "a,b"]).unwrap();
        assert!(!cli.dry_run);
        match cli.command {
            Command::Create {
                name,
                cidr,
                zones,
                prefix,
            } => {
                assert_eq!(name, "ocm-ci-vpc");
                assert_eq!(cidr, "10.0.0.0/16");
                assert_eq!(zones, vec!["a", "b"]);
                assert_eq!(prefix, 24);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vpc-chain",
            "delete",
            "--vpc-id",
            "vpc-1",
            "--total-clean",
            "--dry-run",
            "--region",
            "eu-west-1",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.region.as_deref(), Some("eu-west-1"));
        assert!(matches!(
            cli.command,
            Command::Delete {
                total_clean: true,
                ..
            }
        ));
    }

    #[test]
    fn test_subnets_requires_zones() {
        assert!(Cli::try_parse_from(["vpc-chain", "subnets", "--vpc-id", "vpc-1"]).is_err());
    }

    #[test]
    fn test_normalize_zone() {
        assert_eq!(normalize_zone("us-east-2", "a"), "us-east-2a");
        assert_eq!(normalize_zone("us-east-2", " us-east-2b "), "us-east-2b");
    }
}
