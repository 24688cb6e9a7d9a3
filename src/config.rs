//! Constants and runtime settings.
//!
//! Settings are read once (after `.env` is loaded) and passed explicitly to
//! the cloud client, nothing here is mutable global state.

use crate::cloud::PollConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_CIDR_PREFIX: u8 = 24;
pub const ROUTE_DESTINATION_CIDR_BLOCK: &str = "0.0.0.0/0";
pub const DEFAULT_REGION: &str = "us-east-2";
pub const VPC_DEFAULT_NAME: &str = "ocm-ci-vpc";
pub const AWS_CREDENTIALS_FILE_RELATIVE_PATH: &str = ".aws/credentials";

/// Tag marking resources created by a given orchestrator.
pub const OWNER_TAG_KEY: &str = "ocm_ci_flag";
pub const NAME_TAG_KEY: &str = "Name";
/// Carried by key pairs, which are not scoped to a VPC by the cloud.
pub const VPC_ID_TAG_KEY: &str = "ocm_ci_vpc_id";
pub const PUBLIC_SUBNET_TAG_KEY: &str = "PublicSubnet";
pub const PUBLIC_SUBNET_TAG_VALUE: &str = "true";
pub const PRIVATE_LB_TAG: &str = "kubernetes.io/role/internal-elb";
pub const PUBLIC_LB_TAG: &str = "kubernetes.io/role/elb";
// valid LB tag value is empty or 1
pub const LB_TAG_VALUE: &str = "";

pub const TCP_PROTOCOL: &str = "tcp";
pub const SSH_PORT: u16 = 22;
pub const PROXY_PORT: u16 = 3128;
pub const PROXY_SECURITY_GROUP_NAME: &str = "proxy-sg";
pub const PROXY_SECURITY_GROUP_DESCRIPTION: &str = "security group for proxy";
pub const ADDITIONAL_SECURITY_GROUP_NAME: &str = "ocm-additional-sg";
pub const DEFAULT_ADDITIONAL_SECURITY_GROUP_DESCRIPTION: &str =
    "This security group is created for OCM testing";

pub const INSTANCE_KEY_NAME_PREFIX: &str = "ocm-ci";
pub const BASTION_NAME: &str = "ocm-bastion";
pub const BASTION_INSTANCE_TYPE: &str = "t3.medium";
pub const BASTION_IMAGE_OWNER: &str = "amazon";
pub const BASTION_IMAGE_NAME_FILTER: &str = "al2023-ami-2023.*-x86_64";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 300;

/// Runtime settings for the cloud client and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub region: String,
    pub profile: Option<String>,
    pub credentials_file: PathBuf,
    /// Value of [`OWNER_TAG_KEY`] on every created resource.
    pub owner: String,
    pub poll: PollConfig,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Settings {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = lookup("AWS_REGION")
            .or_else(|| lookup("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let credentials_file = lookup("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(lookup("HOME").unwrap_or_default())
                    .join(AWS_CREDENTIALS_FILE_RELATIVE_PATH)
            });
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Settings {
            region,
            profile: lookup("AWS_PROFILE").filter(|p| !p.is_empty()),
            credentials_file,
            owner: lookup("QE_FLAG")
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| VPC_DEFAULT_NAME.to_string()),
            poll: PollConfig::new(
                Duration::from_secs(secs("VPC_CHAIN_POLL_TIMEOUT", DEFAULT_POLL_TIMEOUT_SECS)),
                Duration::from_secs(secs("VPC_CHAIN_POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)),
            ),
        }
    }

    pub fn with_region(mut self, region: &str) -> Settings {
        self.region = region.to_string();
        self
    }
}
