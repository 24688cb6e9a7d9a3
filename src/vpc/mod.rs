//! VPC aggregate.
//!
//! A [`Vpc`] owns the address pool of its primary range and the subnets
//! carved from it, and sequences the resources chained to them:
//! - [`chain`] - create/delete chain over gateway, route tables, subnets, NAT
//! - [`subnet`] - public/private subnet pairing per zone
//! - [`nat`] - NAT gateways and private route tables
//! - [`security_group`], [`key_pair`], [`bastion`] - proxy bastion support
//!
//! Nothing outside this module mutates the pool or the subnet list. The
//! aggregate can be rebuilt at any time from the tagged cloud resources with
//! [`Vpc::import`].

mod bastion;
mod chain;
mod key_pair;
mod nat;
mod security_group;
mod subnet;

pub use bastion::squid_user_data;
pub use chain::ChainState;

use crate::cloud::{
    wait_for_resource_deleted, wait_for_resource_existing, CloudError, CloudNetwork, Filter,
    PollConfig, RouteTable, SubnetRecord, Tags, VpcRecord,
};
use crate::config::{self, Settings};
use crate::error::{Error, Result, StepContext};
use crate::models::{Ipv4, Subnet};
use crate::processing::{find_overlapping_blocks, log_overlapping_blocks, AddressPool};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-VPC settings that do not come from the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcOptions {
    /// Prefix length of carved subnets.
    pub subnet_prefix: u8,
    /// Value of the owner tag on created resources.
    pub owner: String,
    pub poll: PollConfig,
}

impl Default for VpcOptions {
    fn default() -> Self {
        VpcOptions {
            subnet_prefix: config::DEFAULT_CIDR_PREFIX,
            owner: config::VPC_DEFAULT_NAME.to_string(),
            poll: PollConfig::default(),
        }
    }
}

impl From<&Settings> for VpcOptions {
    fn from(settings: &Settings) -> Self {
        VpcOptions {
            subnet_prefix: config::DEFAULT_CIDR_PREFIX,
            owner: settings.owner.clone(),
            poll: settings.poll,
        }
    }
}

impl VpcOptions {
    pub fn with_subnet_prefix(mut self, subnet_prefix: u8) -> Self {
        self.subnet_prefix = subnet_prefix;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }
}

#[derive(Debug, Default)]
struct VpcState {
    subnets: Vec<Subnet>,
    internet_gateway_id: Option<String>,
    public_route_table_id: Option<String>,
    /// Keyed by zone.
    private_route_table_ids: BTreeMap<String, String>,
    /// Keyed by zone.
    nat_gateway_ids: BTreeMap<String, String>,
    /// Keyed by group name.
    security_group_ids: BTreeMap<String, String>,
    chain: ChainState,
}

/// A VPC and the resources chained to it.
pub struct Vpc {
    client: Arc<dyn CloudNetwork>,
    id: String,
    name: String,
    region: String,
    cidr: Ipv4,
    owner: String,
    poll: PollConfig,
    pool: AddressPool,
    state: Mutex<VpcState>,
    /// Held while finding or creating resources shared by all zones.
    provision: Mutex<()>,
    zone_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl fmt::Debug for Vpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vpc")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("region", &self.region)
            .field("cidr", &self.cidr)
            .field("state", &*self.lock_state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn tag_value<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.get(key).map(String::as_str)
}

/// Public subnets carry `PublicSubnet=true`, everything else is private.
pub(crate) fn is_public_record(record: &SubnetRecord) -> bool {
    tag_value(&record.tags, config::PUBLIC_SUBNET_TAG_KEY) == Some(config::PUBLIC_SUBNET_TAG_VALUE)
}

impl Vpc {
    /// Find the VPC named `name`, or create it with `cidr`.
    pub fn create(
        client: Arc<dyn CloudNetwork>,
        name: &str,
        cidr: Ipv4,
        options: VpcOptions,
    ) -> Result<Vpc> {
        // reject bad ranges before touching the cloud
        AddressPool::new(cidr, options.subnet_prefix)?;

        let existing = client
            .list_vpcs(&[Filter::tag(config::NAME_TAG_KEY, name)])
            .step(format!("look up vpc {name}"))?;
        if let Some(record) = existing.into_iter().next() {
            log::info!("Found existing vpc {} named {name} [{}]", record.id, record.cidr);
            return Vpc::assemble(client, record, options);
        }

        let tags = owned_tags(&options.owner, name);
        let record = client
            .create_vpc(&cidr, &tags)
            .step(format!("create vpc {name}"))?;
        log::info!("Created vpc {} named {name} [{cidr}]", record.id);
        wait_for_resource_existing(client.as_ref(), &options.poll, &record.id)?;
        client
            .enable_vpc_dns(&record.id)
            .step(format!("enable dns for {}", record.id))?;
        Vpc::assemble(client, record, options)
    }

    /// Rebuild the aggregate of an existing VPC from its cloud resources.
    pub fn import(client: Arc<dyn CloudNetwork>, vpc_id: &str, options: VpcOptions) -> Result<Vpc> {
        let step = format!("import vpc {vpc_id}");
        let record = client
            .list_vpcs(&[Filter::new("vpc-id", &[vpc_id])])
            .step(&step)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::OperationFailed {
                step: step.clone(),
                source: CloudError::not_found("InvalidVpcID.NotFound", vpc_id),
            })?;
        Vpc::assemble(client, record, options)
    }

    /// Import the VPC that owns `subnet_id`.
    pub fn import_by_subnet(
        client: Arc<dyn CloudNetwork>,
        subnet_id: &str,
        options: VpcOptions,
    ) -> Result<Vpc> {
        let step = format!("resolve vpc of subnet {subnet_id}");
        let record = client
            .list_subnets(&[Filter::new("subnet-id", &[subnet_id])])
            .step(&step)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::OperationFailed {
                step: step.clone(),
                source: CloudError::not_found("InvalidSubnetID.NotFound", subnet_id),
            })?;
        Vpc::import(client, &record.vpc_id, options)
    }

    fn assemble(client: Arc<dyn CloudNetwork>, record: VpcRecord, options: VpcOptions) -> Result<Vpc> {
        let name = tag_value(&record.tags, config::NAME_TAG_KEY)
            .unwrap_or(&record.id)
            .to_string();
        let vpc = Vpc {
            region: client.region().to_string(),
            client,
            pool: AddressPool::new(record.cidr.network(), options.subnet_prefix)?,
            id: record.id,
            name,
            cidr: record.cidr.network(),
            owner: options.owner,
            poll: options.poll,
            state: Mutex::new(VpcState::default()),
            provision: Mutex::new(()),
            zone_locks: Mutex::new(HashMap::new()),
        };
        vpc.discover()?;
        Ok(vpc)
    }

    /// Load subnets, gateway, route tables and NAT gateways from the cloud.
    fn discover(&self) -> Result<()> {
        let step = format!("discover resources of {}", self.id);
        let vpc_filter = [Filter::vpc(&self.id)];
        let records = self.client.list_subnets(&vpc_filter).step(&step)?;
        let tables = self.client.list_route_tables(&vpc_filter).step(&step)?;
        let gateways = self
            .client
            .list_internet_gateways(&self.id)
            .step(&step)?;
        let nats = self.client.list_nat_gateways(&self.id).step(&step)?;

        for record in records {
            self.adopt(record, &tables);
        }

        let public_rt_name = self.public_route_table_name();
        let private_rt_prefix = format!("{}-private-rt-", self.name);
        let mut state = self.lock_state();
        state.internet_gateway_id = gateways.first().map(|g| g.id.clone());
        for table in tables.iter().filter(|t| !t.is_main()) {
            match tag_value(&table.tags, config::NAME_TAG_KEY) {
                Some(name) if name == public_rt_name => {
                    state.public_route_table_id = Some(table.id.clone())
                }
                Some(name) => {
                    if let Some(zone) = name.strip_prefix(&private_rt_prefix) {
                        state
                            .private_route_table_ids
                            .insert(zone.to_string(), table.id.clone());
                    }
                }
                None => {}
            }
        }
        for nat in nats.iter().filter(|n| n.state.is_live()) {
            if let Some(subnet) = state.subnets.iter().find(|s| s.id == nat.subnet_id) {
                let zone = subnet.zone.clone();
                state.nat_gateway_ids.insert(zone, nat.id.clone());
            }
        }

        state.chain = if !state.nat_gateway_ids.is_empty() {
            ChainState::NatReady
        } else if !state.subnets.is_empty() && state.public_route_table_id.is_some() {
            ChainState::SubnetsReady
        } else if state.public_route_table_id.is_some() {
            ChainState::RouteTablesReady
        } else if state.internet_gateway_id.is_some() {
            ChainState::GatewayAttached
        } else {
            ChainState::Init
        };

        log::info!(
            "vpc {} ({}) [{}]: {} subnet(s), gateway={:?}, nat={:?}, chain={}",
            self.id,
            self.name,
            self.cidr,
            state.subnets.len(),
            state.internet_gateway_id,
            state.nat_gateway_ids,
            state.chain
        );
        log_overlapping_blocks(&find_overlapping_blocks(&state.subnets));
        Ok(())
    }

    /// Track a subnet found in the cloud and reserve its block.
    ///
    /// Returns `None` when the block lies outside the primary range (a
    /// secondary range), those subnets are not managed here.
    fn adopt(&self, record: SubnetRecord, tables: &[RouteTable]) -> Option<Subnet> {
        // one guard from lookup to push, so concurrent listings adopt once
        let mut state = self.lock_state();
        if let Some(known) = state.subnets.iter().find(|s| s.id == record.id) {
            return Some(known.clone());
        }
        if let Err(e) = self.pool.reserve(record.cidr) {
            log::warn!("Not managing subnet {}: {e}", record.id);
            return None;
        }
        let private = !is_public_record(&record);
        let subnet = Subnet {
            route_table_id: tables
                .iter()
                .find(|t| {
                    t.associations
                        .iter()
                        .any(|a| a.subnet_id.as_deref() == Some(record.id.as_str()))
                })
                .map(|t| t.id.clone()),
            name: tag_value(&record.tags, config::NAME_TAG_KEY)
                .map(str::to_string)
                .unwrap_or_else(|| self.subnet_name(&record.zone, private)),
            id: record.id,
            zone: record.zone,
            private,
            cidr: record.cidr,
            vpc_id: record.vpc_id,
            region: self.region.clone(),
        };
        log::debug!("Adopted subnet {subnet}");
        state.subnets.push(subnet.clone());
        state.subnets.sort_by_key(|s| s.cidr);
        Some(subnet)
    }

    fn lock_state(&self) -> MutexGuard<'_, VpcState> {
        lock(&self.state)
    }

    /// Lock serializing subnet work within one zone.
    fn zone_lock(&self, zone: &str) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.zone_locks).entry(zone.to_string()).or_default())
    }

    fn owned_tags(&self, name: &str) -> Tags {
        owned_tags(&self.owner, name)
    }

    fn subnet_name(&self, zone: &str, private: bool) -> String {
        let visibility = if private {
            crate::models::PRIVATE
        } else {
            crate::models::PUBLIC
        };
        format!("{}-{visibility}-{zone}", self.name)
    }

    fn public_route_table_name(&self) -> String {
        format!("{}-public-rt", self.name)
    }

    fn wait_exists(&self, resource_id: &str) -> Result<()> {
        wait_for_resource_existing(self.client.as_ref(), &self.poll, resource_id).map(|_| ())
    }

    fn wait_deleted(&self, resource_id: &str) -> Result<()> {
        wait_for_resource_deleted(self.client.as_ref(), &self.poll, resource_id).map(|_| ())
    }

    fn subnet_zone(&self, subnet_id: &str) -> Option<String> {
        self.lock_state()
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .map(|s| s.zone.clone())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn cidr(&self) -> Ipv4 {
        self.cidr
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Read access to the address pool.
    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    /// Snapshot of the managed subnets in address order.
    pub fn subnets(&self) -> Vec<Subnet> {
        self.lock_state().subnets.clone()
    }

    pub fn internet_gateway_id(&self) -> Option<String> {
        self.lock_state().internet_gateway_id.clone()
    }

    /// NAT gateway ids keyed by zone.
    pub fn nat_gateway_ids(&self) -> BTreeMap<String, String> {
        self.lock_state().nat_gateway_ids.clone()
    }

    /// Furthest state of the create chain.
    pub fn chain_state(&self) -> ChainState {
        self.lock_state().chain
    }

    /// Refresh the subnet list from the cloud and return it.
    pub fn list_subnets(&self) -> Result<Vec<Subnet>> {
        let step = format!("list subnets of {}", self.id);
        let records = self
            .client
            .list_subnets(&[Filter::vpc(&self.id)])
            .step(&step)?;
        let tables = self
            .client
            .list_route_tables(&[Filter::vpc(&self.id)])
            .step(&step)?;
        for record in records {
            self.adopt(record, &tables);
        }
        Ok(self.subnets())
    }

    pub fn unique_subnet(&self, subnet_id: &str) -> Option<Subnet> {
        self.lock_state()
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .cloned()
    }

    pub fn all_subnet_ids(&self) -> Vec<String> {
        self.lock_state().subnets.iter().map(|s| s.id.clone()).collect()
    }

    pub fn all_public_subnet_ids(&self) -> Vec<String> {
        self.subnet_ids_where(|s| !s.private)
    }

    pub fn all_private_subnet_ids(&self) -> Vec<String> {
        self.subnet_ids_where(|s| s.private)
    }

    fn subnet_ids_where(&self, keep: impl Fn(&Subnet) -> bool) -> Vec<String> {
        self.lock_state()
            .subnets
            .iter()
            .filter(|s| keep(s))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Ids of the VPC's subnets of one visibility, as listed by the cloud.
    pub fn list_indicated_subnets_by_vpc(&self, private: bool) -> Result<Vec<String>> {
        let records = self
            .client
            .list_subnets(&[Filter::vpc(&self.id)])
            .step(format!("list subnets of {}", self.id))?;
        Ok(records
            .into_iter()
            .filter(|r| is_public_record(r) != private)
            .map(|r| r.id)
            .collect())
    }

    /// The subset of `subnet_ids` with the requested visibility.
    pub fn find_indicated_subnets_by_subnets(
        &self,
        private: bool,
        subnet_ids: &[String],
    ) -> Result<Vec<String>> {
        if subnet_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = self
            .client
            .list_subnets(&[Filter::new("subnet-id", subnet_ids)])
            .step("describe subnets")?;
        Ok(records
            .into_iter()
            .filter(|r| is_public_record(r) != private)
            .map(|r| r.id)
            .collect())
    }
}

/// Owner and name tags carried by every created resource.
pub fn owned_tags(owner: &str, name: &str) -> Tags {
    crate::cloud::tags(&[(config::OWNER_TAG_KEY, owner), (config::NAME_TAG_KEY, name)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{tags, MemoryNetwork};
    use std::time::Duration;

    pub(crate) fn fast_options() -> VpcOptions {
        VpcOptions::default()
            .with_owner("unit")
            .with_poll(PollConfig::new(
                Duration::from_millis(500),
                Duration::from_millis(1),
            ))
    }

    fn cidr(s: &str) -> Ipv4 {
        Ipv4::new(s).unwrap()
    }

    #[test]
    fn test_create_is_find_or_create_by_name() {
        let net = Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(2));
        let first = Vpc::create(net.clone(), "ci", cidr("10.0.0.0/16"), fast_options()).unwrap();
        let second = Vpc::create(net.clone(), "ci", cidr("10.0.0.0/16"), fast_options()).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(second.name(), "ci");
        assert_eq!(net.calls("create_vpc"), 1);
        assert_eq!(first.chain_state(), ChainState::Init);
    }

    #[test]
    fn test_create_rejects_bad_range_without_cloud_calls() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let err = Vpc::create(net.clone(), "ci", cidr("10.0.0.0/16"), fast_options().with_subnet_prefix(16))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRange(_)));
        assert_eq!(net.calls("list_vpcs"), 0);
    }

    #[test]
    fn test_import_unknown_vpc_fails_not_found() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let err = Vpc::import(net, "vpc-404", fast_options()).unwrap_err();
        assert!(err.cloud_error().unwrap().is_not_found());
        assert!(err.to_string().starts_with("import vpc vpc-404 failed"));
    }

    #[test]
    fn test_import_reconstructs_pool_and_visibility() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = net
            .create_vpc(&cidr("10.0.0.0/16"), &tags(&[("Name", "legacy")]))
            .unwrap();
        let public = net
            .create_subnet(
                &vpc.id,
                &cidr("10.0.0.0/24"),
                "us-east-2a",
                &tags(&[("PublicSubnet", "true")]),
            )
            .unwrap();
        let private = net
            .create_subnet(&vpc.id, &cidr("10.0.2.0/24"), "us-east-2a", &Tags::new())
            .unwrap();

        let imported = Vpc::import(net.clone(), &vpc.id, fast_options()).unwrap();
        assert_eq!(imported.name(), "legacy");
        assert_eq!(imported.all_public_subnet_ids(), vec![public.id.clone()]);
        assert_eq!(imported.all_private_subnet_ids(), vec![private.id.clone()]);
        assert_eq!(imported.pool().reserved_count(), 2);
        assert_eq!(imported.pool().carve_next().unwrap(), cidr("10.0.1.0/24"));

        let by_subnet = Vpc::import_by_subnet(net, &private.id, fast_options()).unwrap();
        assert_eq!(by_subnet.id(), vpc.id);
        assert_eq!(by_subnet.unique_subnet(&public.id).unwrap().zone, "us-east-2a");
    }

    #[test]
    fn test_concurrent_listing_adopts_each_subnet_once() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = Vpc::create(net.clone(), "ci", cidr("10.0.0.0/16"), fast_options()).unwrap();
        for i in 0..4 {
            net.create_subnet(
                vpc.id(),
                &cidr(&format!("10.0.{i}.0/24")),
                "us-east-2a",
                &Tags::new(),
            )
            .unwrap();
        }

        let shared = &vpc;
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(move || shared.list_subnets().unwrap());
            }
        });
        let mut ids = vpc.all_subnet_ids();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(vpc.subnets().len(), 4);
        assert_eq!(vpc.pool().reserved_count(), 4);
    }

    #[test]
    fn test_indicated_subnet_queries() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = net.create_vpc(&cidr("10.0.0.0/16"), &Tags::new()).unwrap();
        let public = net
            .create_subnet(
                &vpc.id,
                &cidr("10.0.0.0/24"),
                "us-east-2a",
                &tags(&[("PublicSubnet", "true")]),
            )
            .unwrap();
        let private = net
            .create_subnet(&vpc.id, &cidr("10.0.1.0/24"), "us-east-2b", &Tags::new())
            .unwrap();
        let imported = Vpc::import(net, &vpc.id, fast_options()).unwrap();

        assert_eq!(
            imported.list_indicated_subnets_by_vpc(true).unwrap(),
            vec![private.id.clone()]
        );
        assert_eq!(
            imported.list_indicated_subnets_by_vpc(false).unwrap(),
            vec![public.id.clone()]
        );
        let ids = vec![public.id.clone(), private.id.clone()];
        assert_eq!(
            imported.find_indicated_subnets_by_subnets(false, &ids).unwrap(),
            vec![public.id]
        );
        assert!(imported
            .find_indicated_subnets_by_subnets(true, &[])
            .unwrap()
            .is_empty());
    }
}
