//! Public/private subnet pairing per availability zone.

use super::chain::ChainState;
use super::{is_public_record, lock, Vpc};
use crate::cloud::{Filter, Tags};
use crate::config;
use crate::error::{Error, Result, StepContext};
use crate::models::{Subnet, PRIVATE, PUBLIC};
use std::collections::HashMap;

impl Vpc {
    /// Find or create the public subnet of `zone`, routed through the
    /// internet gateway.
    ///
    /// Fails with [`Error::DependencyMissing`] while no gateway is attached.
    pub fn prepare_public_subnet(&self, zone: &str) -> Result<Subnet> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        self.find_or_create_public(zone)
    }

    /// Find or create the private subnet of `zone`.
    ///
    /// With `nat_enabled` the zone's NAT gateway (and therefore its public
    /// subnet) is prepared first and becomes the default route.
    pub fn create_private_subnet(&self, zone: &str, nat_enabled: bool) -> Result<Subnet> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        self.find_or_create_private(zone, nat_enabled)
    }

    /// Public and private subnet of `zone`, keyed `"public"` and `"private"`.
    ///
    /// A failure on the private leg leaves the public subnet in place.
    pub fn prepare_pair_subnet_by_zone(&self, zone: &str) -> Result<HashMap<String, Subnet>> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        log::info!("Prepare subnet pair of {} in {zone}", self.id);
        let public = self.find_or_create_public(zone)?;
        let private = self.find_or_create_private(zone, true)?;
        log::info!(
            "ZONE {zone} pair ready: public {} [{}], private {} [{}]",
            public.id,
            public.cidr,
            private.id,
            private.cidr
        );
        Ok(HashMap::from([
            (PUBLIC.to_string(), public),
            (PRIVATE.to_string(), private),
        ]))
    }

    /// Always create a new public subnet in `zone`.
    pub fn create_public_subnet(&self, zone: &str) -> Result<Subnet> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        self.require_internet_gateway(&format!("create public subnet in {zone}"))?;
        let rt_id = self.ensure_public_route_table()?;
        let subnet = self.new_subnet(zone, false)?;
        let subnet = self.wire(subnet, &rt_id)?;
        self.advance(ChainState::SubnetsReady);
        Ok(subnet)
    }

    /// Always create a new private subnet in `zone`, without route table.
    pub fn create_subnet(&self, zone: &str) -> Result<Subnet> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        self.new_subnet(zone, true)
    }

    /// Always create a new public and private subnet in `zone`.
    ///
    /// The private one shares the zone's NAT route when there is one.
    pub fn create_pair_subnet(&self, zone: &str) -> Result<Vec<Subnet>> {
        let public = self.create_public_subnet(zone)?;
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        let nat_id = self.lock_state().nat_gateway_ids.get(zone).cloned();
        let rt_id = self.ensure_private_route_table(zone, nat_id.as_deref())?;
        let private = self.new_subnet(zone, true)?;
        let private = self.wire(private, &rt_id)?;
        Ok(vec![public, private])
    }

    /// [`Vpc::create_pair_subnet`] for every zone, stopping at the first error.
    pub fn create_multi_zone_subnet<S: AsRef<str>>(&self, zones: &[S]) -> Result<Vec<Subnet>> {
        let mut created = Vec::new();
        for zone in zones {
            created.extend(self.create_pair_subnet(zone.as_ref())?);
        }
        Ok(created)
    }

    pub(super) fn find_or_create_public(&self, zone: &str) -> Result<Subnet> {
        self.require_internet_gateway(&format!("prepare public subnet in {zone}"))?;
        let rt_id = self.ensure_public_route_table()?;
        let subnet = match self.find_subnet(zone, false)? {
            Some(found) => found,
            None => self.new_subnet(zone, false)?,
        };
        let subnet = self.wire(subnet, &rt_id)?;
        self.advance(ChainState::SubnetsReady);
        Ok(subnet)
    }

    fn find_or_create_private(&self, zone: &str, nat_enabled: bool) -> Result<Subnet> {
        let nat_id = if nat_enabled {
            Some(self.ensure_nat_gateway(zone)?.id)
        } else {
            None
        };
        let rt_id = self.ensure_private_route_table(zone, nat_id.as_deref())?;
        let subnet = match self.find_subnet(zone, true)? {
            Some(found) => found,
            None => self.new_subnet(zone, true)?,
        };
        self.wire(subnet, &rt_id)
    }

    /// The attached gateway, looked up in the cloud when not yet known.
    fn require_internet_gateway(&self, step: &str) -> Result<String> {
        if let Some(id) = self.internet_gateway_id() {
            return Ok(id);
        }
        let attached = self.client.list_internet_gateways(&self.id).step(step)?;
        match attached.into_iter().next() {
            Some(igw) => {
                self.lock_state().internet_gateway_id = Some(igw.id.clone());
                self.advance(ChainState::GatewayAttached);
                Ok(igw.id)
            }
            None => Err(Error::dependency_missing(step, "internet gateway")),
        }
    }

    /// Existing subnet of `zone` with the given visibility, tracked or listed.
    fn find_subnet(&self, zone: &str, private: bool) -> Result<Option<Subnet>> {
        let known = self
            .lock_state()
            .subnets
            .iter()
            .find(|s| s.zone == zone && s.private == private)
            .cloned();
        if known.is_some() {
            return Ok(known);
        }

        let step = format!("look up {} subnet in {zone}", visibility(private));
        let records = self
            .client
            .list_subnets(&[Filter::vpc(&self.id), Filter::zone(zone)])
            .step(&step)?;
        let Some(record) = records
            .into_iter()
            .find(|r| is_public_record(r) != private)
        else {
            return Ok(None);
        };
        let tables = self
            .client
            .list_route_tables(&[Filter::vpc(&self.id)])
            .step(&step)?;
        Ok(self.adopt(record, &tables))
    }

    /// Carve a block and create a subnet on it.
    ///
    /// Blocks the cloud reports as taken stay reserved and the next one is
    /// tried; any other failure hands the block back.
    fn new_subnet(&self, zone: &str, private: bool) -> Result<Subnet> {
        let name = self.subnet_name(zone, private);
        let step = format!("create subnet {name}");
        let record = loop {
            let cidr = self.pool.carve_next()?;
            match self
                .client
                .create_subnet(&self.id, &cidr, zone, &self.subnet_tags(&name, private))
            {
                Ok(record) => break record,
                Err(e) if e.code() == Some("InvalidSubnet.Conflict") => {
                    log::warn!("{cidr} is already taken in {}, carving the next block", self.id);
                }
                Err(source) => {
                    self.pool.release(cidr);
                    return Err(Error::OperationFailed { step, source });
                }
            }
        };

        let subnet = Subnet {
            id: record.id,
            zone: zone.to_string(),
            private,
            cidr: record.cidr,
            route_table_id: None,
            vpc_id: self.id.clone(),
            region: self.region.clone(),
            name,
        };
        {
            let mut state = self.lock_state();
            state.subnets.push(subnet.clone());
            state.subnets.sort_by_key(|s| s.cidr);
        }
        self.wait_exists(&subnet.id)?;
        log::info!("Created subnet {subnet}");
        Ok(subnet)
    }

    /// Associate `subnet` with `route_table_id` unless it already is.
    fn wire(&self, mut subnet: Subnet, route_table_id: &str) -> Result<Subnet> {
        if subnet.route_table_id.as_deref() == Some(route_table_id) {
            return Ok(subnet);
        }
        match self.client.associate_route_table(route_table_id, &subnet.id) {
            Ok(association) => log::debug!("{}: associated via {association}", subnet.id),
            Err(e) if e.code() == Some("Resource.AlreadyAssociated") => {
                log::debug!("{} already associated with {route_table_id}", subnet.id)
            }
            Err(source) => {
                return Err(Error::OperationFailed {
                    step: format!("associate {} with {route_table_id}", subnet.id),
                    source,
                })
            }
        }
        subnet.route_table_id = Some(route_table_id.to_string());
        if let Some(tracked) = self
            .lock_state()
            .subnets
            .iter_mut()
            .find(|s| s.id == subnet.id)
        {
            tracked.route_table_id = subnet.route_table_id.clone();
        }
        Ok(subnet)
    }

    fn subnet_tags(&self, name: &str, private: bool) -> Tags {
        let mut tags = self.owned_tags(name);
        if private {
            tags.insert(config::PRIVATE_LB_TAG.to_string(), config::LB_TAG_VALUE.to_string());
        } else {
            tags.insert(
                config::PUBLIC_SUBNET_TAG_KEY.to_string(),
                config::PUBLIC_SUBNET_TAG_VALUE.to_string(),
            );
            tags.insert(config::PUBLIC_LB_TAG.to_string(), config::LB_TAG_VALUE.to_string());
        }
        tags
    }
}

fn visibility(private: bool) -> &'static str {
    if private {
        PRIVATE
    } else {
        PUBLIC
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fast_options;
    use super::*;
    use crate::cloud::{CloudError, CloudNetwork, MemoryNetwork};
    use crate::models::Ipv4;
    use std::sync::Arc;

    fn cidr(s: &str) -> Ipv4 {
        Ipv4::new(s).unwrap()
    }

    fn vpc_with_gateway(net: &Arc<MemoryNetwork>) -> Vpc {
        let vpc = Vpc::create(net.clone(), "pair", cidr("10.0.0.0/16"), fast_options()).unwrap();
        vpc.ensure_internet_gateway().unwrap();
        vpc
    }

    #[test]
    fn test_public_subnet_needs_gateway() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = Vpc::create(net.clone(), "pair", cidr("10.0.0.0/16"), fast_options()).unwrap();
        let err = vpc.prepare_public_subnet("us-east-2a").unwrap_err();
        assert!(matches!(err, Error::DependencyMissing { .. }), "{err}");
        assert_eq!(net.calls("create_subnet"), 0);
        assert_eq!(vpc.pool().reserved_count(), 0);
    }

    #[test]
    fn test_pair_addresses_are_adjacent() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        let pair = vpc.prepare_pair_subnet_by_zone("us-east-2a").unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pair[PUBLIC].cidr, cidr("10.0.0.0/24"));
        assert_eq!(pair[PRIVATE].cidr, cidr("10.0.1.0/24"));
        assert!(pair[PRIVATE].private);
        assert_ne!(pair[PUBLIC].route_table_id, pair[PRIVATE].route_table_id);
    }

    #[test]
    fn test_pair_is_find_or_create() {
        let net = Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(2));
        let vpc = vpc_with_gateway(&net);
        let first = vpc.prepare_pair_subnet_by_zone("us-east-2a").unwrap();
        let carved = vpc.pool().reserved_count();
        let second = vpc.prepare_pair_subnet_by_zone("us-east-2a").unwrap();
        assert_eq!(first[PUBLIC].id, second[PUBLIC].id);
        assert_eq!(first[PRIVATE].id, second[PRIVATE].id);
        assert_eq!(vpc.pool().reserved_count(), carved);
        assert_eq!(net.calls("create_subnet"), 2);
        assert_eq!(net.calls("create_nat_gateway"), 1);
    }

    #[test]
    fn test_conflicting_block_is_skipped() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        // created behind the aggregate's back
        net.create_subnet(vpc.id(), &cidr("10.0.0.0/24"), "us-east-2b", &Tags::new())
            .unwrap();
        let subnet = vpc.create_subnet("us-east-2a").unwrap();
        assert_eq!(subnet.cidr, cidr("10.0.1.0/24"));
        assert!(vpc.pool().is_reserved(&cidr("10.0.0.0/24")));
    }

    #[test]
    fn test_failed_create_releases_block() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        net.fail_next("create_subnet", CloudError::api("UnauthorizedOperation", "denied"));
        let err = vpc.create_subnet("us-east-2a").unwrap_err();
        assert_eq!(err.cloud_error().and_then(|e| e.code()), Some("UnauthorizedOperation"));
        assert_eq!(vpc.pool().reserved_count(), 0);
        assert_eq!(vpc.create_subnet("us-east-2a").unwrap().cidr, cidr("10.0.0.0/24"));
    }

    #[test]
    fn test_private_leg_failure_keeps_public_subnet() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        net.fail_next("create_nat_gateway", CloudError::api("NatGatewayLimitExceeded", "limit"));
        assert!(vpc.prepare_pair_subnet_by_zone("us-east-2a").is_err());
        assert_eq!(vpc.all_public_subnet_ids().len(), 1);
        assert!(vpc.all_private_subnet_ids().is_empty());
    }

    #[test]
    fn test_private_subnet_without_nat() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        let subnet = vpc.create_private_subnet("us-east-2a", false).unwrap();
        assert!(subnet.private);
        assert!(subnet.route_table_id.is_some());
        assert_eq!(net.calls("create_nat_gateway"), 0);
        assert_eq!(net.calls("allocate_address"), 0);
    }

    #[test]
    fn test_multi_zone_always_creates() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        let created = vpc
            .create_multi_zone_subnet(&["us-east-2a", "us-east-2b"])
            .unwrap();
        assert_eq!(created.len(), 4);
        let again = vpc.create_pair_subnet("us-east-2a").unwrap();
        assert_eq!(again[0].cidr, cidr("10.0.4.0/24"));
        assert_eq!(vpc.subnets().len(), 6);
    }

    #[test]
    fn test_subnet_tags_mark_visibility() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = vpc_with_gateway(&net);
        let public = vpc.create_public_subnet("us-east-2a").unwrap();
        let private = vpc.create_subnet("us-east-2a").unwrap();
        let records = net.list_subnets(&[Filter::vpc(vpc.id())]).unwrap();
        let tags_of = |id: &str| records.iter().find(|r| r.id == id).unwrap().tags.clone();
        assert_eq!(
            tags_of(&public.id).get(config::PUBLIC_SUBNET_TAG_KEY).map(String::as_str),
            Some("true")
        );
        assert!(tags_of(&private.id).contains_key(config::PRIVATE_LB_TAG));
        assert_eq!(
            tags_of(&private.id).get(config::NAME_TAG_KEY).map(String::as_str),
            Some("pair-private-us-east-2a")
        );
    }
}
