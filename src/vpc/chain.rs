//! Create/delete chain of the resources hanging off a VPC.
//!
//! Create: `Init -> GatewayAttached -> RouteTablesReady -> SubnetsReady ->
//! NatReady -> Complete`. Every step is find-or-create, so a failed chain
//! is resumed by calling it again. Nothing is rolled back.
//!
//! Delete walks the same states backwards. Every delete treats "already
//! gone" as success and waits until the resource is no longer listed.

use super::{lock, Vpc};
use crate::cloud::{ignore_not_found, wait_until, CloudResult, Filter, NatGatewayState, RouteTarget};
use crate::config;
use crate::error::{Error, Result, StepContext};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// How far the create chain got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum ChainState {
    #[default]
    Init,
    GatewayAttached,
    RouteTablesReady,
    SubnetsReady,
    NatReady,
    Complete,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainState::Init => "init",
            ChainState::GatewayAttached => "gateway-attached",
            ChainState::RouteTablesReady => "route-tables-ready",
            ChainState::SubnetsReady => "subnets-ready",
            ChainState::NatReady => "nat-ready",
            ChainState::Complete => "complete",
        };
        f.write_str(name)
    }
}

impl Vpc {
    /// Move the chain forward, never backwards.
    pub(super) fn advance(&self, to: ChainState) {
        let mut state = self.lock_state();
        if to > state.chain {
            log::debug!("{}: chain {} -> {to}", self.id, state.chain);
            state.chain = to;
        }
    }

    /// Move the chain backwards, never forwards.
    fn retreat(&self, to: ChainState) {
        let mut state = self.lock_state();
        if to < state.chain {
            log::debug!("{}: chain {} -> {to}", self.id, state.chain);
            state.chain = to;
        }
    }

    /// Create the shared gateway and public route table, then a
    /// public/private subnet pair in every zone.
    ///
    /// Zones are attempted in order even after one fails; the first error
    /// is returned and everything created so far is left in place.
    pub fn create_vpc_chain<S: AsRef<str>>(&self, zones: &[S]) -> Result<&Self> {
        log::info!(
            "Create chain for {} in zones {:?}",
            self.id,
            zones.iter().map(AsRef::as_ref).collect::<Vec<_>>()
        );
        self.ensure_internet_gateway()?;
        self.ensure_public_route_table()?;

        let mut first_error = None;
        for zone in zones {
            let zone = zone.as_ref();
            match self.prepare_pair_subnet_by_zone(zone) {
                Ok(pair) => log::info!("{}: zone {zone} ready {:?}", self.id, pair.keys()),
                Err(e) => {
                    log::error!("{}: zone {zone} failed: {e}", self.id);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if zones.is_empty() {
            return Ok(self);
        }
        self.advance(ChainState::Complete);
        log::info!("Create chain for {} complete", self.id);
        Ok(self)
    }

    /// Find the attached internet gateway or create and attach one.
    pub(super) fn ensure_internet_gateway(&self) -> Result<String> {
        let _provision = lock(&self.provision);
        if let Some(id) = self.internet_gateway_id() {
            return Ok(id);
        }
        let step = format!("attach internet gateway to {}", self.id);
        let attached = self.client.list_internet_gateways(&self.id).step(&step)?;
        let igw_id = match attached.into_iter().next() {
            Some(igw) => {
                log::info!("Found internet gateway {} on {}", igw.id, self.id);
                igw.id
            }
            None => {
                let igw = self
                    .client
                    .create_internet_gateway(&self.owned_tags(&format!("{}-igw", self.name)))
                    .step(&step)?;
                self.wait_exists(&igw.id)?;
                self.client
                    .attach_internet_gateway(&igw.id, &self.id)
                    .step(&step)?;
                wait_until(&self.poll, &format!("{} attached to {}", igw.id, self.id), || {
                    Ok(self
                        .client
                        .list_internet_gateways(&self.id)?
                        .iter()
                        .any(|g| g.id == igw.id))
                })?;
                log::info!("Attached internet gateway {} to {}", igw.id, self.id);
                igw.id
            }
        };
        self.lock_state().internet_gateway_id = Some(igw_id.clone());
        self.advance(ChainState::GatewayAttached);
        Ok(igw_id)
    }

    /// Find or create the route table shared by all public subnets.
    pub(super) fn ensure_public_route_table(&self) -> Result<String> {
        let igw_id = self.internet_gateway_id().ok_or_else(|| {
            Error::dependency_missing(
                format!("prepare public route table of {}", self.id),
                "internet gateway",
            )
        })?;
        let _provision = lock(&self.provision);
        if let Some(id) = self.lock_state().public_route_table_id.clone() {
            return Ok(id);
        }
        let name = self.public_route_table_name();
        let rt_id = self.find_or_create_route_table(&name)?;
        self.add_default_route(&rt_id, RouteTarget::InternetGateway(igw_id))?;
        self.lock_state().public_route_table_id = Some(rt_id.clone());
        self.advance(ChainState::RouteTablesReady);
        Ok(rt_id)
    }

    /// Route table tagged `name` in this VPC, created when missing.
    pub(super) fn find_or_create_route_table(&self, name: &str) -> Result<String> {
        let step = format!("prepare route table {name}");
        let found = self
            .client
            .list_route_tables(&[Filter::vpc(&self.id), Filter::tag(config::NAME_TAG_KEY, name)])
            .step(&step)?;
        if let Some(table) = found.into_iter().next() {
            log::info!("Found route table {} ({name})", table.id);
            return Ok(table.id);
        }
        let table = self
            .client
            .create_route_table(&self.id, &self.owned_tags(name))
            .step(&step)?;
        self.wait_exists(&table.id)?;
        log::info!("Created route table {} ({name})", table.id);
        Ok(table.id)
    }

    /// Point the default route of `route_table_id` at `target`.
    ///
    /// An existing default route to another target (a replaced NAT
    /// gateway) is redirected.
    pub(super) fn add_default_route(&self, route_table_id: &str, target: RouteTarget) -> Result<()> {
        let destination = config::ROUTE_DESTINATION_CIDR_BLOCK;
        let step = format!("add default route to {route_table_id}");
        match self.client.create_route(route_table_id, destination, &target) {
            Err(e) if e.code() == Some("RouteAlreadyExists") => {
                let current = self.default_route_target(route_table_id).step(&step)?;
                if current.as_ref() == Some(&target) {
                    log::debug!("{route_table_id}: default route already present");
                    return Ok(());
                }
                log::info!("{route_table_id}: default route {current:?} replaced by {target:?}");
                self.client
                    .replace_route(route_table_id, destination, &target)
                    .step(&step)
            }
            other => other.step(&step),
        }
    }

    fn default_route_target(&self, route_table_id: &str) -> CloudResult<Option<RouteTarget>> {
        Ok(self
            .client
            .list_route_tables(&[Filter::new("route-table-id", &[route_table_id])])?
            .iter()
            .find_map(|t| t.default_route(config::ROUTE_DESTINATION_CIDR_BLOCK).cloned()))
    }

    /// Tear down everything the create chain built.
    ///
    /// With `total_clean` the security groups, owned key pairs and
    /// addresses and finally the VPC itself are removed too; otherwise the
    /// empty VPC is kept for reuse. Safe to call again after a failure or
    /// after it succeeded.
    pub fn delete_vpc_chain(&self, total_clean: bool) -> Result<()> {
        log::info!("Delete chain for {} (total_clean={total_clean})", self.id);
        self.delete_instances()?;
        self.delete_nat_gateways()?;
        self.retreat(ChainState::SubnetsReady);
        self.delete_vpc_subnets()?;
        self.retreat(ChainState::RouteTablesReady);
        self.delete_route_tables()?;
        self.retreat(ChainState::GatewayAttached);
        self.delete_internet_gateways()?;
        self.retreat(ChainState::Init);

        if total_clean {
            self.delete_vpc_security_groups(false)?;
            self.delete_owned_key_pairs()?;
            self.release_owned_addresses()?;
            self.delete_until_accepted(&format!("delete vpc {}", self.id), || {
                self.client.delete_vpc(&self.id)
            })?;
            self.wait_deleted(&self.id)?;
            log::info!("Deleted vpc {}", self.id);
        }
        log::info!("Delete chain for {} complete", self.id);
        Ok(())
    }

    /// Retry `delete` through transient errors until the cloud accepts it.
    ///
    /// A not-found answer counts as accepted.
    pub(super) fn delete_until_accepted<F>(&self, what: &str, mut delete: F) -> Result<()>
    where
        F: FnMut() -> CloudResult<()>,
    {
        wait_until(&self.poll, what, || ignore_not_found(delete()).map(|_| true)).map(|_| ())
    }

    fn delete_instances(&self) -> Result<()> {
        let step = format!("terminate instances of {}", self.id);
        let ids: Vec<String> = self
            .client
            .list_instances(&[Filter::vpc(&self.id)])
            .step(&step)?
            .into_iter()
            .filter(|i| !i.is_terminated())
            .map(|i| i.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        ignore_not_found(self.client.terminate_instances(&ids)).step(&step)?;
        for id in &ids {
            self.wait_deleted(id)?;
        }
        log::info!("Terminated {} instance(s) in {}", ids.len(), self.id);
        Ok(())
    }

    fn delete_nat_gateways(&self) -> Result<()> {
        let step = format!("delete nat gateways of {}", self.id);
        let listed = self.client.list_nat_gateways(&self.id).step(&step)?;
        let known: BTreeSet<String> = self.lock_state().nat_gateway_ids.values().cloned().collect();

        let mut allocation_ids = BTreeSet::new();
        let mut to_delete: BTreeSet<String> = known;
        for nat in &listed {
            allocation_ids.extend(nat.allocation_ids.iter().cloned());
            if nat.state.is_live() {
                to_delete.insert(nat.id.clone());
            }
        }
        for id in &to_delete {
            ignore_not_found(self.client.delete_nat_gateway(id)).step(&step)?;
            log::info!("Deleting nat gateway {id}");
        }

        wait_until(&self.poll, &format!("nat gateways of {} to be deleted", self.id), || {
            let nats = self.client.list_nat_gateways(&self.id)?;
            let gone = nats
                .iter()
                .all(|n| matches!(n.state, NatGatewayState::Deleted | NatGatewayState::Failed));
            // gateways that only became visible while deleting
            for nat in nats {
                allocation_ids.extend(nat.allocation_ids);
            }
            Ok(gone)
        })?;
        for id in &to_delete {
            self.wait_deleted(id)?;
        }

        for allocation_id in &allocation_ids {
            self.release_address(allocation_id)?;
        }
        self.lock_state().nat_gateway_ids.clear();
        if !to_delete.is_empty() {
            log::info!("Deleted {} nat gateway(s) of {}", to_delete.len(), self.id);
        }
        Ok(())
    }

    /// Delete every subnet of the VPC and hand the blocks back to the pool.
    pub fn delete_vpc_subnets(&self) -> Result<()> {
        let step = format!("delete subnets of {}", self.id);
        let mut targets: Vec<(String, crate::models::Ipv4)> = self
            .client
            .list_subnets(&[Filter::vpc(&self.id)])
            .step(&step)?
            .into_iter()
            .map(|r| (r.id, r.cidr))
            .collect();
        for subnet in self.subnets() {
            if !targets.iter().any(|(id, _)| *id == subnet.id) {
                targets.push((subnet.id, subnet.cidr));
            }
        }

        for (id, cidr) in &targets {
            self.delete_until_accepted(&format!("delete subnet {id}"), || {
                self.client.delete_subnet(id)
            })?;
            self.wait_deleted(id)?;
            self.pool.release(*cidr);
            self.lock_state().subnets.retain(|s| s.id != *id);
            log::info!("Deleted subnet {id} [{cidr}]");
        }
        Ok(())
    }

    fn delete_route_tables(&self) -> Result<()> {
        let step = format!("delete route tables of {}", self.id);
        let tables = self
            .client
            .list_route_tables(&[Filter::vpc(&self.id)])
            .step(&step)?;
        let mut ids: BTreeSet<String> = BTreeSet::new();
        for table in tables.iter().filter(|t| !t.is_main()) {
            for assoc in &table.associations {
                ignore_not_found(self.client.disassociate_route_table(&assoc.id)).step(&step)?;
            }
            ids.insert(table.id.clone());
        }
        {
            let state = self.lock_state();
            ids.extend(state.public_route_table_id.iter().cloned());
            ids.extend(state.private_route_table_ids.values().cloned());
        }

        for id in &ids {
            self.delete_until_accepted(&format!("delete route table {id}"), || {
                self.client.delete_route_table(id)
            })?;
            self.wait_deleted(id)?;
            log::info!("Deleted route table {id}");
        }
        let mut state = self.lock_state();
        state.public_route_table_id = None;
        state.private_route_table_ids.clear();
        for subnet in state.subnets.iter_mut() {
            subnet.route_table_id = None;
        }
        Ok(())
    }

    fn delete_internet_gateways(&self) -> Result<()> {
        let step = format!("delete internet gateways of {}", self.id);
        let mut ids: BTreeSet<String> = self
            .client
            .list_internet_gateways(&self.id)
            .step(&step)?
            .into_iter()
            .map(|g| g.id)
            .collect();
        ids.extend(self.internet_gateway_id());

        for id in &ids {
            ignore_not_found(self.client.detach_internet_gateway(id, &self.id)).step(&step)?;
            self.delete_until_accepted(&format!("delete internet gateway {id}"), || {
                self.client.delete_internet_gateway(id)
            })?;
            self.wait_deleted(id)?;
            log::info!("Deleted internet gateway {id}");
        }
        self.lock_state().internet_gateway_id = None;
        Ok(())
    }

    /// Release the addresses this VPC allocated.
    fn release_owned_addresses(&self) -> Result<()> {
        let step = format!("release addresses of {}", self.id);
        let addresses = self
            .client
            .list_addresses(&[
                Filter::tag(config::OWNER_TAG_KEY, &self.owner),
                Filter::tag(config::NAME_TAG_KEY, &format!("{}-*", self.name)),
            ])
            .step(&step)?;
        for address in &addresses {
            self.release_address(&address.allocation_id)?;
            log::info!("Released address {}", address.public_ip);
        }
        Ok(())
    }

    /// Release an elastic IP and wait until it is no longer listed.
    pub(super) fn release_address(&self, allocation_id: &str) -> Result<()> {
        self.delete_until_accepted(&format!("release address {allocation_id}"), || {
            self.client.release_address(allocation_id)
        })?;
        self.wait_deleted(allocation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fast_options;
    use super::*;
    use crate::cloud::{CloudError, CloudNetwork, MemoryNetwork};
    use crate::models::Ipv4;
    use std::sync::Arc;

    fn new_vpc(net: &Arc<MemoryNetwork>) -> Vpc {
        Vpc::create(
            net.clone(),
            "chain",
            Ipv4::new("10.0.0.0/16").unwrap(),
            fast_options(),
        )
        .unwrap()
    }

    #[test]
    fn test_chain_state_order() {
        assert!(ChainState::Init < ChainState::GatewayAttached);
        assert!(ChainState::NatReady < ChainState::Complete);
        assert_eq!(ChainState::RouteTablesReady.to_string(), "route-tables-ready");
    }

    #[test]
    fn test_create_chain_reaches_complete() {
        let net = Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(1));
        let vpc = new_vpc(&net);
        vpc.create_vpc_chain(&["us-east-2a"]).unwrap();
        assert_eq!(vpc.chain_state(), ChainState::Complete);
        assert!(vpc.internet_gateway_id().is_some());
        assert_eq!(vpc.nat_gateway_ids().len(), 1);
        assert_eq!(vpc.subnets().len(), 2);
    }

    #[test]
    fn test_gateway_step_is_idempotent() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = new_vpc(&net);
        let first = vpc.ensure_internet_gateway().unwrap();
        let second = vpc.ensure_internet_gateway().unwrap();
        assert_eq!(first, second);
        assert_eq!(net.calls("create_internet_gateway"), 1);

        // a fresh aggregate finds the attached gateway instead of creating one
        let imported = Vpc::import(net.clone(), vpc.id(), fast_options()).unwrap();
        assert_eq!(imported.chain_state(), ChainState::GatewayAttached);
        assert_eq!(imported.ensure_internet_gateway().unwrap(), first);
        assert_eq!(net.calls("create_internet_gateway"), 1);
    }

    #[test]
    fn test_failed_step_halts_chain_and_retry_resumes() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = new_vpc(&net);
        net.fail_next(
            "create_route_table",
            CloudError::api("UnauthorizedOperation", "denied"),
        );
        let err = vpc.create_vpc_chain(&["us-east-2a"]).unwrap_err();
        assert!(err.to_string().contains("prepare route table chain-public-rt failed"));
        assert_eq!(vpc.chain_state(), ChainState::GatewayAttached);

        vpc.create_vpc_chain(&["us-east-2a"]).unwrap();
        assert_eq!(vpc.chain_state(), ChainState::Complete);
        assert_eq!(net.calls("create_internet_gateway"), 1);
    }

    #[test]
    fn test_delete_chain_keeps_vpc_shell_unless_total_clean() {
        let net = Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(1));
        let vpc = new_vpc(&net);
        vpc.create_vpc_chain(&["us-east-2a", "us-east-2b"]).unwrap();

        vpc.delete_vpc_chain(false).unwrap();
        assert_eq!(vpc.chain_state(), ChainState::Init);
        assert!(vpc.subnets().is_empty());
        assert_eq!(vpc.pool().reserved_count(), 0);
        assert!(net.list_vpcs(&[Filter::new("vpc-id", &[vpc.id()])]).unwrap().len() == 1);
        assert!(net.list_nat_gateways(vpc.id()).unwrap().iter().all(|n| !n.state.is_live()));
        assert!(net.list_addresses(&[]).unwrap().is_empty());

        vpc.delete_vpc_chain(true).unwrap();
        assert!(!net.resource_exists(vpc.id()).unwrap());
        // already gone, still fine
        vpc.delete_vpc_chain(true).unwrap();
    }
}
