//! NAT egress for private subnets.

use super::chain::ChainState;
use super::{lock, Vpc};
use crate::cloud::{wait_until, CloudError, NatGateway, NatGatewayState, RouteTarget};
use crate::error::{Error, Result, StepContext};
use crate::models::Subnet;

impl Vpc {
    /// Find or create the NAT gateway of `zone` and wait until it is
    /// available. The zone's public subnet is prepared first.
    pub fn prepare_nat_gateway(&self, zone: &str) -> Result<NatGateway> {
        let zone_lock = self.zone_lock(zone);
        let _zone = lock(&zone_lock);
        self.ensure_nat_gateway(zone)
    }

    pub(super) fn ensure_nat_gateway(&self, zone: &str) -> Result<NatGateway> {
        let step = format!("prepare nat gateway in {zone}");
        let public = self.find_or_create_public(zone)?;

        let listed = self.client.list_nat_gateways(&self.id).step(&step)?;
        let known = self.lock_state().nat_gateway_ids.get(zone).cloned();
        let existing = listed
            .iter()
            .filter(|n| n.state.is_live())
            .find(|n| {
                known.as_deref() == Some(n.id.as_str())
                    || n.subnet_id == public.id
                    || self.subnet_zone(&n.subnet_id).as_deref() == Some(zone)
            })
            .map(|n| n.id.clone());
        // a recorded gateway may not be listed yet, but one listed as gone is stale
        let known = known.filter(|id| !listed.iter().any(|n| n.id == *id && !n.state.is_live()));

        let nat_id = match existing.or(known) {
            Some(id) => {
                log::info!("Found nat gateway {id} in {zone}");
                id
            }
            None => self.create_nat_gateway(zone, &public)?,
        };
        self.lock_state()
            .nat_gateway_ids
            .insert(zone.to_string(), nat_id.clone());
        let nat = self.wait_nat_available(&nat_id)?;
        self.advance(ChainState::NatReady);
        Ok(nat)
    }

    fn create_nat_gateway(&self, zone: &str, public: &Subnet) -> Result<String> {
        let step = format!("create nat gateway in {zone}");
        let address = self
            .client
            .allocate_address(&self.owned_tags(&format!("{}-nat-eip-{zone}", self.name)))
            .step(&step)?;
        self.wait_exists(&address.allocation_id)?;
        let nat = self
            .client
            .create_nat_gateway(
                &public.id,
                &address.allocation_id,
                &self.owned_tags(&format!("{}-nat-{zone}", self.name)),
            )
            .step(&step)?;
        log::info!(
            "Created nat gateway {} in {} with address {}",
            nat.id,
            public.id,
            address.public_ip
        );
        Ok(nat.id)
    }

    /// Poll until `nat_id` is available; a failed or deleted gateway ends the wait.
    fn wait_nat_available(&self, nat_id: &str) -> Result<NatGateway> {
        let what = format!("nat gateway {nat_id} to be available");
        let mut available = None;
        wait_until(&self.poll, &what, || {
            let nat = self
                .client
                .list_nat_gateways(&self.id)?
                .into_iter()
                .find(|n| n.id == nat_id);
            match nat {
                Some(nat) if nat.state == NatGatewayState::Available => {
                    available = Some(nat);
                    Ok(true)
                }
                Some(nat) if !nat.state.is_live() => Err(CloudError::api(
                    "NatGatewayFailed",
                    format!("nat gateway {nat_id} is {}", nat.state.as_str()),
                )),
                _ => Ok(false),
            }
        })?;
        available.ok_or_else(|| Error::OperationFailed {
            step: what,
            source: CloudError::not_found("NatGatewayNotFound", nat_id),
        })
    }

    /// Find or create the private route table of `zone`, routing through
    /// `nat_gateway_id` when given.
    pub(super) fn ensure_private_route_table(
        &self,
        zone: &str,
        nat_gateway_id: Option<&str>,
    ) -> Result<String> {
        let known = self.lock_state().private_route_table_ids.get(zone).cloned();
        let rt_id = match known {
            Some(id) => id,
            None => {
                let id = self.find_or_create_route_table(&format!(
                    "{}-private-rt-{zone}",
                    self.name
                ))?;
                self.lock_state()
                    .private_route_table_ids
                    .insert(zone.to_string(), id.clone());
                id
            }
        };
        if let Some(nat_id) = nat_gateway_id {
            self.add_default_route(&rt_id, RouteTarget::NatGateway(nat_id.to_string()))?;
        }
        Ok(rt_id)
    }
}
