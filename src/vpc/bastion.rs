//! Squid egress proxy instance in a public subnet.

use super::Vpc;
use crate::cloud::{
    ignore_not_found, tags, wait_until, CloudError, Filter, Image, Instance, InstanceRequest,
};
use crate::config;
use crate::error::{Error, Result, StepContext};
use crate::models::Ipv4;
use base64::Engine;

/// Base64 encoded cloud-init script installing squid on the proxy port,
/// allowing clients from `allowed_cidr` only.
pub fn squid_user_data(allowed_cidr: &str) -> String {
    let script = format!(
        "#!/bin/bash
yum update -y
yum install -y squid
cd /etc/squid/
sudo mv ./squid.conf ./squid.conf.bak
sudo touch squid.conf
echo http_port {port} >> /etc/squid/squid.conf
echo acl allowed_ips src {allowed_cidr} >> /etc/squid/squid.conf
echo http_access allow allowed_ips >> /etc/squid/squid.conf
echo http_access deny all >> /etc/squid/squid.conf
systemctl start squid
systemctl enable squid",
        port = config::PROXY_PORT,
    );
    base64::engine::general_purpose::STANDARD.encode(script)
}

impl Vpc {
    /// Return the running bastion of this VPC, launching one in `zone` when
    /// there is none. An empty `allowed_cidr` allows everyone.
    pub fn prepare_bastion_proxy(&self, zone: &str, allowed_cidr: &str) -> Result<Instance> {
        let existing = self
            .client
            .list_instances(&[
                Filter::vpc(&self.id),
                Filter::tag(config::NAME_TAG_KEY, config::BASTION_NAME),
                Filter::new("instance-state-name", &["pending", "running"]),
            ])
            .step(format!("look up bastion of {}", self.id))?;
        if let Some(bastion) = existing.into_iter().next() {
            log::info!("Found existing bastion {}", bastion.id);
            return Ok(bastion);
        }

        log::info!("No bastion in {}, launching one in {zone}", self.id);
        let allowed_cidr = if allowed_cidr.is_empty() {
            config::ROUTE_DESTINATION_CIDR_BLOCK
        } else {
            allowed_cidr
        };
        Ipv4::new(allowed_cidr).map_err(|e| {
            Error::Validation(format!("allowed cidr {allowed_cidr:?} is not an IPv4 block: {e}"))
        })?;
        self.launch_bastion("", zone, &squid_user_data(allowed_cidr))
    }

    /// Launch the proxy instance in the public subnet of `zone` and give it
    /// an elastic IP.
    ///
    /// An empty `image_id` picks the newest Amazon Linux image. `user_data`
    /// must already be base64 encoded.
    pub fn launch_bastion(&self, image_id: &str, zone: &str, user_data: &str) -> Result<Instance> {
        if user_data.is_empty() {
            return Err(Error::Validation("bastion user data must not be empty".to_string()));
        }
        let image_id = if image_id.is_empty() {
            self.find_proxy_launch_image()?.id
        } else {
            image_id.to_string()
        };

        let public = self.prepare_public_subnet(zone)?;
        let group_id = self.create_and_authorize_default_security_group_for_proxy(config::PROXY_PORT)?;
        let key = self.create_key_pair(&self.bastion_key_name())?;

        let step = format!("launch bastion in {}", public.id);
        let request = InstanceRequest {
            subnet_id: public.id.clone(),
            image_id,
            instance_type: config::BASTION_INSTANCE_TYPE.to_string(),
            key_name: key.name,
            security_group_ids: vec![group_id],
            user_data: Some(user_data.to_string()),
            associate_public_ip: true,
            // named at launch so an interrupted run still finds it
            tags: tags(&[
                (config::OWNER_TAG_KEY, self.owner.as_str()),
                (config::NAME_TAG_KEY, config::BASTION_NAME),
            ]),
        };
        let launched = self.client.run_instance(&request).step(&step)?;
        log::info!("Launched bastion instance {}", launched.id);
        let mut instance = self.wait_instance_running(&launched.id)?;

        let eip_step = format!("attach elastic ip to {}", instance.id);
        let address = self
            .client
            .allocate_address(&self.owned_tags(&format!("{}-bastion-eip", self.name)))
            .step(&eip_step)?;
        self.wait_exists(&address.allocation_id)?;
        self.client
            .associate_address(&address.allocation_id, &instance.id)
            .step(&eip_step)?;
        log::info!("Bastion {} reachable at {}", instance.id, address.public_ip);
        instance.public_ip = Some(address.public_ip);
        Ok(instance)
    }

    /// Terminate the bastion and release its elastic IPs.
    pub fn destroy_bastion_proxy(&self, instance: &Instance) -> Result<()> {
        let step = format!("destroy bastion {}", instance.id);
        // looked up first, termination drops the association
        let addresses = self
            .client
            .list_addresses(&[Filter::new("instance-id", &[instance.id.as_str()])])
            .step(&step)?;
        ignore_not_found(self.client.terminate_instances(&[instance.id.clone()])).step(&step)?;
        self.wait_deleted(&instance.id)?;
        for address in &addresses {
            self.release_address(&address.allocation_id)?;
        }
        log::info!("Destroyed bastion {}", instance.id);
        Ok(())
    }

    /// Newest Amazon Linux image matching the bastion name filter.
    pub fn find_proxy_launch_image(&self) -> Result<Image> {
        let step = format!("find bastion image in {}", self.region);
        self.client
            .describe_images(
                &[config::BASTION_IMAGE_OWNER],
                &[Filter::new("name", &[config::BASTION_IMAGE_NAME_FILTER])],
            )
            .step(&step)?
            .into_iter()
            .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
            .ok_or_else(|| Error::dependency_missing(step, "bastion image"))
    }

    fn wait_instance_running(&self, instance_id: &str) -> Result<Instance> {
        let what = format!("instance {instance_id} to be running");
        let mut running = None;
        wait_until(&self.poll, &what, || {
            let instance = self
                .client
                .list_instances(&[Filter::new("instance-id", &[instance_id])])?
                .into_iter()
                .next();
            match instance {
                Some(i) if i.state == "running" => {
                    running = Some(i);
                    Ok(true)
                }
                Some(i) if i.state != "pending" => Err(CloudError::api(
                    "IncorrectInstanceState",
                    format!("instance {instance_id} is {}", i.state),
                )),
                _ => Ok(false),
            }
        })?;
        running.ok_or_else(|| Error::OperationFailed {
            step: what,
            source: CloudError::not_found("InvalidInstanceID.NotFound", instance_id),
        })
    }
}
