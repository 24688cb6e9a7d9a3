//! Security groups of the VPC.

use super::{lock, Vpc};
use crate::cloud::Filter;
use crate::config;
use crate::error::{Result, StepContext};

impl Vpc {
    /// Find or create the proxy security group and open `port` and ssh to
    /// the world. Returns the group id.
    pub fn create_and_authorize_default_security_group_for_proxy(&self, port: u16) -> Result<String> {
        let group_id = self.find_or_create_security_group(
            config::PROXY_SECURITY_GROUP_NAME,
            config::PROXY_SECURITY_GROUP_DESCRIPTION,
        )?;
        for port in [port, config::SSH_PORT] {
            self.authorize_ingress(&group_id, port, config::ROUTE_DESTINATION_CIDR_BLOCK)?;
        }
        Ok(group_id)
    }

    /// Find or create `count` groups named `{name_prefix}-{i}`.
    ///
    /// Empty prefix or description fall back to the defaults.
    pub fn create_additional_security_groups(
        &self,
        count: usize,
        name_prefix: &str,
        description: &str,
    ) -> Result<Vec<String>> {
        let name_prefix = if name_prefix.is_empty() {
            config::ADDITIONAL_SECURITY_GROUP_NAME
        } else {
            name_prefix
        };
        let description = if description.is_empty() {
            config::DEFAULT_ADDITIONAL_SECURITY_GROUP_DESCRIPTION
        } else {
            description
        };
        (0..count)
            .map(|i| self.find_or_create_security_group(&format!("{name_prefix}-{i}"), description))
            .collect()
    }

    /// Delete the non-default security groups of the VPC, only those
    /// carrying the owner tag when `owned_only`.
    pub fn delete_vpc_security_groups(&self, owned_only: bool) -> Result<()> {
        let step = format!("delete security groups of {}", self.id);
        let mut filters = vec![Filter::vpc(&self.id)];
        if owned_only {
            filters.push(Filter::tag(config::OWNER_TAG_KEY, &self.owner));
        }
        let groups = self.client.list_security_groups(&filters).step(&step)?;
        for group in groups.iter().filter(|g| g.name != "default") {
            self.delete_until_accepted(&format!("delete security group {}", group.id), || {
                self.client.delete_security_group(&group.id)
            })?;
            self.wait_deleted(&group.id)?;
            self.lock_state().security_group_ids.remove(&group.name);
            log::info!("Deleted security group {} ({})", group.id, group.name);
        }
        Ok(())
    }

    fn find_or_create_security_group(&self, name: &str, description: &str) -> Result<String> {
        let _provision = lock(&self.provision);
        if let Some(id) = self.lock_state().security_group_ids.get(name).cloned() {
            return Ok(id);
        }
        let step = format!("prepare security group {name}");
        let found = self
            .client
            .list_security_groups(&[Filter::vpc(&self.id), Filter::new("group-name", &[name])])
            .step(&step)?;
        let group_id = match found.into_iter().next() {
            Some(group) => {
                log::info!("Found security group {} ({name})", group.id);
                group.id
            }
            None => {
                let id = self
                    .client
                    .create_security_group(&self.id, name, description, &self.owned_tags(name))
                    .step(&step)?;
                self.wait_exists(&id)?;
                log::info!("Created security group {id} ({name})");
                id
            }
        };
        self.lock_state()
            .security_group_ids
            .insert(name.to_string(), group_id.clone());
        Ok(group_id)
    }

    fn authorize_ingress(&self, group_id: &str, port: u16, cidr: &str) -> Result<()> {
        match self
            .client
            .authorize_security_group_ingress(group_id, config::TCP_PROTOCOL, port, cidr)
        {
            Err(e) if e.code() == Some("InvalidPermission.Duplicate") => {
                log::debug!("{group_id}: tcp/{port} from {cidr} already allowed");
                Ok(())
            }
            other => other.step(format!("authorize tcp/{port} on {group_id}")),
        }
    }
}
