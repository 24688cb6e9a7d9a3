//! Key pairs used by instances launched in the VPC.

use super::Vpc;
use crate::cloud::{ignore_not_found, wait_until, Filter, KeyPair};
use crate::config;
use crate::error::{Error, Result, StepContext};

impl Vpc {
    /// Find the key pair called `name` or create it.
    ///
    /// Only a freshly created pair carries its private key material.
    pub fn create_key_pair(&self, name: &str) -> Result<KeyPair> {
        let step = format!("prepare key pair {name}");
        if let Some(existing) = self.find_key_pair(name).step(&step)? {
            log::info!("Found key pair {} ({name})", existing.id);
            return Ok(existing);
        }
        let mut tags = self.owned_tags(name);
        tags.insert(config::VPC_ID_TAG_KEY.to_string(), self.id.clone());
        match self.client.create_key_pair(name, &tags) {
            Ok(key) => {
                self.wait_exists(&key.id)?;
                log::info!("Created key pair {} ({name})", key.id);
                Ok(key)
            }
            Err(e) if e.code() == Some("InvalidKeyPair.Duplicate") => {
                log::debug!("key pair {name} created concurrently, waiting for it to be listed");
                let mut found = None;
                wait_until(&self.poll, &format!("key pair {name} to be listed"), || {
                    found = self.find_key_pair(name)?;
                    Ok(found.is_some())
                })?;
                found.ok_or_else(|| Error::OperationFailed { step, source: e })
            }
            Err(source) => Err(Error::OperationFailed { step, source }),
        }
    }

    /// Delete the named key pairs and wait until they are no longer listed.
    /// Unknown names are skipped.
    pub fn delete_key_pairs(&self, names: &[String]) -> Result<()> {
        for name in names {
            ignore_not_found(self.client.delete_key_pair(name))
                .step(format!("delete key pair {name}"))?;
            wait_until(&self.poll, &format!("key pair {name} to be deleted"), || {
                Ok(self.find_key_pair(name)?.is_none())
            })?;
            log::info!("Deleted key pair {name}");
        }
        Ok(())
    }

    /// Delete the key pairs created for this VPC under its owner tag.
    pub(super) fn delete_owned_key_pairs(&self) -> Result<()> {
        let names: Vec<String> = self
            .client
            .list_key_pairs(&[
                Filter::tag(config::OWNER_TAG_KEY, &self.owner),
                Filter::tag(config::VPC_ID_TAG_KEY, &self.id),
            ])
            .step(format!("list key pairs of {}", self.id))?
            .into_iter()
            .map(|k| k.name)
            .collect();
        self.delete_key_pairs(&names)
    }

    /// Key of this VPC's bastion.
    pub(super) fn bastion_key_name(&self) -> String {
        format!("{}-{}-bastion", config::INSTANCE_KEY_NAME_PREFIX, self.name)
    }

    fn find_key_pair(&self, name: &str) -> crate::cloud::CloudResult<Option<KeyPair>> {
        Ok(self
            .client
            .list_key_pairs(&[Filter::new("key-name", &[name])])?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fast_options;
    use super::*;
    use crate::cloud::{CloudNetwork, MemoryNetwork};
    use crate::models::Ipv4;
    use std::sync::Arc;

    fn new_vpc(net: &Arc<MemoryNetwork>) -> Vpc {
        named_vpc(net, "keys", "10.3.0.0/16")
    }

    fn named_vpc(net: &Arc<MemoryNetwork>, name: &str, cidr: &str) -> Vpc {
        Vpc::create(net.clone(), name, Ipv4::new(cidr).unwrap(), fast_options()).unwrap()
    }

    #[test]
    fn test_key_pair_is_find_or_create() {
        let net = Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(1));
        let vpc = new_vpc(&net);
        let created = vpc.create_key_pair("ocm-ci-test").unwrap();
        assert!(created.material.is_some());
        let found = vpc.create_key_pair("ocm-ci-test").unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.material.is_none());
        assert_eq!(net.calls("create_key_pair"), 1);
    }

    #[test]
    fn test_delete_key_pairs_tolerates_unknown() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = new_vpc(&net);
        vpc.create_key_pair("a").unwrap();
        vpc.delete_key_pairs(&["a".to_string(), "never-created".to_string()])
            .unwrap();
        assert!(net.list_key_pairs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_owned_key_pairs_are_deleted() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let vpc = new_vpc(&net);
        vpc.create_key_pair("mine").unwrap();
        net.create_key_pair("foreign", &Default::default()).unwrap();
        vpc.delete_owned_key_pairs().unwrap();
        let left: Vec<String> = net
            .list_key_pairs(&[])
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(left, vec!["foreign".to_string()]);
    }

    #[test]
    fn test_owned_key_pairs_stay_with_their_vpc() {
        let net = Arc::new(MemoryNetwork::new("us-east-2"));
        let a = named_vpc(&net, "a", "10.3.0.0/16");
        let b = named_vpc(&net, "b", "10.4.0.0/16");
        assert_eq!(a.owner(), b.owner());
        assert_ne!(a.bastion_key_name(), b.bastion_key_name());
        a.create_key_pair(&a.bastion_key_name()).unwrap();
        b.create_key_pair(&b.bastion_key_name()).unwrap();

        a.delete_vpc_chain(true).unwrap();
        let left: Vec<String> = net
            .list_key_pairs(&[])
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        assert_eq!(left, vec![b.bastion_key_name()]);
    }
}
