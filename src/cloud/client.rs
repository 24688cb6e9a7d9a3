//! The cloud network collaborator seam.

use super::error::CloudResult;
use super::types::{
    ElasticIp, Filter, Image, Instance, InstanceRequest, InternetGateway, KeyPair, NatGateway,
    RouteTable, RouteTarget, SecurityGroup, SubnetRecord, Tags, VpcRecord,
};
use crate::models::Ipv4;

/// Blocking create/describe/delete calls against the cloud network API.
///
/// Implementations own no orchestration state. A create call may return
/// before the resource is visible to list/describe calls; callers bridge
/// that with [`crate::cloud::wait_until`].
///
/// Deleting a resource that does not exist returns an error for which
/// [`crate::cloud::CloudError::is_not_found`] is true.
pub trait CloudNetwork: Send + Sync {
    fn region(&self) -> &str;

    fn create_vpc(&self, cidr: &Ipv4, tags: &Tags) -> CloudResult<VpcRecord>;
    fn enable_vpc_dns(&self, vpc_id: &str) -> CloudResult<()>;
    fn list_vpcs(&self, filters: &[Filter]) -> CloudResult<Vec<VpcRecord>>;
    fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()>;

    fn create_internet_gateway(&self, tags: &Tags) -> CloudResult<InternetGateway>;
    fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> CloudResult<()>;
    fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> CloudResult<()>;
    /// Gateways attached to `vpc_id`.
    fn list_internet_gateways(&self, vpc_id: &str) -> CloudResult<Vec<InternetGateway>>;
    fn delete_internet_gateway(&self, igw_id: &str) -> CloudResult<()>;

    fn create_route_table(&self, vpc_id: &str, tags: &Tags) -> CloudResult<RouteTable>;
    fn create_route(
        &self,
        route_table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> CloudResult<()>;
    /// Point the existing route for `destination` at `target`.
    fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> CloudResult<()>;
    /// Returns the association id.
    fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> CloudResult<String>;
    fn disassociate_route_table(&self, association_id: &str) -> CloudResult<()>;
    fn list_route_tables(&self, filters: &[Filter]) -> CloudResult<Vec<RouteTable>>;
    fn delete_route_table(&self, route_table_id: &str) -> CloudResult<()>;

    fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &Ipv4,
        zone: &str,
        tags: &Tags,
    ) -> CloudResult<SubnetRecord>;
    fn list_subnets(&self, filters: &[Filter]) -> CloudResult<Vec<SubnetRecord>>;
    fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()>;

    fn allocate_address(&self, tags: &Tags) -> CloudResult<ElasticIp>;
    /// Returns the association id.
    fn associate_address(&self, allocation_id: &str, instance_id: &str) -> CloudResult<String>;
    fn list_addresses(&self, filters: &[Filter]) -> CloudResult<Vec<ElasticIp>>;
    fn release_address(&self, allocation_id: &str) -> CloudResult<()>;

    fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGateway>;
    /// All NAT gateways of `vpc_id`, including deleted ones still reported by the API.
    fn list_nat_gateways(&self, vpc_id: &str) -> CloudResult<Vec<NatGateway>>;
    fn delete_nat_gateway(&self, nat_gateway_id: &str) -> CloudResult<()>;

    /// Returns the group id.
    fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &Tags,
    ) -> CloudResult<String>;
    fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        protocol: &str,
        port: u16,
        cidr: &str,
    ) -> CloudResult<()>;
    fn list_security_groups(&self, filters: &[Filter]) -> CloudResult<Vec<SecurityGroup>>;
    fn delete_security_group(&self, group_id: &str) -> CloudResult<()>;

    fn create_key_pair(&self, name: &str, tags: &Tags) -> CloudResult<KeyPair>;
    fn list_key_pairs(&self, filters: &[Filter]) -> CloudResult<Vec<KeyPair>>;
    fn delete_key_pair(&self, name: &str) -> CloudResult<()>;

    fn run_instance(&self, request: &InstanceRequest) -> CloudResult<Instance>;
    fn list_instances(&self, filters: &[Filter]) -> CloudResult<Vec<Instance>>;
    fn terminate_instances(&self, instance_ids: &[String]) -> CloudResult<()>;

    fn describe_images(&self, owners: &[&str], filters: &[Filter]) -> CloudResult<Vec<Image>>;

    fn tag_resource(&self, resource_id: &str, tags: &Tags) -> CloudResult<()>;
    fn untag_resource(&self, resource_id: &str, keys: &[String]) -> CloudResult<()>;

    /// Whether the resource is visible, dispatching on the id prefix
    /// (`vpc-`, `subnet-`, `igw-`, `rtb-`, `nat-`, `eipalloc-`, `sg-`, `key-`, `i-`).
    fn resource_exists(&self, resource_id: &str) -> CloudResult<bool>;
}
