//! `aws ec2` CLI backed implementation of [`CloudNetwork`].
//!
//! Every call shells out through [`cli::run`] with `--output json` and
//! decodes the response into the wire structs below.

use super::cli::{self, quote};
use super::client::CloudNetwork;
use super::error::{CloudError, CloudResult};
use super::types::{
    ElasticIp, Filter, Image, Instance, InstanceRequest, InternetGateway, KeyPair, NatGateway,
    NatGatewayState, Route, RouteTable, RouteTableAssociation, RouteTarget, SecurityGroup,
    SubnetRecord, Tags, VpcRecord,
};
use crate::config::Settings;
use crate::models::Ipv4;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Cloud client driving the `aws` command line.
#[derive(Debug, Clone)]
pub struct AwsCliNetwork {
    settings: Settings,
}

impl AwsCliNetwork {
    pub fn new(settings: Settings) -> AwsCliNetwork {
        log::info!(
            "aws cli client region={} profile={:?} credentials={}",
            settings.region,
            settings.profile,
            settings.credentials_file.display()
        );
        AwsCliNetwork { settings }
    }

    fn envs(&self) -> Vec<(&'static str, String)> {
        vec![(
            "AWS_SHARED_CREDENTIALS_FILE",
            self.settings.credentials_file.display().to_string(),
        )]
    }

    fn command(&self, args: &str) -> String {
        let mut cmd = format!(
            "aws ec2 {args} --region {} --output json",
            quote(&self.settings.region)
        );
        if let Some(profile) = &self.settings.profile {
            cmd.push_str(&format!(" --profile {}", quote(profile)));
        }
        cmd
    }

    fn ec2(&self, args: &str) -> CloudResult<String> {
        cli::run(&self.command(args), &self.envs())
    }

    fn ec2_json<T: DeserializeOwned>(&self, context: &str, args: &str) -> CloudResult<T> {
        let output = self.ec2(args)?;
        parse(context, &output)
    }

    /// Run a describe call by id, mapping "not found" to `false`.
    fn probe(&self, args: &str, visible: impl Fn(&str) -> CloudResult<bool>) -> CloudResult<bool> {
        match self.ec2(args) {
            Ok(output) => visible(&output),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Decode CLI JSON output, reporting the failing path.
pub fn parse<T: DeserializeOwned>(context: &str, output: &str) -> CloudResult<T> {
    let mut deserializer = serde_json::Deserializer::from_str(output);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        log::error!("OUTPUT START:\n\n{}\n\nOUTPUT END\n", output);
        CloudError::Parse {
            context: context.to_string(),
            message: format!("path={} error={}", e.path(), e),
        }
    })
}

/// `--tag-specifications` argument, or nothing for empty tags.
fn route_target_arg(target: &RouteTarget) -> CloudResult<String> {
    match target {
        RouteTarget::InternetGateway(id) => Ok(format!("--gateway-id {}", quote(id))),
        RouteTarget::NatGateway(id) => Ok(format!("--nat-gateway-id {}", quote(id))),
        RouteTarget::Local => Err(CloudError::api(
            "InvalidParameterValue",
            "local routes are managed by the VPC",
        )),
    }
}

pub fn tag_specifications(resource_type: &str, tags: &Tags) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let value = serde_json::json!([{
        "ResourceType": resource_type,
        "Tags": tags_json(tags),
    }]);
    format!(" --tag-specifications {}", quote(&value.to_string()))
}

fn tags_json(tags: &Tags) -> serde_json::Value {
    tags.iter()
        .map(|(k, v)| serde_json::json!({ "Key": k, "Value": v }))
        .collect()
}

/// `--filters` argument, or nothing for no filters.
pub fn filters_arg(flag: &str, filters: &[Filter]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let value: serde_json::Value = filters
        .iter()
        .map(|f| serde_json::json!({ "Name": f.name, "Values": f.values }))
        .collect();
    format!(" {flag} {}", quote(&value.to_string()))
}

fn parse_cidr(context: &str, cidr: &str) -> CloudResult<Ipv4> {
    Ipv4::new(cidr).map_err(|e| CloudError::Parse {
        context: context.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireTag {
    key: String,
    #[serde(default)]
    value: String,
}

fn tag_map(tags: Vec<WireTag>) -> Tags {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireVpc {
    vpc_id: String,
    cidr_block: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl WireVpc {
    fn into_record(self) -> CloudResult<VpcRecord> {
        Ok(VpcRecord {
            cidr: parse_cidr(&self.vpc_id, &self.cidr_block)?,
            id: self.vpc_id,
            state: self.state,
            tags: tag_map(self.tags),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateVpcOutput {
    vpc: WireVpc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVpcsOutput {
    vpcs: Vec<WireVpc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSubnet {
    subnet_id: String,
    vpc_id: String,
    cidr_block: String,
    availability_zone: String,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl WireSubnet {
    fn into_record(self) -> CloudResult<SubnetRecord> {
        Ok(SubnetRecord {
            cidr: parse_cidr(&self.subnet_id, &self.cidr_block)?,
            id: self.subnet_id,
            vpc_id: self.vpc_id,
            zone: self.availability_zone,
            tags: tag_map(self.tags),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSubnetOutput {
    subnet: WireSubnet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubnetsOutput {
    subnets: Vec<WireSubnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAttachment {
    vpc_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInternetGateway {
    internet_gateway_id: String,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireInternetGateway> for InternetGateway {
    fn from(w: WireInternetGateway) -> Self {
        InternetGateway {
            id: w.internet_gateway_id,
            attachments: w.attachments.into_iter().map(|a| a.vpc_id).collect(),
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateInternetGatewayOutput {
    internet_gateway: WireInternetGateway,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInternetGatewaysOutput {
    internet_gateways: Vec<WireInternetGateway>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRoute {
    #[serde(default)]
    destination_cidr_block: Option<String>,
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    nat_gateway_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAssociation {
    route_table_association_id: String,
    #[serde(default)]
    subnet_id: Option<String>,
    #[serde(default)]
    main: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRouteTable {
    route_table_id: String,
    vpc_id: String,
    #[serde(default)]
    routes: Vec<WireRoute>,
    #[serde(default)]
    associations: Vec<WireAssociation>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireRouteTable> for RouteTable {
    fn from(w: WireRouteTable) -> Self {
        let routes = w
            .routes
            .into_iter()
            .filter_map(|r| {
                let destination = r.destination_cidr_block?;
                let target = match (r.nat_gateway_id, r.gateway_id) {
                    (Some(nat), _) => RouteTarget::NatGateway(nat),
                    (None, Some(gw)) if gw != "local" => RouteTarget::InternetGateway(gw),
                    _ => RouteTarget::Local,
                };
                Some(Route {
                    destination,
                    target,
                })
            })
            .collect();
        RouteTable {
            id: w.route_table_id,
            vpc_id: w.vpc_id,
            routes,
            associations: w
                .associations
                .into_iter()
                .map(|a| RouteTableAssociation {
                    id: a.route_table_association_id,
                    subnet_id: a.subnet_id,
                    main: a.main,
                })
                .collect(),
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRouteTableOutput {
    route_table: WireRouteTable,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeRouteTablesOutput {
    route_tables: Vec<WireRouteTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssociationOutput {
    association_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAddress {
    allocation_id: String,
    #[serde(default)]
    public_ip: String,
    #[serde(default)]
    association_id: Option<String>,
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireAddress> for ElasticIp {
    fn from(w: WireAddress) -> Self {
        ElasticIp {
            allocation_id: w.allocation_id,
            public_ip: w.public_ip,
            association_id: w.association_id,
            instance_id: w.instance_id,
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAddressesOutput {
    addresses: Vec<WireAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireNatAddress {
    #[serde(default)]
    allocation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireNatGateway {
    nat_gateway_id: String,
    vpc_id: String,
    subnet_id: String,
    state: String,
    #[serde(default)]
    nat_gateway_addresses: Vec<WireNatAddress>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireNatGateway> for NatGateway {
    fn from(w: WireNatGateway) -> Self {
        NatGateway {
            id: w.nat_gateway_id,
            vpc_id: w.vpc_id,
            subnet_id: w.subnet_id,
            state: NatGatewayState::parse(&w.state),
            allocation_ids: w
                .nat_gateway_addresses
                .into_iter()
                .filter_map(|a| a.allocation_id)
                .collect(),
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateNatGatewayOutput {
    nat_gateway: WireNatGateway,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeNatGatewaysOutput {
    nat_gateways: Vec<WireNatGateway>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecurityGroupOutput {
    group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSecurityGroup {
    group_id: String,
    group_name: String,
    #[serde(default)]
    vpc_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<WireTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecurityGroupsOutput {
    security_groups: Vec<WireSecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireKeyPair {
    #[serde(default)]
    key_pair_id: String,
    key_name: String,
    #[serde(default)]
    key_material: Option<String>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireKeyPair> for KeyPair {
    fn from(w: WireKeyPair) -> Self {
        KeyPair {
            id: w.key_pair_id,
            name: w.key_name,
            material: w.key_material,
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeKeyPairsOutput {
    key_pairs: Vec<WireKeyPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInstanceState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInstance {
    instance_id: String,
    #[serde(default)]
    subnet_id: String,
    #[serde(default)]
    vpc_id: String,
    #[serde(default)]
    image_id: String,
    state: WireInstanceState,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

impl From<WireInstance> for Instance {
    fn from(w: WireInstance) -> Self {
        Instance {
            id: w.instance_id,
            subnet_id: w.subnet_id,
            vpc_id: w.vpc_id,
            image_id: w.image_id,
            state: w.state.name,
            public_ip: w.public_ip_address,
            tags: tag_map(w.tags),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    instances: Vec<WireInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReservation {
    instances: Vec<WireInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    reservations: Vec<WireReservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireImage {
    image_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    creation_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeImagesOutput {
    images: Vec<WireImage>,
}

fn not_empty<T: DeserializeOwned>(
    context: &'static str,
    count: impl Fn(T) -> usize,
) -> impl Fn(&str) -> CloudResult<bool> {
    move |output| Ok(count(parse::<T>(context, output)?) > 0)
}

impl CloudNetwork for AwsCliNetwork {
    fn region(&self) -> &str {
        &self.settings.region
    }

    fn create_vpc(&self, cidr: &Ipv4, tags: &Tags) -> CloudResult<VpcRecord> {
        let out: CreateVpcOutput = self.ec2_json(
            "create-vpc",
            &format!(
                "create-vpc --cidr-block {}{}",
                quote(&cidr.to_string()),
                tag_specifications("vpc", tags)
            ),
        )?;
        out.vpc.into_record()
    }

    fn enable_vpc_dns(&self, vpc_id: &str) -> CloudResult<()> {
        for attribute in ["--enable-dns-support", "--enable-dns-hostnames"] {
            self.ec2(&format!(
                "modify-vpc-attribute --vpc-id {} {attribute} {}",
                quote(vpc_id),
                quote(r#"{"Value":true}"#)
            ))?;
        }
        Ok(())
    }

    fn list_vpcs(&self, filters: &[Filter]) -> CloudResult<Vec<VpcRecord>> {
        let out: DescribeVpcsOutput = self.ec2_json(
            "describe-vpcs",
            &format!("describe-vpcs{}", filters_arg("--filters", filters)),
        )?;
        out.vpcs.into_iter().map(WireVpc::into_record).collect()
    }

    fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()> {
        self.ec2(&format!("delete-vpc --vpc-id {}", quote(vpc_id)))
            .map(|_| ())
    }

    fn create_internet_gateway(&self, tags: &Tags) -> CloudResult<InternetGateway> {
        let out: CreateInternetGatewayOutput = self.ec2_json(
            "create-internet-gateway",
            &format!(
                "create-internet-gateway{}",
                tag_specifications("internet-gateway", tags)
            ),
        )?;
        Ok(out.internet_gateway.into())
    }

    fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "attach-internet-gateway --internet-gateway-id {} --vpc-id {}",
            quote(igw_id),
            quote(vpc_id)
        ))
        .map(|_| ())
    }

    fn detach_internet_gateway(&self, igw_id: &str, vpc_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "detach-internet-gateway --internet-gateway-id {} --vpc-id {}",
            quote(igw_id),
            quote(vpc_id)
        ))
        .map(|_| ())
    }

    fn list_internet_gateways(&self, vpc_id: &str) -> CloudResult<Vec<InternetGateway>> {
        let filters = [Filter::new("attachment.vpc-id", &[vpc_id])];
        let out: DescribeInternetGatewaysOutput = self.ec2_json(
            "describe-internet-gateways",
            &format!(
                "describe-internet-gateways{}",
                filters_arg("--filters", &filters)
            ),
        )?;
        Ok(out.internet_gateways.into_iter().map(Into::into).collect())
    }

    fn delete_internet_gateway(&self, igw_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "delete-internet-gateway --internet-gateway-id {}",
            quote(igw_id)
        ))
        .map(|_| ())
    }

    fn create_route_table(&self, vpc_id: &str, tags: &Tags) -> CloudResult<RouteTable> {
        let out: CreateRouteTableOutput = self.ec2_json(
            "create-route-table",
            &format!(
                "create-route-table --vpc-id {}{}",
                quote(vpc_id),
                tag_specifications("route-table", tags)
            ),
        )?;
        Ok(out.route_table.into())
    }

    fn create_route(
        &self,
        route_table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> CloudResult<()> {
        self.ec2(&format!(
            "create-route --route-table-id {} --destination-cidr-block {} {}",
            quote(route_table_id),
            quote(destination),
            route_target_arg(target)?
        ))
        .map(|_| ())
    }

    fn replace_route(
        &self,
        route_table_id: &str,
        destination: &str,
        target: &RouteTarget,
    ) -> CloudResult<()> {
        self.ec2(&format!(
            "replace-route --route-table-id {} --destination-cidr-block {} {}",
            quote(route_table_id),
            quote(destination),
            route_target_arg(target)?
        ))
        .map(|_| ())
    }

    fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> CloudResult<String> {
        let out: AssociationOutput = self.ec2_json(
            "associate-route-table",
            &format!(
                "associate-route-table --route-table-id {} --subnet-id {}",
                quote(route_table_id),
                quote(subnet_id)
            ),
        )?;
        Ok(out.association_id)
    }

    fn disassociate_route_table(&self, association_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "disassociate-route-table --association-id {}",
            quote(association_id)
        ))
        .map(|_| ())
    }

    fn list_route_tables(&self, filters: &[Filter]) -> CloudResult<Vec<RouteTable>> {
        let out: DescribeRouteTablesOutput = self.ec2_json(
            "describe-route-tables",
            &format!("describe-route-tables{}", filters_arg("--filters", filters)),
        )?;
        Ok(out.route_tables.into_iter().map(Into::into).collect())
    }

    fn delete_route_table(&self, route_table_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "delete-route-table --route-table-id {}",
            quote(route_table_id)
        ))
        .map(|_| ())
    }

    fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &Ipv4,
        zone: &str,
        tags: &Tags,
    ) -> CloudResult<SubnetRecord> {
        let out: CreateSubnetOutput = self.ec2_json(
            "create-subnet",
            &format!(
                "create-subnet --vpc-id {} --cidr-block {} --availability-zone {}{}",
                quote(vpc_id),
                quote(&cidr.to_string()),
                quote(zone),
                tag_specifications("subnet", tags)
            ),
        )?;
        out.subnet.into_record()
    }

    fn list_subnets(&self, filters: &[Filter]) -> CloudResult<Vec<SubnetRecord>> {
        let out: DescribeSubnetsOutput = self.ec2_json(
            "describe-subnets",
            &format!("describe-subnets{}", filters_arg("--filters", filters)),
        )?;
        out.subnets
            .into_iter()
            .map(WireSubnet::into_record)
            .collect()
    }

    fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()> {
        self.ec2(&format!("delete-subnet --subnet-id {}", quote(subnet_id)))
            .map(|_| ())
    }

    fn allocate_address(&self, tags: &Tags) -> CloudResult<ElasticIp> {
        let out: WireAddress = self.ec2_json(
            "allocate-address",
            &format!(
                "allocate-address --domain vpc{}",
                tag_specifications("elastic-ip", tags)
            ),
        )?;
        let mut address: ElasticIp = out.into();
        address.tags = tags.clone();
        Ok(address)
    }

    fn associate_address(&self, allocation_id: &str, instance_id: &str) -> CloudResult<String> {
        let out: AssociationOutput = self.ec2_json(
            "associate-address",
            &format!(
                "associate-address --allocation-id {} --instance-id {}",
                quote(allocation_id),
                quote(instance_id)
            ),
        )?;
        Ok(out.association_id)
    }

    fn list_addresses(&self, filters: &[Filter]) -> CloudResult<Vec<ElasticIp>> {
        let out: DescribeAddressesOutput = self.ec2_json(
            "describe-addresses",
            &format!("describe-addresses{}", filters_arg("--filters", filters)),
        )?;
        Ok(out.addresses.into_iter().map(Into::into).collect())
    }

    fn release_address(&self, allocation_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "release-address --allocation-id {}",
            quote(allocation_id)
        ))
        .map(|_| ())
    }

    fn create_nat_gateway(
        &self,
        subnet_id: &str,
        allocation_id: &str,
        tags: &Tags,
    ) -> CloudResult<NatGateway> {
        let out: CreateNatGatewayOutput = self.ec2_json(
            "create-nat-gateway",
            &format!(
                "create-nat-gateway --subnet-id {} --allocation-id {}{}",
                quote(subnet_id),
                quote(allocation_id),
                tag_specifications("natgateway", tags)
            ),
        )?;
        Ok(out.nat_gateway.into())
    }

    fn list_nat_gateways(&self, vpc_id: &str) -> CloudResult<Vec<NatGateway>> {
        // describe-nat-gateways takes --filter, not --filters
        let out: DescribeNatGatewaysOutput = self.ec2_json(
            "describe-nat-gateways",
            &format!(
                "describe-nat-gateways{}",
                filters_arg("--filter", &[Filter::vpc(vpc_id)])
            ),
        )?;
        Ok(out.nat_gateways.into_iter().map(Into::into).collect())
    }

    fn delete_nat_gateway(&self, nat_gateway_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "delete-nat-gateway --nat-gateway-id {}",
            quote(nat_gateway_id)
        ))
        .map(|_| ())
    }

    fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &Tags,
    ) -> CloudResult<String> {
        let out: CreateSecurityGroupOutput = self.ec2_json(
            "create-security-group",
            &format!(
                "create-security-group --vpc-id {} --group-name {} --description {}{}",
                quote(vpc_id),
                quote(name),
                quote(description),
                tag_specifications("security-group", tags)
            ),
        )?;
        Ok(out.group_id)
    }

    fn authorize_security_group_ingress(
        &self,
        group_id: &str,
        protocol: &str,
        port: u16,
        cidr: &str,
    ) -> CloudResult<()> {
        self.ec2(&format!(
            "authorize-security-group-ingress --group-id {} --protocol {} --port {port} --cidr {}",
            quote(group_id),
            quote(protocol),
            quote(cidr)
        ))
        .map(|_| ())
    }

    fn list_security_groups(&self, filters: &[Filter]) -> CloudResult<Vec<SecurityGroup>> {
        let out: DescribeSecurityGroupsOutput = self.ec2_json(
            "describe-security-groups",
            &format!(
                "describe-security-groups{}",
                filters_arg("--filters", filters)
            ),
        )?;
        Ok(out
            .security_groups
            .into_iter()
            .map(|g| SecurityGroup {
                id: g.group_id,
                name: g.group_name,
                vpc_id: g.vpc_id,
                description: g.description,
                tags: tag_map(g.tags),
            })
            .collect())
    }

    fn delete_security_group(&self, group_id: &str) -> CloudResult<()> {
        self.ec2(&format!(
            "delete-security-group --group-id {}",
            quote(group_id)
        ))
        .map(|_| ())
    }

    fn create_key_pair(&self, name: &str, tags: &Tags) -> CloudResult<KeyPair> {
        let out: WireKeyPair = self.ec2_json(
            "create-key-pair",
            &format!(
                "create-key-pair --key-name {}{}",
                quote(name),
                tag_specifications("key-pair", tags)
            ),
        )?;
        let mut key: KeyPair = out.into();
        key.tags = tags.clone();
        Ok(key)
    }

    fn list_key_pairs(&self, filters: &[Filter]) -> CloudResult<Vec<KeyPair>> {
        let out: DescribeKeyPairsOutput = self.ec2_json(
            "describe-key-pairs",
            &format!("describe-key-pairs{}", filters_arg("--filters", filters)),
        )?;
        Ok(out.key_pairs.into_iter().map(Into::into).collect())
    }

    fn delete_key_pair(&self, name: &str) -> CloudResult<()> {
        self.ec2(&format!("delete-key-pair --key-name {}", quote(name)))
            .map(|_| ())
    }

    fn run_instance(&self, request: &InstanceRequest) -> CloudResult<Instance> {
        let mut args = format!(
            "run-instances --subnet-id {} --image-id {} --count 1 --instance-type {} --key-name {}",
            quote(&request.subnet_id),
            quote(&request.image_id),
            quote(&request.instance_type),
            quote(&request.key_name)
        );
        if !request.security_group_ids.is_empty() {
            args.push_str(" --security-group-ids");
            for id in &request.security_group_ids {
                args.push_str(&format!(" {}", quote(id)));
            }
        }
        if let Some(user_data) = &request.user_data {
            args.push_str(&format!(" --user-data {}", quote(user_data)));
        }
        if request.associate_public_ip {
            args.push_str(" --associate-public-ip-address");
        }
        args.push_str(&tag_specifications("instance", &request.tags));

        let out: RunInstancesOutput = self.ec2_json("run-instances", &args)?;
        out.instances
            .into_iter()
            .next()
            .map(Into::into)
            .ok_or_else(|| CloudError::Parse {
                context: "run-instances".to_string(),
                message: "no instance returned".to_string(),
            })
    }

    fn list_instances(&self, filters: &[Filter]) -> CloudResult<Vec<Instance>> {
        let out: DescribeInstancesOutput = self.ec2_json(
            "describe-instances",
            &format!("describe-instances{}", filters_arg("--filters", filters)),
        )?;
        Ok(out
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(Into::into)
            .collect())
    }

    fn terminate_instances(&self, instance_ids: &[String]) -> CloudResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = instance_ids.iter().map(|id| quote(id)).collect();
        self.ec2(&format!("terminate-instances --instance-ids {}", ids.join(" ")))
            .map(|_| ())
    }

    fn describe_images(&self, owners: &[&str], filters: &[Filter]) -> CloudResult<Vec<Image>> {
        let mut args = "describe-images".to_string();
        if !owners.is_empty() {
            let owners: Vec<String> = owners.iter().map(|o| quote(o)).collect();
            args.push_str(&format!(" --owners {}", owners.join(" ")));
        }
        args.push_str(&filters_arg("--filters", filters));
        let out: DescribeImagesOutput = self.ec2_json("describe-images", &args)?;
        Ok(out
            .images
            .into_iter()
            .map(|i| Image {
                id: i.image_id,
                name: i.name,
                creation_date: i.creation_date,
            })
            .collect())
    }

    fn tag_resource(&self, resource_id: &str, tags: &Tags) -> CloudResult<()> {
        self.ec2(&format!(
            "create-tags --resources {} --tags {}",
            quote(resource_id),
            quote(&tags_json(tags).to_string())
        ))
        .map(|_| ())
    }

    fn untag_resource(&self, resource_id: &str, keys: &[String]) -> CloudResult<()> {
        let keys: serde_json::Value = keys
            .iter()
            .map(|k| serde_json::json!({ "Key": k }))
            .collect();
        self.ec2(&format!(
            "delete-tags --resources {} --tags {}",
            quote(resource_id),
            quote(&keys.to_string())
        ))
        .map(|_| ())
    }

    fn resource_exists(&self, resource_id: &str) -> CloudResult<bool> {
        let id = quote(resource_id);
        if resource_id.starts_with("vpc-") {
            self.probe(
                &format!("describe-vpcs --vpc-ids {id}"),
                not_empty("describe-vpcs", |o: DescribeVpcsOutput| o.vpcs.len()),
            )
        } else if resource_id.starts_with("subnet-") {
            self.probe(
                &format!("describe-subnets --subnet-ids {id}"),
                not_empty("describe-subnets", |o: DescribeSubnetsOutput| {
                    o.subnets.len()
                }),
            )
        } else if resource_id.starts_with("igw-") {
            self.probe(
                &format!("describe-internet-gateways --internet-gateway-ids {id}"),
                not_empty(
                    "describe-internet-gateways",
                    |o: DescribeInternetGatewaysOutput| o.internet_gateways.len(),
                ),
            )
        } else if resource_id.starts_with("rtb-") {
            self.probe(
                &format!("describe-route-tables --route-table-ids {id}"),
                not_empty("describe-route-tables", |o: DescribeRouteTablesOutput| {
                    o.route_tables.len()
                }),
            )
        } else if resource_id.starts_with("nat-") {
            self.probe(
                &format!("describe-nat-gateways --nat-gateway-ids {id}"),
                not_empty("describe-nat-gateways", |o: DescribeNatGatewaysOutput| {
                    o.nat_gateways
                        .into_iter()
                        .filter(|n| NatGatewayState::parse(&n.state).is_live())
                        .count()
                }),
            )
        } else if resource_id.starts_with("eipalloc-") {
            self.probe(
                &format!("describe-addresses --allocation-ids {id}"),
                not_empty("describe-addresses", |o: DescribeAddressesOutput| {
                    o.addresses.len()
                }),
            )
        } else if resource_id.starts_with("sg-") {
            self.probe(
                &format!("describe-security-groups --group-ids {id}"),
                not_empty(
                    "describe-security-groups",
                    |o: DescribeSecurityGroupsOutput| o.security_groups.len(),
                ),
            )
        } else if resource_id.starts_with("key-") {
            self.probe(
                &format!("describe-key-pairs --key-pair-ids {id}"),
                not_empty("describe-key-pairs", |o: DescribeKeyPairsOutput| {
                    o.key_pairs.len()
                }),
            )
        } else if resource_id.starts_with("i-") {
            self.probe(
                &format!("describe-instances --instance-ids {id}"),
                not_empty("describe-instances", |o: DescribeInstancesOutput| {
                    o.reservations
                        .into_iter()
                        .flat_map(|r| r.instances)
                        .filter(|i| i.state.name != "terminated")
                        .count()
                }),
            )
        } else {
            Err(CloudError::api(
                "InvalidParameterValue",
                format!("unknown resource id prefix: {resource_id}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::tags;

    fn client() -> AwsCliNetwork {
        AwsCliNetwork::new(Settings::from_lookup(|_| None).with_region("eu-west-1"))
    }

    #[test]
    fn test_command_carries_region_and_profile() {
        let mut settings = Settings::from_lookup(|_| None);
        settings.profile = Some("ci".to_string());
        let aws = AwsCliNetwork::new(settings);
        assert_eq!(
            aws.command("describe-vpcs"),
            "aws ec2 describe-vpcs --region 'us-east-2' --output json --profile 'ci'"
        );
        assert_eq!(
            client().command("describe-vpcs"),
            "aws ec2 describe-vpcs --region 'eu-west-1' --output json"
        );
    }

    #[test]
    fn test_route_target_arg() {
        assert_eq!(
            route_target_arg(&RouteTarget::NatGateway("nat-9".to_string())).unwrap(),
            "--nat-gateway-id 'nat-9'"
        );
        assert_eq!(
            route_target_arg(&RouteTarget::InternetGateway("igw-1".to_string())).unwrap(),
            "--gateway-id 'igw-1'"
        );
        assert!(route_target_arg(&RouteTarget::Local).is_err());
    }

    #[test]
    fn test_tag_specifications_json() {
        let arg = tag_specifications("subnet", &tags(&[("Name", "ci-public-a")]));
        assert_eq!(
            arg,
            r#" --tag-specifications '[{"ResourceType":"subnet","Tags":[{"Key":"Name","Value":"ci-public-a"}]}]'"#
        );
        assert_eq!(tag_specifications("subnet", &Tags::new()), "");
    }

    #[test]
    fn test_filters_arg() {
        let arg = filters_arg("--filters", &[Filter::vpc("vpc-1"), Filter::zone("us-east-2a")]);
        assert_eq!(
            arg,
            r#" --filters '[{"Name":"vpc-id","Values":["vpc-1"]},{"Name":"availability-zone","Values":["us-east-2a"]}]'"#
        );
    }

    #[test]
    fn test_parse_describe_subnets() {
        let json = r#"{
            "Subnets": [{
                "AvailabilityZone": "us-east-2a",
                "CidrBlock": "10.0.0.0/24",
                "State": "available",
                "SubnetId": "subnet-0abc",
                "VpcId": "vpc-0123",
                "MapPublicIpOnLaunch": false,
                "Tags": [{"Key": "Name", "Value": "ci-public-us-east-2a"}, {"Key": "PublicSubnet", "Value": "true"}]
            }]
        }"#;
        let out: DescribeSubnetsOutput = parse("describe-subnets", json).unwrap();
        let subnets: Vec<SubnetRecord> = out
            .subnets
            .into_iter()
            .map(|s| s.into_record().unwrap())
            .collect();
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].id, "subnet-0abc");
        assert_eq!(subnets[0].cidr, Ipv4::new("10.0.0.0/24").unwrap());
        assert_eq!(subnets[0].tags["PublicSubnet"], "true");
    }

    #[test]
    fn test_parse_route_table_targets() {
        let json = r#"{
            "RouteTables": [{
                "RouteTableId": "rtb-1",
                "VpcId": "vpc-1",
                "Routes": [
                    {"DestinationCidrBlock": "10.0.0.0/16", "GatewayId": "local", "State": "active"},
                    {"DestinationCidrBlock": "0.0.0.0/0", "NatGatewayId": "nat-9", "State": "active"},
                    {"DestinationPrefixListId": "pl-1", "GatewayId": "vpce-1"}
                ],
                "Associations": [{"RouteTableAssociationId": "rtbassoc-1", "SubnetId": "subnet-1", "Main": false}]
            }]
        }"#;
        let out: DescribeRouteTablesOutput = parse("describe-route-tables", json).unwrap();
        let table: RouteTable = out.route_tables.into_iter().next().unwrap().into();
        assert_eq!(table.routes.len(), 2);
        assert_eq!(table.routes[0].target, RouteTarget::Local);
        assert_eq!(
            table.default_route("0.0.0.0/0"),
            Some(&RouteTarget::NatGateway("nat-9".to_string()))
        );
        assert!(!table.is_main());
        assert_eq!(table.associations[0].subnet_id.as_deref(), Some("subnet-1"));
    }

    #[test]
    fn test_parse_nat_gateway_and_instances() {
        let json = r#"{"NatGateway": {"NatGatewayId": "nat-1", "SubnetId": "subnet-1", "VpcId": "vpc-1",
            "State": "pending", "NatGatewayAddresses": [{"AllocationId": "eipalloc-1"}]}}"#;
        let out: CreateNatGatewayOutput = parse("create-nat-gateway", json).unwrap();
        let nat: NatGateway = out.nat_gateway.into();
        assert_eq!(nat.state, NatGatewayState::Pending);
        assert_eq!(nat.allocation_ids, vec!["eipalloc-1".to_string()]);

        let json = r#"{"Reservations": [{"Instances": [{"InstanceId": "i-1", "State": {"Code": 16, "Name": "running"},
            "SubnetId": "subnet-1", "VpcId": "vpc-1", "ImageId": "ami-1", "PublicIpAddress": "3.3.3.3"}]}]}"#;
        let out: DescribeInstancesOutput = parse("describe-instances", json).unwrap();
        let instance: Instance = out
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(Into::into)
            .next()
            .unwrap();
        assert_eq!(instance.state, "running");
        assert_eq!(instance.public_ip.as_deref(), Some("3.3.3.3"));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let err = parse::<DescribeVpcsOutput>("describe-vpcs", r#"{"Vpcs": [{"VpcId": 7}]}"#)
            .unwrap_err();
        match err {
            CloudError::Parse { context, message } => {
                assert_eq!(context, "describe-vpcs");
                assert!(message.contains("Vpcs[0].VpcId"), "{message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
