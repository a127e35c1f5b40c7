//! AWS provider backed by the official AWS SDK.
//!
//! Each [`ResourceRequest`] variant maps onto the EC2 calls that realize
//! it. Composite flows mirror what an operator would do by hand:
//!
//! - a VPC is created, polled until `available`, has its DNS attributes
//!   set, then is tagged;
//! - an internet gateway is created, tagged and attached to its VPC;
//! - a NAT gateway allocates an Elastic IP, is polled until `available`
//!   and installs the outbound default route into the private route
//!   table; teardown releases the Elastic IP it finds on the gateway;
//! - public subnets get `MapPublicIpOnLaunch`.
//!
//! Failures are classified from SDK error codes; transport-level
//! timeouts and dispatch failures are `Transient`.
//!
//! ## Authentication
//!
//! Credentials come from the standard AWS credential chain: environment
//! variables, the shared credentials file, then instance metadata.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{
    AttributeBooleanValue, DomainType, Filter, IpPermission, IpRange, NatGatewayState, Tag,
    VpcState,
};
use aws_sdk_ec2::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{NetworkProvider, ProviderResult, ProvisionError, ResourceRequest, RouteTarget};
use crate::retry::RetryPolicy;
use crate::state::ResourceKind;
use crate::topology::SecurityRule;

/// Destination for outbound default routes.
const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

/// [`NetworkProvider`] implementation over `aws-sdk-ec2`.
pub struct AwsProvider {
    client: Client,
    /// Polling policy for remote-side state transitions (VPC available,
    /// NAT gateway available/deleted).
    wait_policy: RetryPolicy,
}

impl AwsProvider {
    /// Connect to a region using the default credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            wait_policy: RetryPolicy::constant(60, Duration::from_secs(5)),
        }
    }

    /// Override the remote-state polling policy.
    pub fn with_wait_policy(mut self, policy: RetryPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    fn name_tag(name: &str) -> Tag {
        Tag::builder().key("Name").value(name).build()
    }

    async fn tag_resource(&self, remote_id: &str, tags: Vec<Tag>) -> ProviderResult<()> {
        let mut call = self.client.create_tags().resources(remote_id);
        for tag in tags {
            call = call.tags(tag);
        }
        call.send()
            .await
            .map_err(|e| classify_sdk("CreateTags", &e))?;
        Ok(())
    }

    async fn wait_for_vpc_available(&self, vpc_id: &str) -> ProviderResult<()> {
        let client = self.client.clone();
        let vpc_id = vpc_id.to_string();
        self.wait_policy
            .execute_until(
                || {
                    let client = client.clone();
                    let vpc_id = vpc_id.clone();
                    async move {
                        client
                            .describe_vpcs()
                            .vpc_ids(vpc_id)
                            .send()
                            .await
                            .map(|out| {
                                out.vpcs()
                                    .first()
                                    .and_then(|v| v.state().cloned())
                                    .map(|s| s == VpcState::Available)
                                    .unwrap_or(false)
                            })
                            .map_err(|e| classify_sdk("DescribeVpcs", &e))
                    }
                },
                |available| *available,
            )
            .await
            .map_err(|_| {
                ProvisionError::Transient(format!("timed out waiting for VPC {} to become available", vpc_id))
            })?;
        Ok(())
    }

    async fn wait_for_nat_state(
        &self,
        nat_id: &str,
        desired: NatGatewayState,
    ) -> ProviderResult<()> {
        let client = self.client.clone();
        let nat_id_owned = nat_id.to_string();
        let desired_state = desired.clone();
        self.wait_policy
            .execute_until(
                || {
                    let client = client.clone();
                    let nat_id = nat_id_owned.clone();
                    async move {
                        client
                            .describe_nat_gateways()
                            .nat_gateway_ids(nat_id)
                            .send()
                            .await
                            .map(|out| {
                                out.nat_gateways()
                                    .first()
                                    .and_then(|n| n.state().cloned())
                            })
                            .map_err(|e| classify_sdk("DescribeNatGateways", &e))
                    }
                },
                |state| state.as_ref() == Some(&desired_state),
            )
            .await
            .map_err(|_| {
                ProvisionError::Transient(format!(
                    "timed out waiting for NAT gateway {} to become {:?}",
                    nat_id, desired
                ))
            })?;
        Ok(())
    }

    async fn install_route(
        &self,
        route_table_id: &str,
        target: &RouteTarget,
    ) -> ProviderResult<()> {
        let call = self
            .client
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(DEFAULT_ROUTE_CIDR);
        let call = match target {
            RouteTarget::InternetGateway(id) => call.gateway_id(id),
            RouteTarget::NatGateway(id) => call.nat_gateway_id(id),
        };
        call.send()
            .await
            .map_err(|e| classify_sdk("CreateRoute", &e))?;
        Ok(())
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rule: &SecurityRule,
    ) -> ProviderResult<()> {
        let permission = IpPermission::builder()
            .ip_protocol(&rule.protocol)
            .from_port(rule.from_port as i32)
            .to_port(rule.to_port as i32)
            .ip_ranges(IpRange::builder().cidr_ip(&rule.cidr).build())
            .build();

        let result = self
            .client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // A retried create may re-authorize a rule that already
            // landed; the remote duplicate error is not a failure.
            Err(e) if error_code(&e).as_deref() == Some("InvalidPermission.Duplicate") => {
                warn!(group_id, "ingress rule already present, skipping");
                Ok(())
            }
            Err(e) => Err(classify_sdk("AuthorizeSecurityGroupIngress", &e)),
        }
    }

    async fn find_by_name_tag(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> ProviderResult<Option<String>> {
        let filter = Filter::builder()
            .name("tag:Name")
            .values(logical_name)
            .build();

        let id = match kind {
            ResourceKind::Vpc => self
                .client
                .describe_vpcs()
                .filters(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeVpcs", &e))?
                .vpcs()
                .first()
                .and_then(|v| v.vpc_id().map(str::to_string)),
            ResourceKind::Subnet => self
                .client
                .describe_subnets()
                .filters(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeSubnets", &e))?
                .subnets()
                .first()
                .and_then(|s| s.subnet_id().map(str::to_string)),
            ResourceKind::InternetGateway => self
                .client
                .describe_internet_gateways()
                .filters(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeInternetGateways", &e))?
                .internet_gateways()
                .first()
                .and_then(|g| g.internet_gateway_id().map(str::to_string)),
            ResourceKind::NatGateway => self
                .client
                .describe_nat_gateways()
                .filter(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeNatGateways", &e))?
                .nat_gateways()
                .iter()
                .find(|n| {
                    !matches!(
                        n.state(),
                        Some(NatGatewayState::Deleted | NatGatewayState::Deleting)
                    )
                })
                .and_then(|n| n.nat_gateway_id().map(str::to_string)),
            ResourceKind::RouteTable => self
                .client
                .describe_route_tables()
                .filters(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeRouteTables", &e))?
                .route_tables()
                .first()
                .and_then(|t| t.route_table_id().map(str::to_string)),
            ResourceKind::SecurityGroup => self
                .client
                .describe_security_groups()
                .filters(
                    Filter::builder()
                        .name("group-name")
                        .values(logical_name)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeSecurityGroups", &e))?
                .security_groups()
                .first()
                .and_then(|g| g.group_id().map(str::to_string)),
            ResourceKind::NetworkAcl => self
                .client
                .describe_network_acls()
                .filters(filter)
                .send()
                .await
                .map_err(|e| classify_sdk("DescribeNetworkAcls", &e))?
                .network_acls()
                .first()
                .and_then(|a| a.network_acl_id().map(str::to_string)),
            // Associations are not taggable; a retried association that
            // already landed surfaces as a conflict instead.
            ResourceKind::RouteTableAssociation => None,
        };

        Ok(id)
    }
}

#[async_trait]
impl NetworkProvider for AwsProvider {
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<String> {
        match request {
            ResourceRequest::Vpc {
                name,
                cidr,
                enable_dns_hostnames,
                enable_dns_support,
                tags,
            } => {
                let out = self
                    .client
                    .create_vpc()
                    .cidr_block(cidr)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateVpc", &e))?;
                let vpc_id = out
                    .vpc()
                    .and_then(|v| v.vpc_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest("CreateVpc returned no vpc id".into())
                    })?
                    .to_string();

                self.wait_for_vpc_available(&vpc_id).await?;

                if *enable_dns_hostnames {
                    self.client
                        .modify_vpc_attribute()
                        .vpc_id(&vpc_id)
                        .enable_dns_hostnames(
                            AttributeBooleanValue::builder().value(true).build(),
                        )
                        .send()
                        .await
                        .map_err(|e| classify_sdk("ModifyVpcAttribute", &e))?;
                }
                if *enable_dns_support {
                    self.client
                        .modify_vpc_attribute()
                        .vpc_id(&vpc_id)
                        .enable_dns_support(AttributeBooleanValue::builder().value(true).build())
                        .send()
                        .await
                        .map_err(|e| classify_sdk("ModifyVpcAttribute", &e))?;
                }

                let mut all_tags = vec![Self::name_tag(name)];
                for (key, value) in tags {
                    all_tags.push(Tag::builder().key(key).value(value).build());
                }
                self.tag_resource(&vpc_id, all_tags).await?;

                info!(vpc_id, "VPC created");
                Ok(vpc_id)
            }

            ResourceRequest::Subnet {
                name,
                vpc_id,
                cidr,
                availability_zone,
                map_public_ip,
                tier,
            } => {
                let out = self
                    .client
                    .create_subnet()
                    .vpc_id(vpc_id)
                    .cidr_block(cidr)
                    .availability_zone(availability_zone)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateSubnet", &e))?;
                let subnet_id = out
                    .subnet()
                    .and_then(|s| s.subnet_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest("CreateSubnet returned no subnet id".into())
                    })?
                    .to_string();

                if *map_public_ip {
                    self.client
                        .modify_subnet_attribute()
                        .subnet_id(&subnet_id)
                        .map_public_ip_on_launch(
                            AttributeBooleanValue::builder().value(true).build(),
                        )
                        .send()
                        .await
                        .map_err(|e| classify_sdk("ModifySubnetAttribute", &e))?;
                }

                self.tag_resource(
                    &subnet_id,
                    vec![
                        Self::name_tag(name),
                        Tag::builder().key("Type").value(tier).build(),
                    ],
                )
                .await?;

                info!(subnet_id, %name, "subnet created");
                Ok(subnet_id)
            }

            ResourceRequest::InternetGateway { name, vpc_id } => {
                let out = self
                    .client
                    .create_internet_gateway()
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateInternetGateway", &e))?;
                let igw_id = out
                    .internet_gateway()
                    .and_then(|g| g.internet_gateway_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest(
                            "CreateInternetGateway returned no gateway id".into(),
                        )
                    })?
                    .to_string();

                self.tag_resource(&igw_id, vec![Self::name_tag(name)]).await?;

                self.client
                    .attach_internet_gateway()
                    .internet_gateway_id(&igw_id)
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("AttachInternetGateway", &e))?;

                info!(igw_id, "internet gateway created and attached");
                Ok(igw_id)
            }

            ResourceRequest::NatGateway {
                name,
                subnet_id,
                route_table_id,
            } => {
                let eip = self
                    .client
                    .allocate_address()
                    .domain(DomainType::Vpc)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("AllocateAddress", &e))?;
                let allocation_id = eip.allocation_id().ok_or_else(|| {
                    ProvisionError::InvalidRequest("AllocateAddress returned no allocation id".into())
                })?;

                let out = self
                    .client
                    .create_nat_gateway()
                    .subnet_id(subnet_id)
                    .allocation_id(allocation_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateNatGateway", &e))?;
                let nat_id = out
                    .nat_gateway()
                    .and_then(|n| n.nat_gateway_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest(
                            "CreateNatGateway returned no gateway id".into(),
                        )
                    })?
                    .to_string();

                self.tag_resource(&nat_id, vec![Self::name_tag(name)]).await?;

                debug!(nat_id, "waiting for NAT gateway to become available");
                self.wait_for_nat_state(&nat_id, NatGatewayState::Available)
                    .await?;

                if let Some(route_table_id) = route_table_id {
                    self.install_route(route_table_id, &RouteTarget::NatGateway(nat_id.clone()))
                        .await?;
                }

                info!(nat_id, "NAT gateway available");
                Ok(nat_id)
            }

            ResourceRequest::RouteTable {
                name,
                vpc_id,
                default_route,
            } => {
                let out = self
                    .client
                    .create_route_table()
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateRouteTable", &e))?;
                let table_id = out
                    .route_table()
                    .and_then(|t| t.route_table_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest(
                            "CreateRouteTable returned no table id".into(),
                        )
                    })?
                    .to_string();

                self.tag_resource(&table_id, vec![Self::name_tag(name)]).await?;

                if let Some(target) = default_route {
                    self.install_route(&table_id, target).await?;
                }

                info!(table_id, %name, "route table created");
                Ok(table_id)
            }

            ResourceRequest::RouteTableAssociation {
                name,
                subnet_id,
                route_table_id,
            } => {
                let out = self
                    .client
                    .associate_route_table()
                    .subnet_id(subnet_id)
                    .route_table_id(route_table_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("AssociateRouteTable", &e))?;
                let association_id = out
                    .association_id()
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest(
                            "AssociateRouteTable returned no association id".into(),
                        )
                    })?
                    .to_string();

                debug!(association_id, %name, "route table associated");
                Ok(association_id)
            }

            ResourceRequest::SecurityGroup {
                name,
                vpc_id,
                description,
                ingress,
            } => {
                let out = self
                    .client
                    .create_security_group()
                    .group_name(name)
                    .description(description)
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateSecurityGroup", &e))?;
                let group_id = out
                    .group_id()
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest(
                            "CreateSecurityGroup returned no group id".into(),
                        )
                    })?
                    .to_string();

                self.tag_resource(&group_id, vec![Self::name_tag(name)]).await?;

                for rule in ingress {
                    self.authorize_ingress(&group_id, rule).await?;
                }

                info!(group_id, %name, rules = ingress.len(), "security group created");
                Ok(group_id)
            }

            ResourceRequest::NetworkAcl { name, vpc_id } => {
                let out = self
                    .client
                    .create_network_acl()
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("CreateNetworkAcl", &e))?;
                let acl_id = out
                    .network_acl()
                    .and_then(|a| a.network_acl_id())
                    .ok_or_else(|| {
                        ProvisionError::InvalidRequest("CreateNetworkAcl returned no acl id".into())
                    })?
                    .to_string();

                self.tag_resource(&acl_id, vec![Self::name_tag(name)]).await?;

                info!(acl_id, %name, "network ACL created");
                Ok(acl_id)
            }
        }
    }

    async fn describe(
        &self,
        kind: ResourceKind,
        logical_name: &str,
    ) -> ProviderResult<Option<String>> {
        self.find_by_name_tag(kind, logical_name).await
    }

    async fn delete(&self, kind: ResourceKind, remote_id: &str) -> ProviderResult<()> {
        match kind {
            ResourceKind::Vpc => {
                self.client
                    .delete_vpc()
                    .vpc_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteVpc", &e))?;
            }
            ResourceKind::Subnet => {
                self.client
                    .delete_subnet()
                    .subnet_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteSubnet", &e))?;
            }
            ResourceKind::InternetGateway => {
                // The gateway must be detached from its VPC first.
                let out = self
                    .client
                    .describe_internet_gateways()
                    .internet_gateway_ids(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DescribeInternetGateways", &e))?;
                let attached_vpcs: Vec<String> = out
                    .internet_gateways()
                    .first()
                    .map(|g| {
                        g.attachments()
                            .iter()
                            .filter_map(|a| a.vpc_id().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();

                for vpc_id in attached_vpcs {
                    self.client
                        .detach_internet_gateway()
                        .internet_gateway_id(remote_id)
                        .vpc_id(vpc_id)
                        .send()
                        .await
                        .map_err(|e| classify_sdk("DetachInternetGateway", &e))?;
                }

                self.client
                    .delete_internet_gateway()
                    .internet_gateway_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteInternetGateway", &e))?;
            }
            ResourceKind::NatGateway => {
                // Find the Elastic IP before the gateway record goes away.
                let out = self
                    .client
                    .describe_nat_gateways()
                    .nat_gateway_ids(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DescribeNatGateways", &e))?;
                let allocation_id = out
                    .nat_gateways()
                    .first()
                    .and_then(|n| n.nat_gateway_addresses().first())
                    .and_then(|a| a.allocation_id().map(str::to_string));

                self.client
                    .delete_nat_gateway()
                    .nat_gateway_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteNatGateway", &e))?;

                self.wait_for_nat_state(remote_id, NatGatewayState::Deleted)
                    .await?;

                if let Some(allocation_id) = allocation_id {
                    if let Err(e) = self
                        .client
                        .release_address()
                        .allocation_id(&allocation_id)
                        .send()
                        .await
                    {
                        warn!(allocation_id, error = %DisplayWrapper(&e), "could not release Elastic IP");
                    }
                }
            }
            ResourceKind::RouteTable => {
                self.client
                    .delete_route_table()
                    .route_table_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteRouteTable", &e))?;
            }
            ResourceKind::RouteTableAssociation => {
                self.client
                    .disassociate_route_table()
                    .association_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DisassociateRouteTable", &e))?;
            }
            ResourceKind::SecurityGroup => {
                self.client
                    .delete_security_group()
                    .group_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteSecurityGroup", &e))?;
            }
            ResourceKind::NetworkAcl => {
                self.client
                    .delete_network_acl()
                    .network_acl_id(remote_id)
                    .send()
                    .await
                    .map_err(|e| classify_sdk("DeleteNetworkAcl", &e))?;
            }
        }

        debug!(%kind, remote_id, "resource deleted");
        Ok(())
    }
}

/// Extract the service error code from an SDK error, when present.
fn error_code<E, R>(err: &SdkError<E, R>) -> Option<String>
where
    E: ProvideErrorMetadata,
{
    err.code().map(str::to_string)
}

/// Classify an SDK error by its service error code.
fn classify_sdk<E, R>(operation: &str, err: &SdkError<E, R>) -> ProvisionError
where
    E: ProvideErrorMetadata,
{
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return ProvisionError::Transient(format!("{}: transport failure", operation));
    }

    let code = err.code().unwrap_or("Unknown");
    let message = err.message().unwrap_or("no message");
    let detail = format!("{}: {} ({})", operation, message, code);

    if code.contains("NotFound") {
        ProvisionError::NotFound(detail)
    } else if matches!(
        code,
        "RequestLimitExceeded"
            | "Throttling"
            | "ThrottlingException"
            | "ServiceUnavailable"
            | "InternalError"
            | "Unavailable"
    ) {
        ProvisionError::Transient(detail)
    } else if matches!(code, "UnauthorizedOperation" | "AuthFailure" | "OptInRequired")
        || code.starts_with("AccessDenied")
    {
        ProvisionError::Permission(detail)
    } else if code == "DependencyViolation"
        || code.contains("Duplicate")
        || code.contains("Conflict")
        || code.contains("AlreadyAssociated")
        || code.contains("InUse")
        || matches!(code, "InvalidVpc.Range" | "InvalidSubnet.Range")
    {
        ProvisionError::Conflict(detail)
    } else {
        ProvisionError::classify(detail)
    }
}

/// Local display adapter for SDK errors in log fields.
struct DisplayWrapper<'a, E>(&'a E);

impl<E: std::fmt::Debug> std::fmt::Display for DisplayWrapper<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
