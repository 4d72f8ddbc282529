//! Stack declaration: cluster role, network, EKS cluster and bucket.
//!
//! Apart from the role, every declaration is handed to the engine verbatim. Order only
//! follows the handles each declaration references.

use log::info;
use serde::Serialize;
use serde_json::json;

use super::context::ProvisioningContext;
use super::provision_role::ensure_role_steps;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionResult;
use crate::types::{ProvisionState, ResourceHandle, Role};

/// Resource kinds understood by the engine
pub mod resource_kind {
    pub const VPC: &str = "aws:ec2:Vpc";
    pub const INTERNET_GATEWAY: &str = "aws:ec2:InternetGateway";
    pub const ROUTE_TABLE: &str = "aws:ec2:RouteTable";
    pub const SUBNET: &str = "aws:ec2:Subnet";
    pub const ROUTE_TABLE_ASSOCIATION: &str = "aws:ec2:RouteTableAssociation";
    pub const EKS_CLUSTER: &str = "aws:eks:Cluster";
    pub const S3_BUCKET: &str = "aws:s3:Bucket";
}

/// Handles produced by a full stack declaration
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StackOutputs {
    pub role: Role,
    pub vpc: ResourceHandle,
    pub internet_gateway: ResourceHandle,
    pub route_table: ResourceHandle,
    /// In declaration order
    pub subnets: Vec<ResourceHandle>,
    pub cluster: ResourceHandle,
    pub bucket: ResourceHandle,
}

/// Declare the whole stack. The first failing declaration aborts the run. The session only
/// reaches `Done` once the last declaration succeeded.
pub async fn declare_stack(
    ctx: &mut ProvisioningContext<'_>,
    config: &ProvisionerConfig,
) -> ProvisionResult<StackOutputs> {
    ctx.ensure_open()?;
    let role = ensure_role_steps(
        ctx,
        &config.role.name,
        &config.role.service_principal,
        &config.role.managed_policy_arns,
    )
    .await?;

    let network = &config.network;
    let vpc = ctx
        .declare(
            resource_kind::VPC,
            &network.vpc_name,
            json!({ "CidrBlock": network.vpc_cidr }),
        )
        .await?;

    let internet_gateway = ctx
        .declare(
            resource_kind::INTERNET_GATEWAY,
            &network.internet_gateway_name,
            json!({ "VpcId": vpc.id }),
        )
        .await?;

    let route_table = ctx
        .declare(
            resource_kind::ROUTE_TABLE,
            &network.route_table_name,
            json!({
                "VpcId": vpc.id,
                "Routes": [{
                    "CidrBlock": network.default_route_cidr,
                    "GatewayId": internet_gateway.id,
                }],
                "Tags": { "Name": network.route_table_name },
            }),
        )
        .await?;

    let mut subnets = Vec::with_capacity(network.subnets.len());
    for subnet in &network.subnets {
        let handle = ctx
            .declare(
                resource_kind::SUBNET,
                &subnet.name,
                json!({
                    "VpcId": vpc.id,
                    "CidrBlock": subnet.cidr_block,
                    "AvailabilityZone": subnet.availability_zone,
                    "Tags": { "Name": subnet.tag_name },
                }),
            )
            .await?;

        ctx.declare(
            resource_kind::ROUTE_TABLE_ASSOCIATION,
            &subnet.association_name,
            json!({
                "SubnetId": handle.id,
                "RouteTableId": route_table.id,
            }),
        )
        .await?;
        subnets.push(handle);
    }

    let subnet_ids: Vec<&str> = subnets.iter().map(|s| s.id.as_str()).collect();
    let cluster = ctx
        .declare(
            resource_kind::EKS_CLUSTER,
            &config.cluster.name,
            json!({
                "Name": config.cluster.name,
                "RoleArn": role.arn(),
                "VpcConfig": { "SubnetIds": subnet_ids },
            }),
        )
        .await?;

    let bucket = ctx
        .declare(resource_kind::S3_BUCKET, &config.bucket.name, json!({}))
        .await?;

    ctx.transition(ProvisionState::Done);
    info!(
        "Stack declared: cluster '{}' with {} subnets",
        cluster.logical_name,
        subnets.len()
    );

    Ok(StackOutputs {
        role,
        vpc,
        internet_gateway,
        route_table,
        subnets,
        cluster,
        bucket,
    })
}
