//! VPC v1 requests: VPCs, subnets and security groups

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{with_query, Result, ServiceClient};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub status: String,
    pub description: String,
    pub enterprise_project_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VpcOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VpcBody {
    vpc: Vpc,
}

#[derive(Debug, Default, Deserialize)]
struct VpcList {
    #[serde(default)]
    vpcs: Vec<Vpc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpOption {
    pub opt_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cidr: String,
    #[serde(rename = "dnsList")]
    pub dns_list: Vec<String>,
    pub gateway_ip: String,
    pub ipv6_enable: bool,
    pub dhcp_enable: bool,
    pub primary_dns: String,
    pub secondary_dns: String,
    pub availability_zone: String,
    pub vpc_id: String,
    pub status: String,
    pub neutron_subnet_id: String,
    pub neutron_subnet_id_v6: String,
    pub cidr_v6: String,
    pub gateway_ip_v6: String,
    pub extra_dhcp_opts: Vec<DhcpOption>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubnetOpts {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_enable: Option<bool>,
    pub dhcp_enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_dns: Option<String>,
    #[serde(rename = "dnsList", skip_serializing_if = "Option::is_none")]
    pub dns_list: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_dhcp_opts: Vec<DhcpOption>,
}

#[derive(Debug, Deserialize)]
struct SubnetBody {
    subnet: Subnet,
}

#[derive(Debug, Default, Deserialize)]
struct SubnetList {
    #[serde(default)]
    subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityGroupRule {
    pub id: String,
    pub direction: String,
    pub ethertype: String,
    pub protocol: Option<String>,
    pub description: String,
    pub remote_ip_prefix: Option<String>,
    pub remote_group_id: Option<String>,
    pub remote_address_group_id: Option<String>,
    pub port_range_min: Option<i64>,
    pub port_range_max: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enterprise_project_id: String,
    pub security_group_rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Deserialize)]
struct SecurityGroupBody {
    security_group: SecurityGroup,
}

#[derive(Debug, Default, Deserialize)]
struct SecurityGroupList {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

/// `{base}{project_id}/{parts}`, the v1 VPC endpoint has no project in its base
fn project_url(client: &ServiceClient, parts: &[&str]) -> String {
    let mut all = vec![client.project_id()];
    all.extend_from_slice(parts);
    client.service_url(&all)
}

pub async fn create_vpc(client: &ServiceClient, opts: &VpcOpts) -> Result<Vpc> {
    let body: VpcBody = client
        .post(&project_url(client, &["vpcs"]), &json!({ "vpc": opts }))
        .await?;
    Ok(body.vpc)
}

pub async fn get_vpc(client: &ServiceClient, id: &str) -> Result<Vpc> {
    let body: VpcBody = client.get(&project_url(client, &["vpcs", id])).await?;
    Ok(body.vpc)
}

pub async fn update_vpc(client: &ServiceClient, id: &str, opts: &VpcOpts) -> Result<Vpc> {
    let body: VpcBody = client
        .put(&project_url(client, &["vpcs", id]), &json!({ "vpc": opts }))
        .await?;
    Ok(body.vpc)
}

pub async fn delete_vpc(client: &ServiceClient, id: &str) -> Result<()> {
    client.delete(&project_url(client, &["vpcs", id])).await
}

pub async fn list_vpcs(client: &ServiceClient, id: &str, enterprise_project_id: &str) -> Result<Vec<Vpc>> {
    let url = with_query(
        &project_url(client, &["vpcs"]),
        [("id", id), ("enterprise_project_id", enterprise_project_id)],
    );
    let list: VpcList = client.get(&url).await?;
    Ok(list.vpcs)
}

pub async fn create_subnet(client: &ServiceClient, opts: &SubnetOpts) -> Result<Subnet> {
    let body: SubnetBody = client
        .post(&project_url(client, &["subnets"]), &json!({ "subnet": opts }))
        .await?;
    Ok(body.subnet)
}

pub async fn get_subnet(client: &ServiceClient, id: &str) -> Result<Subnet> {
    let body: SubnetBody = client.get(&project_url(client, &["subnets", id])).await?;
    Ok(body.subnet)
}

pub async fn update_subnet(client: &ServiceClient, vpc_id: &str, id: &str, opts: &SubnetOpts) -> Result<()> {
    let url = project_url(client, &["vpcs", vpc_id, "subnets", id]);
    client
        .put::<_, serde_json::Value>(&url, &json!({ "subnet": opts }))
        .await?;
    Ok(())
}

pub async fn delete_subnet(client: &ServiceClient, vpc_id: &str, id: &str) -> Result<()> {
    client
        .delete(&project_url(client, &["vpcs", vpc_id, "subnets", id]))
        .await
}

pub async fn list_subnets(client: &ServiceClient, vpc_id: &str) -> Result<Vec<Subnet>> {
    let url = with_query(&project_url(client, &["subnets"]), [("vpc_id", vpc_id)]);
    let list: SubnetList = client.get(&url).await?;
    Ok(list.subnets)
}

/// Security groups live below the project scoped `security_group` client
pub async fn create_security_group(
    client: &ServiceClient,
    name: &str,
    enterprise_project_id: &str,
) -> Result<SecurityGroup> {
    let mut group = json!({ "name": name });
    if !enterprise_project_id.is_empty() {
        group["enterprise_project_id"] = enterprise_project_id.into();
    }
    let body: SecurityGroupBody = client
        .post(
            &client.service_url(&["security-groups"]),
            &json!({ "security_group": group }),
        )
        .await?;
    Ok(body.security_group)
}

pub async fn get_security_group(client: &ServiceClient, id: &str) -> Result<SecurityGroup> {
    let body: SecurityGroupBody = client
        .get(&client.service_url(&["security-groups", id]))
        .await?;
    Ok(body.security_group)
}

pub async fn delete_security_group(client: &ServiceClient, id: &str) -> Result<()> {
    client
        .delete(&client.service_url(&["security-groups", id]))
        .await
}

pub async fn delete_security_group_rule(client: &ServiceClient, id: &str) -> Result<()> {
    client
        .delete(&client.service_url(&["security-group-rules", id]))
        .await
}

pub async fn list_security_groups(client: &ServiceClient, enterprise_project_id: &str) -> Result<Vec<SecurityGroup>> {
    let url = with_query(
        &client.service_url(&["security-groups"]),
        [("enterprise_project_id", enterprise_project_id)],
    );
    let list: SecurityGroupList = client.get(&url).await?;
    Ok(list.security_groups)
}

/// The v1 API cannot change descriptions, the neutron compatible v2.0 API is used instead
pub async fn update_security_group_v2(
    client: &ServiceClient,
    id: &str,
    name: &str,
    description: &str,
) -> Result<()> {
    let url = client.service_url(&["security-groups", id]);
    client
        .put::<_, serde_json::Value>(
            &url,
            &json!({ "security_group": { "name": name, "description": description } }),
        )
        .await?;
    Ok(())
}
