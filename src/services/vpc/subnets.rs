use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, Schema};
use tf_provider::value::{Value, ValueBool, ValueEmpty, ValueList, ValueMap, ValueString};
use tf_provider::{map, AttributePath, DataSource, Diagnostics, Resource};

use crate::client::{with_query, ServiceClient};
use crate::config::Config;
use crate::provider::ProviderMeta;
use crate::services::tags;
use crate::utils::{
    attribute, check_deleted, force_new, keep_prior, non_empty, or_unknown, region_attribute,
    single_result, string, tags_attribute, tags_map, validate_cidr, validate_ip, ReportDiagnostics,
    WithSchema,
};
use crate::wait::Timeouts;

use super::api::{self, DhcpOption, Subnet, SubnetOpts};
use super::vpcs::networking_client;

const TAGS_RESOURCE_TYPE: &str = "subnets";

/// google-public-dns-a.google.com and the public DNS of China
const PUBLIC_DNS: [&str; 2] = ["8.8.8.8", "114.114.114.114"];

/// Private DNS servers of the regions that have them
fn private_dns(region: &str) -> Option<&'static [&'static str]> {
    let servers: &'static [&'static str] = match region {
        "cn-north-1" => &["100.125.1.250", "100.125.21.250"],
        "cn-north-4" => &["100.125.1.250", "100.125.129.250"],
        "cn-north-9" => &["100.125.1.250", "100.125.107.250"],
        "cn-east-2" => &["100.125.17.29", "100.125.135.29"],
        "cn-east-3" => &["100.125.1.250", "100.125.64.250"],
        "cn-south-1" => &["100.125.1.250", "100.125.136.29"],
        "cn-south-4" => &["100.125.0.167"],
        "cn-southwest-2" => &["100.125.1.250", "100.125.129.250"],
        "ap-southeast-1" => &["100.125.1.250", "100.125.3.250"],
        "ap-southeast-2" => &["100.125.1.250", "100.125.1.251"],
        "ap-southeast-3" => &["100.125.1.250", "100.125.128.250"],
        "af-south-1" => &["100.125.1.250", "100.125.1.14"],
        "tr-west-1" => &["100.125.2.250", "100.125.2.251"],
        "sa-brazil-1" | "na-mexico-1" => &["100.125.1.22", "100.125.1.90"],
        "la-north-2" => &["100.125.1.250", "100.125.1.242"],
        "la-south-2" | "sa-chile-1" => &["100.125.1.250", "100.125.0.250"],
        _ => return None,
    };
    Some(servers)
}

#[derive(Debug, Default, Deserialize)]
struct NameServers {
    #[serde(default)]
    nameservers: Vec<NameServer>,
}

#[derive(Debug, Default, Deserialize)]
struct NameServer {
    #[serde(default)]
    ns_records: Vec<NsRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct NsRecord {
    #[serde(default)]
    address: String,
}

async fn region_name_servers(client: &ServiceClient, region: &str) -> crate::client::Result<Vec<String>> {
    let url = with_query(&client.service_url(&["nameservers"]), [("region", region)]);
    let found: NameServers = client.get(&url).await?;
    Ok(found
        .nameservers
        .into_iter()
        .next()
        .map(|ns| ns.ns_records.into_iter().map(|r| r.address).collect())
        .unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubnetState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub cidr: ValueString<'a>,
    pub gateway_ip: ValueString<'a>,
    pub vpc_id: ValueString<'a>,
    pub availability_zone: ValueString<'a>,
    pub description: ValueString<'a>,
    pub ipv6_enable: ValueBool,
    pub dhcp_enable: ValueBool,
    pub primary_dns: ValueString<'a>,
    pub secondary_dns: ValueString<'a>,
    pub dns_list: ValueList<ValueString<'a>>,
    pub ntp_server_address: ValueString<'a>,
    pub dhcp_lease_time: ValueString<'a>,
    pub dhcp_ipv6_lease_time: ValueString<'a>,
    pub dhcp_domain_name: ValueString<'a>,
    pub subnet_id: ValueString<'a>,
    pub ipv4_subnet_id: ValueString<'a>,
    pub ipv6_subnet_id: ValueString<'a>,
    pub ipv6_cidr: ValueString<'a>,
    pub ipv6_gateway: ValueString<'a>,
    pub tags: ValueMap<'a, ValueString<'a>>,
}

impl<'a> WithSchema for SubnetState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the subnet"),
                    "region" => region_attribute(),
                    "name" => string(Required, "Name of the subnet"),
                    "cidr" => string(Required, "Network segment of the subnet"),
                    "gateway_ip" => string(Required, "Gateway of the subnet"),
                    "vpc_id" => string(Required, "ID of the VPC the subnet belongs to"),
                    "availability_zone" => string(OptionalComputed, "Availability zone of the subnet"),
                    "description" => string(Optional, "Supplementary information about the subnet"),
                    "ipv6_enable" => attribute(AttributeType::Bool, Optional, "Whether IPv6 is enabled, cannot be disabled once enabled"),
                    "dhcp_enable" => attribute(AttributeType::Bool, OptionalComputed, "Whether DHCP is enabled (default: true)"),
                    "primary_dns" => string(OptionalComputed, "IP address of the primary DNS server"),
                    "secondary_dns" => string(OptionalComputed, "IP address of the secondary DNS server"),
                    "dns_list" => attribute(
                        AttributeType::List(Box::new(AttributeType::String)),
                        OptionalComputed,
                        "IP addresses of the DNS servers"
                    ),
                    "ntp_server_address" => string(Optional, "NTP servers for DHCP, separated by commas"),
                    "dhcp_lease_time" => string(OptionalComputed, "DHCP lease time of IPv4 addresses"),
                    "dhcp_ipv6_lease_time" => string(OptionalComputed, "DHCP lease time of IPv6 addresses"),
                    "dhcp_domain_name" => string(Optional, "Domain name configured for DHCP"),
                    "subnet_id" => string(Computed, "ID of the IPv4 subnet (deprecated, use ipv4_subnet_id)"),
                    "ipv4_subnet_id" => string(Computed, "ID of the IPv4 subnet"),
                    "ipv6_subnet_id" => string(Computed, "ID of the IPv6 subnet"),
                    "ipv6_cidr" => string(Computed, "IPv6 network segment of the subnet"),
                    "ipv6_gateway" => string(Computed, "IPv6 gateway of the subnet"),
                    "tags" => tags_attribute()
                },
                description: Description::plain("Subnet of a Virtual Private Cloud"),
                ..Default::default()
            },
        }
    }
}

impl<'a> SubnetState<'a> {
    fn validate(&self, diags: &mut Diagnostics) {
        validate_cidr(diags, "cidr", &self.cidr);
        validate_ip(diags, "gateway_ip", &self.gateway_ip);
        validate_ip(diags, "primary_dns", &self.primary_dns);
        validate_ip(diags, "secondary_dns", &self.secondary_dns);
        for dns in self.dns_list.iter().flatten() {
            validate_ip(diags, "dns_list", dns);
        }
        if self.secondary_dns.is_value() && self.primary_dns.is_null() {
            diags.error(
                "Missing primary_dns",
                "\"secondary_dns\": all of `primary_dns,secondary_dns` must be specified",
                AttributePath::new("secondary_dns"),
            );
        }
    }

    fn dns_list(&self) -> Vec<String> {
        self.dns_list
            .iter()
            .flatten()
            .filter_map(|dns| dns.as_deref_option())
            .map(str::to_string)
            .collect()
    }

    /// Extra DHCP options, unset `ntp` and `domainname` are sent empty on updates to clear them
    fn dhcp_options(&self, update: bool) -> Vec<DhcpOption> {
        let mut options = Vec::new();
        for (name, value, clear) in [
            ("addresstime", &self.dhcp_lease_time, false),
            ("ipv6_addresstime", &self.dhcp_ipv6_lease_time, false),
            ("ntp", &self.ntp_server_address, update),
            ("domainname", &self.dhcp_domain_name, update),
        ] {
            match value.as_deref_option() {
                Some(value) if !value.is_empty() => options.push(DhcpOption {
                    opt_name: name.to_string(),
                    opt_value: Some(value.to_string()),
                }),
                _ if clear => options.push(DhcpOption {
                    opt_name: name.to_string(),
                    opt_value: None,
                }),
                _ => (),
            }
        }
        options
    }

    fn dhcp_changed(&self, prior: &SubnetState) -> bool {
        self.dhcp_lease_time != prior.dhcp_lease_time
            || self.dhcp_ipv6_lease_time != prior.dhcp_ipv6_lease_time
            || self.ntp_server_address != prior.ntp_server_address
            || self.dhcp_domain_name != prior.dhcp_domain_name
    }

    fn set_subnet(&mut self, region: String, subnet: Subnet) {
        self.id = subnet.id.into();
        self.region = region.into();
        self.name = subnet.name.into();
        self.description = non_empty(subnet.description);
        self.cidr = subnet.cidr.into();
        self.gateway_ip = subnet.gateway_ip.into();
        self.vpc_id = subnet.vpc_id.into();
        self.availability_zone = subnet.availability_zone.into();
        if subnet.ipv6_enable || self.ipv6_enable.is_value() {
            self.ipv6_enable = subnet.ipv6_enable.into();
        }
        self.dhcp_enable = subnet.dhcp_enable.into();
        self.primary_dns = non_empty(subnet.primary_dns);
        self.secondary_dns = non_empty(subnet.secondary_dns);
        self.dns_list = Value::Value(subnet.dns_list.into_iter().map(Into::into).collect());
        self.subnet_id = subnet.neutron_subnet_id.clone().into();
        self.ipv4_subnet_id = subnet.neutron_subnet_id.into();
        self.ipv6_subnet_id = non_empty(subnet.neutron_subnet_id_v6);
        self.ipv6_cidr = non_empty(subnet.cidr_v6);
        self.ipv6_gateway = non_empty(subnet.gateway_ip_v6);

        self.ntp_server_address = Value::Null;
        self.dhcp_domain_name = Value::Null;
        for option in subnet.extra_dhcp_opts {
            let value = option.opt_value.map(non_empty).unwrap_or_default();
            match option.opt_name.as_str() {
                "ntp" => self.ntp_server_address = value,
                "addresstime" => self.dhcp_lease_time = value,
                "ipv6_addresstime" => self.dhcp_ipv6_lease_time = value,
                "domainname" => self.dhcp_domain_name = value,
                _ => (),
            }
        }
    }
}

/// DNS servers of a new subnet, in order:
/// the configured list, none when a primary DNS is set, the private DNS of the region,
/// the name servers of the DNS service and finally the public DNS.
async fn subnet_dns_list(config: &Config, state: &SubnetState<'_>, region: &str) -> Option<Vec<String>> {
    let configured = state.dns_list();
    if !configured.is_empty() {
        return Some(configured);
    }
    if state.primary_dns.as_deref_option().is_some() {
        return None;
    }
    if let Some(servers) = private_dns(region) {
        return Some(servers.iter().map(|s| s.to_string()).collect());
    }

    let public = PUBLIC_DNS.iter().map(|s| s.to_string()).collect();
    let client = match config.dns_region_client(region).await {
        Ok(client) => client,
        Err(err) => {
            warn!("cannot generate DNS client, use {PUBLIC_DNS:?} as the DNS list: {err}");
            return Some(public);
        }
    };
    match region_name_servers(&client, region).await {
        Ok(servers) if !servers.is_empty() => Some(servers),
        Ok(_) => {
            warn!("use {PUBLIC_DNS:?} as the DNS list");
            Some(public)
        }
        Err(err) => {
            warn!("failed to fetch the name servers, use {PUBLIC_DNS:?} as the DNS list: {err}");
            Some(public)
        }
    }
}

async fn read_subnet<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: SubnetState<'a>,
) -> Option<Value<SubnetState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let client = networking_client(diags, config, &region).await?;
    let found = check_deleted(api::get_subnet(&client, &state.id).await, "subnet")
        .report(diags, "Error obtain Subnet information")?;
    let Some(subnet) = found else {
        return Some(Value::Null);
    };
    debug!(id = subnet.id, status = subnet.status, "retrieved subnet");
    state.set_subnet(region.clone(), subnet);

    tags::refresh(config, &region, TAGS_RESOURCE_TYPE, &state.id, &mut state.tags).await;
    Some(Value::Value(state))
}

#[derive(Debug, Clone)]
pub struct SubnetResource {
    meta: ProviderMeta,
    timeouts: Timeouts,
}

impl SubnetResource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self {
            meta,
            timeouts: Timeouts::minutes(5, 5, 10),
        }
    }

    async fn config(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        self.meta.get(diags).await
    }
}

#[async_trait]
impl Resource for SubnetResource {
    type State<'a> = Value<SubnetState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(SubnetState::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::State<'a>) -> Option<()> {
        if let Value::Value(config) = &config {
            config.validate(diags);
        }
        diags.errors.is_empty().then_some(())
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        state: Self::State<'a>,
        private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let Value::Value(state) = state else {
            return Some((Value::Null, private_state));
        };
        let config = self.config(diags).await?;
        let state = read_subnet(diags, &config, state).await?;
        Some((state, private_state))
    }

    async fn plan_create<'a>(
        &self,
        diags: &mut Diagnostics,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let mut state = proposed_state.as_option().unwrap_or_default();
        if state.region.is_null() {
            state.region = config.region.clone().into();
        }
        if state.dhcp_enable.is_null() {
            state.dhcp_enable = true.into();
        }
        state.availability_zone = or_unknown(state.availability_zone);
        state.primary_dns = or_unknown(state.primary_dns);
        state.secondary_dns = or_unknown(state.secondary_dns);
        state.dns_list = or_unknown(state.dns_list);
        state.dhcp_lease_time = or_unknown(state.dhcp_lease_time);
        state.dhcp_ipv6_lease_time = or_unknown(state.dhcp_ipv6_lease_time);
        state.id = Value::Unknown;
        state.subnet_id = Value::Unknown;
        state.ipv4_subnet_id = Value::Unknown;
        state.ipv6_subnet_id = Value::Unknown;
        state.ipv6_cidr = Value::Unknown;
        state.ipv6_gateway = Value::Unknown;
        Some((Value::Value(state), Default::default()))
    }

    async fn plan_update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(
        Self::State<'a>,
        Self::PrivateState<'a>,
        Vec<AttributePath>,
    )> {
        let prior = prior_state.as_option().unwrap_or_default();
        let mut state = proposed_state.as_option().unwrap_or_default();
        if state.dhcp_enable.is_null() {
            state.dhcp_enable = true.into();
        }
        keep_prior(&mut state.region, &prior.region);
        keep_prior(&mut state.availability_zone, &prior.availability_zone);

        if prior.ipv6_enable.as_ref_option() == Some(&true) && state.ipv6_enable.as_ref_option() != Some(&true) {
            diags.error(
                "Invalid ipv6_enable",
                "parameter cannot be disabled after IPv6 enable",
                AttributePath::new("ipv6_enable"),
            );
            return None;
        }
        if prior.ipv6_enable != state.ipv6_enable {
            state.ipv6_subnet_id = Value::Unknown;
            state.ipv6_cidr = Value::Unknown;
            state.ipv6_gateway = Value::Unknown;
        }

        let mut replace = Vec::new();
        for (name, prior, proposed) in [
            ("region", &prior.region, &state.region),
            ("cidr", &prior.cidr, &state.cidr),
            ("gateway_ip", &prior.gateway_ip, &state.gateway_ip),
            ("vpc_id", &prior.vpc_id, &state.vpc_id),
            ("availability_zone", &prior.availability_zone, &state.availability_zone),
        ] {
            force_new(&mut replace, name, prior, proposed);
        }
        Some((Value::Value(state), prior_private_state, replace))
    }

    async fn plan_destroy<'a>(
        &self,
        _diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::PrivateState<'a>> {
        Some(prior_private_state)
    }

    async fn create<'a>(
        &self,
        diags: &mut Diagnostics,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let mut state = planned_state.as_option().unwrap_or_default();
        let region = config.get_region(state.region.as_deref_option());
        let client = networking_client(diags, &config, &region).await?;

        let opts = SubnetOpts {
            name: state.name.as_str().to_string(),
            cidr: Some(state.cidr.as_str().to_string()),
            gateway_ip: Some(state.gateway_ip.as_str().to_string()),
            vpc_id: Some(state.vpc_id.as_str().to_string()),
            availability_zone: state.availability_zone.as_deref_option().map(str::to_string),
            description: state.description.as_deref_option().map(str::to_string),
            ipv6_enable: Some(state.ipv6_enable.unwrap_or_default()),
            dhcp_enable: state.dhcp_enable.unwrap_or(true),
            primary_dns: state.primary_dns.as_deref_option().map(str::to_string),
            secondary_dns: state.secondary_dns.as_deref_option().map(str::to_string),
            dns_list: subnet_dns_list(&config, &state, &region).await,
            extra_dhcp_opts: state.dhcp_options(false),
        };
        debug!(?opts, "create VPC subnet options");
        let subnet = api::create_subnet(&client, &opts)
            .await
            .report(diags, "Error creating VPC subnet")?;
        info!(id = subnet.id, "VPC subnet created");
        state.id = subnet.id.clone().into();

        let id = subnet.id;
        self.timeouts
            .on_create(&["UNKNOWN"], &["ACTIVE"])
            .wait_for_state(|| async {
                let subnet = api::get_subnet(&client, &id).await?;
                match subnet.status.as_str() {
                    "ACTIVE" => Ok((Some(subnet), "ACTIVE".to_string())),
                    "DOWN" | "ERROR" => Err(crate::client::Error::config(format!(
                        "subnet status: '{}'",
                        subnet.status
                    ))),
                    _ => Ok((Some(subnet), "UNKNOWN".to_string())),
                }
            })
            .await
            .map_err(|err| format!("Error waiting for Subnet ({id}) to become ACTIVE: {err}"))
            .report(diags, "Error creating VPC subnet")?;

        tags::apply(&config, &region, TAGS_RESOURCE_TYPE, &id, &Default::default(), &tags_map(&state.tags))
            .await
            .report(diags, "Error setting tags of VPC subnet")?;

        let state = read_subnet(diags, &config, state).await?;
        Some((state, planned_private_state))
    }

    async fn update<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let prior = prior_state.as_option().unwrap_or_default();
        let state = planned_state.as_option().unwrap_or_default();
        let region = config.get_region(state.region.as_deref_option());

        let dhcp_changed = state.dhcp_changed(&prior);
        let changed = prior.name != state.name
            || prior.description != state.description
            || prior.dhcp_enable != state.dhcp_enable
            || prior.ipv6_enable != state.ipv6_enable
            || (state.primary_dns.is_value() && prior.primary_dns != state.primary_dns)
            || (state.secondary_dns.is_value() && prior.secondary_dns != state.secondary_dns)
            || (state.dns_list.is_value() && prior.dns_list != state.dns_list)
            || dhcp_changed;

        if changed {
            let client = networking_client(diags, &config, &region).await?;
            let mut opts = SubnetOpts {
                name: state.name.as_str().to_string(),
                dhcp_enable: state.dhcp_enable.unwrap_or(true),
                ..Default::default()
            };
            if prior.ipv6_enable != state.ipv6_enable {
                opts.ipv6_enable = Some(true);
            }
            if prior.description != state.description {
                opts.description = Some(state.description.as_str().to_string());
            }
            if state.primary_dns.is_value() && prior.primary_dns != state.primary_dns {
                opts.primary_dns = Some(state.primary_dns.as_str().to_string());
            }
            if state.secondary_dns.is_value() && prior.secondary_dns != state.secondary_dns {
                opts.secondary_dns = Some(state.secondary_dns.as_str().to_string());
            }
            if state.dns_list.is_value() && prior.dns_list != state.dns_list {
                opts.dns_list = Some(state.dns_list());
            }
            if dhcp_changed {
                opts.extra_dhcp_opts = state.dhcp_options(true);
            }

            debug!(id = %state.id, ?opts, "update VPC subnet options");
            api::update_subnet(&client, &state.vpc_id, &state.id, &opts)
                .await
                .report(diags, "Error updating VPC subnet")?;
        }

        tags::apply(
            &config,
            &region,
            TAGS_RESOURCE_TYPE,
            &state.id,
            &tags_map(&prior.tags),
            &tags_map(&state.tags),
        )
        .await
        .report(diags, "Error updating tags of VPC subnet")?;

        let state = read_subnet(diags, &config, state).await?;
        Some((state, planned_private_state))
    }

    async fn destroy<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        _planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<()> {
        let config = self.config(diags).await?;
        let state = prior_state.as_option().unwrap_or_default();
        let region = config.get_region(state.region.as_deref_option());
        let client = networking_client(diags, &config, &region).await?;

        let id = state.id.as_str();
        let vpc_id = state.vpc_id.as_str();
        self.timeouts
            .on_delete(&["ACTIVE"], &["DELETED"])
            .wait_for_state(|| async {
                match api::get_subnet(&client, id).await {
                    Ok(_) => (),
                    Err(err) if err.is_not_found() => {
                        info!(id, "successfully deleted subnet");
                        return Ok((Some(()), "DELETED".to_string()));
                    }
                    // throttling and transient permission errors while the subnet is being removed
                    Err(err) if err.is_server_error() || err.is_forbidden() => {
                        debug!(id, "got {err} when deleting subnet, try again later");
                        return Ok((Some(()), "ACTIVE".to_string()));
                    }
                    Err(err) => return Err(err),
                }

                match api::delete_subnet(&client, vpc_id, id).await {
                    Ok(()) => Ok((Some(()), "ACTIVE".to_string())),
                    Err(err) if err.is_not_found() || err.is_bad_request() => {
                        info!(id, "successfully deleted subnet");
                        Ok((Some(()), "DELETED".to_string()))
                    }
                    Err(err) if err.is_server_error() || err.is_conflict() => {
                        debug!(id, "got {err} when deleting subnet, try again later");
                        Ok((Some(()), "ACTIVE".to_string()))
                    }
                    Err(err) => Err(err),
                }
            })
            .await
            .report(diags, "Error deleting Subnet")?;
        Some(())
    }

    async fn import<'a>(
        &self,
        _diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let state = SubnetState {
            id: id.into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubnetDataSourceState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub cidr: ValueString<'a>,
    pub vpc_id: ValueString<'a>,
    pub gateway_ip: ValueString<'a>,
    pub availability_zone: ValueString<'a>,
    pub status: ValueString<'a>,
    pub description: ValueString<'a>,
    pub dhcp_enable: ValueBool,
    pub primary_dns: ValueString<'a>,
    pub secondary_dns: ValueString<'a>,
    pub dns_list: ValueList<ValueString<'a>>,
    pub ipv4_subnet_id: ValueString<'a>,
    pub ipv6_enable: ValueBool,
    pub ipv6_subnet_id: ValueString<'a>,
    pub ipv6_cidr: ValueString<'a>,
    pub ipv6_gateway: ValueString<'a>,
}

impl<'a> WithSchema for SubnetDataSourceState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(OptionalComputed, "ID of the subnet"),
                    "region" => region_attribute(),
                    "name" => string(OptionalComputed, "Name of the subnet"),
                    "cidr" => string(OptionalComputed, "Network segment of the subnet"),
                    "vpc_id" => string(OptionalComputed, "ID of the VPC the subnet belongs to"),
                    "gateway_ip" => string(OptionalComputed, "Gateway of the subnet"),
                    "availability_zone" => string(OptionalComputed, "Availability zone of the subnet"),
                    "status" => string(Computed, "Status of the subnet"),
                    "description" => string(Computed, "Supplementary information about the subnet"),
                    "dhcp_enable" => attribute(AttributeType::Bool, Computed, "Whether DHCP is enabled"),
                    "primary_dns" => string(Computed, "IP address of the primary DNS server"),
                    "secondary_dns" => string(Computed, "IP address of the secondary DNS server"),
                    "dns_list" => attribute(AttributeType::List(Box::new(AttributeType::String)), Computed, "IP addresses of the DNS servers"),
                    "ipv4_subnet_id" => string(Computed, "ID of the IPv4 subnet"),
                    "ipv6_enable" => attribute(AttributeType::Bool, Computed, "Whether IPv6 is enabled"),
                    "ipv6_subnet_id" => string(Computed, "ID of the IPv6 subnet"),
                    "ipv6_cidr" => string(Computed, "IPv6 network segment of the subnet"),
                    "ipv6_gateway" => string(Computed, "IPv6 gateway of the subnet")
                },
                description: Description::plain("Look up a subnet of a Virtual Private Cloud"),
                ..Default::default()
            },
        }
    }
}

impl<'a> SubnetDataSourceState<'a> {
    fn matches(&self, subnet: &Subnet) -> bool {
        [
            (&self.id, &subnet.id),
            (&self.name, &subnet.name),
            (&self.cidr, &subnet.cidr),
            (&self.gateway_ip, &subnet.gateway_ip),
            (&self.availability_zone, &subnet.availability_zone),
        ]
        .into_iter()
        .all(|(filter, value)| filter.as_deref_option().map_or(true, |f| f == value))
    }

    fn set_subnet(&mut self, region: String, subnet: Subnet) {
        self.id = subnet.id.into();
        self.region = region.into();
        self.name = subnet.name.into();
        self.cidr = subnet.cidr.into();
        self.vpc_id = subnet.vpc_id.into();
        self.gateway_ip = subnet.gateway_ip.into();
        self.availability_zone = subnet.availability_zone.into();
        self.status = subnet.status.into();
        self.description = subnet.description.into();
        self.dhcp_enable = subnet.dhcp_enable.into();
        self.primary_dns = subnet.primary_dns.into();
        self.secondary_dns = subnet.secondary_dns.into();
        self.dns_list = Value::Value(subnet.dns_list.into_iter().map(Into::into).collect());
        self.ipv4_subnet_id = subnet.neutron_subnet_id.into();
        self.ipv6_enable = subnet.ipv6_enable.into();
        self.ipv6_subnet_id = subnet.neutron_subnet_id_v6.into();
        self.ipv6_cidr = subnet.cidr_v6.into();
        self.ipv6_gateway = subnet.gateway_ip_v6.into();
    }
}

#[derive(Debug, Clone)]
pub struct SubnetDataSource {
    meta: ProviderMeta,
}

impl SubnetDataSource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl DataSource for SubnetDataSource {
    type State<'a> = SubnetDataSourceState<'a>;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(SubnetDataSourceState::schema())
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        mut config: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::State<'a>> {
        let provider = self.meta.get(diags).await?;
        let region = provider.get_region(config.region.as_deref_option());
        let client = networking_client(diags, &provider, &region).await?;

        let subnets = api::list_subnets(&client, config.vpc_id.as_str())
            .await
            .report(diags, "Unable to retrieve subnets")?;
        let found: Vec<Subnet> = subnets.into_iter().filter(|s| config.matches(s)).collect();
        let subnet = single_result(found).report(diags, "Error retrieving subnet")?;

        debug!(id = subnet.id, "retrieved subnet");
        config.set_subnet(region, subnet);
        Some(config)
    }
}
