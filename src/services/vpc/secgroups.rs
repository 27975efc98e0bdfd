use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, Schema};
use tf_provider::value::{Value, ValueBool, ValueEmpty, ValueList, ValueMap, ValueNumber, ValueString};
use tf_provider::{map, AttributePath, DataSource, Diagnostics, Resource};

use crate::client::ServiceClient;
use crate::config::Config;
use crate::provider::ProviderMeta;
use crate::services::tags;
use crate::utils::{
    attribute, check_deleted, enterprise_project_attribute, force_new, keep_prior, non_empty,
    region_attribute, single_result, string, tags_attribute, tags_map, ReportDiagnostics, WithSchema,
};
use crate::wait::Timeouts;

use super::api::{self, SecurityGroup, SecurityGroupRule};

const TAGS_RESOURCE_TYPE: &str = "security-groups";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuleState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub direction: ValueString<'a>,
    pub ethertype: ValueString<'a>,
    pub protocol: ValueString<'a>,
    pub ports: ValueString<'a>,
    pub remote_ip_prefix: ValueString<'a>,
    pub remote_group_id: ValueString<'a>,
    pub remote_address_group_id: ValueString<'a>,
    pub description: ValueString<'a>,
    pub port_range_min: ValueNumber,
    pub port_range_max: ValueNumber,
}

impl<'a> From<SecurityGroupRule> for RuleState<'a> {
    fn from(rule: SecurityGroupRule) -> Self {
        let ports = match (rule.port_range_min, rule.port_range_max) {
            (Some(min), Some(max)) if min != max => Value::Value(format!("{min}-{max}").into()),
            (Some(port), _) | (None, Some(port)) => Value::Value(port.to_string().into()),
            (None, None) => Value::Null,
        };
        Self {
            id: rule.id.into(),
            direction: rule.direction.into(),
            ethertype: rule.ethertype.into(),
            protocol: non_empty(rule.protocol.unwrap_or_default()),
            ports,
            remote_ip_prefix: non_empty(rule.remote_ip_prefix.unwrap_or_default()),
            remote_group_id: non_empty(rule.remote_group_id.unwrap_or_default()),
            remote_address_group_id: non_empty(rule.remote_address_group_id.unwrap_or_default()),
            description: non_empty(rule.description),
            port_range_min: rule.port_range_min.into(),
            port_range_max: rule.port_range_max.into(),
        }
    }
}

fn rules_attribute() -> tf_provider::schema::Attribute {
    use AttributeConstraint::Computed;
    attribute(
        AttributeType::AttributeList(map! {
            "id" => string(Computed, "ID of the rule"),
            "direction" => string(Computed, "Direction of the rule, ingress or egress"),
            "ethertype" => string(Computed, "IP version, IPv4 or IPv6"),
            "protocol" => string(Computed, "Protocol of the rule"),
            "ports" => string(Computed, "Port range of the rule"),
            "remote_ip_prefix" => string(Computed, "Remote CIDR of the rule"),
            "remote_group_id" => string(Computed, "Remote security group of the rule"),
            "remote_address_group_id" => string(Computed, "Remote address group of the rule"),
            "description" => string(Computed, "Description of the rule"),
            "port_range_min" => attribute(AttributeType::Number, Computed, "Lower bound of the port range (deprecated, use ports)"),
            "port_range_max" => attribute(AttributeType::Number, Computed, "Upper bound of the port range (deprecated, use ports)")
        }),
        Computed,
        "Rules of the security group",
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecGroupState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub description: ValueString<'a>,
    pub enterprise_project_id: ValueString<'a>,
    pub delete_default_rules: ValueBool,
    pub rules: ValueList<Value<RuleState<'a>>>,
    pub tags: ValueMap<'a, ValueString<'a>>,
}

impl<'a> WithSchema for SecGroupState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the security group"),
                    "region" => region_attribute(),
                    "name" => string(Required, "Name of the security group"),
                    "description" => string(Optional, "Description of the security group"),
                    "enterprise_project_id" => enterprise_project_attribute(),
                    "delete_default_rules" => attribute(AttributeType::Bool, Optional, "Whether to delete the rules created with the group"),
                    "rules" => rules_attribute(),
                    "tags" => tags_attribute()
                },
                description: Description::plain("Networking security group"),
                ..Default::default()
            },
        }
    }
}

impl<'a> SecGroupState<'a> {
    fn set_group(&mut self, region: String, group: SecurityGroup) {
        self.id = group.id.into();
        self.region = region.into();
        self.name = group.name.into();
        self.description = non_empty(group.description);
        self.enterprise_project_id = non_empty(group.enterprise_project_id);
        self.rules = Value::Value(
            group
                .security_group_rules
                .into_iter()
                .map(|rule| Value::Value(rule.into()))
                .collect(),
        );
    }
}

async fn security_group_client(
    diags: &mut Diagnostics,
    config: &Config,
    region: &str,
) -> Option<ServiceClient> {
    config
        .security_group_client(region)
        .await
        .report(diags, "Error creating networking v1 client")
}

async fn update_description(
    diags: &mut Diagnostics,
    config: &Config,
    region: &str,
    id: &str,
    name: &str,
    description: &str,
) -> Option<()> {
    let client = config
        .networking_v2_client(region)
        .await
        .report(diags, "Error creating networking v2 client")?;
    api::update_security_group_v2(&client, id, name, description)
        .await
        .report(diags, "Error updating description of security group")
}

async fn read_group<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: SecGroupState<'a>,
) -> Option<Value<SecGroupState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let client = security_group_client(diags, config, &region).await?;
    let found = check_deleted(api::get_security_group(&client, &state.id).await, "Security group")
        .report(diags, "Error retrieving security group")?;
    let Some(group) = found else {
        return Some(Value::Null);
    };
    debug!(id = group.id, "retrieved security group");
    state.set_group(region.clone(), group);

    tags::refresh(config, &region, TAGS_RESOURCE_TYPE, &state.id, &mut state.tags).await;
    Some(Value::Value(state))
}

#[derive(Debug, Clone)]
pub struct SecGroupResource {
    meta: ProviderMeta,
    timeouts: Timeouts,
}

impl SecGroupResource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self {
            meta,
            timeouts: Timeouts::minutes(10, 10, 10),
        }
    }

    async fn config(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        self.meta.get(diags).await
    }
}

#[async_trait]
impl Resource for SecGroupResource {
    type State<'a> = Value<SecGroupState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(SecGroupState::schema())
    }

    async fn validate<'a>(&self, _diags: &mut Diagnostics, _config: Self::State<'a>) -> Option<()> {
        Some(())
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
        let state = read_group(diags, &config, state).await?;
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
        if state.enterprise_project_id.is_null() {
            state.enterprise_project_id = non_empty(config.enterprise_project_id.clone()).or(Value::Unknown);
        }
        state.id = Value::Unknown;
        state.rules = Value::Unknown;
        Some((Value::Value(state), Default::default()))
    }

    async fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
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
        keep_prior(&mut state.region, &prior.region);
        keep_prior(&mut state.enterprise_project_id, &prior.enterprise_project_id);
        keep_prior(&mut state.rules, &prior.rules);

        let mut replace = Vec::new();
        force_new(&mut replace, "region", &prior.region, &state.region);
        force_new(
            &mut replace,
            "enterprise_project_id",
            &prior.enterprise_project_id,
            &state.enterprise_project_id,
        );
        force_new(
            &mut replace,
            "delete_default_rules",
            &prior.delete_default_rules,
            &state.delete_default_rules,
        );
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
        let client = security_group_client(diags, &config, &region).await?;

        let enterprise_project_id =
            config.get_enterprise_project_id(state.enterprise_project_id.as_deref_option());
        debug!(name = %state.name, enterprise_project_id, "create security group");
        let group = api::create_security_group(&client, &state.name, &enterprise_project_id)
            .await
            .report(diags, "Error creating Security Group")?;
        info!(id = group.id, "security group created");
        state.id = group.id.clone().into();

        if let Some(description) = state.description.as_deref_option() {
            update_description(diags, &config, &region, &group.id, &state.name, description).await?;
        }

        if state.delete_default_rules.unwrap_or_default() {
            for rule in &group.security_group_rules {
                api::delete_security_group_rule(&client, &rule.id)
                    .await
                    .report(diags, "There was a problem deleting a default security group rule")?;
            }
        }

        tags::apply(&config, &region, TAGS_RESOURCE_TYPE, &group.id, &Default::default(), &tags_map(&state.tags))
            .await
            .report(diags, "Error setting tags of security group")?;

        let state = read_group(diags, &config, state).await?;
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

        if prior.name != state.name || prior.description != state.description {
            debug!(id = %state.id, name = %state.name, "updating security group");
            update_description(diags, &config, &region, &state.id, &state.name, &state.description).await?;
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
        .report(diags, "Error updating tags of security group")?;

        let state = read_group(diags, &config, state).await?;
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
        let client = security_group_client(diags, &config, &region).await?;

        let id = state.id.as_str();
        self.timeouts
            .on_delete(&["ACTIVE"], &["DELETED"])
            .wait_for_state(|| async {
                debug!(id, "attempting to delete security group");
                match api::get_security_group(&client, id).await {
                    Ok(_) => (),
                    Err(err) if err.is_not_found() => {
                        debug!(id, "successfully deleted security group");
                        return Ok((Some(()), "DELETED".to_string()));
                    }
                    Err(err) => return Err(err),
                }
                match api::delete_security_group(&client, id).await {
                    Err(err) if err.is_not_found() => Ok((Some(()), "DELETED".to_string())),
                    Ok(()) => Ok((Some(()), "ACTIVE".to_string())),
                    Err(err) if err.is_conflict() => Ok((Some(()), "ACTIVE".to_string())),
                    Err(err) => Err(err),
                }
            })
            .await
            .map_err(|err| format!("error deleting security group ({id}): {err}"))
            .report(diags, "Error deleting security group")?;
        Some(())
    }

    async fn import<'a>(
        &self,
        _diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let state = SecGroupState {
            id: id.into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecGroupDataSourceState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub secgroup_id: ValueString<'a>,
    pub name: ValueString<'a>,
    pub enterprise_project_id: ValueString<'a>,
    pub description: ValueString<'a>,
    pub rules: ValueList<Value<RuleState<'a>>>,
}

impl<'a> WithSchema for SecGroupDataSourceState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the security group"),
                    "region" => region_attribute(),
                    "secgroup_id" => string(Optional, "ID of the security group to look up"),
                    "name" => string(OptionalComputed, "Name of the security group"),
                    "enterprise_project_id" => string(Optional, "Enterprise project of the security group"),
                    "description" => string(Computed, "Description of the security group"),
                    "rules" => rules_attribute()
                },
                description: Description::plain("Look up a networking security group"),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecGroupDataSource {
    meta: ProviderMeta,
}

impl SecGroupDataSource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl DataSource for SecGroupDataSource {
    type State<'a> = SecGroupDataSourceState<'a>;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(SecGroupDataSourceState::schema())
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        mut config: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::State<'a>> {
        let provider = self.meta.get(diags).await?;
        let region = provider.get_region(config.region.as_deref_option());
        let client = security_group_client(diags, &provider, &region).await?;

        let groups = api::list_security_groups(&client, config.enterprise_project_id.as_str())
            .await
            .report(diags, "Unable to retrieve security groups")?;
        let found: Vec<SecurityGroup> = groups
            .into_iter()
            .filter(|group| config.secgroup_id.as_deref_option().map_or(true, |id| id == group.id))
            .filter(|group| config.name.as_deref_option().map_or(true, |name| name == group.name))
            .collect();
        let group = single_result(found).report(diags, "Error retrieving security group")?;

        debug!(id = group.id, "retrieved security group");
        config.id = group.id.into();
        config.region = region.into();
        config.name = group.name.into();
        config.description = group.description.into();
        config.rules = Value::Value(
            group
                .security_group_rules
                .into_iter()
                .map(|rule| Value::Value(rule.into()))
                .collect(),
        );
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::mock_config;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resource(server: &MockServer) -> SecGroupResource {
        SecGroupResource {
            meta: ProviderMeta::configured(mock_config(server)),
            timeouts: Timeouts::immediate(),
        }
    }

    fn group(description: &str) -> serde_json::Value {
        json!({"security_group": {
            "id": "sg-1",
            "name": "web",
            "description": description,
            "enterprise_project_id": "0",
            "security_group_rules": [
                {"id": "rule-1", "direction": "egress", "ethertype": "IPv4", "description": ""},
                {"id": "rule-2", "direction": "ingress", "ethertype": "IPv4", "protocol": "tcp",
                 "port_range_min": 22, "port_range_max": 22, "remote_ip_prefix": "0.0.0.0/0"}
            ]
        }})
    }

    #[test]
    fn rule_ports() {
        let rule = |min, max| SecurityGroupRule {
            port_range_min: min,
            port_range_max: max,
            ..Default::default()
        };
        assert_eq!(RuleState::from(rule(Some(22), Some(22))).ports.as_str(), "22");
        assert_eq!(RuleState::from(rule(Some(80), Some(443))).ports.as_str(), "80-443");
        assert!(RuleState::from(rule(None, None)).ports.is_null());
    }

    #[tokio::test]
    async fn create_removes_default_rules() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pid/security-groups"))
            .and(body_json(json!({"security_group": {"name": "web"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(group("")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2.0/security-groups/sg-1"))
            .and(body_json(json!({"security_group": {"name": "web", "description": "web servers"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"security_group": {"id": "sg-1"}})))
            .expect(1)
            .mount(&server)
            .await;
        for rule in ["rule-1", "rule-2"] {
            Mock::given(method("DELETE"))
                .and(path(format!("/v1/pid/security-group-rules/{rule}")))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"security_group": {
                "id": "sg-1", "name": "web", "description": "web servers",
                "enterprise_project_id": "0", "security_group_rules": []
            }})))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let planned = SecGroupState {
            id: Value::Unknown,
            region: "cn-north-4".into(),
            name: "web".into(),
            description: "web servers".into(),
            enterprise_project_id: Value::Unknown,
            delete_default_rules: true.into(),
            rules: Value::Unknown,
            ..Default::default()
        };
        let (state, _) = resource
            .create(&mut diags, Value::Value(planned.clone()), Value::Value(planned), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(diags.errors.is_empty(), "{diags:?}");

        let state = state.as_option().unwrap();
        assert_eq!(state.id.as_str(), "sg-1");
        assert_eq!(state.description.as_str(), "web servers");
        assert_eq!(state.enterprise_project_id.as_str(), "0");
        assert_eq!(state.rules, Value::Value(vec![]));
    }

    #[tokio::test]
    async fn read_maps_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(group("")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2.0/pid/security-groups/sg-1/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tags": [{"key": "env", "value": "prod"}]})))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = SecGroupState {
            id: "sg-1".into(),
            ..Default::default()
        };
        let (state, _) = resource
            .read(&mut diags, Value::Value(prior), Value::Null, Value::Null)
            .await
            .unwrap();
        let state = state.as_option().unwrap();
        assert!(state.description.is_null());
        assert_eq!(state.region.as_str(), "cn-north-4");

        let rules = state.rules.as_option().unwrap();
        assert_eq!(rules.len(), 2);
        let ssh = rules[1].as_ref_option().unwrap();
        assert_eq!(ssh.protocol.as_str(), "tcp");
        assert_eq!(ssh.ports.as_str(), "22");
        assert_eq!(ssh.remote_ip_prefix.as_str(), "0.0.0.0/0");
        assert!(rules[0].as_ref_option().unwrap().protocol.is_null());

        let tags = tags_map(&state.tags);
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    async fn destroy_waits_for_conflicts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(group("")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(409))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/pid/security-groups/sg-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = SecGroupState {
            id: "sg-1".into(),
            ..Default::default()
        };
        assert!(resource.destroy(&mut diags, Value::Value(prior), Value::Null, Value::Null).await.is_some());
        assert!(diags.errors.is_empty(), "{diags:?}");
    }

    #[tokio::test]
    async fn data_source_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/security-groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"security_groups": [
                {"id": "sg-1", "name": "web", "description": "web servers"},
                {"id": "sg-2", "name": "default", "description": "default group"}
            ]})))
            .mount(&server)
            .await;

        let data_source = SecGroupDataSource::new(ProviderMeta::configured(mock_config(&server)));
        let mut diags = Diagnostics::default();
        let config = SecGroupDataSourceState {
            name: "default".into(),
            ..Default::default()
        };
        let state = data_source.read(&mut diags, config, Value::Null).await.unwrap();
        assert_eq!(state.id.as_str(), "sg-2");
        assert_eq!(state.description.as_str(), "default group");

        let config = SecGroupDataSourceState::default();
        assert!(data_source.read(&mut diags, config, Value::Null).await.is_none());
    }
}
