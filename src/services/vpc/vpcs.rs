use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tf_provider::schema::{AttributeConstraint, Block, Description, Schema};
use tf_provider::value::{Value, ValueEmpty, ValueMap, ValueString};
use tf_provider::{map, AttributePath, DataSource, Diagnostics, Resource};

use crate::client::ServiceClient;
use crate::config::Config;
use crate::provider::ProviderMeta;
use crate::services::tags;
use crate::utils::{
    check_deleted, enterprise_project_attribute, force_new, keep_prior, non_empty, region_attribute,
    single_result, string, tags_attribute, tags_map, validate_cidr, validate_regex, ReportDiagnostics,
    WithSchema, NAME_PATTERN,
};
use crate::wait::Timeouts;

use super::api::{self, Vpc, VpcOpts};

const TAGS_RESOURCE_TYPE: &str = "vpcs";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VpcState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub cidr: ValueString<'a>,
    pub description: ValueString<'a>,
    pub enterprise_project_id: ValueString<'a>,
    pub status: ValueString<'a>,
    pub tags: ValueMap<'a, ValueString<'a>>,
}

impl<'a> WithSchema for VpcState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the VPC"),
                    "region" => region_attribute(),
                    "name" => string(Required, "Name of the VPC"),
                    "cidr" => string(Required, "Range of available subnets in the VPC"),
                    "description" => string(Optional, "Supplementary information about the VPC"),
                    "enterprise_project_id" => enterprise_project_attribute(),
                    "status" => string(Computed, "Status of the VPC"),
                    "tags" => tags_attribute()
                },
                description: Description::plain("Virtual Private Cloud"),
                ..Default::default()
            },
        }
    }
}

impl<'a> VpcState<'a> {
    fn validate(&self, diags: &mut Diagnostics) {
        validate_cidr(diags, "cidr", &self.cidr);
        validate_regex(
            diags,
            "name",
            &self.name,
            NAME_PATTERN,
            "the name can contain 1 to 64 letters, digits, underscores, hyphens and periods",
        );
    }

    fn set_vpc(&mut self, region: String, vpc: Vpc) {
        self.id = vpc.id.into();
        self.region = region.into();
        self.name = vpc.name.into();
        self.cidr = vpc.cidr.into();
        self.description = non_empty(vpc.description);
        self.enterprise_project_id = non_empty(vpc.enterprise_project_id);
        self.status = vpc.status.into();
    }
}

/// Plan the defaults of the region and of the enterprise project
fn plan_defaults(config: &Config, region: &mut ValueString, enterprise_project_id: &mut ValueString) {
    if region.is_null() {
        *region = config.region.clone().into();
    }
    if enterprise_project_id.is_null() {
        *enterprise_project_id = if config.enterprise_project_id.is_empty() {
            Value::Unknown
        } else {
            config.enterprise_project_id.clone().into()
        };
    }
}

pub(super) async fn networking_client(
    diags: &mut Diagnostics,
    config: &Config,
    region: &str,
) -> Option<ServiceClient> {
    config
        .networking_v1_client(region)
        .await
        .report(diags, "Error creating networking client")
}

async fn read_vpc<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: VpcState<'a>,
) -> Option<Value<VpcState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let client = networking_client(diags, config, &region).await?;
    let found = check_deleted(api::get_vpc(&client, &state.id).await, "VPC")
        .report(diags, "Error retrieving VPC")?;
    let Some(vpc) = found else {
        return Some(Value::Null);
    };
    debug!(id = vpc.id, status = vpc.status, "retrieved VPC");
    state.set_vpc(region.clone(), vpc);

    tags::refresh(config, &region, TAGS_RESOURCE_TYPE, &state.id, &mut state.tags).await;
    Some(Value::Value(state))
}

#[derive(Debug, Clone)]
pub struct VpcResource {
    meta: ProviderMeta,
    timeouts: Timeouts,
}

impl VpcResource {
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
impl Resource for VpcResource {
    type State<'a> = Value<VpcState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(VpcState::schema())
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
        let state = read_vpc(diags, &config, state).await?;
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
        state.id = Value::Unknown;
        state.status = Value::Unknown;
        plan_defaults(&config, &mut state.region, &mut state.enterprise_project_id);
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

        let mut replace = Vec::new();
        force_new(&mut replace, "region", &prior.region, &state.region);
        force_new(
            &mut replace,
            "enterprise_project_id",
            &prior.enterprise_project_id,
            &state.enterprise_project_id,
        );
        if prior.cidr != state.cidr {
            state.status = Value::Unknown;
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

        let opts = VpcOpts {
            name: Some(state.name.as_str().to_string()),
            cidr: Some(state.cidr.as_str().to_string()),
            description: state.description.as_deref_option().map(str::to_string),
            enterprise_project_id: Some(
                config.get_enterprise_project_id(state.enterprise_project_id.as_deref_option()),
            )
            .filter(|eps| !eps.is_empty()),
        };
        debug!(?opts, "create VPC options");
        let vpc = api::create_vpc(&client, &opts)
            .await
            .report(diags, "Error creating VPC")?;
        info!(id = vpc.id, "VPC created");
        state.id = vpc.id.clone().into();

        let id = vpc.id;
        self.timeouts
            .on_create(&["CREATING"], &["OK"])
            .wait_for_state(|| async {
                let vpc = api::get_vpc(&client, &id).await?;
                let status = vpc.status.clone();
                Ok((Some(vpc), status))
            })
            .await
            .report(diags, "Error waiting for VPC to become available")?;

        tags::apply(&config, &region, TAGS_RESOURCE_TYPE, &id, &Default::default(), &tags_map(&state.tags))
            .await
            .report(diags, "Error setting tags of VPC")?;

        let state = read_vpc(diags, &config, state).await?;
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

        if prior.name != state.name || prior.cidr != state.cidr || prior.description != state.description {
            let client = networking_client(diags, &config, &region).await?;
            let opts = VpcOpts {
                name: Some(state.name.as_str().to_string()),
                cidr: Some(state.cidr.as_str().to_string()),
                description: Some(state.description.as_str().to_string()),
                enterprise_project_id: None,
            };
            debug!(id = %state.id, ?opts, "update VPC options");
            api::update_vpc(&client, &state.id, &opts)
                .await
                .report(diags, "Error updating VPC")?;
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
        .report(diags, "Error updating tags of VPC")?;

        let state = read_vpc(diags, &config, state).await?;
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
        check_deleted(api::delete_vpc(&client, id).await, "VPC").report(diags, "Error deleting VPC")?;

        self.timeouts
            .on_delete(&["OK"], &["DELETED"])
            .wait_for_state(|| async {
                match api::get_vpc(&client, id).await {
                    Ok(vpc) => Ok((Some(()), vpc.status)),
                    Err(err) if err.is_not_found() => {
                        info!(id, "successfully deleted VPC");
                        Ok((Some(()), "DELETED".to_string()))
                    }
                    Err(err) => Err(err),
                }
            })
            .await
            .report(diags, "Error deleting VPC")?;
        Some(())
    }

    async fn import<'a>(
        &self,
        _diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let state = VpcState {
            id: id.into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VpcDataSourceState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub name: ValueString<'a>,
    pub cidr: ValueString<'a>,
    pub status: ValueString<'a>,
    pub enterprise_project_id: ValueString<'a>,
    pub description: ValueString<'a>,
}

impl<'a> WithSchema for VpcDataSourceState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(OptionalComputed, "ID of the VPC"),
                    "region" => region_attribute(),
                    "name" => string(OptionalComputed, "Name of the VPC"),
                    "cidr" => string(OptionalComputed, "CIDR block of the VPC"),
                    "status" => string(OptionalComputed, "Status of the VPC"),
                    "enterprise_project_id" => string(OptionalComputed, "Enterprise project of the VPC"),
                    "description" => string(Computed, "Supplementary information about the VPC")
                },
                description: Description::plain("Look up a Virtual Private Cloud"),
                ..Default::default()
            },
        }
    }
}

impl<'a> VpcDataSourceState<'a> {
    fn matches(&self, vpc: &Vpc) -> bool {
        [
            (&self.name, &vpc.name),
            (&self.cidr, &vpc.cidr),
            (&self.status, &vpc.status),
        ]
        .into_iter()
        .all(|(filter, value)| filter.as_deref_option().map_or(true, |f| f == value))
    }
}

#[derive(Debug, Clone)]
pub struct VpcDataSource {
    meta: ProviderMeta,
}

impl VpcDataSource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl DataSource for VpcDataSource {
    type State<'a> = VpcDataSourceState<'a>;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(VpcDataSourceState::schema())
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

        let vpcs = api::list_vpcs(
            &client,
            config.id.as_str(),
            config.enterprise_project_id.as_str(),
        )
        .await
        .report(diags, "Unable to retrieve vpcs")?;
        let found: Vec<Vpc> = vpcs.into_iter().filter(|vpc| config.matches(vpc)).collect();
        let vpc = single_result(found).report(diags, "Error retrieving VPC")?;

        debug!(id = vpc.id, "retrieved VPC");
        config.id = vpc.id.into();
        config.region = region.into();
        config.name = vpc.name.into();
        config.cidr = vpc.cidr.into();
        config.status = vpc.status.into();
        config.enterprise_project_id = vpc.enterprise_project_id.into();
        config.description = vpc.description.into();
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::mock_config;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resource(server: &MockServer) -> VpcResource {
        VpcResource {
            meta: ProviderMeta::configured(mock_config(server)),
            timeouts: Timeouts::immediate(),
        }
    }

    fn vpc(status: &str) -> serde_json::Value {
        json!({"vpc": {
            "id": "vpc-1",
            "name": "my-vpc",
            "cidr": "192.168.0.0/16",
            "status": status,
            "description": "",
            "enterprise_project_id": "0"
        }})
    }

    fn planned() -> VpcState<'static> {
        VpcState {
            id: Value::Unknown,
            region: "cn-north-4".into(),
            name: "my-vpc".into(),
            cidr: "192.168.0.0/16".into(),
            enterprise_project_id: Value::Unknown,
            status: Value::Unknown,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn validation() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let config = VpcState {
            cidr: "192.168.0.0".into(),
            name: "bad name".into(),
            ..planned()
        };
        assert!(resource.validate(&mut diags, Value::Value(config)).await.is_none());
        assert_eq!(diags.errors.len(), 2);
    }

    #[tokio::test]
    async fn plan_sets_defaults() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let proposed = VpcState {
            region: Value::Null,
            enterprise_project_id: Value::Null,
            ..planned()
        };
        let (state, _) = resource
            .plan_create(&mut diags, Value::Value(proposed.clone()), Value::Value(proposed), Value::Null)
            .await
            .unwrap();
        let state = state.as_option().unwrap();
        assert_eq!(state.region.as_str(), "cn-north-4");
        assert!(state.enterprise_project_id.is_unknown());
        assert!(state.id.is_unknown());
    }

    #[tokio::test]
    async fn plan_replaces_on_region_change() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = VpcState {
            id: "vpc-1".into(),
            enterprise_project_id: "0".into(),
            status: "OK".into(),
            ..planned()
        };
        let proposed = VpcState {
            region: "cn-south-1".into(),
            ..prior.clone()
        };
        let (_, _, replace) = resource
            .plan_update(
                &mut diags,
                Value::Value(prior),
                Value::Value(proposed.clone()),
                Value::Value(proposed),
                Value::Null,
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(replace, vec![AttributePath::new("region")]);
    }

    #[tokio::test]
    async fn create_waits_for_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pid/vpcs"))
            .and(body_json(json!({"vpc": {"name": "my-vpc", "cidr": "192.168.0.0/16"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(vpc("CREATING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vpc("CREATING")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vpc("OK")))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let (state, _) = resource
            .create(&mut diags, Value::Value(planned()), Value::Value(planned()), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(diags.errors.is_empty(), "{diags:?}");

        let state = state.as_option().unwrap();
        assert_eq!(state.id.as_str(), "vpc-1");
        assert_eq!(state.status.as_str(), "OK");
        assert_eq!(state.enterprise_project_id.as_str(), "0");
        assert!(state.description.is_null());
        assert!(state.tags.is_null());
    }

    #[tokio::test]
    async fn read_removes_deleted_vpc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"error_code": "VPC.0202", "error_msg": "Query resource by id vpc-1 fail."}),
            ))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = VpcState {
            id: "vpc-1".into(),
            ..planned()
        };
        let (state, _) = resource
            .read(&mut diags, Value::Value(prior), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(state.is_null());
        assert!(diags.errors.is_empty());
    }

    #[tokio::test]
    async fn destroy_polls_until_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vpc("OK")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs/vpc-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = VpcState {
            id: "vpc-1".into(),
            ..planned()
        };
        assert!(resource.destroy(&mut diags, Value::Value(prior), Value::Null, Value::Null).await.is_some());
        assert!(diags.errors.is_empty(), "{diags:?}");
    }

    #[tokio::test]
    async fn data_source_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pid/vpcs"))
            .and(query_param("enterprise_project_id", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": [
                {"id": "vpc-1", "name": "web", "cidr": "192.168.0.0/16", "status": "OK", "enterprise_project_id": "0"},
                {"id": "vpc-2", "name": "db", "cidr": "10.0.0.0/8", "status": "OK", "enterprise_project_id": "0"}
            ]})))
            .mount(&server)
            .await;

        let data_source = VpcDataSource::new(ProviderMeta::configured(mock_config(&server)));
        let mut diags = Diagnostics::default();
        let config = VpcDataSourceState {
            name: "db".into(),
            enterprise_project_id: "0".into(),
            ..Default::default()
        };
        let state = data_source.read(&mut diags, config, Value::Null).await.unwrap();
        assert_eq!(state.id.as_str(), "vpc-2");
        assert_eq!(state.cidr.as_str(), "10.0.0.0/8");
        assert_eq!(state.region.as_str(), "cn-north-4");

        let config = VpcDataSourceState {
            status: "OK".into(),
            enterprise_project_id: "0".into(),
            ..Default::default()
        };
        assert!(data_source.read(&mut diags, config, Value::Null).await.is_none());
        assert_eq!(
            diags.errors[0].detail,
            "Your query returned more than one result. Please try a more specific search criteria"
        );
    }
}
