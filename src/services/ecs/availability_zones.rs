use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, Schema};
use tf_provider::value::{Value, ValueEmpty, ValueList, ValueString};
use tf_provider::{map, AttributePath, DataSource, Diagnostics};

use crate::provider::ProviderMeta;
use crate::utils::{attribute, region_attribute, string, ReportDiagnostics, WithSchema};

use super::api::{self, AvailabilityZone};

const DEFAULT_STATE: &str = "available";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AvailabilityZonesState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub state: ValueString<'a>,
    pub names: ValueList<ValueString<'a>>,
}

impl<'a> WithSchema for AvailabilityZonesState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "Hash of the zone names"),
                    "region" => region_attribute(),
                    "state" => string(OptionalComputed, "State of the zones to list: available (default), unavailable or all"),
                    "names" => attribute(
                        AttributeType::List(Box::new(AttributeType::String)),
                        Computed,
                        "Sorted names of the availability zones",
                    )
                },
                description: Description::plain("List the availability zones of a region"),
                ..Default::default()
            },
        }
    }
}

fn state_matches(filter: &str, zone: &AvailabilityZone) -> bool {
    match filter {
        "all" => true,
        "unavailable" => !zone.zone_state.available,
        _ => zone.zone_state.available,
    }
}

fn names_hash(names: &[String]) -> String {
    hex::encode(Sha256::digest(names.join(",").as_bytes()))
}

#[derive(Debug, Clone)]
pub struct AvailabilityZonesDataSource {
    meta: ProviderMeta,
}

impl AvailabilityZonesDataSource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl DataSource for AvailabilityZonesDataSource {
    type State<'a> = AvailabilityZonesState<'a>;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(AvailabilityZonesState::schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::State<'a>) -> Option<()> {
        if let Some(state) = config.state.as_deref_option() {
            if !["available", "unavailable", "all"].contains(&state) {
                diags.error(
                    "Invalid value for state",
                    format!("\"{state}\" is not one of available, unavailable or all"),
                    AttributePath::new("state"),
                );
                return None;
            }
        }
        Some(())
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        mut config: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::State<'a>> {
        let provider = self.meta.get(diags).await?;
        let region = provider.get_region(config.region.as_deref_option());
        let client = provider
            .compute_v21_client(&region)
            .await
            .report(diags, "Error creating compute client")?;

        let zones = api::list_availability_zones(&client)
            .await
            .report(diags, "Error retrieving availability zones")?;
        let filter = config.state.as_deref_option().unwrap_or(DEFAULT_STATE).to_string();
        let mut names: Vec<String> = zones
            .into_iter()
            .filter(|zone| state_matches(&filter, zone))
            .map(|zone| zone.zone_name)
            .collect();
        names.sort();
        debug!(region, ?names, "retrieved availability zones");

        config.id = names_hash(&names).into();
        config.region = region.into();
        config.state = filter.into();
        config.names = Value::Value(names.into_iter().map(Into::into).collect());
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::mock_config;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_zones(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v2.1/pid/os-availability-zone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"availabilityZoneInfo": [
                {"zoneName": "cn-north-4c", "zoneState": {"available": true}},
                {"zoneName": "cn-north-4a", "zoneState": {"available": true}},
                {"zoneName": "cn-north-4b", "zoneState": {"available": false}}
            ]})))
            .mount(server)
            .await;
    }

    fn names(state: &AvailabilityZonesState) -> Vec<String> {
        state.names.iter().flatten().map(|name| name.as_str().to_string()).collect()
    }

    #[tokio::test]
    async fn lists_sorted_available_zones() {
        let server = MockServer::start().await;
        mount_zones(&server).await;
        let data_source = AvailabilityZonesDataSource::new(ProviderMeta::configured(mock_config(&server)));
        let mut diags = Diagnostics::default();

        let state = data_source
            .read(&mut diags, Default::default(), Value::Null)
            .await
            .unwrap();
        assert!(diags.errors.is_empty(), "{diags:?}");
        assert_eq!(names(&state), ["cn-north-4a", "cn-north-4c"]);
        assert_eq!(state.state.as_str(), "available");
        assert_eq!(state.region.as_str(), "cn-north-4");
        assert_eq!(state.id.as_str().len(), 64);
    }

    #[tokio::test]
    async fn filters_by_state() {
        let server = MockServer::start().await;
        mount_zones(&server).await;
        let data_source = AvailabilityZonesDataSource::new(ProviderMeta::configured(mock_config(&server)));
        let mut diags = Diagnostics::default();

        let config = AvailabilityZonesState {
            state: "unavailable".into(),
            ..Default::default()
        };
        let state = data_source.read(&mut diags, config, Value::Null).await.unwrap();
        assert_eq!(names(&state), ["cn-north-4b"]);

        let config = AvailabilityZonesState {
            state: "all".into(),
            ..Default::default()
        };
        let state = data_source.read(&mut diags, config, Value::Null).await.unwrap();
        assert_eq!(names(&state), ["cn-north-4a", "cn-north-4b", "cn-north-4c"]);
    }

    #[tokio::test]
    async fn validation() {
        let server = MockServer::start().await;
        let data_source = AvailabilityZonesDataSource::new(ProviderMeta::configured(mock_config(&server)));
        let mut diags = Diagnostics::default();
        let config = AvailabilityZonesState {
            state: "broken".into(),
            ..Default::default()
        };
        assert!(data_source.validate(&mut diags, config).await.is_none());
        assert_eq!(diags.errors.len(), 1);
    }
}
