use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tf_provider::schema::{
    Attribute, AttributeConstraint, AttributeType, Block, Description, NestedBlock, Schema,
};
use tf_provider::value::{self, Value, ValueBool, ValueEmpty, ValueMap, ValueNumber, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, DynamicDataSource, DynamicResource, Provider};

use crate::config::{
    cloud_domain, normalize_endpoints, shared, AssumeRole, Config, DEFAULT_EUROPE_CLOUD,
    DEFAULT_MAX_RETRIES, EUROPE_REGION_PREFIX,
};
use crate::services::{cci, ecs, iam, obs, vpc};
use crate::utils::{attribute, string, ReportDiagnostics};

/// Configuration shared by the provider and every resource, set once the provider is configured
#[derive(Debug, Clone, Default)]
pub struct ProviderMeta {
    config: Arc<RwLock<Option<Arc<Config>>>>,
}

impl ProviderMeta {
    #[cfg(test)]
    pub(crate) fn configured(config: Config) -> Self {
        Self {
            config: Arc::new(RwLock::new(Some(Arc::new(config)))),
        }
    }

    pub async fn publish(&self, config: Config) {
        *self.config.write().await = Some(Arc::new(config));
    }

    pub async fn get(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        let config = self.config.read().await.clone();
        if config.is_none() {
            diags.root_error(
                "provider is not configured",
                "the provider block must be configured before using its resources",
            );
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssumeRoleState<'a> {
    #[serde(borrow = "'a")]
    pub agency_name: ValueString<'a>,
    pub domain_name: ValueString<'a>,
    pub domain_id: ValueString<'a>,
    pub duration: ValueNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfigState<'a> {
    #[serde(borrow = "'a")]
    pub region: ValueString<'a>,
    pub access_key: ValueString<'a>,
    pub secret_key: ValueString<'a>,
    pub security_token: ValueString<'a>,
    pub domain_id: ValueString<'a>,
    pub domain_name: ValueString<'a>,
    pub user_name: ValueString<'a>,
    pub user_id: ValueString<'a>,
    pub password: ValueString<'a>,
    #[serde(with = "value::serde_as_vec")]
    pub assume_role: Value<AssumeRoleState<'a>>,
    pub project_id: ValueString<'a>,
    pub project_name: ValueString<'a>,
    pub tenant_id: ValueString<'a>,
    pub tenant_name: ValueString<'a>,
    pub token: ValueString<'a>,
    pub insecure: ValueBool,
    pub cacert_file: ValueString<'a>,
    pub cert: ValueString<'a>,
    pub key: ValueString<'a>,
    pub agency_name: ValueString<'a>,
    pub agency_domain_name: ValueString<'a>,
    pub delegated_project: ValueString<'a>,
    pub auth_url: ValueString<'a>,
    pub cloud: ValueString<'a>,
    pub endpoints: ValueMap<'a, ValueString<'a>>,
    pub regional: ValueBool,
    pub shared_config_file: ValueString<'a>,
    pub profile: ValueString<'a>,
    pub enterprise_project_id: ValueString<'a>,
    pub max_retries: ValueNumber,
}

fn sensitive(description: &str) -> Attribute {
    Attribute {
        sensitive: true,
        ..string(AttributeConstraint::Optional, description)
    }
}

fn provider_schema() -> Schema {
    use AttributeConstraint::*;
    Schema {
        version: 1,
        block: Block {
            version: 1,
            attributes: map! {
                "region" => string(Optional, "Region of the resources, from HW_REGION_NAME when unset"),
                "access_key" => sensitive("Access key of the AK/SK pair"),
                "secret_key" => sensitive("Secret key of the AK/SK pair"),
                "security_token" => sensitive("Security token of temporary AK/SK credentials"),
                "domain_id" => string(Optional, "ID of the account"),
                "domain_name" => string(Optional, "Name of the account"),
                "user_name" => string(Optional, "Name of the user authenticating with a password"),
                "user_id" => string(Optional, "ID of the user authenticating with a password"),
                "password" => sensitive("Password of the user"),
                "project_id" => string(Optional, "ID of the project, preferred over tenant_id"),
                "project_name" => string(Optional, "Name of the project, defaults to the region"),
                "tenant_id" => string(Optional, "ID of the project"),
                "tenant_name" => string(Optional, "Name of the project"),
                "token" => sensitive("IAM token used as is to authenticate requests"),
                "insecure" => attribute(AttributeType::Bool, Optional, "Skip the verification of the server certificates"),
                "cacert_file" => string(Optional, "Path or PEM contents of a custom CA bundle"),
                "cert" => string(Optional, "Path or PEM contents of the client certificate"),
                "key" => sensitive("Path or PEM contents of the client private key"),
                "agency_name" => string(Optional, "Agency used to operate a delegated project"),
                "agency_domain_name" => string(Optional, "Account owning the agency"),
                "delegated_project" => string(Optional, "Project operated through the agency, defaults to the region"),
                "auth_url" => string(Optional, "Identity endpoint, defaults to https://iam.{region}.{cloud}/v3"),
                "cloud" => string(Optional, "Cloud domain, defaults to myhuaweicloud.com"),
                "endpoints" => attribute(
                    AttributeType::Map(Box::new(AttributeType::String)),
                    Optional,
                    "Custom endpoints of the services",
                ),
                "regional" => attribute(AttributeType::Bool, Optional, "Use regional endpoints for the global services"),
                "shared_config_file" => string(Optional, "Path of the hcloud shared config file"),
                "profile" => string(Optional, "Profile of the shared config file, defaults to the current one"),
                "enterprise_project_id" => string(Optional, "Default enterprise project of the resources"),
                "max_retries" => attribute(AttributeType::Number, Optional, "Number of retries on rate limited requests (default: 5)")
            },
            blocks: map! {
                "assume_role" => NestedBlock::Optional(Block {
                    attributes: map! {
                        "agency_name" => string(Required, "Name of the agency to assume"),
                        "domain_name" => string(Required, "Account owning the agency"),
                        "domain_id" => string(Optional, "ID of the account owning the agency"),
                        "duration" => attribute(AttributeType::Number, Optional, "Lifetime of the temporary credentials in seconds")
                    },
                    description: Description::plain("Assume an agency to obtain temporary credentials"),
                    ..Default::default()
                })
            },
            description: Description::plain("Manage HuaweiCloud resources"),
            ..Default::default()
        },
    }
}

/// Environment variables read when an argument is unset
#[derive(Debug, Clone, Default)]
pub(crate) struct Env(HashMap<String, String>);

impl Env {
    pub(crate) fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    fn var(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.0.get(*name))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    /// Value of the argument, or of the first non-empty variable
    fn string(&self, value: &ValueString, names: &[&str]) -> String {
        match value.as_deref_option() {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => self.var(names).unwrap_or_default().to_string(),
        }
    }

    fn bool(&self, value: &ValueBool, names: &[&str]) -> bool {
        match value.as_ref_option() {
            Some(value) => *value,
            None => self
                .var(names)
                .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true")),
        }
    }

    fn number(&self, value: &ValueNumber, names: &[&str], default: i64) -> Result<i64> {
        if let Some(value) = value.as_ref_option() {
            return Ok(*value);
        }
        match self.var(names) {
            Some(value) => match value.parse() {
                Ok(value) => Ok(value),
                Err(_) => bail!("{} must be an integer, got {value}", names.join(" or ")),
            },
            None => Ok(default),
        }
    }
}

fn assume_role(state: &ProviderConfigState, env: &Env) -> Option<AssumeRole> {
    let role = match state.assume_role.as_ref_option() {
        Some(role) => AssumeRole {
            agency_name: role.agency_name.as_str().to_string(),
            domain_name: role.domain_name.as_str().to_string(),
            domain_id: role.domain_id.as_str().to_string(),
            duration: role.duration.as_ref_option().copied().unwrap_or_default(),
        },
        None => {
            let duration = env.var(&["HW_ASSUME_ROLE_DURATION"]).unwrap_or_default();
            AssumeRole {
                agency_name: env.var(&["HW_ASSUME_ROLE_AGENCY_NAME"]).unwrap_or_default().to_string(),
                domain_name: env.var(&["HW_ASSUME_ROLE_DOMAIN_NAME"]).unwrap_or_default().to_string(),
                domain_id: env.var(&["HW_ASSUME_ROLE_DOMAIN_ID"]).unwrap_or_default().to_string(),
                duration: duration.parse().unwrap_or_else(|_| {
                    if !duration.is_empty() {
                        warn!(duration, "HW_ASSUME_ROLE_DURATION is not an integer, ignored");
                    }
                    0
                }),
            }
        }
    };
    (!role.agency_name.is_empty()).then_some(role)
}

/// Build the configuration of the provider, before any authentication
pub(crate) async fn new_config(
    state: &ProviderConfigState<'_>,
    env: &Env,
    terraform_version: String,
) -> Result<Config> {
    let mut config = Config {
        access_key: env.string(&state.access_key, &["HW_ACCESS_KEY", "OS_ACCESS_KEY"]),
        secret_key: env.string(&state.secret_key, &["HW_SECRET_KEY", "OS_SECRET_KEY"]),
        security_token: env.string(&state.security_token, &["HW_SECURITY_TOKEN"]),
        domain_id: env.string(
            &state.domain_id,
            &["HW_DOMAIN_ID", "OS_DOMAIN_ID", "OS_USER_DOMAIN_ID", "OS_PROJECT_DOMAIN_ID"],
        ),
        domain_name: env.string(
            &state.domain_name,
            &["HW_DOMAIN_NAME", "OS_DOMAIN_NAME", "OS_USER_DOMAIN_NAME", "OS_PROJECT_DOMAIN_NAME"],
        ),
        user_name: env.string(&state.user_name, &["HW_USER_NAME", "OS_USERNAME"]),
        user_id: env.string(&state.user_id, &["HW_USER_ID", "OS_USER_ID"]),
        password: env.string(&state.password, &["HW_USER_PASSWORD", "OS_PASSWORD"]),
        token: env.string(&state.token, &["HW_AUTH_TOKEN", "OS_AUTH_TOKEN"]),
        insecure: env.bool(&state.insecure, &["HW_INSECURE", "OS_INSECURE"]),
        cacert_file: env.string(&state.cacert_file, &["OS_CACERT"]),
        client_cert_file: env.string(&state.cert, &["OS_CERT"]),
        client_key_file: env.string(&state.key, &["OS_KEY"]),
        agency_name: env.string(&state.agency_name, &["OS_AGENCY_NAME"]),
        agency_domain_name: env.string(&state.agency_domain_name, &["OS_AGENCY_DOMAIN_NAME"]),
        shared_config_file: env.string(&state.shared_config_file, &["HW_SHARED_CONFIG_FILE"]),
        profile: env.string(&state.profile, &["HW_PROFILE"]),
        enterprise_project_id: env.string(&state.enterprise_project_id, &["HW_ENTERPRISE_PROJECT_ID"]),
        max_retries: env.number(&state.max_retries, &["HW_MAX_RETRIES"], DEFAULT_MAX_RETRIES)?,
        region: env.string(&state.region, &["HW_REGION_NAME", "OS_REGION_NAME"]),
        assume_role: assume_role(state, env),
        terraform_version,
        env: env.0.clone(),
        ..Default::default()
    };

    if !config.shared_config_file.is_empty() || !config.profile.is_empty() {
        shared::load(&mut config).await?;
    }
    if config.region.is_empty() {
        bail!("region should be provided");
    }

    let cloud = env.string(&state.cloud, &["HW_CLOUD"]);
    config.cloud = cloud_domain(&cloud, &config.region);
    config.regional = state.regional.as_ref_option().copied().unwrap_or(false)
        || config.region.starts_with(EUROPE_REGION_PREFIX);

    if config.tenant_id.is_empty() {
        config.tenant_id = match env.string(&state.project_id, &["HW_PROJECT_ID", "OS_PROJECT_ID"]) {
            project_id if !project_id.is_empty() => project_id,
            _ => env.string(&state.tenant_id, &["OS_TENANT_ID"]),
        };
        config.tenant_name = match env.string(&state.project_name, &["HW_PROJECT_NAME", "OS_PROJECT_NAME"]) {
            name if !name.is_empty() => name,
            _ => match env.string(&state.tenant_name, &["OS_TENANT_NAME"]) {
                name if !name.is_empty() => name,
                _ => config.region.clone(),
            },
        };
    }

    config.delegated_project = match env.string(&state.delegated_project, &["OS_DELEGATED_PROJECT"]) {
        project if !project.is_empty() => project,
        _ => config.region.clone(),
    };
    config.identity_endpoint = match env.string(&state.auth_url, &["HW_AUTH_URL", "OS_AUTH_URL"]) {
        url if !url.is_empty() => url,
        _ => format!("https://iam.{}.{}/v3", config.region, config.cloud),
    };

    if let Some(endpoints) = state.endpoints.as_ref_option() {
        config.endpoints = normalize_endpoints(
            endpoints
                .iter()
                .map(|(key, endpoint)| (&**key, endpoint.as_str())),
        )?;
    }
    Ok(config)
}

#[derive(Debug, Default, Clone)]
pub struct HuaweiCloudProvider {
    meta: ProviderMeta,
}

#[async_trait]
impl Provider for HuaweiCloudProvider {
    type Config<'a> = ProviderConfigState<'a>;
    type MetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(provider_schema())
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::Config<'a>) -> Option<()> {
        if let Some(max_retries) = config.max_retries.as_ref_option() {
            if *max_retries < 0 {
                diags.error_short("max_retries should be a positive value", AttributePath::new("max_retries"));
            }
        }
        if let Some(endpoints) = config.endpoints.as_ref_option() {
            for (key, endpoint) in endpoints {
                if endpoint.as_deref_option().is_some_and(|e| e.trim().is_empty()) {
                    diags.error(
                        "Invalid custom endpoint",
                        format!("the value of customer endpoint {key} must be specified"),
                        AttributePath::new("endpoints").key(key.to_string()),
                    );
                }
            }
        }
        diags.errors.is_empty().then_some(())
    }

    async fn configure<'a>(
        &self,
        diags: &mut Diagnostics,
        terraform_version: String,
        config: Self::Config<'a>,
    ) -> Option<()> {
        let mut config = new_config(&config, &Env::from_process(), terraform_version)
            .await
            .report(diags, "Error configuring the provider")?;
        config
            .load_and_validate()
            .await
            .report(diags, "Error authenticating the provider")?;

        if config.cloud == DEFAULT_EUROPE_CLOUD {
            let cloud = config.cloud.clone();
            config.set_service_endpoint("cdn", &format!("https://cdn.{cloud}/"));
            config.set_service_endpoint("ram", &format!("https://ram.{cloud}/"));
        }
        info!(region = config.region, cloud = config.cloud, "provider configured");
        debug!(?config, "provider configuration");
        self.meta.publish(config).await;
        Some(())
    }

    fn get_resources(&self, _diags: &mut Diagnostics) -> Option<HashMap<String, Box<dyn DynamicResource>>> {
        let meta = &self.meta;
        Some(map! {
            "vpc" => vpc::VpcResource::new(meta.clone()),
            "vpc_subnet" => vpc::SubnetResource::new(meta.clone()),
            "networking_secgroup" => vpc::SecGroupResource::new(meta.clone()),
            "identity_agency" => iam::AgencyResource::new(meta.clone()),
            "cci_pvc" => cci::PvcResource::new(meta.clone()),
            "obs_bucket" => obs::BucketResource::new(meta.clone())
        })
    }

    fn get_data_sources(&self, _diags: &mut Diagnostics) -> Option<HashMap<String, Box<dyn DynamicDataSource>>> {
        let meta = &self.meta;
        Some(map! {
            "vpc" => vpc::VpcDataSource::new(meta.clone()),
            "vpc_subnet" => vpc::SubnetDataSource::new(meta.clone()),
            "networking_secgroup" => vpc::SecGroupDataSource::new(meta.clone()),
            "availability_zones" => ecs::AvailabilityZonesDataSource::new(meta.clone())
        })
    }
}
