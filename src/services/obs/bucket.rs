use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, Schema};
use tf_provider::value::{Value, ValueBool, ValueEmpty, ValueList, ValueMap, ValueNumber, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, Resource};

use crate::config::Config;
use crate::obs::{normalize_storage_class, CreateBucketInput, ObsClient, Tag};
use crate::provider::ProviderMeta;
use crate::utils::{
    attribute, enterprise_project_attribute, force_new, keep_prior, non_empty, region_attribute, string,
    tags_attribute, tags_map, validate_regex, ReportDiagnostics, WithSchema,
};

use super::bucket_blocks::{
    self, cors_config, cors_state, lifecycle_config, lifecycle_state, logging_config, logging_state, same_json,
    website_config, website_state, CorsRuleState, LifecycleRuleState, LoggingState, WebsiteState,
};

const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
const DEFAULT_ACL: &str = "private";
const STORAGE_CLASSES: [&str; 3] = ["STANDARD", "WARM", "COLD"];
const ACLS: [&str; 4] = ["private", "public-read", "public-read-write", "log-delivery-write"];
const BUCKET_PATTERN: &str = r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$";
const DEFAULT_POLICY_FORMAT: &str = "obs";
const POLICY_FORMATS: [&str; 2] = ["obs", "s3"];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BucketState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub bucket: ValueString<'a>,
    pub storage_class: ValueString<'a>,
    pub acl: ValueString<'a>,
    pub versioning: ValueBool,
    pub quota: ValueNumber,
    pub force_destroy: ValueBool,
    pub enterprise_project_id: ValueString<'a>,
    pub bucket_domain_name: ValueString<'a>,
    pub policy: ValueString<'a>,
    pub policy_format: ValueString<'a>,
    pub tags: ValueMap<'a, ValueString<'a>>,
    pub logging: ValueList<Value<LoggingState<'a>>>,
    pub lifecycle_rule: ValueList<Value<LifecycleRuleState<'a>>>,
    pub website: ValueList<Value<WebsiteState<'a>>>,
    pub cors_rule: ValueList<Value<CorsRuleState<'a>>>,
}

impl<'a> WithSchema for BucketState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the bucket, its name"),
                    "region" => region_attribute(),
                    "bucket" => string(Required, "Name of the bucket, unique across the cloud"),
                    "storage_class" => string(OptionalComputed, "Storage class of the bucket: STANDARD (default), WARM or COLD"),
                    "acl" => string(OptionalComputed, "Canned ACL of the bucket, defaults to private"),
                    "versioning" => attribute(AttributeType::Bool, OptionalComputed, "Whether versioning is enabled (default: false)"),
                    "quota" => attribute(AttributeType::Number, OptionalComputed, "Storage quota of the bucket in bytes, 0 for no limit"),
                    "force_destroy" => attribute(AttributeType::Bool, OptionalComputed, "Delete every object of the bucket when destroying it (default: false)"),
                    "enterprise_project_id" => enterprise_project_attribute(),
                    "bucket_domain_name" => string(Computed, "Domain name of the bucket"),
                    "policy" => string(OptionalComputed, "Bucket policy as a JSON document"),
                    "policy_format" => string(OptionalComputed, "Syntax of the policy: obs (default) or s3"),
                    "tags" => tags_attribute()
                },
                blocks: bucket_blocks::blocks(),
                description: Description::plain("Bucket of the OBS object storage service"),
                ..Default::default()
            },
        }
    }
}

impl<'a> BucketState<'a> {
    fn validate(&self, diags: &mut Diagnostics) {
        validate_regex(
            diags,
            "bucket",
            &self.bucket,
            BUCKET_PATTERN,
            "the bucket name must have 3 to 63 lowercase letters, digits, hyphens or periods",
        );
        for (name, value, allowed) in [
            ("storage_class", &self.storage_class, &STORAGE_CLASSES[..]),
            ("acl", &self.acl, &ACLS[..]),
        ] {
            if let Some(value) = value.as_deref_option() {
                if !allowed.contains(&value) {
                    diags.error(
                        format!("Invalid value for {name}"),
                        format!("\"{value}\" is not one of {}", allowed.join(", ")),
                        AttributePath::new(name),
                    );
                }
            }
        }
        if let Some(quota) = self.quota.as_ref_option() {
            if *quota < 0 {
                diags.error_short("quota must not be negative", AttributePath::new("quota"));
            }
        }
        if let Some(format) = self.policy_format.as_deref_option() {
            if !POLICY_FORMATS.contains(&format) {
                diags.error(
                    "Invalid value for policy_format",
                    format!("\"{format}\" is not one of {}", POLICY_FORMATS.join(", ")),
                    AttributePath::new("policy_format"),
                );
            }
        }
        if let Some(policy) = self.policy.as_deref_option().filter(|p| !p.is_empty()) {
            if let Err(err) = serde_json::from_str::<serde_json::Value>(policy) {
                diags.error(
                    "Invalid value for policy",
                    format!("the policy is not a JSON document: {err}"),
                    AttributePath::new("policy"),
                );
            }
        }
        bucket_blocks::validate_blocks(diags, &self.logging, &self.lifecycle_rule, &self.website, &self.cors_rule);
    }

    fn set_defaults(&mut self) {
        if self.policy_format.is_null() {
            self.policy_format = DEFAULT_POLICY_FORMAT.into();
        }
        bucket_blocks::set_block_defaults(&mut self.logging, &mut self.cors_rule);
    }

    fn name(&self) -> &str {
        self.id.as_deref_option().unwrap_or(self.bucket.as_str())
    }
}

fn bucket_domain_name(bucket: &str, region: &str, cloud: &str) -> String {
    format!("{bucket}.obs.{region}.{cloud}")
}

async fn obs_client(diags: &mut Diagnostics, config: &Config, region: &str) -> Option<ObsClient> {
    config
        .object_storage_client(region)
        .await
        .report(diags, "Error creating OBS client")
}

async fn read_bucket<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: BucketState<'a>,
) -> Option<Value<BucketState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let client = obs_client(diags, config, &region).await?;
    let bucket = state.name().to_string();

    let metadata = client
        .head_bucket(&bucket)
        .await
        .report(diags, &format!("Error reading OBS bucket {bucket}"))?;
    let Some(metadata) = metadata else {
        warn!(bucket, "OBS bucket not found, removing from state");
        diags.root_warning("Resource not found", format!("OBS bucket({bucket}) not found"));
        return Some(Value::Null);
    };
    debug!(bucket, ?metadata, "retrieved OBS bucket metadata");

    state.id = bucket.clone().into();
    state.bucket = bucket.clone().into();
    state.bucket_domain_name = bucket_domain_name(&bucket, &region, &config.cloud).into();
    state.region = region.into();
    state.enterprise_project_id = non_empty(metadata.enterprise_project_id);

    match client.get_storage_class(&bucket).await {
        Ok(class) if class.is_empty() => state.storage_class = DEFAULT_STORAGE_CLASS.into(),
        Ok(class) => state.storage_class = normalize_storage_class(&class).to_string().into(),
        Err(err) => {
            warn!(bucket, "unable to read the storage class of the OBS bucket: {err}");
            diags.root_warning(
                format!("Error reading storage class of OBS bucket {bucket}"),
                err.to_string(),
            );
        }
    }
    let versioning = client
        .get_versioning(&bucket)
        .await
        .report(diags, &format!("Error reading versioning of OBS bucket {bucket}"))?;
    state.versioning = Value::Value(versioning);
    let quota = client
        .get_quota(&bucket)
        .await
        .report(diags, &format!("Error reading quota of OBS bucket {bucket}"))?;
    state.quota = Value::Value(quota);
    read_configurations(diags, &client, &bucket, &mut state).await?;
    if state.acl.is_null() || state.acl.is_unknown() {
        state.acl = DEFAULT_ACL.into();
    }
    if state.force_destroy.is_null() || state.force_destroy.is_unknown() {
        state.force_destroy = Value::Value(false);
    }
    Some(Value::Value(state))
}

/// Refresh the policy, the tags and the configurations described by nested blocks
async fn read_configurations(
    diags: &mut Diagnostics,
    client: &ObsClient,
    bucket: &str,
    state: &mut BucketState<'_>,
) -> Option<()> {
    let policy = client
        .get_policy(bucket)
        .await
        .report(diags, &format!("Error reading policy of OBS bucket {bucket}"))?;
    state.policy = match (policy, state.policy.as_deref_option()) {
        (Some(policy), Some(prior)) if same_json(&policy, prior) => state.policy.clone(),
        (Some(policy), _) => policy.into(),
        (None, _) => Value::Null,
    };
    if state.policy_format.is_null() || state.policy_format.is_unknown() {
        state.policy_format = DEFAULT_POLICY_FORMAT.into();
    }

    let tags = client
        .get_tags(bucket)
        .await
        .report(diags, &format!("Error reading tags of OBS bucket {bucket}"))?;
    state.tags = if tags.is_empty() && !state.tags.is_value() {
        Value::Null
    } else {
        Value::Value(tags.into_iter().map(|t| (t.key.into(), t.value.into())).collect())
    };

    let cors_rules = client
        .get_cors_rules(bucket)
        .await
        .report(diags, &format!("Error reading CORS rules of OBS bucket {bucket}"))?;
    state.cors_rule = cors_state(cors_rules, &state.cors_rule);

    let lifecycle_rules = client
        .get_lifecycle_rules(bucket)
        .await
        .report(diags, &format!("Error reading lifecycle rules of OBS bucket {bucket}"))?;
    state.lifecycle_rule = lifecycle_state(lifecycle_rules, &state.lifecycle_rule);

    let logging = client
        .get_logging(bucket)
        .await
        .report(diags, &format!("Error reading logging of OBS bucket {bucket}"))?;
    state.logging = logging_state(logging, &state.logging);

    let website = client
        .get_website(bucket)
        .await
        .report(diags, &format!("Error reading website of OBS bucket {bucket}"))?;
    state.website = website_state(website, &state.website);
    Some(())
}

/// Apply the mutable properties whose value differs from `prior`
async fn update_bucket(
    diags: &mut Diagnostics,
    client: &ObsClient,
    prior: &BucketState<'_>,
    state: &BucketState<'_>,
) -> Option<()> {
    let bucket = state.name();
    if let Some(acl) = state.acl.as_deref_option().filter(|_| prior.acl != state.acl) {
        debug!(bucket, acl, "set OBS bucket ACL");
        client
            .set_acl(bucket, acl)
            .await
            .report(diags, &format!("Error setting ACL of OBS bucket {bucket}"))?;
    }
    if let Some(class) = state
        .storage_class
        .as_deref_option()
        .filter(|_| prior.storage_class != state.storage_class)
    {
        debug!(bucket, class, "set OBS bucket storage class");
        client
            .set_storage_class(bucket, class)
            .await
            .report(diags, &format!("Error setting storage class of OBS bucket {bucket}"))?;
    }
    let enabled = state.versioning.as_ref_option().copied().unwrap_or(false);
    if enabled != prior.versioning.as_ref_option().copied().unwrap_or(false) {
        debug!(bucket, enabled, "set OBS bucket versioning");
        client
            .set_versioning(bucket, enabled)
            .await
            .report(diags, &format!("Error setting versioning of OBS bucket {bucket}"))?;
    }
    let quota = state.quota.as_ref_option().copied().unwrap_or(0);
    if quota != prior.quota.as_ref_option().copied().unwrap_or(0) {
        debug!(bucket, quota, "set OBS bucket quota");
        client
            .set_quota(bucket, quota)
            .await
            .report(diags, &format!("Error setting quota of OBS bucket {bucket}"))?;
    }
    update_configurations(diags, client, prior, state).await
}

async fn update_configurations(
    diags: &mut Diagnostics,
    client: &ObsClient,
    prior: &BucketState<'_>,
    state: &BucketState<'_>,
) -> Option<()> {
    let bucket = state.name();
    let policy = state.policy.as_deref_option().filter(|p| !p.is_empty());
    let prior_policy = prior.policy.as_deref_option().filter(|p| !p.is_empty());
    match (policy, prior_policy) {
        (Some(policy), Some(prior)) if same_json(policy, prior) => (),
        (Some(policy), _) => {
            debug!(bucket, "set OBS bucket policy");
            client
                .set_policy(bucket, policy)
                .await
                .report(diags, &format!("Error setting policy of OBS bucket {bucket}"))?;
        }
        (None, Some(_)) => {
            debug!(bucket, "delete OBS bucket policy");
            client
                .delete_policy(bucket)
                .await
                .report(diags, &format!("Error deleting policy of OBS bucket {bucket}"))?;
        }
        (None, None) => (),
    }

    let tags = tags_map(&state.tags);
    if tags != tags_map(&prior.tags) {
        debug!(bucket, ?tags, "set OBS bucket tags");
        let tags = tags.into_iter().map(|(key, value)| Tag { key, value }).collect();
        client
            .set_tags(bucket, tags)
            .await
            .report(diags, &format!("Error setting tags of OBS bucket {bucket}"))?;
    }

    let rules = cors_config(&state.cors_rule);
    if rules != cors_config(&prior.cors_rule) {
        debug!(bucket, count = rules.len(), "set OBS bucket CORS rules");
        client
            .set_cors_rules(bucket, rules)
            .await
            .report(diags, &format!("Error setting CORS rules of OBS bucket {bucket}"))?;
    }

    let rules = lifecycle_config(&state.lifecycle_rule);
    if rules != lifecycle_config(&prior.lifecycle_rule) {
        debug!(bucket, count = rules.len(), "set OBS bucket lifecycle rules");
        client
            .set_lifecycle_rules(bucket, rules)
            .await
            .report(diags, &format!("Error setting lifecycle rules of OBS bucket {bucket}"))?;
    }

    let logging = logging_config(&state.logging);
    if logging != logging_config(&prior.logging) {
        debug!(bucket, ?logging, "set OBS bucket logging");
        client
            .set_logging(bucket, logging)
            .await
            .report(diags, &format!("Error setting logging of OBS bucket {bucket}"))?;
    }

    let website = website_config(&state.website);
    if website != website_config(&prior.website) {
        debug!(bucket, ?website, "set OBS bucket website");
        client
            .set_website(bucket, website)
            .await
            .report(diags, &format!("Error setting website of OBS bucket {bucket}"))?;
    }
    Some(())
}

/// Delete every version of every object, delete markers included
async fn delete_all_objects(client: &ObsClient, bucket: &str) -> crate::client::Result<()> {
    let versions = client.list_object_versions(bucket).await?;
    debug!(bucket, count = versions.len(), "deleting every object version of the OBS bucket");
    for version in versions {
        client
            .delete_object(bucket, &version.key, Some(&version.version_id))
            .await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BucketResource {
    meta: ProviderMeta,
}

impl BucketResource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self { meta }
    }

    async fn config(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        self.meta.get(diags).await
    }
}

#[async_trait]
impl Resource for BucketResource {
    type State<'a> = Value<BucketState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(BucketState::schema())
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
        let state = read_bucket(diags, &config, state).await?;
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
        state.id = state.bucket.clone();
        if state.region.is_null() {
            state.region = config.region.clone().into();
        }
        if state.enterprise_project_id.is_null() {
            state.enterprise_project_id = non_empty(config.enterprise_project_id.clone());
        }
        if state.storage_class.is_null() {
            state.storage_class = DEFAULT_STORAGE_CLASS.into();
        }
        if state.acl.is_null() {
            state.acl = DEFAULT_ACL.into();
        }
        if state.versioning.is_null() {
            state.versioning = Value::Value(false);
        }
        if state.quota.is_null() {
            state.quota = Value::Value(0);
        }
        if state.force_destroy.is_null() {
            state.force_destroy = Value::Value(false);
        }
        state.set_defaults();
        state.bucket_domain_name = match (state.bucket.as_deref_option(), state.region.as_deref_option()) {
            (Some(bucket), Some(region)) => bucket_domain_name(bucket, region, &config.cloud).into(),
            _ => Value::Unknown,
        };
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
        keep_prior(&mut state.storage_class, &prior.storage_class);
        keep_prior(&mut state.acl, &prior.acl);
        keep_prior(&mut state.versioning, &prior.versioning);
        keep_prior(&mut state.quota, &prior.quota);
        keep_prior(&mut state.force_destroy, &prior.force_destroy);
        keep_prior(&mut state.policy, &prior.policy);
        keep_prior(&mut state.policy_format, &prior.policy_format);
        state.set_defaults();

        let mut replace = Vec::new();
        force_new(&mut replace, "region", &prior.region, &state.region);
        force_new(&mut replace, "bucket", &prior.bucket, &state.bucket);
        force_new(
            &mut replace,
            "enterprise_project_id",
            &prior.enterprise_project_id,
            &state.enterprise_project_id,
        );
        if replace.is_empty() {
            state.bucket_domain_name = prior.bucket_domain_name;
        } else {
            state.id = state.bucket.clone();
            state.bucket_domain_name = Value::Unknown;
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
        let client = obs_client(diags, &config, &region).await?;

        let input = CreateBucketInput {
            bucket: state.bucket.as_str().to_string(),
            acl: state.acl.as_deref_option().unwrap_or(DEFAULT_ACL).to_string(),
            storage_class: state
                .storage_class
                .as_deref_option()
                .unwrap_or(DEFAULT_STORAGE_CLASS)
                .to_string(),
            location: region.clone(),
            enterprise_project_id: config.get_enterprise_project_id(state.enterprise_project_id.as_deref_option()),
        };
        debug!(?input, "create OBS bucket options");
        client
            .create_bucket(&input)
            .await
            .report(diags, &format!("Error creating OBS bucket {}", input.bucket))?;
        info!(bucket = input.bucket, "OBS bucket created");
        state.id = input.bucket.clone().into();

        // ACL and storage class are set by the creation itself
        let created = BucketState {
            acl: state.acl.clone(),
            storage_class: state.storage_class.clone(),
            ..Default::default()
        };
        update_bucket(diags, &client, &created, &state).await?;

        let state = read_bucket(diags, &config, state).await?;
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
        let client = obs_client(diags, &config, &region).await?;

        update_bucket(diags, &client, &prior, &state).await?;
        let state = read_bucket(diags, &config, state).await?;
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
        let client = obs_client(diags, &config, &region).await?;
        let bucket = state.name();
        let force_destroy = state.force_destroy.as_ref_option().copied().unwrap_or(false);

        let result = match client.delete_bucket(bucket).await {
            Err(err) if err.code() == Some("BucketNotEmpty") && force_destroy => {
                warn!(bucket, "OBS bucket is not empty, deleting its objects");
                match delete_all_objects(&client, bucket).await {
                    Ok(()) => client.delete_bucket(bucket).await,
                    Err(err) => Err(err),
                }
            }
            Err(err) if err.code() == Some("BucketNotEmpty") => {
                diags.root_error(
                    format!("Error deleting OBS bucket {bucket}"),
                    format!("{err}, set force_destroy to delete the bucket with its objects"),
                );
                return None;
            }
            result => result,
        };
        match result {
            Ok(()) => info!(bucket, "OBS bucket deleted"),
            Err(err) if err.is_not_found() => warn!(bucket, "OBS bucket already deleted"),
            Err(err) => {
                diags.root_error(format!("Error deleting OBS bucket {bucket}"), err.to_string());
                return None;
            }
        }
        Some(())
    }

    /// The ID to import is the bucket name
    async fn import<'a>(
        &self,
        _diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let state = BucketState {
            id: id.clone().into(),
            bucket: id.into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}
