//! Optional configurations of a bucket: policy, tags, CORS, lifecycle, logging and website

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::client::Result;

use super::{Body, ObsClient};

const NO_SUCH_POLICY: &str = "NoSuchBucketPolicy";
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";
const NO_SUCH_CORS: &str = "NoSuchCORSConfiguration";
const NO_SUCH_LIFECYCLE: &str = "NoSuchLifecycleConfiguration";
const NO_SUCH_WEBSITE: &str = "NoSuchWebsiteConfiguration";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "Tagging", rename_all = "PascalCase")]
struct Tagging {
    tag_set: TagSet,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TagSet {
    #[serde(rename = "Tag")]
    tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CorsRule {
    #[serde(rename = "AllowedOrigin")]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "AllowedMethod")]
    pub allowed_methods: Vec<String>,
    #[serde(rename = "AllowedHeader", skip_serializing_if = "Vec::is_empty")]
    pub allowed_headers: Vec<String>,
    #[serde(rename = "ExposeHeader", skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    pub max_age_seconds: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "CORSConfiguration")]
struct CorsConfiguration {
    #[serde(rename = "CORSRule")]
    rules: Vec<CorsRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Expiration {
    pub days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Transition {
    pub days: i64,
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NoncurrentVersionExpiration {
    pub noncurrent_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct NoncurrentVersionTransition {
    pub noncurrent_days: i64,
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LifecycleRule {
    #[serde(rename = "ID")]
    pub id: String,
    pub prefix: String,
    /// `Enabled` or `Disabled`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Expiration>,
    #[serde(rename = "Transition", skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noncurrent_version_expiration: Option<NoncurrentVersionExpiration>,
    #[serde(rename = "NoncurrentVersionTransition", skip_serializing_if = "Vec::is_empty")]
    pub noncurrent_version_transitions: Vec<NoncurrentVersionTransition>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "LifecycleConfiguration")]
struct LifecycleConfiguration {
    #[serde(rename = "Rule")]
    rules: Vec<LifecycleRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Logging {
    pub target_bucket: String,
    pub target_prefix: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "BucketLoggingStatus", rename_all = "PascalCase")]
struct BucketLoggingStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    logging_enabled: Option<Logging>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RedirectAllRequestsTo {
    pub host_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct IndexDocument {
    pub suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ErrorDocument {
    pub key: String,
}

/// Routing rules are written by users as JSON and sent as XML: both use the same field names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RoutingRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<RoutingCondition>,
    pub redirect: RoutingRedirect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RoutingCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix_equals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_error_code_returned_equals: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RoutingRedirect {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_key_prefix_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_key_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_redirect_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRules {
    #[serde(rename = "RoutingRule")]
    pub rules: Vec<RoutingRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename = "WebsiteConfiguration", rename_all = "PascalCase")]
pub struct WebsiteConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_all_requests_to: Option<RedirectAllRequestsTo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_document: Option<IndexDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_document: Option<ErrorDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_rules: Option<RoutingRules>,
}

impl ObsClient {
    /// Policy of the bucket as a JSON document, `None` when it has none
    pub async fn get_policy(&self, bucket: &str) -> Result<Option<String>> {
        let response = match self
            .send(Method::GET, bucket, "", "policy", HeaderMap::new(), None)
            .await
        {
            Ok(response) => response,
            Err(err) if err.code() == Some(NO_SUCH_POLICY) => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(Some(response.text().await?))
    }

    pub async fn set_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.send(Method::PUT, bucket, "", "policy", HeaderMap::new(), Some(Body::json(policy)))
            .await?;
        Ok(())
    }

    pub async fn delete_policy(&self, bucket: &str) -> Result<()> {
        self.delete_sub_resource(bucket, "policy").await
    }

    pub async fn get_tags(&self, bucket: &str) -> Result<Vec<Tag>> {
        let tagging: Option<Tagging> = self
            .get_optional_xml(bucket, "tagging", NO_SUCH_TAG_SET)
            .await?;
        Ok(tagging.map(|t| t.tag_set.tags).unwrap_or_default())
    }

    /// Replace the tags of the bucket, removing them all when `tags` is empty
    pub async fn set_tags(&self, bucket: &str, tags: Vec<Tag>) -> Result<()> {
        if tags.is_empty() {
            return self.delete_sub_resource(bucket, "tagging").await;
        }
        let body = Tagging {
            tag_set: TagSet { tags },
        };
        self.put_xml(bucket, "tagging", &body).await
    }

    pub async fn get_cors_rules(&self, bucket: &str) -> Result<Vec<CorsRule>> {
        let config: Option<CorsConfiguration> = self
            .get_optional_xml(bucket, "cors", NO_SUCH_CORS)
            .await?;
        Ok(config.map(|c| c.rules).unwrap_or_default())
    }

    pub async fn set_cors_rules(&self, bucket: &str, rules: Vec<CorsRule>) -> Result<()> {
        if rules.is_empty() {
            return self.delete_sub_resource(bucket, "cors").await;
        }
        self.put_xml(bucket, "cors", &CorsConfiguration { rules }).await
    }

    pub async fn get_lifecycle_rules(&self, bucket: &str) -> Result<Vec<LifecycleRule>> {
        let config: Option<LifecycleConfiguration> = self
            .get_optional_xml(bucket, "lifecycle", NO_SUCH_LIFECYCLE)
            .await?;
        Ok(config.map(|c| c.rules).unwrap_or_default())
    }

    pub async fn set_lifecycle_rules(&self, bucket: &str, rules: Vec<LifecycleRule>) -> Result<()> {
        if rules.is_empty() {
            return self.delete_sub_resource(bucket, "lifecycle").await;
        }
        self.put_xml(bucket, "lifecycle", &LifecycleConfiguration { rules })
            .await
    }

    pub async fn get_logging(&self, bucket: &str) -> Result<Option<Logging>> {
        let status: BucketLoggingStatus = self.get_xml(bucket, "logging").await?;
        Ok(status.logging_enabled.filter(|l| !l.target_bucket.is_empty()))
    }

    /// Enable access logging to another bucket, or disable it with `None`
    pub async fn set_logging(&self, bucket: &str, logging: Option<Logging>) -> Result<()> {
        let body = BucketLoggingStatus {
            logging_enabled: logging,
        };
        self.put_xml(bucket, "logging", &body).await
    }

    pub async fn get_website(&self, bucket: &str) -> Result<Option<WebsiteConfiguration>> {
        self.get_optional_xml(bucket, "website", NO_SUCH_WEBSITE)
            .await
    }

    pub async fn set_website(&self, bucket: &str, website: Option<WebsiteConfiguration>) -> Result<()> {
        match website {
            Some(website) => self.put_xml(bucket, "website", &website).await,
            None => self.delete_sub_resource(bucket, "website").await,
        }
    }
}
