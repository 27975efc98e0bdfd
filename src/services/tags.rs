//! Tags of the networking resources (`/v2.0/{project_id}/{resource_type}/{id}/tags`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use tf_provider::value::{Value, ValueMap, ValueString};

use crate::client::{Result, ServiceClient};
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Tag {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Tags {
    #[serde(default)]
    tags: Vec<Tag>,
}

fn to_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

pub(crate) async fn get(
    client: &ServiceClient,
    resource_type: &str,
    id: &str,
) -> Result<BTreeMap<String, String>> {
    let url = client.service_url(&[client.project_id(), resource_type, id, "tags"]);
    let tags: Tags = client.get(&url).await?;
    Ok(tags.tags.into_iter().map(|t| (t.key, t.value)).collect())
}

async fn action(
    client: &ServiceClient,
    resource_type: &str,
    id: &str,
    action: &str,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    debug!(resource_type, id, action, ?tags, "tags action");
    let url = client.service_url(&[client.project_id(), resource_type, id, "tags", "action"]);
    client
        .post::<_, ()>(&url, &json!({"action": action, "tags": to_tags(tags)}))
        .await
}

pub(crate) async fn create(
    client: &ServiceClient,
    resource_type: &str,
    id: &str,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    action(client, resource_type, id, "create", tags).await
}

/// Remove the tags that disappeared or changed, then add the new values
pub(crate) async fn update(
    client: &ServiceClient,
    resource_type: &str,
    id: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Result<()> {
    let removed = old
        .iter()
        .filter(|(k, v)| new.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let added = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    action(client, resource_type, id, "delete", &removed).await?;
    action(client, resource_type, id, "create", &added).await
}

/// Apply the difference between two tag maps to a networking object of `region`
pub(crate) async fn apply(
    config: &Config,
    region: &str,
    resource_type: &str,
    id: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Result<()> {
    if old == new {
        return Ok(());
    }
    let client = config.networking_v2_client(region).await?;
    update(&client, resource_type, id, old, new).await
}

/// Refresh the tags of a networking object
///
/// Failures only log a warning and keep the known tags. An empty remote map
/// leaves unset tags null.
pub(crate) async fn refresh<'a>(
    config: &Config,
    region: &str,
    resource_type: &str,
    id: &str,
    tags: &mut ValueMap<'a, ValueString<'a>>,
) {
    let found = match config.networking_v2_client(region).await {
        Ok(client) => get(&client, resource_type, id).await,
        Err(err) => Err(err),
    };
    match found {
        Ok(found) if found.is_empty() && !tags.is_value() => *tags = Value::Null,
        Ok(found) => {
            *tags = Value::Value(
                found
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            )
        }
        Err(err) => warn!("error fetching tags of {resource_type} ({id}): {err}"),
    }
}
