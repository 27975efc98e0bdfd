//! CCI v1 extended persistent volume claims: a claim created together with the volume it binds

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::client::{with_query, Result, ServiceClient};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing)]
    pub creation_timestamp: String,
    #[serde(skip_serializing)]
    pub uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaimSpec {
    pub volume_name: String,
    pub storage_class_name: String,
    pub access_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClaimStatus {
    pub phase: String,
    pub access_modes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
    pub status: ClaimStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexVolumeOptions {
    #[serde(rename = "volumeID")]
    pub volume_id: String,
    pub device_mount_path: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexVolume {
    pub driver: String,
    pub fs_type: String,
    pub options: FlexVolumeOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeSpec {
    pub flex_volume: FlexVolume,
    pub access_modes: Vec<String>,
    pub storage_class_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistentVolume {
    pub metadata: ObjectMeta,
    pub spec: VolumeSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtendedClaim {
    pub persistent_volume_claim: PersistentVolumeClaim,
    pub persistent_volume: PersistentVolume,
}

/// Options of the claim and of the volume it binds
#[derive(Debug, Clone, Default)]
pub struct ClaimOpts {
    pub namespace: String,
    pub name: String,
    pub volume_id: String,
    pub volume_type: String,
    pub device_mount_path: String,
    pub driver: String,
    pub fs_type: String,
    pub access_modes: Vec<String>,
}

impl ClaimOpts {
    fn body(&self) -> JsonValue {
        let metadata = ObjectMeta {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            ..Default::default()
        };
        json!([{
            "persistentVolumeClaim": {
                "apiVersion": "v1",
                "kind": "PersistentVolumeClaim",
                "metadata": metadata,
                "spec": ClaimSpec {
                    volume_name: self.name.clone(),
                    storage_class_name: self.volume_type.clone(),
                    access_modes: self.access_modes.clone(),
                },
            },
            "persistentVolume": {
                "apiVersion": "v1",
                "kind": "PersistentVolume",
                "metadata": metadata,
                "spec": VolumeSpec {
                    flex_volume: FlexVolume {
                        driver: self.driver.clone(),
                        fs_type: self.fs_type.clone(),
                        options: FlexVolumeOptions {
                            volume_id: self.volume_id.clone(),
                            device_mount_path: self.device_mount_path.clone(),
                            fs_type: self.fs_type.clone(),
                        },
                    },
                    access_modes: self.access_modes.clone(),
                    storage_class_name: self.volume_type.clone(),
                },
            },
        }])
    }
}

fn claims_url(client: &ServiceClient, namespace: &str) -> String {
    client.service_url(&["namespaces", namespace, "extended-persistentvolumeclaims"])
}

pub async fn create_claim(client: &ServiceClient, opts: &ClaimOpts) -> Result<()> {
    client
        .post::<_, JsonValue>(&claims_url(client, &opts.namespace), &opts.body())
        .await?;
    Ok(())
}

pub async fn list_claims(client: &ServiceClient, namespace: &str) -> Result<Vec<ExtendedClaim>> {
    let claims: Option<Vec<ExtendedClaim>> = client.get(&claims_url(client, namespace)).await?;
    Ok(claims.unwrap_or_default())
}

/// Claim named `name` in `namespace`, `None` when it does not exist
pub async fn find_claim(client: &ServiceClient, namespace: &str, name: &str) -> Result<Option<ExtendedClaim>> {
    let claims = list_claims(client, namespace).await?;
    Ok(claims
        .into_iter()
        .find(|claim| claim.persistent_volume_claim.metadata.name == name))
}

/// Delete the claim, the underlying volume is kept
pub async fn delete_claim(client: &ServiceClient, namespace: &str, name: &str, volume_type: &str) -> Result<()> {
    let url = with_query(
        &format!("{}/{name}", claims_url(client, namespace)),
        [("deleteVolume", "false"), ("storageType", volume_type)],
    );
    client.delete(&url).await
}
