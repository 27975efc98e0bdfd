use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tf_provider::schema::{AttributeConstraint, AttributeType, Block, Description, Schema};
use tf_provider::value::{Value, ValueEmpty, ValueList, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, Resource};

use crate::client::ServiceClient;
use crate::config::Config;
use crate::provider::ProviderMeta;
use crate::utils::{
    attribute, check_deleted, force_new, keep_prior, non_empty, region_attribute, string, validate_regex,
    ReportDiagnostics, WithSchema,
};
use crate::wait::Timeouts;

use super::api::{self, ClaimOpts, ExtendedClaim};

const DEFAULT_VOLUME_TYPE: &str = "sas";
const ACCESS_MODE: &str = "ReadWriteMany";
const DNS_LABEL_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$";

/// Flex volume driver and file system backing a storage class
fn volume_driver(volume_type: &str) -> Option<(&'static str, &'static str)> {
    match volume_type {
        "sas" | "ssd" | "sata" => Some(("huawei.com/fuxivol", "ext4")),
        "nfs-rw" => Some(("huawei.com/fuxinfs", "nfs")),
        "efs-standard" | "efs-performance" => Some(("huawei.com/fuxiefs", "efs")),
        "obs" => Some(("huawei.com/fuxiobs", "obs")),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PvcState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub region: ValueString<'a>,
    pub namespace: ValueString<'a>,
    pub name: ValueString<'a>,
    pub volume_id: ValueString<'a>,
    pub volume_type: ValueString<'a>,
    pub device_mount_path: ValueString<'a>,
    pub access_modes: ValueList<ValueString<'a>>,
    pub status: ValueString<'a>,
    pub creation_timestamp: ValueString<'a>,
}

impl<'a> WithSchema for PvcState<'a> {
    fn schema() -> Schema {
        use AttributeConstraint::*;
        Schema {
            version: 1,
            block: Block {
                version: 1,
                attributes: map! {
                    "id" => string(Computed, "ID of the claim, its name"),
                    "region" => region_attribute(),
                    "namespace" => string(Required, "Namespace of the claim"),
                    "name" => string(Required, "Name of the claim and of its volume"),
                    "volume_id" => string(Required, "ID of the existing volume to bind"),
                    "volume_type" => string(OptionalComputed, "Storage class of the volume, defaults to sas"),
                    "device_mount_path" => string(Required, "Mount path of the volume on the host"),
                    "access_modes" => attribute(
                        AttributeType::List(Box::new(AttributeType::String)),
                        Computed,
                        "Access modes of the claim",
                    ),
                    "status" => string(Computed, "Phase of the claim"),
                    "creation_timestamp" => string(Computed, "Creation time of the claim")
                },
                description: Description::plain("Persistent volume claim of a Cloud Container Instance namespace"),
                ..Default::default()
            },
        }
    }
}

impl<'a> PvcState<'a> {
    fn validate(&self, diags: &mut Diagnostics) {
        for (name, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            validate_regex(
                diags,
                name,
                value,
                DNS_LABEL_PATTERN,
                "the value must be a lowercase DNS label of at most 63 characters",
            );
        }
        if let Some(volume_type) = self.volume_type.as_deref_option() {
            if volume_driver(volume_type).is_none() {
                diags.error(
                    "Invalid value for volume_type",
                    format!("unsupported volume type \"{volume_type}\", expected one of sas, ssd, sata, nfs-rw, efs-standard, efs-performance or obs"),
                    AttributePath::new("volume_type"),
                );
            }
        }
    }

    fn set_claim(&mut self, region: String, claim: ExtendedClaim) {
        let pvc = claim.persistent_volume_claim;
        let options = claim.persistent_volume.spec.flex_volume.options;
        self.id = pvc.metadata.name.clone().into();
        self.region = region.into();
        self.name = pvc.metadata.name.into();
        if !pvc.metadata.namespace.is_empty() {
            self.namespace = pvc.metadata.namespace.into();
        }
        if !pvc.spec.storage_class_name.is_empty() {
            self.volume_type = pvc.spec.storage_class_name.into();
        }
        if !options.volume_id.is_empty() {
            self.volume_id = options.volume_id.into();
        }
        if !options.device_mount_path.is_empty() {
            self.device_mount_path = options.device_mount_path.into();
        }
        let access_modes = if pvc.status.access_modes.is_empty() {
            pvc.spec.access_modes
        } else {
            pvc.status.access_modes
        };
        self.access_modes = Value::Value(access_modes.into_iter().map(Into::into).collect());
        self.status = pvc.status.phase.into();
        self.creation_timestamp = non_empty(pvc.metadata.creation_timestamp);
    }
}

async fn cci_client(diags: &mut Diagnostics, config: &Config, region: &str) -> Option<ServiceClient> {
    config
        .cci_v1_client(region)
        .await
        .report(diags, "Error creating CCI client")
}

async fn read_pvc<'a>(
    diags: &mut Diagnostics,
    config: &Config,
    mut state: PvcState<'a>,
) -> Option<Value<PvcState<'a>>> {
    let region = config.get_region(state.region.as_deref_option());
    let client = cci_client(diags, config, &region).await?;
    let name = state.id.as_deref_option().or(state.name.as_deref_option()).unwrap_or_default();
    let found = api::find_claim(&client, state.namespace.as_str(), name)
        .await
        .report(diags, "Error retrieving CCI persistent volume claim")?;
    let Some(claim) = found else {
        warn!(name, "CCI persistent volume claim not found, removing from state");
        return Some(Value::Null);
    };
    debug!(name, phase = claim.persistent_volume_claim.status.phase, "retrieved CCI persistent volume claim");
    state.set_claim(region, claim);
    Some(Value::Value(state))
}

#[derive(Debug, Clone)]
pub struct PvcResource {
    meta: ProviderMeta,
    timeouts: Timeouts,
}

impl PvcResource {
    pub fn new(meta: ProviderMeta) -> Self {
        Self {
            meta,
            timeouts: Timeouts::minutes(5, 5, 3),
        }
    }

    async fn config(&self, diags: &mut Diagnostics) -> Option<Arc<Config>> {
        self.meta.get(diags).await
    }
}

#[async_trait]
impl Resource for PvcResource {
    type State<'a> = Value<PvcState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(PvcState::schema())
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
        let state = read_pvc(diags, &config, state).await?;
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
        state.id = state.name.clone();
        state.access_modes = Value::Unknown;
        state.status = Value::Unknown;
        state.creation_timestamp = Value::Unknown;
        if state.region.is_null() {
            state.region = config.region.clone().into();
        }
        if state.volume_type.is_null() {
            state.volume_type = DEFAULT_VOLUME_TYPE.into();
        }
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
        keep_prior(&mut state.volume_type, &prior.volume_type);

        let mut replace = Vec::new();
        force_new(&mut replace, "region", &prior.region, &state.region);
        force_new(&mut replace, "namespace", &prior.namespace, &state.namespace);
        force_new(&mut replace, "name", &prior.name, &state.name);
        force_new(&mut replace, "volume_id", &prior.volume_id, &state.volume_id);
        force_new(&mut replace, "volume_type", &prior.volume_type, &state.volume_type);
        force_new(
            &mut replace,
            "device_mount_path",
            &prior.device_mount_path,
            &state.device_mount_path,
        );
        if !replace.is_empty() {
            state.id = state.name.clone();
            state.access_modes = Value::Unknown;
            state.status = Value::Unknown;
            state.creation_timestamp = Value::Unknown;
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
        let client = cci_client(diags, &config, &region).await?;

        let volume_type = state.volume_type.as_deref_option().unwrap_or(DEFAULT_VOLUME_TYPE);
        let Some((driver, fs_type)) = volume_driver(volume_type) else {
            diags.error_short(
                format!("unsupported volume type \"{volume_type}\""),
                AttributePath::new("volume_type"),
            );
            return None;
        };
        let opts = ClaimOpts {
            namespace: state.namespace.as_str().to_string(),
            name: state.name.as_str().to_string(),
            volume_id: state.volume_id.as_str().to_string(),
            volume_type: volume_type.to_string(),
            device_mount_path: state.device_mount_path.as_str().to_string(),
            driver: driver.to_string(),
            fs_type: fs_type.to_string(),
            access_modes: vec![ACCESS_MODE.to_string()],
        };
        debug!(?opts, "create CCI persistent volume claim options");
        api::create_claim(&client, &opts)
            .await
            .report(diags, "Error creating CCI persistent volume claim")?;
        info!(namespace = opts.namespace, name = opts.name, "CCI persistent volume claim created");
        state.id = opts.name.clone().into();

        self.timeouts
            .on_create(&["Pending"], &["Bound"])
            .wait_for_state(|| async {
                let claim = api::find_claim(&client, &opts.namespace, &opts.name).await?;
                let phase = claim
                    .as_ref()
                    .map(|claim| claim.persistent_volume_claim.status.phase.clone())
                    .unwrap_or_default();
                Ok((claim, phase))
            })
            .await
            .report(diags, "Error waiting for CCI persistent volume claim to become bound")?;

        let state = read_pvc(diags, &config, state).await?;
        Some((state, planned_private_state))
    }

    async fn update<'a>(
        &self,
        diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let config = self.config(diags).await?;
        let state = planned_state.as_option().unwrap_or_default();
        let state = read_pvc(diags, &config, state).await?;
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
        let client = cci_client(diags, &config, &region).await?;

        let (namespace, name) = (state.namespace.as_str(), state.name.as_str());
        let volume_type = state.volume_type.as_deref_option().unwrap_or(DEFAULT_VOLUME_TYPE);
        check_deleted(
            api::delete_claim(&client, namespace, name, volume_type).await,
            "CCI persistent volume claim",
        )
        .report(diags, "Error deleting CCI persistent volume claim")?;

        self.timeouts
            .on_delete(&["Bound"], &["Deleted"])
            .wait_for_state(|| async {
                let phase = match api::find_claim(&client, namespace, name).await? {
                    Some(claim) => claim.persistent_volume_claim.status.phase,
                    None => "Deleted".to_string(),
                };
                Ok((Some(()), phase))
            })
            .await
            .report(diags, "Error waiting for CCI persistent volume claim to be deleted")?;
        info!(namespace, name, "CCI persistent volume claim deleted");
        Some(())
    }

    /// The ID to import is `{namespace}/{name}`
    async fn import<'a>(
        &self,
        diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let Some((namespace, name)) = id.split_once('/').filter(|(ns, name)| !ns.is_empty() && !name.is_empty()) else {
            diags.root_error(
                "Invalid import ID",
                format!("\"{id}\" must be in the format <namespace>/<name>"),
            );
            return None;
        };
        let state = PvcState {
            id: name.to_string().into(),
            namespace: namespace.to_string().into(),
            name: name.to_string().into(),
            ..Default::default()
        };
        Some((Value::Value(state), Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::mock_config;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLAIMS: &str = "/api/v1/namespaces/ns/extended-persistentvolumeclaims";

    fn resource(server: &MockServer) -> PvcResource {
        PvcResource {
            meta: ProviderMeta::configured(mock_config(server)),
            timeouts: Timeouts::immediate(),
        }
    }

    fn claims(phase: &str) -> serde_json::Value {
        json!([{
            "persistentVolumeClaim": {
                "metadata": {
                    "name": "data",
                    "namespace": "ns",
                    "creationTimestamp": "2024-01-01T00:00:00Z"
                },
                "spec": {"volumeName": "data", "storageClassName": "sas", "accessModes": ["ReadWriteMany"]},
                "status": {"phase": phase, "accessModes": ["ReadWriteMany"]}
            },
            "persistentVolume": {
                "metadata": {"name": "data"},
                "spec": {"flexVolume": {
                    "driver": "huawei.com/fuxivol",
                    "fsType": "ext4",
                    "options": {"volumeID": "vol-1", "deviceMountPath": "/mnt/data", "fsType": "ext4"}
                }}
            }
        }])
    }

    fn planned() -> PvcState<'static> {
        PvcState {
            id: "data".into(),
            region: "cn-north-4".into(),
            namespace: "ns".into(),
            name: "data".into(),
            volume_id: "vol-1".into(),
            volume_type: "sas".into(),
            device_mount_path: "/mnt/data".into(),
            access_modes: Value::Unknown,
            status: Value::Unknown,
            creation_timestamp: Value::Unknown,
        }
    }

    #[tokio::test]
    async fn validation() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let config = PvcState {
            name: "Data_1".into(),
            volume_type: "hdd".into(),
            ..planned()
        };
        assert!(resource.validate(&mut diags, Value::Value(config)).await.is_none());
        assert_eq!(diags.errors.len(), 2);
    }

    #[tokio::test]
    async fn plan_replaces_on_volume_change() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let prior = PvcState {
            status: "Bound".into(),
            ..planned()
        };
        let proposed = PvcState {
            volume_id: "vol-2".into(),
            volume_type: Value::Null,
            ..prior.clone()
        };
        let (state, _, replace) = resource
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
        assert_eq!(replace, vec![AttributePath::new("volume_id")]);
        let state = state.as_option().unwrap();
        assert_eq!(state.volume_type.as_str(), "sas");
        assert!(state.status.is_unknown());
    }

    #[tokio::test]
    async fn create_waits_for_bound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CLAIMS))
            .and(body_json(json!([{
                "persistentVolumeClaim": {
                    "apiVersion": "v1",
                    "kind": "PersistentVolumeClaim",
                    "metadata": {"name": "data", "namespace": "ns"},
                    "spec": {"volumeName": "data", "storageClassName": "sas", "accessModes": ["ReadWriteMany"]}
                },
                "persistentVolume": {
                    "apiVersion": "v1",
                    "kind": "PersistentVolume",
                    "metadata": {"name": "data", "namespace": "ns"},
                    "spec": {
                        "flexVolume": {
                            "driver": "huawei.com/fuxivol",
                            "fsType": "ext4",
                            "options": {"volumeID": "vol-1", "deviceMountPath": "/mnt/data", "fsType": "ext4"}
                        },
                        "accessModes": ["ReadWriteMany"],
                        "storageClassName": "sas"
                    }
                }
            }])))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims("Pending")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims("Bound")))
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
        assert_eq!(state.id.as_str(), "data");
        assert_eq!(state.status.as_str(), "Bound");
        assert_eq!(state.creation_timestamp.as_str(), "2024-01-01T00:00:00Z");
        assert_eq!(state.access_modes, Value::Value(vec![ValueString::from("ReadWriteMany")]));
    }

    #[tokio::test]
    async fn create_fails_on_unexpected_phase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims("Lost")))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        assert!(resource
            .create(&mut diags, Value::Value(planned()), Value::Value(planned()), Value::Null, Value::Null)
            .await
            .is_none());
        assert_eq!(diags.errors[0].detail, "unexpected state 'Lost', wanted target 'Bound'");
    }

    #[tokio::test]
    async fn read_removes_missing_claim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let (state, _) = resource
            .read(&mut diags, Value::Value(planned()), Value::Null, Value::Null)
            .await
            .unwrap();
        assert!(state.is_null());
        assert!(diags.errors.is_empty());
    }

    #[tokio::test]
    async fn destroy_keeps_volume_and_waits() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{CLAIMS}/data")))
            .and(query_param("deleteVolume", "false"))
            .and(query_param("storageType", "sas"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims("Bound")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CLAIMS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        assert!(resource.destroy(&mut diags, Value::Value(planned()), Value::Null, Value::Null).await.is_some());
        assert!(diags.errors.is_empty(), "{diags:?}");
    }

    #[tokio::test]
    async fn import_ids() {
        let server = MockServer::start().await;
        let resource = resource(&server);
        let mut diags = Diagnostics::default();
        let (state, _) = resource.import(&mut diags, "ns/data".to_string()).await.unwrap();
        let state = state.as_option().unwrap();
        assert_eq!(state.namespace.as_str(), "ns");
        assert_eq!(state.name.as_str(), "data");

        assert!(resource.import(&mut diags, "data".to_string()).await.is_none());
        assert_eq!(diags.errors.len(), 1);
    }
}
