use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::tls::{expand_home, home_dir};
use super::{AssumeRole, Config};

/// Shared configuration file of the hcloud CLI
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SharedConfig {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Profile {
    pub name: String,
    pub mode: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub security_token: String,
    pub region: String,
    pub project_id: String,
    pub domain_id: String,
    pub agency_domain_name: String,
    pub agency_name: String,
    pub sso_auth: Option<SsoAuth>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SsoAuth {
    pub sts_token: Option<StsToken>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct StsToken {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub security_token: String,
}

pub(crate) fn default_path() -> String {
    home_dir()
        .map(|home| home.join(".hcloud").join("config.json"))
        .unwrap_or_else(|| ".hcloud/config.json".into())
        .to_string_lossy()
        .into_owned()
}

/// Load credentials and defaults from the selected profile of the shared config file
pub(crate) async fn load(config: &mut Config) -> Result<()> {
    if config.shared_config_file.is_empty() {
        config.shared_config_file = default_path();
    }
    let path = expand_home(&config.shared_config_file);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        bail!(
            "The specified shared config file {} does not exist",
            path.display()
        );
    }

    let data = tokio::fs::read(&path)
        .await
        .context("Err reading from shared config file")?;
    let shared: SharedConfig =
        serde_json::from_slice(&data).context("Err parsing the shared config file")?;

    let current = if config.profile.is_empty() {
        shared.current.as_str()
    } else {
        config.profile.as_str()
    };
    let profile = shared
        .profiles
        .iter()
        .find(|p| p.name == current)
        .ok_or_else(|| anyhow!("Error finding profile {current} from shared config file"))?;
    debug!(profile = current, mode = %profile.mode, "using shared config profile");

    if profile.mode == "SSO" {
        let sts = profile
            .sso_auth
            .as_ref()
            .ok_or_else(|| anyhow!("Error finding ssoAuth config when auth mode is SSO"))?
            .sts_token
            .as_ref()
            .ok_or_else(|| anyhow!("Error finding ssoAuth.stsToken config when auth mode is SSO"))?;
        config.access_key = sts.access_key_id.clone();
        config.secret_key = sts.secret_access_key.clone();
        config.security_token = sts.security_token.clone();
    } else {
        config.access_key = profile.access_key_id.clone();
        config.secret_key = profile.secret_access_key.clone();
        config.security_token = profile.security_token.clone();
    }

    if !profile.region.is_empty() {
        config.region = profile.region.clone();
    }
    if !profile.domain_id.is_empty() {
        config.domain_id = profile.domain_id.clone();
    }
    if !profile.project_id.is_empty() {
        config.tenant_id = profile.project_id.clone();
    }
    if !profile.agency_name.is_empty() {
        let role = config.assume_role.get_or_insert_with(AssumeRole::default);
        role.agency_name = profile.agency_name.clone();
        if !profile.agency_domain_name.is_empty() {
            role.domain_name = profile.agency_domain_name.clone();
        }
    }

    Ok(())
}
