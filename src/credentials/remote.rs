use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use super::{CredentialProvider, Credentials};

const CONTAINER_ENDPOINT: &str = "http://169.254.170.2";
const CONTAINER_TIMEOUT: Duration = Duration::from_secs(1);
const SECURITY_CREDENTIALS_PATH: &str = "/latest/meta-data/iam/security-credentials/";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RoleCredentials {
    code: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: String,
}

impl RoleCredentials {
    fn into_credentials(self, provider_name: &'static str) -> Result<Credentials> {
        if let Some(code) = self.code.filter(|c| c != "Success") {
            bail!("failed to retrieve role credentials: {code}");
        }
        Ok(Credentials {
            expires_at: OffsetDateTime::parse(&self.expiration, &Rfc3339).ok(),
            provider_name,
            ..Credentials::new(self.access_key_id, self.secret_access_key)
                .with_session_token(self.token)
        })
    }
}

/// Credentials of the task role served by the container agent
#[derive(Debug, Clone)]
pub struct ContainerProvider {
    http: reqwest::Client,
    url: String,
}

impl ContainerProvider {
    pub fn new(http: reqwest::Client, relative_uri: &str) -> Self {
        Self {
            http,
            url: format!("{CONTAINER_ENDPOINT}{relative_uri}"),
        }
    }
}

#[async_trait]
impl CredentialProvider for ContainerProvider {
    fn name(&self) -> &'static str {
        "ContainerProvider"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let role: RoleCredentials = self
            .http
            .get(&self.url)
            .timeout(CONTAINER_TIMEOUT)
            .send()
            .await
            .context("failed to reach the container credentials endpoint")?
            .error_for_status()?
            .json()
            .await?;
        role.into_credentials(self.name())
    }
}

/// Credentials of the role attached to the instance, from the metadata service
#[derive(Debug, Clone)]
pub struct InstanceMetadataProvider {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl InstanceMetadataProvider {
    pub fn new(http: reqwest::Client, endpoint: &str, timeout: Duration) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let text = self
            .http
            .get(format!("{}{path}", self.endpoint))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    /// Whether the metadata service answers
    pub async fn is_available(&self) -> bool {
        match self.get_text("/latest/meta-data/").await {
            Ok(_) => true,
            Err(err) => {
                debug!("instance metadata reachability check failed: {err:#}");
                false
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for InstanceMetadataProvider {
    fn name(&self) -> &'static str {
        "InstanceMetadataProvider"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let roles = self
            .get_text(SECURITY_CREDENTIALS_PATH)
            .await
            .context("failed to list the instance roles")?;
        let Some(role) = roles.lines().map(str::trim).find(|r| !r.is_empty()) else {
            bail!("no role is attached to the instance");
        };

        let body = self
            .get_text(&format!("{SECURITY_CREDENTIALS_PATH}{role}"))
            .await
            .with_context(|| format!("failed to get the credentials of role {role}"))?;
        let role: RoleCredentials = serde_json::from_str(&body)?;
        role.into_credentials(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn metadata_role_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SECURITY_CREDENTIALS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("role-a\nrole-b\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/role-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Code": "Success",
                "AccessKeyId": "AK",
                "SecretAccessKey": "SK",
                "Token": "TOKEN",
                "Expiration": "2030-05-01T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let provider =
            InstanceMetadataProvider::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(2));
        let credentials = provider.retrieve().await.unwrap();
        assert_eq!(credentials.access_key_id, "AK");
        assert_eq!(credentials.session_token, "TOKEN");
        assert_eq!(credentials.expires_at.map(|t| t.month()), Some(time::Month::May));
    }

    #[tokio::test]
    async fn metadata_unavailable_or_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let provider =
            InstanceMetadataProvider::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(2));
        assert!(!provider.is_available().await);

        let role = RoleCredentials {
            code: Some("Failure".into()),
            ..Default::default()
        };
        assert!(role.into_credentials("x").is_err());
    }
}
