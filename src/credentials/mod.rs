//! Ordered credential providers used by the object storage client

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};

mod env;
mod file;
mod remote;

pub use env::EnvProvider;
pub use file::SharedCredentialsProvider;
pub use remote::{ContainerProvider, InstanceMetadataProvider};

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_millis(100);
/// Temporary credentials are renewed this long before they expire
pub const EXPIRY_MARGIN: time::Duration = time::Duration::minutes(5);

/// Access key pair, with the session token of temporary credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: Option<OffsetDateTime>,
    /// Name of the provider that produced the credentials
    pub provider_name: &'static str,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("provider_name", &self.provider_name)
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            ..Default::default()
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = session_token.into();
        self
    }

    /// Whether temporary credentials are expired, or about to
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now + EXPIRY_MARGIN)
    }

    fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn retrieve(&self) -> Result<Credentials>;
}

/// Credentials given in the provider configuration
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "StaticProvider"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        if !self.credentials.is_complete() {
            bail!("static credentials are empty");
        }
        Ok(Credentials {
            provider_name: self.name(),
            ..self.credentials.clone()
        })
    }
}

/// Returns the credentials of the first provider that succeeds
#[derive(Default)]
pub struct ChainProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn retrieve(&self) -> Result<Credentials> {
        for provider in &self.providers {
            match provider.retrieve().await {
                Ok(credentials) if credentials.is_complete() => {
                    info!(provider = provider.name(), "retrieved credentials");
                    return Ok(credentials);
                }
                Ok(_) => debug!(provider = provider.name(), "provider returned empty credentials"),
                Err(err) => debug!(provider = provider.name(), "no credentials: {err:#}"),
            }
        }
        bail!("no valid credential sources found")
    }
}

/// Inputs of the credential chain
#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: String,
    /// Snapshot of the process environment
    pub env: HashMap<String, String>,
    pub http: reqwest::Client,
}

impl ChainOptions {
    pub fn from_process_env(http: reqwest::Client) -> Self {
        Self {
            env: std::env::vars().collect(),
            http,
            ..Default::default()
        }
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Parse durations such as `500ms`, `2s`, `1m30s` or a bare number of seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => humantime::parse_duration(value).ok(),
    }
}

/// Build the chain: static, environment, shared credentials file, container role
/// (when configured) and instance metadata (when reachable)
pub async fn build_chain(opts: &ChainOptions) -> ChainProvider {
    let mut providers: Vec<Box<dyn CredentialProvider>> = vec![
        Box::new(StaticProvider::new(
            Credentials::new(&opts.access_key, &opts.secret_key)
                .with_session_token(&opts.security_token),
        )),
        Box::new(EnvProvider::new(opts.env.clone())),
        Box::new(SharedCredentialsProvider::from_env(&opts.env)),
    ];

    if let Some(uri) = opts.var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
        providers.push(Box::new(ContainerProvider::new(opts.http.clone(), uri)));
    }

    let timeout = opts
        .var("AWS_METADATA_TIMEOUT")
        .and_then(parse_duration)
        .unwrap_or(DEFAULT_METADATA_TIMEOUT);
    let endpoint = opts
        .var("AWS_METADATA_URL")
        .unwrap_or(DEFAULT_METADATA_URL);
    let metadata = InstanceMetadataProvider::new(opts.http.clone(), endpoint, timeout);
    if metadata.is_available().await {
        providers.push(Box::new(metadata));
    } else {
        debug!(endpoint, "instance metadata is not reachable");
    }

    ChainProvider::new(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Failing;

    #[async_trait]
    impl CredentialProvider for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }
        async fn retrieve(&self) -> Result<Credentials> {
            bail!("nothing here")
        }
    }

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h 2m"), Some(Duration::from_secs(3720)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[tokio::test]
    async fn chain_falls_through() {
        let chain = ChainProvider::new(vec![
            Box::new(Failing),
            Box::new(StaticProvider::new(Credentials::new("", ""))),
            Box::new(StaticProvider::new(Credentials::new("AK", "SK"))),
        ]);
        let credentials = chain.retrieve().await.unwrap();
        assert_eq!(credentials.access_key_id, "AK");
        assert_eq!(credentials.provider_name, "StaticProvider");

        let chain = ChainProvider::new(vec![Box::new(Failing)]);
        let err = chain.retrieve().await.unwrap_err();
        assert_eq!(err.to_string(), "no valid credential sources found");
    }

    #[tokio::test]
    async fn chain_order_without_remote_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let opts = ChainOptions {
            env: env(&[
                ("HW_ACCESS_KEY", "ENVAK"),
                ("HW_SECRET_KEY", "ENVSK"),
                ("AWS_METADATA_URL", &server.uri()),
            ]),
            ..Default::default()
        };
        let chain = build_chain(&opts).await;
        assert_eq!(
            chain.names(),
            ["StaticProvider", "EnvProvider", "SharedCredentialsProvider"]
        );

        let credentials = chain.retrieve().await.unwrap();
        assert_eq!(credentials.access_key_id, "ENVAK");
        assert_eq!(credentials.provider_name, "EnvProvider");

        let opts = ChainOptions {
            access_key: "AK".into(),
            secret_key: "SK".into(),
            ..opts
        };
        let credentials = build_chain(&opts).await.retrieve().await.unwrap();
        assert_eq!(credentials.access_key_id, "AK");
    }

    #[tokio::test]
    async fn chain_with_remote_sources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("iam/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ecs-role"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/ecs-role"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AccessKeyId": "IMDSAK",
                "SecretAccessKey": "IMDSSK",
                "Token": "IMDSTOKEN",
                "Expiration": "2030-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let opts = ChainOptions {
            env: env(&[
                ("AWS_METADATA_URL", &server.uri()),
                ("AWS_METADATA_TIMEOUT", "2s"),
                ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/x"),
                ("AWS_SHARED_CREDENTIALS_FILE", "/does/not/exist"),
            ]),
            ..Default::default()
        };
        let chain = build_chain(&opts).await;
        assert_eq!(
            chain.names(),
            [
                "StaticProvider",
                "EnvProvider",
                "SharedCredentialsProvider",
                "ContainerProvider",
                "InstanceMetadataProvider"
            ]
        );

        // the container endpoint is not reachable from the tests
        let credentials = chain.retrieve().await.unwrap();
        assert_eq!(credentials.access_key_id, "IMDSAK");
        assert_eq!(credentials.session_token, "IMDSTOKEN");
        assert_eq!(credentials.provider_name, "InstanceMetadataProvider");
    }
}
