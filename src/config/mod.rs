use std::collections::HashMap;
use std::fmt::Debug;

use anyhow::{bail, Result};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{self, with_query, AuthMethod, Error, ProviderClient, ServiceClient};
use crate::credentials::{build_chain, ChainOptions, CredentialProvider, Credentials, StaticProvider};
use crate::obs::ObsClient;

mod auth;
pub mod catalog;
pub(crate) mod shared;
pub(crate) mod tls;

use catalog::{Scope, ServiceCatalog};

pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";
pub const DEFAULT_EUROPE_CLOUD: &str = "myhuaweicloud.eu";
pub const EUROPE_REGION_PREFIX: &str = "eu-west-1";
pub const DEFAULT_MAX_RETRIES: i64 = 5;
pub const SECURITY_KEY_URL: &str = "http://169.254.169.254/openstack/latest/securitykey";

/// Agency assumed to obtain temporary credentials before building the clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssumeRole {
    pub agency_name: String,
    pub domain_name: String,
    pub domain_id: String,
    /// Duration of the temporary credentials in seconds (0 keeps the service default)
    pub duration: i64,
}

/// Provider configuration, authenticated clients and per-region project ids
#[derive(Default)]
pub struct Config {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: String,
    pub domain_id: String,
    pub domain_name: String,
    pub user_name: String,
    pub user_id: String,
    pub password: String,
    pub token: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub region: String,
    pub cloud: String,
    pub regional: bool,
    pub identity_endpoint: String,
    pub insecure: bool,
    pub cacert_file: String,
    pub client_cert_file: String,
    pub client_key_file: String,
    pub agency_name: String,
    pub agency_domain_name: String,
    pub delegated_project: String,
    pub assume_role: Option<AssumeRole>,
    pub endpoints: HashMap<String, String>,
    pub shared_config_file: String,
    pub profile: String,
    pub enterprise_project_id: String,
    pub max_retries: i64,
    pub terraform_version: String,
    /// ECS metadata endpoint serving the temporary security key
    pub security_key_url: String,
    /// Environment the credential chain of the object storage client reads
    pub env: HashMap<String, String>,

    pub(crate) hw_client: Option<ProviderClient>,
    pub(crate) domain_client: Option<ProviderClient>,
    pub(crate) region_project_ids: Mutex<HashMap<String, String>>,
    /// Metadata security key the clients are signed with, reloaded once expired
    pub(crate) security_key: Mutex<Option<auth::SecurityKey>>,
    pub(crate) obs_credentials: Mutex<Option<Credentials>>,
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("region", &self.region)
            .field("cloud", &self.cloud)
            .field("identity_endpoint", &self.identity_endpoint)
            .field("domain_id", &self.domain_id)
            .field("domain_name", &self.domain_name)
            .field("tenant_id", &self.tenant_id)
            .field("tenant_name", &self.tenant_name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("user_name", &self.user_name)
            .field("agency_name", &self.agency_name)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Projects {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Domains {
    #[serde(default)]
    domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
struct Domain {
    id: String,
    name: String,
}

/// Cloud domain to use for a region when none is specified
pub fn cloud_domain(cloud: &str, region: &str) -> String {
    if !cloud.is_empty() {
        cloud.to_string()
    } else if region.starts_with(EUROPE_REGION_PREFIX) {
        DEFAULT_EUROPE_CLOUD.to_string()
    } else {
        DEFAULT_CLOUD.to_string()
    }
}

/// Normalize the custom endpoints and propagate them to every catalog key of the same service
pub fn normalize_endpoints<'a, I>(endpoints: I) -> Result<HashMap<String, String>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut normalized = HashMap::new();
    let mut keys = Vec::new();
    for (key, value) in endpoints {
        let mut endpoint = value.trim().to_string();
        if endpoint.is_empty() {
            bail!("the value of customer endpoint {key} must be specified");
        }
        if !endpoint.starts_with("http") {
            endpoint = format!("https://{endpoint}");
        }
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        normalized.insert(key.to_string(), endpoint);
        keys.push(key);
    }

    for key in keys {
        if let Some(endpoint) = normalized.get(key).cloned() {
            for derived in catalog::derived_keys(key) {
                normalized.insert(derived.to_string(), endpoint.clone());
            }
        }
    }

    debug!(?normalized, "customer endpoints");
    Ok(normalized)
}

impl Config {
    /// Authenticate and build the project and domain clients
    pub async fn load_and_validate(&mut self) -> Result<()> {
        if self.max_retries < 0 {
            bail!("max_retries should be a positive value");
        }
        if self.security_key_url.is_empty() {
            self.security_key_url = SECURITY_KEY_URL.to_string();
        }

        let http = tls::build_http_client(self).await?;
        auth::build_client(self, &http).await?;

        if let Some(role) = self.assume_role.clone() {
            if !role.agency_name.is_empty() {
                auth::build_client_by_assume_role(self, &http, &role).await?;
            }
        }

        if let Some(client) = &self.hw_client {
            if !client.project_id.is_empty() {
                self.region_project_ids
                    .lock()
                    .await
                    .insert(self.region.clone(), client.project_id.clone());
            }
        }

        if self.domain_id.is_empty() {
            match self.fetch_domain_id().await {
                Ok(domain_id) => {
                    info!(domain_id, "retrieved the domain id");
                    self.domain_id = domain_id.clone();
                    if let Some(client) = self.domain_client.as_mut() {
                        client.domain_id = domain_id;
                    }
                }
                Err(err) => warn!("get domain id failed: {err:#}"),
            }
        }

        Ok(())
    }

    /// Project or domain scoped client, signed with a valid metadata security key when one is used
    async fn provider_client(&self, admin: bool) -> client::Result<ProviderClient> {
        let client = if admin {
            self.domain_client.as_ref()
        } else {
            self.hw_client.as_ref()
        };
        let mut client = client
            .cloned()
            .ok_or_else(|| Error::config("the provider clients have not been initialized"))?;

        let mut security_key = self.security_key.lock().await;
        if let Some(key) = security_key.as_mut() {
            if key.is_expired(OffsetDateTime::now_utc()) {
                *key = auth::fetch_security_key(client.http(), &self.security_key_url)
                    .await
                    .map_err(|err| {
                        Error::config(format!(
                            "Error reloading Auth credentials from ECS Metadata API: {err:#}"
                        ))
                    })?;
                info!(expires_at = %key.expires_at, "reloaded the metadata security key");
            }
            client.auth = key.auth();
        }
        Ok(client)
    }

    /// Whether the provider authenticates requests with an AK/SK pair
    pub fn is_aksk(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Build a client for the service `srv` in `region`
    ///
    /// The endpoint is `https://{name}.{region}.{cloud}/{version}/{project_id}/{resource_base}/`
    /// unless a custom endpoint is configured for the service.
    pub async fn new_service_client(&self, srv: &str, region: &str) -> client::Result<ServiceClient> {
        let catalog = catalog::lookup(srv).ok_or_else(|| {
            Error::config(format!("service type {srv} is invalid or not supported"))
        })?;
        let client = self.provider_client(catalog.admin).await?;

        if let Some(endpoint) = self.endpoints.get(srv) {
            let base = catalog::resource_base(catalog, endpoint, &client.project_id);
            return Ok(ServiceClient::new(client, endpoint.clone(), base));
        }
        self.new_service_client_by_name(&client, catalog, region).await
    }

    async fn new_service_client_by_name(
        &self,
        client: &ProviderClient,
        catalog: &ServiceCatalog,
        region: &str,
    ) -> client::Result<ServiceClient> {
        if catalog.name.is_empty() || catalog.version.is_empty() {
            return Err(Error::config("must specify the service name and api version"));
        }
        if region != self.region && !self.is_aksk() {
            return Err(Error::config(
                "Resource-level region must be the same as Provider-level region when using non AK/SK authentication if Resource-level region set",
            ));
        }

        let project_id = self.project_id_for(client, region).await?;
        let mut client = client.clone();
        client.project_id = project_id.clone();

        let endpoint = if catalog.scope == Scope::Global && !self.regional {
            format!("https://{}.{}/", catalog.name, self.cloud)
        } else {
            format!("https://{}.{region}.{}/", catalog.name, self.cloud)
        };
        let base = catalog::resource_base(catalog, &endpoint, &project_id);
        Ok(ServiceClient::new(client, endpoint, base))
    }

    /// Project id of a region, queried once and cached
    async fn project_id_for(&self, client: &ProviderClient, region: &str) -> client::Result<String> {
        let mut projects = self.region_project_ids.lock().await;
        if let Some(project_id) = projects.get(region) {
            return Ok(project_id.clone());
        }

        info!(region, "load project id for region");
        let mut identity = client.clone();
        identity.project_id.clear();
        let found = list_projects(&identity, &self.identity_endpoint, &client.domain_id, region)
            .await
            .map_err(|err| Error::config(format!("List projects failed, err={err}")))?;
        if found.is_empty() {
            return Err(Error::config(format!(
                "Wrong name or no access to the region: {region}"
            )));
        }
        for project in found {
            projects.insert(project.name, project.id);
        }
        projects.get(region).cloned().ok_or_else(|| {
            Error::config(format!("Wrong name or no access to the region: {region}"))
        })
    }

    async fn fetch_domain_id(&self) -> Result<String> {
        let client = self.identity_v3_client(&self.region).await?;
        let url = client.service_url(&["auth", "domains"]);
        let domains: Domains = client.get(&url).await?;
        let Some(domain) = domains.domains.into_iter().next() else {
            bail!("domain was not found");
        };
        if !self.domain_name.is_empty() && self.domain_name != domain.name {
            bail!(
                "domain {} was not found, got {}",
                self.domain_name,
                domain.name
            );
        }
        Ok(domain.id)
    }

    /// Region of a resource, defaulting to the provider region
    pub fn get_region(&self, region: Option<&str>) -> String {
        match region {
            Some(region) if !region.is_empty() => region.to_string(),
            _ => self.region.clone(),
        }
    }

    /// Enterprise project of a resource, defaulting to the provider one
    pub fn get_enterprise_project_id(&self, eps_id: Option<&str>) -> String {
        match eps_id {
            Some(eps_id) if !eps_id.is_empty() => eps_id.to_string(),
            _ => self.enterprise_project_id.clone(),
        }
    }

    /// Set the endpoint of a service, and of every key derived from it
    pub fn set_service_endpoint(&mut self, srv: &str, endpoint: &str) {
        self.endpoints.insert(srv.to_string(), endpoint.to_string());
        for derived in catalog::derived_keys(srv) {
            self.endpoints
                .insert(derived.to_string(), endpoint.to_string());
        }
    }

    /// Endpoint of the object storage service in a region
    pub fn obs_endpoint(&self, region: &str) -> String {
        match self.endpoints.get("obs") {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://obs.{region}.{}/", self.cloud),
        }
    }

    /// Object storage client of a region, signed with the first credentials of the chain
    pub async fn object_storage_client(&self, region: &str) -> Result<ObsClient> {
        let client = self.provider_client(false).await?;
        let credentials = self.resolve_obs_credentials(&client).await?;
        Ok(ObsClient::new(
            client.http().clone(),
            &self.obs_endpoint(region),
            credentials,
        )?)
    }

    /// AK/SK of the provider clients come first in the chain. Otherwise the chain is
    /// resolved once and its credentials are kept until they expire.
    async fn resolve_obs_credentials(&self, client: &ProviderClient) -> Result<Credentials> {
        if let AuthMethod::AkSk {
            access_key,
            secret_key,
            security_token,
        } = &client.auth
        {
            let credentials = Credentials::new(access_key, secret_key)
                .with_session_token(security_token.as_deref().unwrap_or_default());
            return StaticProvider::new(credentials).retrieve().await;
        }

        let mut cached = self.obs_credentials.lock().await;
        if let Some(credentials) = cached.as_ref() {
            if !credentials.is_expired(OffsetDateTime::now_utc()) {
                return Ok(credentials.clone());
            }
        }

        let chain = build_chain(&ChainOptions {
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            security_token: self.security_token.clone(),
            env: self.env.clone(),
            http: client.http().clone(),
        })
        .await;
        let credentials = chain.retrieve().await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }

    pub async fn iam_v3_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("iam", region).await
    }

    pub async fn identity_v3_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("identity", region).await
    }

    pub async fn compute_v21_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("ecsv21", region).await
    }

    pub async fn cci_v1_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("cciv1", region).await
    }

    pub async fn networking_v1_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("vpc", region).await
    }

    pub async fn networking_v2_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("networkv2", region).await
    }

    pub async fn dns_region_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("dns_region", region).await
    }

    pub async fn security_group_client(&self, region: &str) -> client::Result<ServiceClient> {
        self.new_service_client("security_group", region).await
    }
}

async fn list_projects(
    client: &ProviderClient,
    identity_endpoint: &str,
    domain_id: &str,
    name: &str,
) -> client::Result<Vec<Project>> {
    let url = with_query(
        &format!("{}/projects", identity_endpoint.trim_end_matches('/')),
        [("domain_id", domain_id), ("name", name)],
    );
    let sc = ServiceClient::new(client.clone(), identity_endpoint.to_string(), String::new());
    let projects: Projects = sc.get(&url).await?;
    Ok(projects.projects)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::AuthMethod;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Configuration with a token-authenticated client and the given cached project
    pub(crate) fn test_config(region: &str, project_id: &str) -> Config {
        let mut client = ProviderClient::new(
            reqwest::Client::new(),
            format!("https://iam.{region}.{DEFAULT_CLOUD}/v3"),
            AuthMethod::AkSk {
                access_key: "AK".into(),
                secret_key: "SK".into(),
                security_token: None,
            },
        );
        client.project_id = project_id.to_string();
        let mut domain_client = client.clone();
        domain_client.project_id.clear();
        domain_client.domain_id = "did".into();

        let config = Config {
            region: region.to_string(),
            cloud: DEFAULT_CLOUD.to_string(),
            access_key: "AK".into(),
            secret_key: "SK".into(),
            domain_id: "did".into(),
            identity_endpoint: client.identity_endpoint.clone(),
            hw_client: Some(client),
            domain_client: Some(domain_client),
            ..Default::default()
        };
        config
            .region_project_ids
            .try_lock()
            .unwrap()
            .insert(region.to_string(), project_id.to_string());
        config
    }

    /// Configuration whose every service endpoint points to the mock server
    pub(crate) fn mock_config(server: &MockServer) -> Config {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut config = test_config("cn-north-4", "pid");
        let endpoint = format!("{}/", server.uri());
        for key in [
            "iam",
            "identity",
            "vpc",
            "networkv2",
            "security_group",
            "cciv1",
            "ecsv21",
            "dns_region",
            "obs",
        ] {
            config.endpoints.insert(key.to_string(), endpoint.clone());
        }
        config.identity_endpoint = format!("{}/v3", server.uri());
        config
    }

    async fn resource_base(config: &Config, srv: &str) -> String {
        config
            .new_service_client(srv, &config.region)
            .await
            .unwrap()
            .resource_base
    }

    #[tokio::test]
    async fn global_service_endpoints() {
        let config = test_config("cn-north-4", "pid");
        assert_eq!(resource_base(&config, "iam").await, "https://iam.myhuaweicloud.com/v3.0/");
        assert_eq!(resource_base(&config, "identity").await, "https://iam.myhuaweicloud.com/v3/");
        assert_eq!(resource_base(&config, "cdn").await, "https://cdn.myhuaweicloud.com/v1.0/");
        assert_eq!(resource_base(&config, "bss").await, "https://bss.myhuaweicloud.com/v1.0/");
        assert_eq!(resource_base(&config, "bssv2").await, "https://bss.myhuaweicloud.com/v2/");
        assert_eq!(resource_base(&config, "dns").await, "https://dns.myhuaweicloud.com/v2/");
    }

    #[tokio::test]
    async fn regional_service_endpoints() {
        let config = test_config("cn-north-4", "pid");
        let expected = [
            ("ecs", "https://ecs.cn-north-4.myhuaweicloud.com/v1/pid/"),
            ("ecsv11", "https://ecs.cn-north-4.myhuaweicloud.com/v1.1/pid/"),
            ("ecsv21", "https://ecs.cn-north-4.myhuaweicloud.com/v2.1/pid/"),
            ("autoscaling", "https://as.cn-north-4.myhuaweicloud.com/autoscaling-api/v1/pid/"),
            ("ims", "https://ims.cn-north-4.myhuaweicloud.com/v2/"),
            ("cce", "https://cce.cn-north-4.myhuaweicloud.com/api/v3/projects/pid/"),
            ("cciv1", "https://cci.cn-north-4.myhuaweicloud.com/api/v1/"),
            ("evs", "https://evs.cn-north-4.myhuaweicloud.com/v3/pid/"),
            ("volumev2", "https://evs.cn-north-4.myhuaweicloud.com/v2/pid/"),
            ("vpc", "https://vpc.cn-north-4.myhuaweicloud.com/v1/"),
            ("vpcv3", "https://vpc.cn-north-4.myhuaweicloud.com/v3/pid/"),
            ("networkv2", "https://vpc.cn-north-4.myhuaweicloud.com/v2.0/"),
            ("security_group", "https://vpc.cn-north-4.myhuaweicloud.com/v1/pid/"),
            ("vpcep", "https://vpcep.cn-north-4.myhuaweicloud.com/v1/pid/"),
            ("nat", "https://nat.cn-north-4.myhuaweicloud.com/v2/pid/"),
            ("elb", "https://elb.cn-north-4.myhuaweicloud.com/v1.0/pid/"),
            ("elbv2", "https://elb.cn-north-4.myhuaweicloud.com/v2.0/pid/"),
            ("elbv3", "https://elb.cn-north-4.myhuaweicloud.com/v3/pid/"),
            ("dns_region", "https://dns.cn-north-4.myhuaweicloud.com/v2/"),
            ("rds", "https://rds.cn-north-4.myhuaweicloud.com/v3/pid/"),
            ("rdsv1", "https://rds.cn-north-4.myhuaweicloud.com/rds/v1/pid/"),
            ("kms", "https://kms.cn-north-4.myhuaweicloud.com/v1.0/"),
            ("smn", "https://smn.cn-north-4.myhuaweicloud.com/v2/pid/notifications/"),
            ("waf", "https://waf.cn-north-4.myhuaweicloud.com/v1/pid/waf/"),
        ];
        for (srv, url) in expected {
            assert_eq!(resource_base(&config, srv).await, url, "service {srv}");
        }
        assert_eq!(config.obs_endpoint("cn-north-4"), "https://obs.cn-north-4.myhuaweicloud.com/");
    }

    #[tokio::test]
    async fn named_factories() {
        let config = test_config("cn-north-4", "pid");
        let region = "cn-north-4";
        let clients = [
            (config.iam_v3_client(region).await, "https://iam.myhuaweicloud.com/v3.0/"),
            (config.identity_v3_client(region).await, "https://iam.myhuaweicloud.com/v3/"),
            (config.compute_v21_client(region).await, "https://ecs.cn-north-4.myhuaweicloud.com/v2.1/pid/"),
            (config.cci_v1_client(region).await, "https://cci.cn-north-4.myhuaweicloud.com/api/v1/"),
            (config.networking_v1_client(region).await, "https://vpc.cn-north-4.myhuaweicloud.com/v1/"),
            (config.networking_v2_client(region).await, "https://vpc.cn-north-4.myhuaweicloud.com/v2.0/"),
            (config.dns_region_client(region).await, "https://dns.cn-north-4.myhuaweicloud.com/v2/"),
            (config.security_group_client(region).await, "https://vpc.cn-north-4.myhuaweicloud.com/v1/pid/"),
        ];
        for (client, url) in clients {
            assert_eq!(client.unwrap().resource_base, url);
        }
    }

    #[tokio::test]
    async fn regional_flag_and_custom_endpoints() {
        let mut config = test_config("cn-north-4", "pid");
        config.regional = true;
        assert_eq!(
            resource_base(&config, "iam").await,
            "https://iam.cn-north-4.myhuaweicloud.com/v3.0/"
        );

        config.endpoints = normalize_endpoints([("vpc", " vpc.example.com ")]).unwrap();
        assert_eq!(resource_base(&config, "vpc").await, "https://vpc.example.com/v1/");
        assert_eq!(resource_base(&config, "networkv2").await, "https://vpc.example.com/v2.0/");
        assert_eq!(
            resource_base(&config, "security_group").await,
            "https://vpc.example.com/v1/pid/"
        );

        config.set_service_endpoint("obs", "https://obs.example.com/");
        assert_eq!(config.obs_endpoint("cn-north-4"), "https://obs.example.com/");
    }

    #[tokio::test]
    async fn invalid_service_and_region() {
        let mut config = test_config("cn-north-4", "pid");
        let err = config.new_service_client("nope", "cn-north-4").await.unwrap_err();
        assert_eq!(err.to_string(), "service type nope is invalid or not supported");

        config.access_key.clear();
        let err = config.new_service_client("ecs", "cn-south-1").await.unwrap_err();
        assert!(err.to_string().starts_with("Resource-level region must be the same"));
    }

    #[test]
    fn endpoints_normalization() {
        let endpoints = normalize_endpoints([
            ("ecs", "ecs.example.com"),
            ("iam", "http://iam.local/"),
        ])
        .unwrap();
        assert_eq!(endpoints["ecs"], "https://ecs.example.com/");
        assert_eq!(endpoints["ecsv21"], "https://ecs.example.com/");
        assert_eq!(endpoints["iam"], "http://iam.local/");
        assert_eq!(endpoints["identity"], "http://iam.local/");

        let err = normalize_endpoints([("vpc", "  ")]).unwrap_err();
        assert_eq!(err.to_string(), "the value of customer endpoint vpc must be specified");
    }

    #[test]
    fn cloud_selection() {
        assert_eq!(cloud_domain("", "cn-north-4"), DEFAULT_CLOUD);
        assert_eq!(cloud_domain("", "eu-west-101"), DEFAULT_EUROPE_CLOUD);
        assert_eq!(cloud_domain("example.com", "eu-west-101"), "example.com");
    }

    #[test]
    fn region_and_eps_defaults() {
        let mut config = test_config("cn-north-4", "pid");
        config.enterprise_project_id = "0".into();
        assert_eq!(config.get_region(None), "cn-north-4");
        assert_eq!(config.get_region(Some("")), "cn-north-4");
        assert_eq!(config.get_region(Some("cn-east-3")), "cn-east-3");
        assert_eq!(config.get_enterprise_project_id(None), "0");
        assert_eq!(config.get_enterprise_project_id(Some("eps")), "eps");
    }

    #[tokio::test]
    async fn object_storage_credentials_are_resolved_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("iam/"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ecs-role"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/ecs-role"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AccessKeyId": "ROLEAK",
                "SecretAccessKey": "ROLESK",
                "Token": "ROLETOKEN",
                "Expiration": "2030-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config("cn-north-4", "pid");
        config.access_key.clear();
        config.secret_key.clear();
        if let Some(client) = config.hw_client.as_mut() {
            client.auth = AuthMethod::Token("token".into());
        }
        config.env = HashMap::from([
            ("AWS_METADATA_URL".to_string(), server.uri()),
            ("AWS_METADATA_TIMEOUT".to_string(), "2s".to_string()),
            ("AWS_SHARED_CREDENTIALS_FILE".to_string(), "/does/not/exist".to_string()),
        ]);

        for _ in 0..3 {
            config.object_storage_client("cn-north-4").await.unwrap();
        }
        let cached = config.obs_credentials.lock().await.clone().unwrap();
        assert_eq!(cached.access_key_id, "ROLEAK");
        assert_eq!(cached.provider_name, "InstanceMetadataProvider");
    }

    #[tokio::test]
    async fn object_storage_uses_provider_aksk() {
        let config = test_config("cn-north-4", "pid");
        let credentials = config
            .resolve_obs_credentials(config.hw_client.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(credentials.access_key_id, "AK");
        assert_eq!(credentials.provider_name, "StaticProvider");
        assert!(config.obs_credentials.lock().await.is_none());
    }

    #[tokio::test]
    async fn project_ids_are_loaded_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("name", "cn-east-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{"id": "east-pid", "name": "cn-east-3"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("name", "ap-nowhere"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"projects": []})))
            .mount(&server)
            .await;

        let mut config = test_config("cn-north-4", "pid");
        config.identity_endpoint = format!("{}/v3", server.uri());

        for _ in 0..2 {
            let client = config.new_service_client("ecs", "cn-east-3").await.unwrap();
            assert_eq!(client.project_id(), "east-pid");
            assert_eq!(
                client.resource_base,
                "https://ecs.cn-east-3.myhuaweicloud.com/v1/east-pid/"
            );
        }

        let err = config.new_service_client("ecs", "ap-nowhere").await.unwrap_err();
        assert_eq!(err.to_string(), "Wrong name or no access to the region: ap-nowhere");
    }
}
