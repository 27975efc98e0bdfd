use anyhow::{anyhow, bail, Context, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{list_projects, AssumeRole, Config};
use crate::client::{AuthMethod, ProviderClient};
use crate::credentials::EXPIRY_MARGIN;

const HEADER_SUBJECT_TOKEN: &str = "x-subject-token";
const ASSUME_ROLE_DURATION: i64 = 12 * 60 * 60;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenBody {
    token: TokenInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenInfo {
    project: Option<IdRef>,
    user: Option<TokenUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenUser {
    domain: Option<IdRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IdRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialBody {
    credential: TemporaryCredential,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TemporaryCredential {
    access: String,
    secret: String,
    securitytoken: String,
    expires_at: String,
}

/// Temporary AK/SK served by the ECS metadata
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SecurityKey {
    pub access: String,
    pub secret: String,
    pub security_token: String,
    pub expires_at: OffsetDateTime,
}

impl std::fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityKey")
            .field("access", &self.access)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl SecurityKey {
    pub fn auth(&self) -> AuthMethod {
        AuthMethod::AkSk {
            access_key: self.access.clone(),
            secret_key: self.secret.clone(),
            security_token: Some(self.security_token.clone()),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now + EXPIRY_MARGIN
    }
}

/// Token obtained from IAM and the ids it is scoped to
struct ScopedToken {
    token: String,
    project_id: String,
    domain_id: String,
}

fn max_retries(config: &Config) -> u32 {
    u32::try_from(config.max_retries).unwrap_or_default()
}

fn new_client(config: &Config, http: &reqwest::Client, auth: AuthMethod) -> ProviderClient {
    let mut client = ProviderClient::new(http.clone(), config.identity_endpoint.clone(), auth);
    client.max_retries = max_retries(config);
    client
}

fn has_agency(config: &Config) -> bool {
    !config.agency_name.is_empty() && !config.agency_domain_name.is_empty()
}

/// Build the project and domain clients from the first available credentials:
/// token, AK/SK, password and finally the ECS metadata security key
pub(super) async fn build_client(config: &mut Config, http: &reqwest::Client) -> Result<()> {
    if !config.token.is_empty() {
        info!("authenticating with a token");
        let auth = AuthMethod::Token(config.token.clone());
        build_clients(config, http, auth).await
    } else if config.is_aksk() {
        info!("authenticating with AK/SK");
        let auth = aksk(config);
        build_clients(config, http, auth).await
    } else if !config.password.is_empty()
        && (!config.user_name.is_empty() || !config.user_id.is_empty())
    {
        info!("authenticating with a password");
        build_clients_by_password(config, http).await
    } else {
        info!("authenticating with the ECS metadata security key");
        build_clients_by_metadata(config, http).await
    }
}

fn aksk(config: &Config) -> AuthMethod {
    AuthMethod::AkSk {
        access_key: config.access_key.clone(),
        secret_key: config.secret_key.clone(),
        security_token: (!config.security_token.is_empty()).then(|| config.security_token.clone()),
    }
}

/// Build the clients of credentials usable as is (token or AK/SK)
async fn build_clients(config: &mut Config, http: &reqwest::Client, auth: AuthMethod) -> Result<()> {
    if has_agency(config) {
        let base = new_client(config, http, auth);
        return build_agency_clients(config, &base).await;
    }

    let mut client = new_client(config, http, auth.clone());
    client.domain_id = config.domain_id.clone();
    client.project_id = if config.tenant_id.is_empty() {
        find_project_id(config, &client, &config.tenant_name).await?
    } else {
        config.tenant_id.clone()
    };

    let mut domain_client = new_client(config, http, auth);
    domain_client.domain_id = config.domain_id.clone();

    config.hw_client = Some(client);
    config.domain_client = Some(domain_client);
    Ok(())
}

async fn find_project_id(config: &Config, client: &ProviderClient, name: &str) -> Result<String> {
    let mut lookup = client.clone();
    lookup.project_id.clear();
    let projects = list_projects(&lookup, &config.identity_endpoint, &config.domain_id, name)
        .await
        .with_context(|| format!("Error querying the project {name}"))?;
    projects
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .ok_or_else(|| anyhow!("Wrong name or no access to the region: {name}"))
}

async fn build_clients_by_password(config: &mut Config, http: &reqwest::Client) -> Result<()> {
    let mut user = json!({ "password": config.password });
    if !config.user_id.is_empty() {
        user["id"] = json!(config.user_id);
    } else {
        user["name"] = json!(config.user_name);
        user["domain"] = domain_ref(config);
    }
    let identity = json!({
        "methods": ["password"],
        "password": { "user": user },
    });

    let anonymous = new_client(config, http, AuthMethod::Token(String::new()));
    if has_agency(config) {
        let domain = request_token(&anonymous, identity.clone(), json!({ "domain": domain_ref(config) })).await?;
        let base = new_client(config, http, AuthMethod::Token(domain.token));
        return build_agency_clients(config, &base).await;
    }

    let project_scope = if config.tenant_id.is_empty() {
        json!({ "project": { "name": config.tenant_name, "domain": domain_ref(config) } })
    } else {
        json!({ "project": { "id": config.tenant_id } })
    };
    let project = request_token(&anonymous, identity.clone(), project_scope).await?;
    let domain = request_token(&anonymous, identity, json!({ "domain": domain_ref(config) })).await?;

    if config.domain_id.is_empty() && !project.domain_id.is_empty() {
        config.domain_id = project.domain_id.clone();
    }
    set_token_clients(config, http, project, domain);
    Ok(())
}

fn domain_ref(config: &Config) -> JsonValue {
    if config.domain_id.is_empty() {
        json!({ "name": config.domain_name })
    } else {
        json!({ "id": config.domain_id })
    }
}

fn set_token_clients(config: &mut Config, http: &reqwest::Client, project: ScopedToken, domain: ScopedToken) {
    let mut client = new_client(config, http, AuthMethod::Token(project.token));
    client.project_id = project.project_id;
    client.domain_id = config.domain_id.clone();

    let mut domain_client = new_client(config, http, AuthMethod::Token(domain.token));
    domain_client.domain_id = if config.domain_id.is_empty() {
        domain.domain_id
    } else {
        config.domain_id.clone()
    };

    config.hw_client = Some(client);
    config.domain_client = Some(domain_client);
}

/// Exchange the current credentials for tokens of the delegated agency
async fn build_agency_clients(config: &mut Config, base: &ProviderClient) -> Result<()> {
    let identity = json!({
        "methods": ["assume_role"],
        "assume_role": {
            "domain_name": config.agency_domain_name,
            "agency_name": config.agency_name,
        },
    });
    let project_scope = json!({
        "project": {
            "name": config.delegated_project,
            "domain": { "name": config.agency_domain_name },
        }
    });
    let domain_scope = json!({ "domain": { "name": config.agency_domain_name } });

    let project = request_token(base, identity.clone(), project_scope)
        .await
        .context("Error assuming the agency")?;
    let domain = request_token(base, identity, domain_scope)
        .await
        .context("Error assuming the agency")?;
    debug!(agency = config.agency_name, project_id = project.project_id, "assumed agency");

    let http = base.http().clone();
    set_token_clients(config, &http, project, domain);
    Ok(())
}

async fn request_token(client: &ProviderClient, identity: JsonValue, scope: JsonValue) -> Result<ScopedToken> {
    let url = format!("{}/auth/tokens", client.identity_endpoint.trim_end_matches('/'));
    let body = json!({ "auth": { "identity": identity, "scope": scope } });

    let response = post_token_request(client, &url, serde_json::to_vec(&body)?).await?;

    let token = response
        .headers()
        .get(HEADER_SUBJECT_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("the IAM response carries no X-Subject-Token header"))?;
    let body: TokenBody = response.json().await.unwrap_or_default();

    Ok(ScopedToken {
        token,
        project_id: body.token.project.map(|p| p.id).unwrap_or_default(),
        domain_id: body
            .token
            .user
            .and_then(|u| u.domain)
            .map(|d| d.id)
            .unwrap_or_default(),
    })
}

async fn post_token_request(
    client: &ProviderClient,
    url: &str,
    body: Vec<u8>,
) -> Result<reqwest::Response> {
    match &client.auth {
        // password requests carry their credentials in the body
        AuthMethod::Token(token) if token.is_empty() => {
            let response = client
                .http()
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await?;
                return Err(crate::client::Error::from_response(Method::POST, url, status, &text).into());
            }
            Ok(response)
        }
        _ => Ok(client.request(Method::POST, url, Some(body)).await?),
    }
}

async fn build_clients_by_metadata(config: &mut Config, http: &reqwest::Client) -> Result<()> {
    let key = fetch_security_key(http, &config.security_key_url).await.map_err(|err| {
        anyhow!(
            "Error fetching Auth credentials from ECS Metadata API, AkSk or ECS agency must be provided: {err:#}"
        )
    })?;
    config.access_key = key.access.clone();
    config.secret_key = key.secret.clone();
    config.security_token = key.security_token.clone();
    debug!(expires_at = %key.expires_at, "fetched the ECS metadata security key");

    let agency = has_agency(config);
    let auth = key.auth();
    build_clients(config, http, auth).await?;
    // agency tokens are not signed with the key
    if !agency {
        *config.security_key.get_mut() = Some(key);
    }
    Ok(())
}

pub(crate) async fn fetch_security_key(http: &reqwest::Client, url: &str) -> Result<SecurityKey> {
    let response = http.get(url).send().await?.error_for_status()?;
    let body: CredentialBody = response.json().await?;
    let credential = body.credential;
    if credential.access.is_empty()
        || credential.secret.is_empty()
        || credential.securitytoken.is_empty()
        || credential.expires_at.is_empty()
    {
        bail!("Error fetching metadata authentication information");
    }
    let expires_at = OffsetDateTime::parse(&credential.expires_at, &Rfc3339)
        .with_context(|| format!("invalid expiry date {}", credential.expires_at))?;
    Ok(SecurityKey {
        access: credential.access,
        secret: credential.secret,
        security_token: credential.securitytoken,
        expires_at,
    })
}

/// Replace the credentials with temporary ones of the assumed agency and rebuild the clients
pub(super) async fn build_client_by_assume_role(
    config: &mut Config,
    http: &reqwest::Client,
    role: &AssumeRole,
) -> Result<()> {
    let base = config
        .hw_client
        .clone()
        .ok_or_else(|| anyhow!("the provider clients have not been initialized"))?;

    let mut assume_role = json!({
        "agency_name": role.agency_name,
        "duration_seconds": if role.duration > 0 { role.duration } else { ASSUME_ROLE_DURATION },
    });
    if !role.domain_id.is_empty() {
        assume_role["domain_id"] = json!(role.domain_id);
    }
    if !role.domain_name.is_empty() {
        assume_role["domain_name"] = json!(role.domain_name);
    }
    let body = json!({
        "auth": {
            "identity": {
                "methods": ["assume_role"],
                "assume_role": assume_role,
            }
        }
    });

    let iam = config
        .identity_endpoint
        .trim_end_matches('/')
        .trim_end_matches("/v3")
        .to_string();
    let url = format!("{iam}/v3.0/OS-CREDENTIAL/securitytokens");
    let mut client = base;
    client.project_id.clear();
    let response = client
        .request(Method::POST, &url, Some(serde_json::to_vec(&body)?))
        .await
        .with_context(|| format!("Error assuming the role {}", role.agency_name))?;
    let body: CredentialBody = response.json().await?;
    let credential = body.credential;
    if credential.access.is_empty() || credential.secret.is_empty() {
        bail!("Error assuming the role {}: empty credentials", role.agency_name);
    }

    info!(agency = role.agency_name, "using temporary credentials of the assumed role");
    config.access_key = credential.access;
    config.secret_key = credential.secret;
    config.security_token = credential.securitytoken;
    config.token.clear();
    // the project ids of the previous account do not apply any more
    config.region_project_ids.get_mut().clear();
    *config.security_key.get_mut() = None;
    config.obs_credentials.get_mut().take();

    let auth = aksk(config);
    build_clients(config, http, auth).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> Config {
        Config {
            region: "cn-north-4".into(),
            tenant_name: "cn-north-4".into(),
            identity_endpoint: format!("{}/v3", server.uri()),
            security_key_url: format!("{}/openstack/latest/securitykey", server.uri()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn aksk_with_project_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/projects"))
            .and(query_param("name", "cn-north-4"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{"id": "pid", "name": "cn-north-4"}]
            })))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.access_key = "AK".into();
        config.secret_key = "SK".into();
        config.domain_id = "did".into();
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        let client = config.hw_client.unwrap();
        assert_eq!(client.project_id, "pid");
        assert!(client.auth.is_aksk());
        assert_eq!(config.domain_client.unwrap().domain_id, "did");
    }

    #[tokio::test]
    async fn token_with_tenant_id() {
        let server = MockServer::start().await;
        let mut config = config(&server);
        config.token = "tok".into();
        config.tenant_id = "pid".into();
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        let client = config.hw_client.unwrap();
        assert_eq!(client.project_id, "pid");
        assert_eq!(client.auth, AuthMethod::Token("tok".into()));
    }

    #[tokio::test]
    async fn password_scoped_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(body_partial_json(json!({"auth": {"scope": {"project": {"name": "cn-north-4"}}}})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "project-token")
                    .set_body_json(json!({"token": {
                        "project": {"id": "pid"},
                        "user": {"domain": {"id": "did"}}
                    }})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(body_partial_json(json!({"auth": {"scope": {"domain": {"name": "acme"}}}})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "domain-token")
                    .set_body_json(json!({"token": {"user": {"domain": {"id": "did"}}}})),
            )
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.user_name = "alice".into();
        config.password = "secret".into();
        config.domain_name = "acme".into();
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        assert_eq!(config.domain_id, "did");
        let client = config.hw_client.unwrap();
        assert_eq!(client.project_id, "pid");
        assert_eq!(client.auth, AuthMethod::Token("project-token".into()));
        let domain = config.domain_client.unwrap();
        assert_eq!(domain.auth, AuthMethod::Token("domain-token".into()));
        assert_eq!(domain.domain_id, "did");
    }

    #[tokio::test]
    async fn agency_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(header("x-auth-token", "tok"))
            .and(body_partial_json(json!({"auth": {
                "identity": {"assume_role": {"agency_name": "ops", "domain_name": "other"}},
                "scope": {"project": {"name": "cn-east-3"}}
            }})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "agency-project")
                    .set_body_json(json!({"token": {"project": {"id": "delegated-pid"}}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .and(body_partial_json(json!({"auth": {"scope": {"domain": {"name": "other"}}}})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "agency-domain")
                    .set_body_json(json!({"token": {}})),
            )
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.token = "tok".into();
        config.agency_name = "ops".into();
        config.agency_domain_name = "other".into();
        config.delegated_project = "cn-east-3".into();
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        let client = config.hw_client.unwrap();
        assert_eq!(client.project_id, "delegated-pid");
        assert_eq!(client.auth, AuthMethod::Token("agency-project".into()));
        assert_eq!(
            config.domain_client.unwrap().auth,
            AuthMethod::Token("agency-domain".into())
        );
    }

    #[tokio::test]
    async fn metadata_security_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openstack/latest/securitykey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"credential": {
                "access": "TMPAK",
                "secret": "TMPSK",
                "securitytoken": "STS",
                "expires_at": "2030-01-01T00:00:00.000000Z"
            }})))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.tenant_id = "pid".into();
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        assert_eq!(config.access_key, "TMPAK");
        assert_eq!(config.security_token, "STS");
        assert_eq!(
            config.security_key.get_mut().as_ref().map(|key| key.expires_at.year()),
            Some(2030)
        );
        assert!(config.hw_client.unwrap().auth.is_aksk());
    }

    fn security_key_response(access: &str, expires_at: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"credential": {
            "access": access,
            "secret": format!("{access}-secret"),
            "securitytoken": format!("{access}-token"),
            "expires_at": expires_at
        }}))
    }

    #[tokio::test]
    async fn expired_security_key_is_reloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openstack/latest/securitykey"))
            .respond_with(security_key_response("OLDAK", "2020-01-01T00:00:00Z"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/openstack/latest/securitykey"))
            .respond_with(security_key_response("NEWAK", "2030-01-01T00:00:00Z"))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.tenant_id = "pid".into();
        config
            .endpoints
            .insert("vpc".into(), format!("{}/", server.uri()));
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();
        assert_eq!(config.access_key, "OLDAK");

        // the second client reuses the reloaded key
        for _ in 0..2 {
            let client = config.new_service_client("vpc", "cn-north-4").await.unwrap();
            match client.provider.auth {
                AuthMethod::AkSk {
                    access_key,
                    security_token,
                    ..
                } => {
                    assert_eq!(access_key, "NEWAK");
                    assert_eq!(security_token.as_deref(), Some("NEWAK-token"));
                }
                other => panic!("unexpected auth {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn security_key_reload_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openstack/latest/securitykey"))
            .respond_with(security_key_response("OLDAK", "2020-01-01T00:00:00Z"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.tenant_id = "pid".into();
        config
            .endpoints
            .insert("vpc".into(), format!("{}/", server.uri()));
        build_client(&mut config, &reqwest::Client::new()).await.unwrap();

        let err = config
            .new_service_client("vpc", "cn-north-4")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error reloading Auth credentials from ECS Metadata API"));
    }

    #[tokio::test]
    async fn metadata_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"credential": {"access": "AK"}})))
            .mount(&server)
            .await;

        let mut config = config(&server);
        let err = build_client(&mut config, &reqwest::Client::new())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Error fetching Auth credentials from ECS Metadata API"));
        assert!(msg.contains("Error fetching metadata authentication information"));
    }

    #[tokio::test]
    async fn assume_role_rebuilds_clients() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3.0/OS-CREDENTIAL/securitytokens"))
            .and(body_partial_json(json!({"auth": {"identity": {
                "methods": ["assume_role"],
                "assume_role": {"agency_name": "admin", "domain_name": "acme", "duration_seconds": 43200}
            }}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"credential": {
                "access": "ROLEAK",
                "secret": "ROLESK",
                "securitytoken": "ROLESTS",
                "expires_at": "2030-01-01T00:00:00Z"
            }})))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let mut config = config(&server);
        config.access_key = "AK".into();
        config.secret_key = "SK".into();
        config.tenant_id = "pid".into();
        build_client(&mut config, &http).await.unwrap();

        let role = AssumeRole {
            agency_name: "admin".into(),
            domain_name: "acme".into(),
            ..Default::default()
        };
        build_client_by_assume_role(&mut config, &http, &role)
            .await
            .unwrap();

        assert_eq!(config.access_key, "ROLEAK");
        match config.hw_client.unwrap().auth {
            AuthMethod::AkSk {
                access_key,
                security_token,
                ..
            } => {
                assert_eq!(access_key, "ROLEAK");
                assert_eq!(security_token.as_deref(), Some("ROLESTS"));
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }
}
