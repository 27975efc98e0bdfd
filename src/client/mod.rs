use std::fmt::Debug;
use std::time::Duration;

use percent_encoding::utf8_percent_encode;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

mod error;
pub mod signer;

pub use error::{Error, Result};
use signer::{Signer, UNRESERVED};

pub const HEADER_AUTH_TOKEN: &str = "x-auth-token";
pub const HEADER_SECURITY_TOKEN: &str = "x-security-token";
pub const HEADER_PROJECT_ID: &str = "x-project-id";
pub const HEADER_DOMAIN_ID: &str = "x-domain-id";

/// How requests are authenticated
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// IAM token sent as `X-Auth-Token`
    Token(String),
    /// Requests signed with an access key / secret key pair
    AkSk {
        access_key: String,
        secret_key: String,
        security_token: Option<String>,
    },
}

impl Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            AuthMethod::AkSk {
                access_key,
                security_token,
                ..
            } => f
                .debug_struct("AkSk")
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .field("security_token", &security_token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

impl AuthMethod {
    pub fn is_aksk(&self) -> bool {
        matches!(self, AuthMethod::AkSk { .. })
    }
}

/// Authenticated HTTP client scoped to a project or to the whole domain
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    pub identity_endpoint: String,
    pub auth: AuthMethod,
    pub project_id: String,
    pub domain_id: String,
    pub max_retries: u32,
    /// Unit of the backoff applied on `429 Too Many Requests`
    pub backoff_unit: Duration,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, identity_endpoint: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            http,
            identity_endpoint: identity_endpoint.into(),
            auth,
            project_id: String::new(),
            domain_id: String::new(),
            max_retries: 0,
            backoff_unit: Duration::from_secs(60),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send a request, retrying with an exponential backoff when the service throttles us
    pub async fn request(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<Response> {
        let mut retries = 0u32;
        loop {
            let req = self.build(method.clone(), url, body.clone())?;
            debug!(%method, url, "sending request");
            if let Some(body) = req.body().and_then(|b| b.as_bytes()) {
                trace!(body = %String::from_utf8_lossy(body), "request body");
            }

            let response = self.http.execute(req).await?;
            let status = response.status();
            debug!(%method, url, %status, "received response");

            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.max_retries {
                let minutes = 2u32.saturating_pow(retries).min(30);
                warn!("received too many requests response, sleeping {minutes} minute(s)");
                tokio::time::sleep(self.backoff_unit * minutes).await;
                retries += 1;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            let text = response.text().await?;
            return Err(Error::from_response(method, url, status, &text));
        }
    }

    fn build(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<Request> {
        let mut builder = self.http.request(method, url).header(ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }
        if !self.project_id.is_empty() {
            builder = builder.header(HEADER_PROJECT_ID, &self.project_id);
        } else if !self.domain_id.is_empty() {
            builder = builder.header(HEADER_DOMAIN_ID, &self.domain_id);
        }

        let mut req = builder.build()?;
        match &self.auth {
            AuthMethod::Token(token) => {
                req.headers_mut().insert(
                    HeaderName::from_static(HEADER_AUTH_TOKEN),
                    HeaderValue::from_str(token)?,
                );
            }
            AuthMethod::AkSk {
                access_key,
                secret_key,
                security_token,
            } => {
                if let Some(security_token) = security_token {
                    req.headers_mut().insert(
                        HeaderName::from_static(HEADER_SECURITY_TOKEN),
                        HeaderValue::from_str(security_token)?,
                    );
                }
                Signer::new(access_key, secret_key).sign(&mut req, OffsetDateTime::now_utc())?;
            }
        }
        Ok(req)
    }
}

/// Client bound to the endpoint of one service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    pub provider: ProviderClient,
    pub endpoint: String,
    /// Base of the resource URLs: `{endpoint}{version}/[{project_id}/][{resource_base}/]`
    pub resource_base: String,
}

impl ServiceClient {
    pub fn new(provider: ProviderClient, endpoint: String, resource_base: String) -> Self {
        Self {
            provider,
            endpoint,
            resource_base,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.provider.project_id
    }

    pub fn domain_id(&self) -> &str {
        &self.provider.domain_id
    }

    /// Build a URL below the resource base
    pub fn service_url(&self, parts: &[&str]) -> String {
        format!("{}{}", self.resource_base, parts.join("/"))
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.provider.request(Method::GET, url, None).await?;
        decode(response).await
    }

    pub async fn post<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.provider.request(Method::POST, url, Some(body)).await?;
        decode(response).await
    }

    pub async fn put<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.provider.request(Method::PUT, url, Some(body)).await?;
        decode(response).await
    }

    /// PUT without a request body, ignoring the response content
    pub async fn put_empty(&self, url: &str) -> Result<()> {
        self.provider.request(Method::PUT, url, None).await?;
        Ok(())
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        self.provider.request(Method::DELETE, url, None).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    trace!(body = %String::from_utf8_lossy(&bytes), "response body");
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Append query parameters to a URL, skipping the empty ones
pub fn with_query<'a, I>(url: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let query = params
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, UNRESERVED),
                utf8_percent_encode(v, UNRESERVED)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    match (query.is_empty(), url.contains('?')) {
        (true, _) => url.to_string(),
        (false, true) => format!("{url}&{query}"),
        (false, false) => format!("{url}?{query}"),
    }
}
