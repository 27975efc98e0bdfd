//! Minimal client of the OBS object storage service

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{Error, Result};
use crate::credentials::Credentials;

mod bucket_config;
pub mod signer;

pub use bucket_config::*;

pub const HEADER_ACL: &str = "x-obs-acl";
pub const HEADER_STORAGE_CLASS: &str = "x-obs-storage-class";
pub const HEADER_EPID: &str = "x-obs-epid";
pub const HEADER_LOCATION: &str = "x-obs-bucket-location";
const HEADER_CONTENT_MD5: &str = "content-md5";
/// Version id of the objects written while versioning was never enabled
const NULL_VERSION: &str = "null";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ObsErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CreateBucketConfiguration", rename_all = "PascalCase")]
struct CreateBucketConfiguration<'a> {
    location: &'a str,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "StorageClass")]
struct StorageClassBody {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "VersioningConfiguration", rename_all = "PascalCase")]
struct VersioningConfiguration {
    status: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename = "Quota", rename_all = "PascalCase")]
struct Quota {
    storage_quota: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ListVersionsResult {
    is_truncated: bool,
    next_key_marker: Option<String>,
    next_version_id_marker: Option<String>,
    #[serde(rename = "Version")]
    versions: Vec<ObjectVersion>,
    #[serde(rename = "DeleteMarker")]
    delete_markers: Vec<ObjectVersion>,
}

/// A version of an object, or a delete marker
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
}

/// Body of a request with its content type
struct Body {
    content_type: &'static str,
    content: String,
}

impl Body {
    fn xml<T: Serialize>(value: &T) -> Result<Self> {
        let content = quick_xml::se::to_string(value)
            .map_err(|err| Error::config(format!("unable to encode the request: {err}")))?;
        Ok(Self {
            content_type: "application/xml",
            content,
        })
    }

    fn json(content: &str) -> Self {
        Self {
            content_type: "application/json",
            content: content.to_string(),
        }
    }
}

/// Options of a bucket creation
#[derive(Debug, Clone, Default)]
pub struct CreateBucketInput {
    pub bucket: String,
    pub acl: String,
    pub storage_class: String,
    pub location: String,
    pub enterprise_project_id: String,
}

/// Metadata returned by `HEAD` on a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketMetadata {
    pub location: String,
    pub storage_class: String,
    pub enterprise_project_id: String,
}

#[derive(Debug, Clone)]
pub struct ObsClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
    path_style: bool,
}

impl ObsClient {
    pub fn new(http: reqwest::Client, endpoint: &str, credentials: Credentials) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| Error::config(format!("invalid OBS endpoint {endpoint}: {err}")))?;
        // IP addresses and localhost cannot carry the bucket in the host name
        let path_style = match (endpoint.host_str(), endpoint.domain()) {
            (None, _) => return Err(Error::config("the OBS endpoint has no host")),
            (Some(_), Some(domain)) => domain == "localhost",
            (Some(_), None) => true,
        };
        Ok(Self {
            http,
            endpoint,
            credentials,
            path_style,
        })
    }

    /// URL of a bucket (or of one of its objects), with an optional sub-resource query
    pub fn url(&self, bucket: &str, key: &str, query: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        if self.path_style {
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base}/{bucket}/{key}"));
        } else {
            let host = url
                .host_str()
                .map(|host| format!("{bucket}.{host}"))
                .ok_or_else(|| Error::config("the OBS endpoint has no host"))?;
            url.set_host(Some(&host))
                .map_err(|err| Error::config(format!("invalid bucket name {bucket}: {err}")))?;
            url.set_path(&format!("/{key}"));
        }
        url.set_query((!query.is_empty()).then_some(query));
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        query: &str,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response> {
        let url = self.url(bucket, key, query)?;
        let mut req = self.http.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            // configuration uploads (CORS, lifecycle, tagging) require the digest
            let digest = STANDARD.encode(Md5::digest(body.content.as_bytes()));
            req = req
                .header(CONTENT_TYPE, body.content_type)
                .header(HEADER_CONTENT_MD5, digest)
                .body(body.content);
        }
        let mut req = req.build()?;
        signer::sign(&mut req, &self.credentials, bucket)?;

        debug!(%method, %url, "sending OBS request");
        let response = self.http.execute(req).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await?;
        let body: ObsErrorBody = quick_xml::de::from_str(&text).unwrap_or_default();
        Err(Error::Status {
            method,
            url: url.to_string(),
            status,
            code: body.code,
            message: body.message,
        })
    }

    async fn get_xml<T: for<'de> Deserialize<'de>>(&self, bucket: &str, query: &str) -> Result<T> {
        let text = self
            .send(Method::GET, bucket, "", query, HeaderMap::new(), None)
            .await?
            .text()
            .await?;
        Ok(quick_xml::de::from_str(&text)?)
    }

    /// Like `get_xml`, `None` when the service answers with the `missing` error code
    async fn get_optional_xml<T: for<'de> Deserialize<'de>>(
        &self,
        bucket: &str,
        query: &str,
        missing: &str,
    ) -> Result<Option<T>> {
        match self.get_xml(bucket, query).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.code() == Some(missing) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_xml<T: Serialize>(&self, bucket: &str, query: &str, body: &T) -> Result<()> {
        let body = Body::xml(body)?;
        self.send(Method::PUT, bucket, "", query, HeaderMap::new(), Some(body))
            .await?;
        Ok(())
    }

    async fn delete_sub_resource(&self, bucket: &str, query: &str) -> Result<()> {
        self.send(Method::DELETE, bucket, "", query, HeaderMap::new(), None)
            .await?;
        Ok(())
    }

    pub async fn create_bucket(&self, input: &CreateBucketInput) -> Result<()> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (HEADER_ACL, &input.acl),
            (HEADER_STORAGE_CLASS, &input.storage_class),
            (HEADER_EPID, &input.enterprise_project_id),
        ] {
            if !value.is_empty() {
                headers.insert(HeaderName::from_static(name), HeaderValue::from_str(value)?);
            }
        }

        let body = if input.location.is_empty() {
            None
        } else {
            Some(Body::xml(&CreateBucketConfiguration {
                location: &input.location,
            })?)
        };
        self.send(Method::PUT, &input.bucket, "", "", headers, body)
            .await?;
        Ok(())
    }

    /// Metadata of a bucket, `None` when it does not exist
    pub async fn head_bucket(&self, bucket: &str) -> Result<Option<BucketMetadata>> {
        let response = match self
            .send(Method::HEAD, bucket, "", "", HeaderMap::new(), None)
            .await
        {
            Ok(response) => response,
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => return Ok(None),
            Err(err) => return Err(err),
        };
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Ok(Some(BucketMetadata {
            location: header(HEADER_LOCATION),
            storage_class: header(HEADER_STORAGE_CLASS),
            enterprise_project_id: header(HEADER_EPID),
        }))
    }

    pub async fn get_storage_class(&self, bucket: &str) -> Result<String> {
        let body: StorageClassBody = self.get_xml(bucket, "storageClass").await?;
        Ok(body.value)
    }

    pub async fn set_storage_class(&self, bucket: &str, class: &str) -> Result<()> {
        let body = StorageClassBody {
            value: class.to_string(),
        };
        self.put_xml(bucket, "storageClass", &body).await
    }

    pub async fn get_versioning(&self, bucket: &str) -> Result<bool> {
        let body: VersioningConfiguration = self.get_xml(bucket, "versioning").await?;
        Ok(body.status.as_deref() == Some("Enabled"))
    }

    pub async fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        let status = if enabled { "Enabled" } else { "Suspended" };
        let body = VersioningConfiguration {
            status: Some(status.to_string()),
        };
        self.put_xml(bucket, "versioning", &body).await
    }

    pub async fn get_quota(&self, bucket: &str) -> Result<i64> {
        let body: Quota = self.get_xml(bucket, "quota").await?;
        Ok(body.storage_quota)
    }

    pub async fn set_quota(&self, bucket: &str, quota: i64) -> Result<()> {
        self.put_xml(bucket, "quota", &Quota { storage_quota: quota })
            .await
    }

    pub async fn set_acl(&self, bucket: &str, acl: &str) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(HEADER_ACL), HeaderValue::from_str(acl)?);
        self.send(Method::PUT, bucket, "", "acl", headers, None)
            .await?;
        Ok(())
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.send(Method::DELETE, bucket, "", "", HeaderMap::new(), None)
            .await?;
        Ok(())
    }

    /// Every version of every object of the bucket, delete markers included
    ///
    /// Buckets that never had versioning report their objects with the `null` version.
    pub async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut markers: Vec<(&str, String)> = Vec::new();
        loop {
            let pairs = markers.iter().map(|(k, v)| (*k, v.as_str()));
            let query = crate::client::with_query("?versions", pairs);
            let page: ListVersionsResult = self.get_xml(bucket, query.trim_start_matches('?')).await?;
            versions.extend(page.versions);
            versions.extend(page.delete_markers);

            match page.next_key_marker.filter(|m| page.is_truncated && !m.is_empty()) {
                Some(key_marker) => {
                    markers = vec![("key-marker", key_marker)];
                    if let Some(version_marker) = page.next_version_id_marker.filter(|m| !m.is_empty()) {
                        markers.push(("version-id-marker", version_marker));
                    }
                }
                None => return Ok(versions),
            }
        }
    }

    /// Delete an object, or one of its versions
    pub async fn delete_object(&self, bucket: &str, key: &str, version_id: Option<&str>) -> Result<()> {
        let query = match version_id.filter(|v| !v.is_empty() && *v != NULL_VERSION) {
            Some(version) => crate::client::with_query("", [("versionId", version)])
                .trim_start_matches('?')
                .to_string(),
            None => String::new(),
        };
        self.send(Method::DELETE, bucket, key, &query, HeaderMap::new(), None)
            .await?;
        Ok(())
    }
}

/// Storage class as exposed in the configuration
pub fn normalize_storage_class(class: &str) -> &str {
    match class {
        "STANDARD_IA" => "WARM",
        "GLACIER" => "COLD",
        other => other,
    }
}
