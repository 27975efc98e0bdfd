use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use reqwest::Request;
use sha2::{Digest, Sha256};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

use super::error::{Error, Result};

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const HEADER_X_DATE: &str = "x-sdk-date";
const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

/// Characters left untouched when encoding URI segments and query parameters
pub(crate) const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Sign requests with an access key / secret key pair (`SDK-HMAC-SHA256`)
#[derive(Clone)]
pub struct Signer<'a> {
    access_key: &'a str,
    secret_key: &'a str,
}

impl<'a> Signer<'a> {
    pub fn new(access_key: &'a str, secret_key: &'a str) -> Self {
        Self {
            access_key,
            secret_key,
        }
    }

    /// Add the `X-Sdk-Date`, `Host` and `Authorization` headers to the request
    pub fn sign(&self, req: &mut Request, now: OffsetDateTime) -> Result<()> {
        let date = now
            .format(DATE_FORMAT)
            .map_err(|err| Error::config(format!("unable to format signing date: {err}")))?;
        let host = match (req.url().host_str(), req.url().port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::config("cannot sign a request without host")),
        };

        let headers = req.headers_mut();
        headers.insert(HeaderName::from_static(HEADER_X_DATE), HeaderValue::from_str(&date)?);
        if !headers.contains_key(HOST) {
            headers.insert(HOST, HeaderValue::from_str(&host)?);
        }
        headers.remove(AUTHORIZATION);

        let mut signed: Vec<(String, String)> = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).trim().to_string(),
                )
            })
            .collect();
        signed.sort();

        let body = req
            .body()
            .and_then(|body| body.as_bytes())
            .unwrap_or_default();
        let canonical = canonical_request(req.method().as_str(), req.url(), &signed, body);
        let string_to_sign = string_to_sign(&canonical, &date);
        let signature = self.signature(&string_to_sign)?;

        let authorization = format!(
            "{ALGORITHM} Access={}, SignedHeaders={}, Signature={signature}",
            self.access_key,
            signed_headers(&signed),
        );
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        Ok(())
    }

    fn signature(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|err| Error::config(format!("invalid secret key: {err}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

pub(crate) fn canonical_request(
    method: &str,
    url: &reqwest::Url,
    headers: &[(String, String)],
    body: &[u8],
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{}\n{}",
        canonical_uri(url),
        canonical_query(url),
        signed_headers(headers),
        hex::encode(Sha256::digest(body)),
    )
}

pub(crate) fn string_to_sign(canonical_request: &str, date: &str) -> String {
    format!(
        "{ALGORITHM}\n{date}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

fn signed_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

fn canonical_uri(url: &reqwest::Url) -> String {
    let mut uri = url
        .path()
        .split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            utf8_percent_encode(&decoded, UNRESERVED).to_string()
        })
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(url: &reqwest::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, UNRESERVED).to_string(),
                utf8_percent_encode(&v, UNRESERVED).to_string(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn canonical_request_layout() {
        let url = reqwest::Url::parse(
            "https://vpc.cn-north-4.myhuaweicloud.com/v1/0123/vpcs?marker=a b&limit=10",
        )
        .unwrap();
        let headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            (
                "host".to_string(),
                "vpc.cn-north-4.myhuaweicloud.com".to_string(),
            ),
            ("x-sdk-date".to_string(), "20240102T030405Z".to_string()),
        ];

        let canonical = canonical_request("GET", &url, &headers, b"");
        assert_eq!(
            canonical,
            "GET\n\
             /v1/0123/vpcs/\n\
             limit=10&marker=a%20b\n\
             content-type:application/json\n\
             host:vpc.cn-north-4.myhuaweicloud.com\n\
             x-sdk-date:20240102T030405Z\n\
             \n\
             content-type;host;x-sdk-date\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let sts = string_to_sign(&canonical, "20240102T030405Z");
        let mut lines = sts.lines();
        assert_eq!(lines.next(), Some("SDK-HMAC-SHA256"));
        assert_eq!(lines.next(), Some("20240102T030405Z"));
        assert_eq!(lines.next().map(str::len), Some(64));
    }

    #[test]
    fn sign_request_headers() {
        let client = reqwest::Client::new();
        let mut req = client
            .post("https://iam.myhuaweicloud.com/v3.0/OS-AGENCY/agencies")
            .header("content-type", "application/json")
            .body(r#"{"agency":{}}"#)
            .build()
            .unwrap();

        Signer::new("AK", "SK")
            .sign(&mut req, datetime!(2024-01-02 03:04:05 UTC))
            .unwrap();

        assert_eq!(req.headers()["x-sdk-date"], "20240102T030405Z");
        assert_eq!(req.headers()["host"], "iam.myhuaweicloud.com");
        let auth = req.headers()["authorization"].to_str().unwrap();
        assert!(auth.starts_with(
            "SDK-HMAC-SHA256 Access=AK, SignedHeaders=content-type;host;x-sdk-date, Signature="
        ));

        // signing twice at the same instant is stable
        let first = auth.to_string();
        Signer::new("AK", "SK")
            .sign(&mut req, datetime!(2024-01-02 03:04:05 UTC))
            .unwrap();
        assert_eq!(req.headers()["authorization"].to_str().unwrap(), first);
    }
}
