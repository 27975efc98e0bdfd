use reqsign::{HuaweicloudObsCredential, HuaweicloudObsSigner};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Request;

use crate::client::{Error, Result};
use crate::credentials::Credentials;

pub const HEADER_SECURITY_TOKEN: &str = "x-obs-security-token";

/// Sign an OBS request with the v2 header signature of the bucket
///
/// The request is mirrored into an `http::Request` for the signer, then the
/// signed headers are copied back.
pub fn sign(req: &mut Request, credentials: &Credentials, bucket: &str) -> Result<()> {
    if !credentials.session_token.is_empty() {
        req.headers_mut().insert(
            HeaderName::from_static(HEADER_SECURITY_TOKEN),
            HeaderValue::from_str(&credentials.session_token)?,
        );
    }

    let mut signable = http::Request::builder()
        .method(req.method().clone())
        .uri(req.url().as_str())
        .body(())
        .map_err(|err| Error::config(format!("unable to sign the OBS request: {err}")))?;
    *signable.headers_mut() = req.headers().clone();

    let credential = HuaweicloudObsCredential {
        access_key_id: credentials.access_key_id.clone(),
        secret_access_key: credentials.secret_access_key.clone(),
        security_token: (!credentials.session_token.is_empty())
            .then(|| credentials.session_token.clone()),
    };
    HuaweicloudObsSigner::new(bucket)
        .sign(&mut signable, &credential)
        .map_err(|err| Error::config(format!("unable to sign the OBS request: {err}")))?;

    *req.headers_mut() = signable.headers().clone();
    Ok(())
}
