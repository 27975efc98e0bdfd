use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::{tls, Certificate, Identity};

use super::Config;

const USER_AGENT: &str = "terraform-provider-iac";

/// Read a value that may either be a path to a file or the content itself
pub(crate) async fn path_or_contents(value: &str) -> Result<String> {
    let path = expand_home(value);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("unable to read {}", path.display())),
        _ => Ok(value.to_string()),
    }
}

pub(crate) fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn user_agent() -> String {
    match std::env::var("HW_TF_CUSTOM_UA") {
        Ok(custom) if !custom.trim().is_empty() => format!("{} {USER_AGENT}", custom.trim()),
        _ => USER_AGENT.to_string(),
    }
}

/// Build the HTTP client shared by every service client
pub(crate) async fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent())
        .min_tls_version(tls::Version::TLS_1_2)
        .danger_accept_invalid_certs(config.insecure);

    if !config.cacert_file.is_empty() {
        let ca = path_or_contents(&config.cacert_file)
            .await
            .context("Error reading CA Cert")?;
        builder = builder.add_root_certificate(
            Certificate::from_pem(ca.as_bytes()).context("Error parsing CA Cert")?,
        );
    }

    if !config.client_cert_file.is_empty() && !config.client_key_file.is_empty() {
        let cert = path_or_contents(&config.client_cert_file)
            .await
            .context("Error reading Client Cert")?;
        let key = path_or_contents(&config.client_key_file)
            .await
            .context("Error reading Client Key")?;
        let identity = Identity::from_pem(format!("{cert}\n{key}").as_bytes())
            .context("Error parsing Client Cert and Key")?;
        builder = builder.identity(identity);
    }

    builder.build().context("unable to build the HTTP client")
}
