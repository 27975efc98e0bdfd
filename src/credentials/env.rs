use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{CredentialProvider, Credentials};

/// Credentials from `HW_*` variables, falling back to the `AWS_*` ones
#[derive(Debug, Clone, Default)]
pub struct EnvProvider {
    env: HashMap<String, String>,
}

impl EnvProvider {
    pub fn new(env: HashMap<String, String>) -> Self {
        Self { env }
    }

    fn first(&self, keys: &[&str]) -> String {
        keys.iter()
            .filter_map(|key| self.env.get(*key))
            .find(|value| !value.is_empty())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "EnvProvider"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let (access_key, secret_key, token) = if self.env.contains_key("HW_ACCESS_KEY") {
            (
                self.first(&["HW_ACCESS_KEY"]),
                self.first(&["HW_SECRET_KEY"]),
                self.first(&["HW_SECURITY_TOKEN"]),
            )
        } else {
            (
                self.first(&["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"]),
                self.first(&["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"]),
                self.first(&["AWS_SESSION_TOKEN"]),
            )
        };

        if access_key.is_empty() {
            bail!("access key not found in environment");
        }
        if secret_key.is_empty() {
            bail!("secret key not found in environment");
        }

        Ok(Credentials {
            provider_name: self.name(),
            ..Credentials::new(access_key, secret_key).with_session_token(token)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(vars: &[(&str, &str)]) -> EnvProvider {
        EnvProvider::new(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn huaweicloud_variables_first() {
        let credentials = provider(&[
            ("HW_ACCESS_KEY", "HWAK"),
            ("HW_SECRET_KEY", "HWSK"),
            ("HW_SECURITY_TOKEN", "HWTOKEN"),
            ("AWS_ACCESS_KEY_ID", "AWSAK"),
            ("AWS_SECRET_ACCESS_KEY", "AWSSK"),
        ])
        .retrieve()
        .await
        .unwrap();
        assert_eq!(credentials.access_key_id, "HWAK");
        assert_eq!(credentials.secret_access_key, "HWSK");
        assert_eq!(credentials.session_token, "HWTOKEN");
    }

    #[tokio::test]
    async fn aws_fallback() {
        let credentials = provider(&[
            ("AWS_ACCESS_KEY", "AWSAK"),
            ("AWS_SECRET_ACCESS_KEY", "AWSSK"),
            ("AWS_SESSION_TOKEN", "AWSTOKEN"),
        ])
        .retrieve()
        .await
        .unwrap();
        assert_eq!(credentials.access_key_id, "AWSAK");
        assert_eq!(credentials.session_token, "AWSTOKEN");
    }

    #[tokio::test]
    async fn missing_secret() {
        let err = provider(&[("HW_ACCESS_KEY", "HWAK")])
            .retrieve()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "secret key not found in environment");
        assert!(provider(&[]).retrieve().await.is_err());
    }
}
