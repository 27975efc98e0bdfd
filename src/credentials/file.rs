use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ini::Ini;

use super::{CredentialProvider, Credentials};

/// Credentials from a profile of the shared `credentials` INI file
#[derive(Debug, Clone)]
pub struct SharedCredentialsProvider {
    path: PathBuf,
    profile: String,
}

impl SharedCredentialsProvider {
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            profile: profile.into(),
        }
    }

    /// `AWS_SHARED_CREDENTIALS_FILE` or `~/.aws/credentials`, profile `AWS_PROFILE` or `default`
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let var = |key: &str| env.get(key).filter(|v| !v.is_empty());
        let path = match var("AWS_SHARED_CREDENTIALS_FILE") {
            Some(path) => PathBuf::from(path),
            None => var("HOME")
                .or_else(|| var("USERPROFILE"))
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(".aws")
                .join("credentials"),
        };
        let profile = var("AWS_PROFILE").map_or("default", String::as_str);
        Self::new(path, profile)
    }
}

#[async_trait]
impl CredentialProvider for SharedCredentialsProvider {
    fn name(&self) -> &'static str {
        "SharedCredentialsProvider"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read shared credentials file {}", self.path.display()))?;
        let ini = Ini::load_from_str(&content)
            .with_context(|| format!("failed to parse shared credentials file {}", self.path.display()))?;
        let section = ini
            .section(Some(self.profile.as_str()))
            .ok_or_else(|| anyhow!("failed to get profile {}", self.profile))?;

        let get = |key: &str| section.get(key).unwrap_or_default().to_string();
        let access_key = get("aws_access_key_id");
        let secret_key = get("aws_secret_access_key");
        if access_key.is_empty() {
            bail!("shared credentials {} in {} did not contain aws_access_key_id", self.profile, self.path.display());
        }
        if secret_key.is_empty() {
            bail!("shared credentials {} in {} did not contain aws_secret_access_key", self.profile, self.path.display());
        }

        Ok(Credentials {
            provider_name: self.name(),
            ..Credentials::new(access_key, secret_key).with_session_token(get("aws_session_token"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CREDENTIALS: &str = "
# shared credentials
[default]
aws_access_key_id = DEFAULTAK
aws_secret_access_key = DEFAULTSK

[dev]
aws_access_key_id=DEVAK
aws_secret_access_key=DEVSK
aws_session_token = DEVTOKEN

[broken]
aws_access_key_id = ONLYAK
";

    fn credentials_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CREDENTIALS.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn profiles() {
        let file = credentials_file();

        let credentials = SharedCredentialsProvider::new(file.path(), "default")
            .retrieve()
            .await
            .unwrap();
        assert_eq!(credentials.access_key_id, "DEFAULTAK");
        assert_eq!(credentials.secret_access_key, "DEFAULTSK");
        assert_eq!(credentials.session_token, "");

        let env = HashMap::from([
            (
                "AWS_SHARED_CREDENTIALS_FILE".to_string(),
                file.path().to_string_lossy().into_owned(),
            ),
            ("AWS_PROFILE".to_string(), "dev".to_string()),
        ]);
        let credentials = SharedCredentialsProvider::from_env(&env)
            .retrieve()
            .await
            .unwrap();
        assert_eq!(credentials.access_key_id, "DEVAK");
        assert_eq!(credentials.session_token, "DEVTOKEN");
    }

    #[tokio::test]
    async fn comments_and_quoted_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"; leading comment\n[default]\naws_access_key_id = \"QUOTEDAK\"\n# inline section comment\naws_secret_access_key = SK\n")
            .unwrap();
        let credentials = SharedCredentialsProvider::new(file.path(), "default")
            .retrieve()
            .await
            .unwrap();
        assert_eq!(credentials.access_key_id, "QUOTEDAK");
        assert_eq!(credentials.secret_access_key, "SK");
    }

    #[tokio::test]
    async fn incomplete_or_missing_profile() {
        let file = credentials_file();
        let err = SharedCredentialsProvider::new(file.path(), "broken")
            .retrieve()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"));

        let err = SharedCredentialsProvider::new(file.path(), "prod")
            .retrieve()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to get profile prod");
    }

    #[test]
    fn default_location() {
        let env = HashMap::from([("HOME".to_string(), "/home/user".to_string())]);
        let provider = SharedCredentialsProvider::from_env(&env);
        assert_eq!(provider.path, PathBuf::from("/home/user/.aws/credentials"));
        assert_eq!(provider.profile, "default");
    }
}
